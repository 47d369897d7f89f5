use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, RETRY_AFTER, WWW_AUTHENTICATE},
        HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

const API_KEYS_VAR: &str = "GRIDRANK_API_KEYS";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

type KeyDigest = [u8; 32];

/// Bearer auth settings. Keys are held only as salted SHA-256 digests.
#[derive(Clone)]
pub struct AuthState {
    key_digests: Arc<Vec<KeyDigest>>,
    salt: Arc<str>,
    pub enabled: bool,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("keys", &self.key_digests.len())
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl AuthState {
    /// Builds auth config from `GRIDRANK_API_KEYS` (comma-separated bearer
    /// tokens).
    ///
    /// In development, empty/missing keys disable auth for local iteration.
    /// In non-development envs, empty/missing keys fail startup.
    pub fn from_env(is_development: bool, salt: Option<&str>) -> anyhow::Result<Self> {
        let raw = std::env::var(API_KEYS_VAR).unwrap_or_default();
        Self::from_raw(&raw, is_development, salt)
    }

    pub fn from_raw(raw: &str, is_development: bool, salt: Option<&str>) -> anyhow::Result<Self> {
        let keys: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if keys.is_empty() {
            if is_development {
                tracing::warn!(
                    "{API_KEYS_VAR} not set; bearer auth disabled in development environment"
                );
                return Ok(Self::disabled());
            }

            anyhow::bail!(
                "{API_KEYS_VAR} is required outside development; provide comma-separated bearer tokens"
            );
        }

        Ok(Self::with_keys(keys, salt.unwrap_or_default()))
    }

    #[must_use]
    pub fn with_keys<'a>(keys: impl IntoIterator<Item = &'a str>, salt: &str) -> Self {
        let key_digests = keys.into_iter().map(|k| digest(salt, k)).collect();
        Self {
            key_digests: Arc::new(key_digests),
            salt: Arc::from(salt),
            enabled: true,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            key_digests: Arc::new(Vec::new()),
            salt: Arc::from(""),
            enabled: false,
        }
    }

    /// Compares against every stored digest without short-circuiting.
    fn allows(&self, token: &str) -> bool {
        let candidate = digest(&self.salt, token);
        let matched = self
            .key_digests
            .iter()
            .fold(subtle::Choice::from(0u8), |acc, stored| {
                acc | stored.as_slice().ct_eq(candidate.as_slice())
            });
        bool::from(matched)
    }
}

fn digest(salt: &str, key: &str) -> KeyDigest {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// Requests seen for one client in the current window.
#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    used: usize,
}

/// Fixed-window limiter shared by all protected routes, counted per bearer
/// token (requests without one share a single bucket).
#[derive(Debug, Clone)]
pub struct RateLimitState {
    max_requests: usize,
    window: Duration,
    clients: Arc<Mutex<HashMap<String, Window>>>,
}

/// Client windows kept before expired ones are swept.
const MAX_TRACKED_CLIENTS: usize = 1024;
const ANONYMOUS_CLIENT: &str = "anonymous";

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request for `client`, or returns how long until its window
    /// reopens.
    async fn admit(&self, client: &str, now: Instant) -> Result<(), Duration> {
        let mut clients = self.clients.lock().await;
        if clients.len() >= MAX_TRACKED_CLIENTS {
            clients.retain(|_, w| now.duration_since(w.opened) < self.window);
        }

        let window = clients.entry(client.to_string()).or_insert(Window {
            opened: now,
            used: 0,
        });
        if now.duration_since(window.opened) >= self.window {
            *window = Window {
                opened: now,
                used: 0,
            };
        }
        if window.used >= self.max_requests {
            return Err(self.window.saturating_sub(now.duration_since(window.opened)));
        }
        window.used += 1;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    error: Rejection,
}

#[derive(Debug, Serialize)]
struct Rejection {
    code: &'static str,
    message: &'static str,
}

fn reject(status: StatusCode, code: &'static str, message: &'static str) -> Response {
    (
        status,
        Json(RejectionBody {
            error: Rejection { code, message },
        }),
    )
        .into_response()
}

/// Longest caller-supplied request id that is echoed back.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Tags each request with a [`RequestId`] extension and an `x-request-id`
/// response header. A well-formed incoming `x-request-id` is reused;
/// anything else is replaced with a fresh `UUIDv4`.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| is_usable_request_id(v))
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_owned);

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut res = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    res
}

fn is_usable_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Rejects requests without a configured bearer key. A no-op when auth is
/// disabled.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.enabled {
        return next.run(req).await;
    }

    match extract_bearer_token(req.headers().get(AUTHORIZATION)) {
        Some(token) if auth.allows(token) => next.run(req).await,
        _ => {
            let mut res = reject(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid bearer token",
            );
            res.headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            res
        }
    }
}

pub async fn enforce_rate_limit(
    State(rate_limit): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let client = extract_bearer_token(req.headers().get(AUTHORIZATION))
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string();

    match rate_limit.admit(&client, Instant::now()).await {
        Ok(()) => next.run(req).await,
        Err(reopens_in) => {
            let mut res = reject(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded",
            );
            let secs = reopens_in.as_secs().max(1);
            if let Ok(val) = HeaderValue::from_str(&secs.to_string()) {
                res.headers_mut().insert(RETRY_AFTER, val);
            }
            res
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header. The scheme is
/// matched case-insensitively.
fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    let value = value?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
