//! HTTP client for the maps ranking provider.
//!
//! Wraps `reqwest` with bearer-key auth, status handling, and envelope
//! validation. Every call goes through [`retry_with_backoff`], so transient
//! failures are absorbed here and only permanent ones reach the caller.

use std::time::Duration;

use gridrank_core::AppConfig;
use reqwest::{header, Client, StatusCode, Url};

use crate::error::ProviderError;
use crate::retry::retry_with_backoff;
use crate::types::{collect_items, SearchBody, SearchEnvelope, SearchItem, SearchRequest, STATUS_OK};

const SEARCH_PATH: &str = "v1/maps/search";

/// Client for the maps ranking provider's REST API.
///
/// Use [`MapsClient::new`] with an explicit base URL (tests point it at a
/// wiremock server) or [`MapsClient::from_config`] in binaries.
#[derive(Clone)]
pub struct MapsClient {
    client: Client,
    api_key: Option<String>,
    search_url: Url,
    max_retries: u32,
    backoff_base_ms: u64,
}

impl std::fmt::Debug for MapsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapsClient")
            .field("search_url", &self.search_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl MapsClient {
    /// Creates a client rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Http`] if the `reqwest::Client` cannot be
    /// built, or [`ProviderError::InvalidBaseUrl`] if `base_url` does not
    /// parse.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
        backoff_base_ms: u64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("gridrank/0.1 (rank-tracking)")
            .build()?;

        // Exactly one trailing slash so `join` appends instead of replacing
        // the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let search_url = Url::parse(&normalised)
            .and_then(|u| u.join(SEARCH_PATH))
            .map_err(|e| ProviderError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key,
            search_url,
            max_retries,
            backoff_base_ms,
        })
    }

    /// Builds a client from the provider section of [`AppConfig`].
    ///
    /// # Errors
    ///
    /// See [`MapsClient::new`].
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        if config.provider_api_key.is_none() {
            tracing::warn!("GRIDRANK_PROVIDER_API_KEY is not set; provider calls will be unauthenticated");
        }
        Self::new(
            &config.provider_base_url,
            config.provider_api_key.clone(),
            config.provider_timeout_secs,
            config.provider_max_retries,
            config.provider_retry_backoff_base_ms,
        )
    }

    #[must_use]
    pub fn search_url(&self) -> &Url {
        &self.search_url
    }

    /// Runs one ranking query, retrying transient failures.
    ///
    /// Returns validated organic items sorted by rank. An empty list is a
    /// valid answer (nothing ranks at this coordinate).
    ///
    /// # Errors
    ///
    /// - [`ProviderError::RateLimited`] / [`ProviderError::UnexpectedStatus`]
    ///   when retries are exhausted or the status is permanent.
    /// - [`ProviderError::ApiError`] if the envelope status is not success.
    /// - [`ProviderError::Deserialize`] if the body is not a valid envelope.
    /// - [`ProviderError::Http`] on network failure.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchItem>, ProviderError> {
        retry_with_backoff(self.max_retries, self.backoff_base_ms, || {
            self.search_once(request)
        })
        .await
    }

    async fn search_once(&self, request: &SearchRequest) -> Result<Vec<SearchItem>, ProviderError> {
        let mut builder = self
            .client
            .post(self.search_url.clone())
            .json(&SearchBody::from(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(ProviderError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.search_url.to_string(),
            });
        }

        let body = response.text().await?;
        let envelope: SearchEnvelope =
            serde_json::from_str(&body).map_err(|e| ProviderError::Deserialize {
                context: format!("maps search(keyword={})", request.keyword),
                source: e,
            })?;

        if envelope.status_code != STATUS_OK {
            return Err(ProviderError::ApiError {
                code: envelope.status_code,
                message: envelope
                    .status_message
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(collect_items(
            &request.keyword,
            envelope.items.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_appends_path_to_base() {
        let client = MapsClient::new("https://api.mapsrank.example", None, 30, 0, 0).unwrap();
        assert_eq!(
            client.search_url().as_str(),
            "https://api.mapsrank.example/v1/maps/search"
        );
    }

    #[test]
    fn search_url_keeps_base_path_prefix() {
        let client = MapsClient::new("http://localhost:9000/proxy/", None, 30, 0, 0).unwrap();
        assert_eq!(
            client.search_url().as_str(),
            "http://localhost:9000/proxy/v1/maps/search"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = MapsClient::new("not a url", None, 30, 0, 0).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let client =
            MapsClient::new("https://api.mapsrank.example", Some("secret".into()), 30, 0, 0)
                .unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[redacted]"));
    }
}
