//! Maps ranking provider client.
//!
//! [`RankingProvider`] is the seam the scan engine depends on; [`MapsClient`]
//! is the HTTP implementation. Tests substitute scripted providers.

pub mod client;
pub mod error;
pub(crate) mod retry;
pub mod types;

use std::future::Future;
use std::sync::Arc;

pub use client::MapsClient;
pub use error::ProviderError;
pub use types::{zoom_for_radius, SearchItem, SearchRequest};

/// Source of ranked local-search results for a keyword at a coordinate.
pub trait RankingProvider: Send + Sync {
    /// Returns validated organic results sorted by rank.
    fn search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<SearchItem>, ProviderError>> + Send;
}

impl RankingProvider for MapsClient {
    fn search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<SearchItem>, ProviderError>> + Send {
        MapsClient::search(self, request)
    }
}

impl<P: RankingProvider> RankingProvider for Arc<P> {
    fn search(
        &self,
        request: &SearchRequest,
    ) -> impl Future<Output = Result<Vec<SearchItem>, ProviderError>> + Send {
        P::search(self, request)
    }
}
