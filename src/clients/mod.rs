//! Platform connectors.
//!
//! A connector performs exactly one upstream attempt per call; retries and
//! rate limiting are applied by the fetch orchestrator around it.

pub mod reddit;
pub mod webhook;

use crate::domain::{FetchParams, PlatformItem};

pub use reddit::RedditClient;
pub use webhook::WebhookClient;

/// Pseudo-target used when a search names no targets.
pub const GLOBAL_TARGET: &str = "all";

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Worth retrying: timeouts, dropped connections, 5xx and 429 responses.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Retrying cannot help: bad target, forbidden, malformed response.
    #[error("upstream failure: {0}")]
    Fatal(String),
}

impl ConnectorError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        let transient = e.is_timeout()
            || e.is_connect()
            || e.is_request()
            || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429);

        if transient {
            Self::Transient(e.to_string())
        } else {
            Self::Fatal(e.to_string())
        }
    }
}

#[async_trait::async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Platform name recorded with every item, e.g. `reddit`.
    fn source(&self) -> &'static str;

    /// Items (posts) for one target.
    async fn fetch_items(
        &self,
        target: &str,
        params: &FetchParams,
    ) -> Result<Vec<PlatformItem>, ConnectorError>;

    /// Sub-items (comments) for one item.
    async fn fetch_sub_items(
        &self,
        item: &PlatformItem,
        params: &FetchParams,
    ) -> Result<Vec<PlatformItem>, ConnectorError>;
}
