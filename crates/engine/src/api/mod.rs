//! Data-source clients: centralized JSON API and GraphQL subgraph

pub mod data_api;
pub mod paginate;
pub mod subgraph;

pub use data_api::{ApiMarket, ApiTrade, DataApiClient};
pub use paginate::{fetch_all_pages, PageOutcome, PagedSource};
pub use subgraph::{MarketData, OrderFilledEvent, SubgraphClient, SubgraphMeta, UserBalance};

use thiserror::Error;

/// Error taxonomy shared by both fetchers.
///
/// Rate limits are surfaced distinctly and never retried inline; 5xx statuses
/// are retryable by the caller on the next cycle.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited,

    #[error("not found")]
    NotFound,

    #[error("http status {0}")]
    Http(u16),

    #[error("graphql error: {0}")]
    Graphql(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Map a non-success HTTP status to the taxonomy
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => FetchError::RateLimited,
            404 => FetchError::NotFound,
            code => FetchError::Http(code),
        }
    }

    /// True for errors worth retrying on the next cycle (5xx, transport)
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(code) => *code >= 500,
            FetchError::Transport(_) => true,
            _ => false,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            FetchError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            FetchError::RateLimited
        ));
        assert!(matches!(
            FetchError::from_status(reqwest::StatusCode::NOT_FOUND),
            FetchError::NotFound
        ));
        assert!(matches!(
            FetchError::from_status(reqwest::StatusCode::BAD_GATEWAY),
            FetchError::Http(502)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(FetchError::Http(500).is_retryable());
        assert!(FetchError::Http(503).is_retryable());
        assert!(!FetchError::Http(400).is_retryable());
        assert!(!FetchError::RateLimited.is_retryable());
        assert!(!FetchError::NotFound.is_retryable());
    }
}
