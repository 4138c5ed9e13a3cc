use std::time::Duration;

use async_trait::async_trait;
use pool_shared::types::{Challenge, NonceRange};
use thiserror::Error;

/// Best hash one search call found inside its nonce slice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub digest: [u8; 16],
    pub nonce: u64,
    pub difficulty: u32,
    pub nonces_checked: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("search fault: {0}")]
    Fault(String),
}

/// The proof-of-work primitive.
///
/// Implementations scan `range` for `challenge` until the range is exhausted or
/// `budget` has passed, whichever comes first.
#[async_trait]
pub trait NonceSearcher: Send + Sync {
    async fn search(
        &self,
        challenge: Challenge,
        budget: Duration,
        range: NonceRange,
    ) -> Result<SearchResult, SearchError>;
}
