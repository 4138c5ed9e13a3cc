//! Splits a round's nonce space into per-worker batches and runs them together.

use std::{sync::Arc, time::Duration};

use futures_util::future::try_join_all;
use pool_shared::types::{Challenge, NonceRange};
use tokio::time::Instant;
use tracing::*;

use crate::search::{NonceSearcher, SearchError, SearchResult};

/// Nonces handed to each worker per dispatch.
pub const NONCES_PER_THREAD: u64 = 10_000;

/// Upper bound on a single batch's time budget.
pub const MAX_BATCH_TIME: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkBatch {
    pub range: NonceRange,
    pub ceiling: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub nonces_checked: u64,
    pub best: Option<SearchResult>,
    pub elapsed: Duration,
}

impl DispatchOutcome {
    /// Nonces per second. Falls back to the raw count when no time was measured.
    pub fn hash_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.nonces_checked as f64 / secs
        } else {
            self.nonces_checked as f64
        }
    }
}

/// Cut `workers` batches off the front of `range`, all sharing one ceiling.
pub fn plan_batches(range: &mut NonceRange, workers: usize, remaining: Duration) -> Vec<WorkBatch> {
    let ceiling = remaining.min(MAX_BATCH_TIME);
    range
        .take_front(workers.max(1), NONCES_PER_THREAD)
        .into_iter()
        .map(|range| WorkBatch { range, ceiling })
        .collect()
}

/// Highest difficulty wins, the earliest result keeps a tie.
pub fn pick_best<'a, I>(results: I) -> Option<&'a SearchResult>
where
    I: IntoIterator<Item = &'a SearchResult>, {
    results.into_iter().fold(None, |best, item| {
        match best {
            Some(current) if item.difficulty <= current.difficulty => Some(current),
            _ => Some(item),
        }
    })
}

pub struct Dispatcher {
    searcher: Arc<dyn NonceSearcher>,
}

impl Dispatcher {
    pub fn new(searcher: Arc<dyn NonceSearcher>) -> Self {
        Self { searcher }
    }

    /// Run one dispatch cycle and advance `range` past the nonces it handed out.
    ///
    /// All batches must succeed; a single failed batch fails the cycle.
    pub async fn dispatch(
        &self,
        challenge: Challenge,
        range: &mut NonceRange,
        remaining: Duration,
        workers: usize,
    ) -> Result<DispatchOutcome, SearchError> {
        let batches = plan_batches(range, workers, remaining);
        debug!(
            "dispatch {} batches from {} with ceiling {:?}",
            batches.len(),
            batches[0].range.start,
            batches[0].ceiling
        );

        let start = Instant::now();

        let results = try_join_all(
            batches
                .iter()
                .map(|batch| self.searcher.search(challenge, batch.ceiling, batch.range)),
        )
        .await?;

        let elapsed = start.elapsed();
        let nonces_checked = results.iter().map(|item| item.nonces_checked).sum();
        let best = pick_best(&results).cloned();

        Ok(DispatchOutcome { nonces_checked, best, elapsed })
    }
}
