use std::{
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use core_affinity::CoreId;
use drillx::equix;
use pool_shared::types::{Challenge, NonceRange};
use tokio::sync::{mpsc, oneshot};
use tracing::*;

use crate::search::{NonceSearcher, SearchError, SearchResult};

pub(crate) struct UnitTask {
    pub challenge: Challenge,
    pub data: NonceRange,
    pub stop_time: Instant,
    pub reply: oneshot::Sender<SearchResult>,
}

/// drillx search running on a pool of OS threads, one pinned to each core.
///
/// Threads exit once the searcher is dropped.
pub struct DrillxSearcher {
    sender: mpsc::Sender<UnitTask>,
    cores: usize,
}

impl DrillxSearcher {
    pub fn start(cores: usize) -> Self {
        let cores = cores.max(1);
        let (sender, _) = CoreThread::start(cores);
        Self { sender, cores }
    }

    pub fn cores(&self) -> usize {
        self.cores
    }
}

#[async_trait]
impl NonceSearcher for DrillxSearcher {
    async fn search(
        &self,
        challenge: Challenge,
        budget: Duration,
        range: NonceRange,
    ) -> Result<SearchResult, SearchError> {
        let (reply, result) = oneshot::channel();
        let task = UnitTask { challenge, data: range, stop_time: Instant::now() + budget, reply };

        self.sender
            .send(task)
            .await
            .map_err(|_| SearchError::Fault("core threads are gone".to_string()))?;

        result.await.map_err(|_| SearchError::Fault("core thread dropped the task".to_string()))
    }
}

pub(crate) struct CoreThread {
    pub receiver: Arc<Mutex<mpsc::Receiver<UnitTask>>>,
}

impl CoreThread {
    pub fn start(cores: usize) -> (mpsc::Sender<UnitTask>, Vec<JoinHandle<()>>) {
        // task channel
        let (assign_tx, assign_rx) = mpsc::channel(cores * 2);

        let manager = CoreThread { receiver: Arc::new(Mutex::new(assign_rx)) };

        let mut handlers = vec![];
        for id in 0..cores {
            let handler = manager.run(id);
            handlers.push(handler);
        }

        (assign_tx, handlers)
    }

    pub(crate) fn run(&self, cid: usize) -> JoinHandle<()> {
        debug!("unit core: {:?}", cid);

        let receiver = self.receiver.clone();

        std::thread::spawn(move || {
            // bound thread to core
            let _ = core_affinity::set_for_current(CoreId { id: cid });

            let mut memory = equix::SolverMemory::new();

            loop {
                // receive task form channel
                let data = match receiver.lock() {
                    Ok(mut guard) => guard.blocking_recv(),
                    Err(_) => None,
                };

                let Some(task) = data else {
                    debug!("core: {cid}, task receiver closed");
                    return;
                };

                let UnitTask { challenge, data, stop_time, reply } = task;

                trace!("core: {cid}, task range: {data}");

                let result = search_range(&mut memory, &challenge, data, stop_time);

                trace!("core: {cid}, difficulty: {}", result.difficulty);

                // the dispatcher may have given up on this batch
                let _ = reply.send(result);
            }
        })
    }
}

fn search_range(
    memory: &mut equix::SolverMemory,
    challenge: &Challenge,
    data: NonceRange,
    stop_time: Instant,
) -> SearchResult {
    let mut best = SearchResult { nonce: data.start, ..Default::default() };

    let mut nonce = data.start;
    while nonce < data.end {
        for hx in drillx::hashes_with_memory(memory, challenge, &nonce.to_le_bytes()) {
            let diff = hx.difficulty();
            if diff.gt(&best.difficulty) {
                best.nonce = nonce;
                best.difficulty = diff;
                best.digest = hx.d;
            }
        }
        best.nonces_checked += 1;
        nonce += 1;

        if nonce % 5 == 0 && stop_time.le(&Instant::now()) {
            break;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_at_least_one_thread() {
        assert_eq!(DrillxSearcher::start(0).cores(), 1);
        assert_eq!(DrillxSearcher::start(3).cores(), 3);
    }
}
