use std::sync::{Arc, Mutex};

use pool_shared::identity::Identity;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    config::MiningConfig,
    metrics::{MiningMetrics, SessionState},
    recorder::ResultRecorder,
    search::NonceSearcher,
    session::Session,
    stream::PoolTransport,
};

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Entry point for starting, stopping and watching a mining session.
///
/// Every call returns immediately; the protocol runs on a spawned task, so
/// `start` must be called from inside a tokio runtime.
pub struct MiningManager {
    transport: Arc<dyn PoolTransport>,
    identity: Arc<dyn Identity>,
    searcher: Arc<dyn NonceSearcher>,
    recorder: Arc<dyn ResultRecorder>,
    config: Arc<MiningConfig>,
    metrics: Arc<watch::Sender<MiningMetrics>>,
    state: Arc<watch::Sender<SessionState>>,
    running: Mutex<Option<Running>>,
}

impl MiningManager {
    pub fn new(
        transport: Arc<dyn PoolTransport>,
        identity: Arc<dyn Identity>,
        searcher: Arc<dyn NonceSearcher>,
        recorder: Arc<dyn ResultRecorder>,
        config: Arc<MiningConfig>,
    ) -> Self {
        let (metrics, _) = watch::channel(MiningMetrics::default());
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            identity,
            searcher,
            recorder,
            config,
            metrics: Arc::new(metrics),
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    /// Start mining. Does nothing while a session is already running.
    pub fn start(&self) {
        let mut guard = self.running.lock().unwrap_or_else(|err| err.into_inner());

        if let Some(running) = guard.as_ref() {
            if !running.shutdown.is_cancelled() && !running.handle.is_finished() {
                debug!("mining session already running");
                return;
            }
        }

        self.config.set_keep_mining(true);

        let shutdown = CancellationToken::new();
        let session = Session::new(
            self.transport.clone(),
            self.identity.clone(),
            self.searcher.clone(),
            self.recorder.clone(),
            self.config.clone(),
            self.metrics.clone(),
            self.state.clone(),
            shutdown.clone(),
        );

        // a stopped session may still be closing its connection
        let previous = guard.take().map(|running| running.handle);
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            session.run().await
        });

        *guard = Some(Running { shutdown, handle });
        info!("mining started with {}/{} workers", self.config.workers(), self.config.max_workers());
    }

    /// Stop mining and close the connection. The session winds down in the background.
    pub fn stop(&self) {
        self.config.set_keep_mining(false);

        let guard = self.running.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(running) = guard.as_ref() {
            running.shutdown.cancel();
            info!("mining stop requested");
        }
    }

    /// Stop and wait for the session task to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let running = {
            let mut guard = self.running.lock().unwrap_or_else(|err| err.into_inner());
            guard.take()
        };
        if let Some(running) = running {
            if let Err(err) = running.handle.await {
                error!("mining session task failed: {err}");
            }
        }
    }

    /// Applies from the next dispatch cycle. Returns the clamped value.
    pub fn set_worker_count(&self, workers: usize) -> usize {
        let workers = self.config.set_workers(workers);
        info!("worker count set to {workers}");
        workers
    }

    pub fn is_running(&self) -> bool {
        let guard = self.running.lock().unwrap_or_else(|err| err.into_inner());
        guard
            .as_ref()
            .map(|running| !running.shutdown.is_cancelled() && !running.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn metrics(&self) -> MiningMetrics {
        self.metrics.borrow().clone()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<MiningMetrics> {
        self.metrics.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}
