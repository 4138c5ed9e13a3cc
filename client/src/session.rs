//! Connection lifecycle of one mining session.
//!
//! ```text
//! Idle -> Authenticating -> Streaming <-> MiningRound
//!                              |
//!          any error ------> Backoff -> Idle (or Stopped once keep-mining is off)
//! ```
//!
//! The session is the only writer of round state and metrics. The watchdog and
//! the orchestrator talk to it through cancellation tokens and atomics.

use std::{sync::Arc, time::Duration};

use pool_shared::{
    errors::{DecodeError, IdentityError},
    identity::{basic_auth, Identity},
    interaction::{Assignment, ClientMessage, PoolResult, ReadyMessage, ServerMessage, SubmissionReport},
    types::{Challenge, NonceRange},
    utils::{format_duration, unix_timestamp},
};
use thiserror::Error;
use tokio::{sync::watch, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::*;

use crate::{
    config::MiningConfig,
    dispatcher::Dispatcher,
    metrics::{MiningMetrics, SessionState},
    recorder::{MiningRecord, ResultRecorder},
    search::{NonceSearcher, SearchError, SearchResult},
    stream::{Connection, PoolTransport, StreamCommand, StreamError, StreamMessage},
    watchdog::{self, Activity},
};

/// Pause between a dropped connection and the next authentication.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// A round ends once this little of its cutoff is left.
pub const CUTOFF_MARGIN: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport: {0}")]
    Transport(#[from] StreamError),
    #[error("protocol: {0}")]
    Protocol(#[from] DecodeError),
    #[error("precondition: {0}")]
    Precondition(#[from] IdentityError),
    #[error("{0}")]
    Search(#[from] SearchError),
    #[error("no pool activity for {}s", .0.as_secs())]
    Stalled(Duration),
}

impl SessionError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, SessionError::Precondition(_))
    }
}

/// State of the assignment being mined.
#[derive(Debug, Clone)]
pub struct Round {
    pub challenge: Challenge,
    pub range: NonceRange,
    pub remaining: Duration,
    pub best: Option<SearchResult>,
}

impl Round {
    pub fn new(assignment: &Assignment) -> Self {
        Self {
            challenge: assignment.challenge,
            range: assignment.nonce_range,
            remaining: Duration::from_secs(assignment.cutoff),
            best: None,
        }
    }

    /// Keep `candidate` if it beats the current best. Ties keep the older one.
    pub fn offer(&mut self, candidate: &SearchResult) -> bool {
        let improved = match &self.best {
            Some(best) => candidate.difficulty > best.difficulty,
            None => true,
        };
        if improved {
            self.best = Some(candidate.clone());
        }
        improved
    }

    pub fn consume(&mut self, elapsed: Duration) {
        self.remaining = self.remaining.saturating_sub(elapsed);
    }

    pub fn is_over(&self) -> bool {
        self.remaining <= CUTOFF_MARGIN || self.range.is_exhausted()
    }

    pub fn best_difficulty(&self) -> u32 {
        self.best.as_ref().map(|best| best.difficulty).unwrap_or_default()
    }
}

pub struct Session {
    transport: Arc<dyn PoolTransport>,
    identity: Arc<dyn Identity>,
    dispatcher: Dispatcher,
    recorder: Arc<dyn ResultRecorder>,
    config: Arc<MiningConfig>,
    metrics: Arc<watch::Sender<MiningMetrics>>,
    state: Arc<watch::Sender<SessionState>>,
    activity: Activity,
    shutdown: CancellationToken,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn PoolTransport>,
        identity: Arc<dyn Identity>,
        searcher: Arc<dyn NonceSearcher>,
        recorder: Arc<dyn ResultRecorder>,
        config: Arc<MiningConfig>,
        metrics: Arc<watch::Sender<MiningMetrics>>,
        state: Arc<watch::Sender<SessionState>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            identity,
            dispatcher: Dispatcher::new(searcher),
            recorder,
            config,
            metrics,
            state,
            activity: Activity::new(),
            shutdown,
        }
    }

    /// Keep a connection to the pool alive until stopped.
    pub async fn run(self) {
        info!("mining session started");

        loop {
            if self.should_stop() {
                break;
            }

            self.set_state(SessionState::Authenticating);
            match self.connect_and_stream().await {
                Ok(()) => debug!("connection closed"),
                Err(err) if err.is_precondition() => {
                    error!("{err}, mining stopped");
                    self.config.set_keep_mining(false);
                }
                Err(err) => error!("{err}"),
            }

            if self.should_stop() {
                break;
            }

            self.set_state(SessionState::Backoff);
            warn!("server disconnected, retries in {} seconds", RECONNECT_DELAY.as_secs());
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(RECONNECT_DELAY) => {}
            }
            self.set_state(SessionState::Idle);
        }

        self.set_state(SessionState::Stopped);
        info!("mining session stopped");
    }

    fn should_stop(&self) -> bool {
        self.shutdown.is_cancelled() || !self.config.keep_mining()
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    async fn connect_and_stream(&self) -> Result<(), SessionError> {
        let timestamp = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            res = self.transport.timestamp() => res?,
        };

        let authorization = basic_auth(self.identity.as_ref(), timestamp)?;

        let mut conn = tokio::select! {
            _ = self.shutdown.cancelled() => return Ok(()),
            res = self.transport.connect(timestamp, &authorization) => res?,
        };

        info!("ws connect to the server");

        // closed by the watchdog or by stop()
        let closer = self.shutdown.child_token();
        self.activity.touch();
        let watchdog = watchdog::spawn(self.activity.clone(), closer.clone());

        self.set_state(SessionState::Streaming);

        let res = match self.send_ready(&conn).await {
            Ok(()) => self.stream(&mut conn, &closer).await,
            Err(err) => Err(err),
        };

        closer.cancel();
        let _ = watchdog.await;
        drop(conn);

        res
    }

    /// Why `closer` fired: an explicit stop is a clean exit, anything else the watchdog.
    fn closed_reason(&self) -> Result<(), SessionError> {
        if self.shutdown.is_cancelled() {
            Ok(())
        } else {
            Err(SessionError::Stalled(self.activity.elapsed()))
        }
    }

    async fn stream(
        &self,
        conn: &mut Connection,
        closer: &CancellationToken,
    ) -> Result<(), SessionError> {
        loop {
            let message = tokio::select! {
                _ = closer.cancelled() => return self.closed_reason(),
                message = conn.recv() => message,
            };

            let Some(message) = message else {
                return Err(StreamError::Closed.into());
            };

            match message {
                StreamMessage::Ping(ping) => conn.send(StreamCommand::Pong(ping)).await?,
                StreamMessage::Frame(frame) => {
                    match ServerMessage::decode(&frame) {
                        Ok(ServerMessage::Assignment(assignment)) => {
                            self.activity.touch();
                            self.mine_round(assignment, conn, closer).await?;
                        }
                        Ok(ServerMessage::PoolResult(result)) => {
                            self.activity.touch();
                            self.handle_pool_result(result);
                        }
                        Ok(ServerMessage::Unknown(tag)) => debug!("skip frame with type {tag}"),
                        Err(err) if err.is_fatal() => return Err(err.into()),
                        Err(err) => debug!("skip frame: {err}"),
                    }
                }
            }
        }
    }

    async fn mine_round(
        &self,
        assignment: Assignment,
        conn: &Connection,
        closer: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut round = Round::new(&assignment);

        info!(
            "challenge: `{}` cutoff: {} nonces: {}",
            bs58::encode(round.challenge).into_string(),
            format_duration(assignment.cutoff),
            round.range
        );

        self.set_state(SessionState::MiningRound);
        self.metrics.send_modify(|metrics| {
            metrics.current_difficulty = 0;
            metrics.rounds += 1;
        });

        while !round.is_over() {
            let workers = self.config.workers();

            let outcome = tokio::select! {
                _ = closer.cancelled() => return self.closed_reason(),
                _ = conn.closed() => return Err(StreamError::Closed.into()),
                res = self.dispatcher.dispatch(round.challenge, &mut round.range, round.remaining, workers) => res?,
            };

            round.consume(outcome.elapsed);
            // each finished cycle counts as activity
            self.activity.touch();

            if let Some(best) = outcome.best.as_ref() {
                if round.offer(best) {
                    self.send_submission(conn, best).await?;
                }
            }

            let hash_rate = outcome.hash_rate();
            let difficulty = round.best_difficulty();
            debug!(
                "workers: {workers}, hashrate: {hash_rate:.2} H/s, best difficulty: {difficulty}, left: {}s",
                round.remaining.as_secs()
            );
            self.metrics.send_modify(|metrics| {
                metrics.hash_rate = hash_rate;
                metrics.current_difficulty = difficulty;
            });
        }

        self.send_ready(conn).await?;
        self.set_state(SessionState::Streaming);
        Ok(())
    }

    async fn send_ready(&self, conn: &Connection) -> Result<(), SessionError> {
        let ready = ReadyMessage::sign(self.identity.as_ref(), unix_timestamp())?;
        conn.send_frame(ClientMessage::Ready(ready).into()).await?;
        debug!("ready for next challenge");
        Ok(())
    }

    async fn send_submission(
        &self,
        conn: &Connection,
        best: &SearchResult,
    ) -> Result<(), SessionError> {
        let report = SubmissionReport::sign(self.identity.as_ref(), best.digest, best.nonce)?;
        conn.send_frame(ClientMessage::Submission(report).into()).await?;

        info!("submit difficulty: {} nonce: {}", best.difficulty, best.nonce);
        self.metrics.send_modify(|metrics| {
            metrics.last_reported_difficulty = best.difficulty;
            metrics.submissions += 1;
        });
        Ok(())
    }

    fn handle_pool_result(&self, result: PoolResult) {
        debug!("pool result, active miners: {}", result.active_miners);
        self.recorder.record(MiningRecord::from(&result));
        self.metrics.send_modify(|metrics| metrics.pool = Some(result));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(difficulty: u32, nonce: u64) -> SearchResult {
        SearchResult { difficulty, nonce, ..Default::default() }
    }

    fn assignment(cutoff: u64) -> Assignment {
        Assignment { challenge: [1; 32], cutoff, nonce_range: NonceRange::new(0, u64::MAX) }
    }

    #[test]
    fn best_only_moves_up() {
        let mut round = Round::new(&assignment(60));
        let mut submitted = vec![];

        for (difficulty, nonce) in [(5, 1), (5, 2), (3, 3), (9, 4), (9, 5), (12, 6), (1, 7)] {
            let before = round.best_difficulty();
            if round.offer(&result(difficulty, nonce)) {
                submitted.push(nonce);
            }
            assert!(round.best_difficulty() >= before);
        }

        assert_eq!(submitted, vec![1, 4, 6]);
        assert_eq!(round.best.unwrap().nonce, 6);
    }

    #[test]
    fn round_ends_at_margin() {
        let mut round = Round::new(&assignment(12));
        assert!(!round.is_over());

        round.consume(Duration::from_secs(9));
        assert!(!round.is_over());

        round.consume(Duration::from_secs(1));
        assert!(round.is_over());

        round.consume(Duration::from_secs(30));
        assert_eq!(round.remaining, Duration::ZERO);
    }

    #[test]
    fn exhausted_range_ends_round() {
        let mut round = Round::new(&Assignment {
            challenge: [0; 32],
            cutoff: 60,
            nonce_range: NonceRange::new(0, 5_000),
        });
        round.range.take_front(1, 10_000);
        assert!(round.is_over());
    }

    #[test]
    fn short_cutoff_is_over_immediately() {
        assert!(Round::new(&assignment(2)).is_over());
        assert!(!Round::new(&assignment(3)).is_over());
    }
}
