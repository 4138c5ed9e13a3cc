use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::*;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const STALL_THRESHOLD: Duration = Duration::from_secs(120);

/// Time of the last assignment or result processed on the connection.
#[derive(Debug, Clone)]
pub struct Activity(Arc<Mutex<Instant>>);

impl Activity {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn touch(&self) {
        let mut guard = self.0.lock().unwrap_or_else(|err| err.into_inner());
        *guard = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        let guard = self.0.lock().unwrap_or_else(|err| err.into_inner());
        guard.elapsed()
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `closer` once `activity` has been quiet for longer than
/// [`STALL_THRESHOLD`]. Resolves to `true` if it fired, `false` if the
/// connection was closed by someone else first.
pub fn spawn(activity: Activity, closer: CancellationToken) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let mut ticker = interval(CHECK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = closer.cancelled() => return false,
                _ = ticker.tick() => {
                    let elapsed = activity.elapsed();
                    if elapsed > STALL_THRESHOLD {
                        warn!("no pool activity for {}s, closing connection", elapsed.as_secs());
                        closer.cancel();
                        return true;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_threshold() {
        let activity = Activity::new();
        let closer = CancellationToken::new();
        let start = Instant::now();

        let fired = spawn(activity, closer.clone()).await.unwrap();

        assert!(fired);
        assert!(closer.is_cancelled());
        let waited = start.elapsed();
        assert!(waited > STALL_THRESHOLD);
        assert!(waited <= STALL_THRESHOLD + CHECK_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_closing() {
        let activity = Activity::new();
        let closer = CancellationToken::new();
        let handle = spawn(activity.clone(), closer.clone());

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(100)).await;
            activity.touch();
        }
        assert!(!closer.is_cancelled());

        closer.cancel();
        assert!(!handle.await.unwrap());
    }
}
