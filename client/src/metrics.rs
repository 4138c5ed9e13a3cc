use pool_shared::interaction::PoolResult;

/// Where the session currently sits in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Authenticating,
    Streaming,
    MiningRound,
    Backoff,
    Stopped,
}

/// Values external observers can read while a session runs.
///
/// Only the session writes these. During backoff they keep their last values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiningMetrics {
    /// nonces per second over the last dispatch cycle
    pub hash_rate: f64,
    /// best difficulty of the round in progress
    pub current_difficulty: u32,
    pub last_reported_difficulty: u32,
    /// last pool wide result received
    pub pool: Option<PoolResult>,
    pub rounds: u64,
    pub submissions: u64,
}
