pub mod config;
pub mod dispatcher;
pub mod manager;
pub mod metrics;
pub mod recorder;
pub mod restful;
pub mod search;
pub mod session;
pub mod stream;
pub mod thread;
pub mod watchdog;

pub use manager::MiningManager;
pub use metrics::{MiningMetrics, SessionState};
