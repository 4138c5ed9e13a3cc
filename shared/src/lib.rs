pub mod errors;
pub mod identity;
pub mod interaction;
pub mod log;
pub mod types;
pub mod utils;

pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
