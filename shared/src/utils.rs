use std::{future::Future, time::Duration};

use tokio::time::sleep;

/// ORE token decimals, used to turn human amounts into base units.
pub const TOKEN_DECIMALS: u8 = 11;

pub async fn retry<T, E, F, Fut>(retry_fn: F, max_retries: u32, delay: u64) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    F: Fn() -> Fut,
    E: std::fmt::Display, {
    let mut retries = 0;
    let d = Duration::from_millis(delay);
    loop {
        match retry_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if retries < max_retries => {
                retries += 1;
                tracing::debug!("retry {retries}/{max_retries}: {err}");
                sleep(d).await;
            }
            Err(err) => {
                return Err(err);
            }
        }
    }
}

/// Seconds since the unix epoch, clamped to zero for clocks set before 1970.
pub fn unix_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

pub fn amount_u64_to_f64(amount: u64) -> f64 {
    (amount as f64) / 10f64.powi(TOKEN_DECIMALS as i32)
}

pub fn amount_f64_to_u64(amount: f64) -> u64 {
    (amount * 10f64.powi(TOKEN_DECIMALS as i32)) as u64
}

pub fn format_duration(seconds: u64) -> String {
    let minutes = seconds / 60;
    let remaining_seconds = seconds % 60;
    format!("{:02}:{:02}", minutes, remaining_seconds)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn amount_conversion() {
        assert_eq!(amount_f64_to_u64(1.5), 150_000_000_000);
        assert_eq!(amount_u64_to_f64(25_000_000_000), 0.25);
    }

    #[test]
    fn duration_format() {
        assert_eq!(format_duration(75), "01:15");
        assert_eq!(format_duration(5), "00:05");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_gives_up_after_max() {
        let calls = AtomicU32::new(0);
        let res: Result<(), String> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope".to_string()) }
            },
            3,
            100,
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let res: Result<u32, String> = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(format!("attempt {n}"))
                    } else {
                        Ok(n)
                    }
                }
            },
            5,
            100,
        )
        .await;
        assert_eq!(res, Ok(2));
    }
}
