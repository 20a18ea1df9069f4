//! Time-related helpers.
//!
//! Wraps `tokio::time` for sleeping and timeouts, and adds wall-clock helpers
//! used when stamping `date_modified`/`last_modified` columns.

pub use std::time::Duration;
pub use tokio::time::{error::Elapsed as TimeoutError, interval, sleep, timeout, Instant, Interval};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}

/// Delay for the given zero-based retry attempt, doubling from `initial`.
///
/// The exponent is capped so large attempt counts cannot overflow.
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    initial.saturating_mul(2u32.saturating_pow(attempt.min(16)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        let initial = Duration::from_millis(100);
        assert_eq!(backoff_delay(initial, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(initial, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(initial, 3), Duration::from_millis(800));
    }

    #[test]
    fn backoff_saturates() {
        let initial = Duration::from_secs(1);
        assert_eq!(backoff_delay(initial, 100), backoff_delay(initial, 16));
    }

    #[test]
    fn now_secs_is_consistent_with_millis() {
        let millis = now_millis();
        let secs = now_secs();
        assert!(secs >= millis / 1000);
    }
}
