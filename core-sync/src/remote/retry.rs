//! Bounded exponential backoff for remote calls

use std::future::Future;

use bridge_traits::error::{BridgeError, Result as BridgeResult};
use core_async::time::{backoff_delay, sleep, Duration};
use tracing::warn;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the second attempt; doubled after each further failure.
    pub initial_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// Cancellation is never retried.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(BridgeError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Remote call failed"
                    );
                    if attempt + 1 < self.max_attempts {
                        sleep(backoff_delay(self.initial_delay, attempt)).await;
                    }
                }
            }
        }

        Err(SyncError::RetriesExhausted {
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), max_attempts)
    }

    #[core_async::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let value = fast(5)
            .run("list_albums", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BridgeError::OperationFailed("503".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[core_async::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(5)
            .run("list_albums", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BridgeError::Unauthorized("expired".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(SyncError::RetriesExhausted { attempts, message }) => {
                assert_eq!(attempts, 5);
                assert!(message.contains("expired"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[core_async::test]
    async fn test_cancellation_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(5)
            .run("get_album", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BridgeError::Cancelled) }
            })
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
