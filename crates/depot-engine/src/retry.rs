//! # Busy Retry
//!
//! Runs a whole engine operation again when SQLite reports the database as
//! busy. Sub-steps are never retried: the failed attempt's transaction has
//! already been dropped, so the next attempt starts from a clean state.
//!
//! ```text
//! attempt ──► Ok ─────────────────────────────────► return
//!    │
//!    └──► Err(Busy) ──► sleep(next_backoff) ──► attempt   (≤ max_retries)
//!    │
//!    └──► Err(other) ─────────────────────────────► return
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::EngineResult;

/// Retry policy for whole operations.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retries are used up.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            match op().await {
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying busy operation"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_busy_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast(3)
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::Busy("database is locked".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let result: EngineResult<()> = fast(2)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Busy("database is locked".into()))
            })
            .await;

        assert!(matches!(result, Err(EngineError::Busy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: EngineResult<()> = fast(5)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::not_found("Voucher", "v1"))
            })
            .await;

        assert!(matches!(result, Err(EngineError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
