use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::engine::EngineError;

/// Bounded retry of transient failures with linear backoff. Every other
/// error is returned on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!("{what}: attempt {attempt} failed ({e}), retrying");
                    metrics::counter!(crate::observability::STORE_RETRIES_TOTAL, "op" => what)
                        .increment(1);
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast(3)
            .run("flaky", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::StoreTimeout)
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(2)
            .run("down", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Unavailable("users service".into()))
            })
            .await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast(5)
            .run("invalid", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Invalid("rating out of range"))
            })
            .await;
        assert!(matches!(result, Err(EngineError::Invalid(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
