//! Retry with exponential backoff and full jitter.
//!
//! Only transient failures are retried: transport/connection/timeout errors
//! and HTTP statuses in `[500, 600)` or `429`. Exhaustion is surfaced as a
//! distinct [`EngineError::RetryExhausted`] wrapping the final cause.

use std::time::Duration;

use tracing::warn;

use crate::error::{EngineError, Result};

/// Backoff parameters for [`retry_async`].
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt as i32);
        let raw = self.base_delay.as_secs_f64() * exp;
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter {
            capped * (0.5 + rand::random::<f64>())
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}

/// Whether an error is worth retrying.
pub fn is_retriable(err: &EngineError) -> bool {
    match err {
        EngineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        EngineError::HttpStatus { status, .. } => (500..600).contains(status) || *status == 429,
        EngineError::Storage(sqlx::Error::PoolTimedOut) => true,
        EngineError::Storage(sqlx::Error::Io(_)) => true,
        EngineError::DeadlineExceeded => false,
        _ => false,
    }
}

/// Run `op` until it succeeds, the error is non-retriable, or attempts run
/// out.
///
/// `op_name` labels the warning logs emitted between attempts.
pub async fn retry_async<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<EngineError> = None;

    for attempt in 0..=policy.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) {
                    warn!(op = op_name, error = %err, "non-retriable error");
                    return Err(err);
                }
                if attempt == policy.max_retries {
                    last_error = Some(err);
                    break;
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient failure"
                );
                last_error = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(EngineError::RetryExhausted {
        attempts: policy.max_retries,
        source: Box::new(last_error.unwrap_or(EngineError::Fetch("retry loop exhausted".into()))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> EngineError {
        EngineError::HttpStatus {
            status: 503,
            url: "http://example.com".into(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_async(fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn exhaustion_wraps_last_cause() {
        let result: Result<()> =
            retry_async(fast_policy(), "test", || async { Err(transient()) }).await;
        match result {
            Err(EngineError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(
                    *source,
                    EngineError::HttpStatus { status: 503, .. }
                ));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retriable_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_async(fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Validation("bad input".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_code_retriability() {
        assert!(is_retriable(&EngineError::HttpStatus {
            status: 500,
            url: String::new()
        }));
        assert!(is_retriable(&EngineError::HttpStatus {
            status: 429,
            url: String::new()
        }));
        assert!(!is_retriable(&EngineError::HttpStatus {
            status: 404,
            url: String::new()
        }));
        assert!(!is_retriable(&EngineError::Validation("x".into())));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(20), Duration::from_secs(60));
    }
}
