//! Bounded exponential backoff for adapter retries.
//!
//! Only errors the taxonomy marks retryable (`MemvaultError::is_retryable`)
//! are retried; conflicts and missing records fail immediately. Jitter uses
//! system-time nanos as a seed, so no `rand` dependency is needed.

use memvault_types::{MemvaultError, MemvaultResult};
use tracing::{debug, warn};

/// Backoff shape for a retry loop.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Attempts including the first try.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub min_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor in [0.0, 1.0]; the sleep is scaled by
    /// `1 + random_fraction * jitter`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_delay_ms: 200,
            max_delay_ms: 10_000,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retrying after the given 0-indexed attempt.
    ///
    /// `min(min_delay * 2^attempt, max_delay)`, jittered, re-capped.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let base = self
            .min_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let capped = base.min(self.max_delay_ms);
        if self.jitter <= 0.0 {
            return capped;
        }
        let with_jitter = (capped as f64) * (1.0 + time_seeded_fraction() * self.jitter);
        (with_jitter as u64).min(self.max_delay_ms)
    }
}

/// Pseudo-random fraction in [0, 1) from current system-time nanos.
/// Not cryptographic; good enough to decorrelate retry storms.
fn time_seeded_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    let mixed = nanos.wrapping_mul(2654435761); // Knuth multiplicative hash
    (mixed as f64) / (u32::MAX as f64)
}

/// How a retry loop ended when it did not succeed.
#[derive(Debug)]
pub struct RetryFailure {
    /// Error from the final attempt.
    pub last_error: MemvaultError,
    /// Attempts actually made.
    pub attempts: u32,
}

/// Run an async operation under the policy, retrying retryable errors.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &BackoffPolicy,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = MemvaultResult<T>>,
{
    let max = policy.max_attempts.max(1);
    for attempt in 0..max {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => {
                let is_last = attempt + 1 >= max;
                if is_last || !err.is_retryable() {
                    if !err.is_retryable() {
                        debug!(attempt = attempt + 1, error = %err, "error not retryable, giving up");
                    } else {
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = max,
                            error = %err,
                            "retry budget exhausted"
                        );
                    }
                    return Err(RetryFailure {
                        last_error: err,
                        attempts: attempt + 1,
                    });
                }
                let delay = policy.delay_ms(attempt);
                debug!(attempt = attempt + 1, delay_ms = delay, error = %err, "retrying");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
        }
    }
    unreachable!("loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvault_types::StoreKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn transient() -> MemvaultError {
        MemvaultError::StoreUnavailable {
            store: StoreKind::Vector,
            reason: "down".to_string(),
        }
    }

    #[test]
    fn test_delay_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_attempts: 8,
            min_delay_ms: 100,
            max_delay_ms: 500,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_ms(0), 100);
        assert_eq!(policy.delay_ms(1), 200);
        assert_eq!(policy.delay_ms(2), 400);
        assert_eq!(policy.delay_ms(3), 500);
        assert_eq!(policy.delay_ms(30), 500);
    }

    #[test]
    fn test_jitter_stays_capped() {
        let policy = BackoffPolicy {
            max_attempts: 4,
            min_delay_ms: 400,
            max_delay_ms: 500,
            jitter: 1.0,
        };
        for attempt in 0..10 {
            assert!(policy.delay_ms(attempt) <= 500);
        }
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            min_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result = retry_with_backoff(&policy, move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            min_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<(), _> = retry_with_backoff(&policy, move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(MemvaultError::Conflict("m".to_string()))
            }
        })
        .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            min_delay_ms: 1,
            max_delay_ms: 5,
            jitter: 0.0,
        };
        let result: Result<(), _> =
            retry_with_backoff(&policy, || async { Err(transient()) }).await;
        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.last_error.is_retryable());
    }
}
