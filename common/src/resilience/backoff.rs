use std::future::Future;
use std::time::Duration;

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::warn;

/// Tuning knobs for `retry_with_backoff`, mirroring `EtlConfig`'s retry
/// fields so callers can build one straight from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub backoff_cap_exponent: u32,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 1,
            max_delay_secs: 300,
            backoff_cap_exponent: 6,
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Exponential-with-jitter delay schedule for the retries following a
    /// first attempt: `max_attempts - 1` delays, doubling each step and
    /// capped at whichever is smaller, `max_delay_secs` or
    /// `base_delay_secs * 2^backoff_cap_exponent`.
    pub(crate) fn strategy(&self) -> impl Iterator<Item = Duration> {
        let base_delay_ms = self.base_delay_secs.saturating_mul(1000).max(1);
        let capped_growth_secs = 2_u64
            .saturating_pow(self.backoff_cap_exponent)
            .saturating_mul(self.base_delay_secs);
        let effective_max_delay_secs = capped_growth_secs.min(self.max_delay_secs).max(1);

        ExponentialBackoff::from_millis(2)
            .factor(base_delay_ms)
            .max_delay(Duration::from_secs(effective_max_delay_secs))
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Retries `operation` on `policy`'s exponential-backoff-with-jitter
/// schedule, giving up and returning the last error once the schedule is
/// exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: BackoffPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempt = std::sync::atomic::AtomicU32::new(0);
    Retry::spawn(policy.strategy(), move || {
        let attempt_no = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(err) => {
                    warn!(
                        operation = operation_name,
                        attempt = attempt_no,
                        error = %err,
                        "retrying after transient failure"
                    );
                    Err(err)
                }
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay_secs: 1,
            max_delay_secs: 300,
            backoff_cap_exponent: 6,
            max_attempts: 3,
        }
    }

    #[test]
    fn strategy_yields_one_fewer_delay_than_max_attempts() {
        let p = policy();
        let delays: Vec<_> = p.strategy().collect();
        assert_eq!(delays.len(), (p.max_attempts - 1) as usize);
    }

    #[test]
    fn strategy_caps_growth_at_the_backoff_exponent() {
        let p = BackoffPolicy {
            base_delay_secs: 100,
            max_delay_secs: 10_000,
            backoff_cap_exponent: 1,
            max_attempts: 5,
        };
        // capped_growth = 100 * 2^1 = 200s, well under max_delay_secs.
        for d in p.strategy() {
            assert!(d.as_secs() <= 200, "delay exceeded cap: {d:?}");
        }
    }

    #[tokio::test]
    async fn retry_with_backoff_returns_first_success() {
        let mut calls = 0;
        let result: Result<u32, &str> = retry_with_backoff(policy(), "test_op", || {
            calls += 1;
            async move { Ok(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_with_backoff_exhausts_attempts_and_returns_last_error() {
        let mut calls = 0;
        let fast_policy = BackoffPolicy {
            base_delay_secs: 0,
            max_delay_secs: 0,
            backoff_cap_exponent: 0,
            max_attempts: 3,
        };

        let result: Result<u32, &str> = retry_with_backoff(fast_policy, "test_op", || {
            calls += 1;
            async move { Err("still failing") }
        })
        .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(calls, 3);
    }
}
