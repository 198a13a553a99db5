use std::time::Duration;

use common::error::{AiError, AppError};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token-bucket rate limiter guarding outbound AI calls. One instance is
/// shared process-wide per external dependency.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    max_wait: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    #[must_use]
    pub fn new(rate_per_sec: u32, max_wait: Duration) -> Self {
        let rate = f64::from(rate_per_sec.max(1));
        Self {
            capacity: rate,
            refill_per_sec: rate,
            max_wait,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available or `max_wait` elapses, whichever
    /// comes first. Returns `AiError::RateLimited` on timeout.
    pub async fn acquire(&self) -> Result<(), AppError> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
            }

            if Instant::now() >= deadline {
                return Err(AppError::Ai(AiError::RateLimited {
                    waited: self.max_wait,
                }));
            }

            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_allows_burst_up_to_capacity() {
        let bucket = TokenBucket::new(3, Duration::from_millis(200));
        assert!(bucket.acquire().await.is_ok());
        assert!(bucket.acquire().await.is_ok());
        assert!(bucket.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn bucket_rejects_after_depleted_and_wait_exceeded() {
        let bucket = TokenBucket::new(1, Duration::from_millis(50));
        assert!(bucket.acquire().await.is_ok());
        let result = bucket.acquire().await;
        assert!(matches!(
            result,
            Err(AppError::Ai(AiError::RateLimited { .. }))
        ));
    }
}
