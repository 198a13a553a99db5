use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Explicit circuit breaker state machine wrapping a single external
/// dependency (warehouse, sink, AI endpoint). `closed -> open -> half-open
/// -> closed`. State is process-wide for the dependency it guards: one
/// breaker instance per external dependency, shared across callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_duration: Duration,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            open_duration,
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            state: Mutex::new(CircuitState::Closed),
        }
    }

    /// Whether a call may proceed right now. Transitions `Open -> HalfOpen`
    /// once the cooldown has elapsed, allowing a single probe through.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn allow_call(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                let elapsed = now_millis().saturating_sub(opened_at);
                if elapsed >= duration_to_millis(self.open_duration) {
                    *state = CircuitState::HalfOpen;
                    info!(circuit = %self.name, "circuit breaker entering half-open probe");
                    true
                } else {
                    false
                }
            }
        }
    }

    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn state(&self) -> CircuitState {
        *self.state.lock().unwrap()
    }

    /// Record a successful call. Closes the circuit from `HalfOpen`, and
    /// resets the consecutive-failure counter.
    #[allow(clippy::unwrap_used)]
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let mut state = self.state.lock().unwrap();
        if *state != CircuitState::Closed {
            info!(circuit = %self.name, "circuit breaker closed after successful probe");
        }
        *state = CircuitState::Closed;
    }

    /// Record a failed call. Trips the circuit open once
    /// `failure_threshold` consecutive failures accrue, or immediately if
    /// the failure happened during a half-open probe.
    #[allow(clippy::unwrap_used)]
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == CircuitState::HalfOpen {
            self.trip(&mut state);
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            self.trip(&mut state);
        }
    }

    fn trip(&self, state: &mut CircuitState) {
        *state = CircuitState::Open;
        self.opened_at_millis.store(now_millis(), Ordering::Release);
        warn!(circuit = %self.name, "circuit breaker opened");
    }
}

fn now_millis() -> u64 {
    // Monotonic offset from process start, not wall-clock time; used only
    // for comparing durations within this process's lifetime.
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_breaker_allows_calls() {
        let breaker = CircuitBreaker::new("ai-endpoint", 3, Duration::from_secs(60));
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn breaker_trips_after_threshold_failures() {
        let breaker = CircuitBreaker::new("ai-endpoint", 3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_call());
    }

    #[test]
    fn breaker_reopens_on_failed_half_open_probe() {
        let breaker = CircuitBreaker::new("ai-endpoint", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow_call());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn breaker_closes_on_successful_probe() {
        let breaker = CircuitBreaker::new("ai-endpoint", 1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.allow_call());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
