use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

/// Plain-atomic counters for a single run, reported through `tracing` events
/// rather than a metrics backend: alerting is a capability consumers can
/// plug in, not a dependency on any specific backend.
#[derive(Default)]
pub struct ProgressCounters {
    pub rows_extracted: AtomicU64,
    pub rows_upserted: AtomicU64,
    pub rows_quarantined: AtomicU64,
    pub ai_calls: AtomicU64,
    pub ai_tokens_prompt: AtomicU64,
    pub ai_tokens_completion: AtomicU64,
    ai_cost_usd_millicents: AtomicU64,
}

impl ProgressCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_extracted(&self, count: u64) {
        self.rows_extracted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_upserted(&self, count: u64) {
        self.rows_upserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_quarantined(&self, count: u64) {
        self.rows_quarantined.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_ai_call(&self, prompt_tokens: u64, completion_tokens: u64, cost_usd: f64) {
        self.ai_calls.fetch_add(1, Ordering::Relaxed);
        self.ai_tokens_prompt
            .fetch_add(prompt_tokens, Ordering::Relaxed);
        self.ai_tokens_completion
            .fetch_add(completion_tokens, Ordering::Relaxed);
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let millicents = (cost_usd * 100_000.0).round() as u64;
        self.ai_cost_usd_millicents
            .fetch_add(millicents, Ordering::Relaxed);
    }

    #[must_use]
    pub fn ai_cost_usd(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let total = self.ai_cost_usd_millicents.load(Ordering::Relaxed) as f64;
        total / 100_000.0
    }

    /// Rows-per-second throughput over the given elapsed wall time.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate_rows_per_sec(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.rows_upserted.load(Ordering::Relaxed) as f64 / secs
    }

    /// Estimated seconds remaining given a total row count and the current
    /// throughput; `None` if throughput is zero or the run is already done.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta_seconds(&self, total_rows: u64, elapsed: Duration) -> Option<f64> {
        let done = self.rows_upserted.load(Ordering::Relaxed);
        if done >= total_rows {
            return None;
        }
        let rate = self.rate_rows_per_sec(elapsed);
        if rate <= 0.0 {
            return None;
        }
        Some((total_rows - done) as f64 / rate)
    }

    pub fn log_snapshot(&self, run_id: &str) {
        info!(
            run_id,
            rows_extracted = self.rows_extracted.load(Ordering::Relaxed),
            rows_upserted = self.rows_upserted.load(Ordering::Relaxed),
            rows_quarantined = self.rows_quarantined.load(Ordering::Relaxed),
            ai_calls = self.ai_calls.load(Ordering::Relaxed),
            ai_tokens_prompt = self.ai_tokens_prompt.load(Ordering::Relaxed),
            ai_tokens_completion = self.ai_tokens_completion.load(Ordering::Relaxed),
            ai_cost_usd = self.ai_cost_usd(),
            "progress snapshot"
        );
    }
}

/// An alert raised by the progress reporter: cost threshold, error rate,
/// circuit breaker opening, SLO breach.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub run_id: String,
    pub kind: AlertKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CostThresholdExceeded,
    ErrorRateExceeded,
    CircuitBreakerOpen,
    SlowRun,
}

/// Pluggable delivery for alerts; the orchestrator depends on this trait,
/// not on any specific backend.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert);
}

/// Default sink: a structured `tracing` event, always active regardless of
/// which other sinks are configured.
#[derive(Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &Alert) {
        error!(
            run_id = %alert.run_id,
            kind = ?alert.kind,
            "{}",
            alert.message
        );
    }
}

/// Delivers alerts to an external webhook as a JSON POST body.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    #[must_use]
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) {
        if let Err(err) = self.client.post(&self.url).json(alert).send().await {
            warn!(url = %self.url, error = %err, "failed to deliver alert to webhook");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn counters_accumulate_across_calls() {
        let counters = ProgressCounters::new();
        counters.record_extracted(10);
        counters.record_upserted(7);
        counters.record_quarantined(3);
        counters.record_ai_call(100, 40, 0.0021);
        counters.record_ai_call(50, 20, 0.0009);

        assert_eq!(counters.rows_extracted.load(Ordering::Relaxed), 10);
        assert_eq!(counters.rows_upserted.load(Ordering::Relaxed), 7);
        assert_eq!(counters.rows_quarantined.load(Ordering::Relaxed), 3);
        assert_eq!(counters.ai_calls.load(Ordering::Relaxed), 2);
        assert!((counters.ai_cost_usd() - 0.0030).abs() < 1e-9);
    }

    #[test]
    fn eta_is_none_once_total_rows_are_done() {
        let counters = ProgressCounters::new();
        counters.record_upserted(100);
        assert_eq!(counters.eta_seconds(100, Duration::from_secs(10)), None);
    }

    #[tokio::test]
    async fn tracing_alert_sink_does_not_panic() {
        let sink = TracingAlertSink;
        sink.send(&Alert {
            run_id: "run-1".to_string(),
            kind: AlertKind::CostThresholdExceeded,
            message: "daily budget exceeded".to_string(),
        })
        .await;
    }

    struct RecordingSink {
        received: Mutex<Vec<AlertKind>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, alert: &Alert) {
            self.received.lock().expect("lock").push(alert.kind);
        }
    }

    #[tokio::test]
    async fn alert_sinks_are_interchangeable_via_the_trait() {
        let sink: Box<dyn AlertSink> = Box::new(RecordingSink {
            received: Mutex::new(Vec::new()),
        });
        sink.send(&Alert {
            run_id: "run-2".to_string(),
            kind: AlertKind::CircuitBreakerOpen,
            message: "ai endpoint circuit opened".to_string(),
        })
        .await;
    }
}
