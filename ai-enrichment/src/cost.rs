use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use common::{
    error::{AiError, AppError},
    progress::{Alert, AlertKind, AlertSink},
    utils::config::{AiConfig, BudgetPolicy},
};
use std::sync::Arc;
use tracing::warn;

/// Token/cost accounting and budget gate for the AI enrichment client.
/// One instance per run, shared across concurrent workers.
pub struct CostTracker {
    daily_budget_usd: f64,
    cost_alert_usd: f64,
    policy: BudgetPolicy,
    spent_millicents: AtomicU64,
    alert_raised: AtomicBool,
    alert_sink: Arc<dyn AlertSink>,
    run_id: String,
}

impl CostTracker {
    #[must_use]
    pub fn new(config: &AiConfig, alert_sink: Arc<dyn AlertSink>, run_id: String) -> Self {
        Self {
            daily_budget_usd: config.daily_budget_usd,
            cost_alert_usd: config.cost_alert_usd,
            policy: config.budget_policy.clone(),
            spent_millicents: AtomicU64::new(0),
            alert_raised: AtomicBool::new(false),
            alert_sink,
            run_id,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn spent_usd(&self) -> f64 {
        self.spent_millicents.load(Ordering::Relaxed) as f64 / 100_000.0
    }

    /// Rejects an over-budget request before any network call, estimating
    /// cost up front so a rejection never costs a round trip.
    pub async fn pre_check(&self, estimated_cost_usd: f64) -> Result<(), AppError> {
        if self.policy == BudgetPolicy::HardGate
            && self.spent_usd() + estimated_cost_usd > self.daily_budget_usd
        {
            return Err(AppError::Ai(AiError::BudgetExceeded {
                spent_usd: self.spent_usd(),
                limit_usd: self.daily_budget_usd,
            }));
        }
        Ok(())
    }

    /// Record the actual cost of a completed call, raising a C10 alert the
    /// first time cumulative spend crosses `cost_alert_usd`.
    pub async fn record_spend(&self, cost_usd: f64) {
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let millicents = (cost_usd * 100_000.0).round() as u64;
        self.spent_millicents.fetch_add(millicents, Ordering::Relaxed);

        if self.spent_usd() >= self.cost_alert_usd
            && !self.alert_raised.swap(true, Ordering::Relaxed)
        {
            warn!(run_id = %self.run_id, spent_usd = self.spent_usd(), "AI cost alert threshold crossed");
            self.alert_sink
                .send(&Alert {
                    run_id: self.run_id.clone(),
                    kind: AlertKind::CostThresholdExceeded,
                    message: format!(
                        "AI spend ${:.4} crossed alert threshold ${:.4}",
                        self.spent_usd(),
                        self.cost_alert_usd
                    ),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::progress::TracingAlertSink;

    fn config(daily_budget_usd: f64, cost_alert_usd: f64, policy: BudgetPolicy) -> AiConfig {
        AiConfig {
            openai_api_key: "key".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            extraction_model: "gpt-test".to_string(),
            embedding_model: "text-embed".to_string(),
            embedding_dimensions: 8,
            budget_policy: policy,
            daily_budget_usd,
            cost_alert_usd,
            rate_limit_rps: 5,
            embed_cache_capacity: 100,
            rate_limit_max_wait_secs: 5,
        }
    }

    #[tokio::test]
    async fn hard_gate_rejects_once_estimate_would_exceed_budget() {
        let tracker = CostTracker::new(
            &config(1.0, 0.8, BudgetPolicy::HardGate),
            Arc::new(TracingAlertSink),
            "run-1".to_string(),
        );
        tracker.record_spend(0.9).await;
        let result = tracker.pre_check(0.2).await;
        assert!(matches!(
            result,
            Err(AppError::Ai(AiError::BudgetExceeded { .. }))
        ));
    }

    #[tokio::test]
    async fn soft_degrade_never_rejects() {
        let tracker = CostTracker::new(
            &config(1.0, 0.8, BudgetPolicy::SoftDegrade),
            Arc::new(TracingAlertSink),
            "run-1".to_string(),
        );
        tracker.record_spend(5.0).await;
        assert!(tracker.pre_check(5.0).await.is_ok());
    }
}
