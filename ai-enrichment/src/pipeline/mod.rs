mod state;

use common::error::AppError;
use pii_scrubber::{scrub, Span};
use tracing::{debug, warn};

use self::state::ready;
use crate::{client::AiEnrichmentClient, schema::ExtractionResult};

/// A single record read from the source warehouse, not yet enriched.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub identity: String,
    pub watermark: i64,
    pub text: String,
}

/// The same record after the enrichment pipeline has run to completion,
/// ready for the sink writer (C3) to upsert.
#[derive(Debug, Clone)]
pub struct EnrichedRow {
    pub identity: String,
    pub watermark: i64,
    pub redacted_text: String,
    pub redaction_spans: Vec<Span>,
    pub extraction: ExtractionResult,
    pub embedding: Vec<f32>,
}

/// Drives a single row through `Ready -> Scrubbed -> Extracted -> Embedded`.
/// The orchestrator calls this once per row inside a bounded concurrency
/// window and is responsible for the batch upsert and watermark advance
/// that follow.
#[tracing::instrument(skip_all, fields(identity = %row.identity, watermark = row.watermark))]
pub async fn enrich_row(client: &AiEnrichmentClient, row: RawRow) -> Result<EnrichedRow, AppError> {
    let machine = ready();

    let (redacted_text, redaction_spans) = scrub(&row.text);
    let machine = machine.scrub();
    debug!(spans = redaction_spans.len(), "row scrubbed");

    let extraction = match client.extract(&redacted_text).await {
        Ok(extraction) => extraction,
        Err(err) => {
            let _failed = machine.abort();
            warn!(error = %err, "extraction failed, row will be quarantined by the caller");
            return Err(err);
        }
    };
    let machine = machine.extract();

    let embedding = match client.embed(&redacted_text).await {
        Ok(embedding) => embedding,
        Err(err) => {
            let _failed = machine.abort();
            warn!(error = %err, "embedding failed, row will be quarantined by the caller");
            return Err(err);
        }
    };
    let _machine = machine.embed();

    Ok(EnrichedRow {
        identity: row.identity,
        watermark: row.watermark,
        redacted_text,
        redaction_spans,
        extraction,
        embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        progress::{ProgressCounters, TracingAlertSink},
        utils::config::{AiConfig, BudgetPolicy},
    };
    use std::sync::Arc;

    fn ai_config() -> AiConfig {
        AiConfig {
            openai_api_key: "test-key".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            extraction_model: "gpt-test".to_string(),
            embedding_model: "text-embed".to_string(),
            embedding_dimensions: 8,
            budget_policy: BudgetPolicy::HardGate,
            daily_budget_usd: 0.0,
            cost_alert_usd: 0.0,
            rate_limit_rps: 1,
            embed_cache_capacity: 10,
            rate_limit_max_wait_secs: 1,
        }
    }

    #[tokio::test]
    async fn row_with_zero_budget_is_rejected_before_any_network_call() {
        let client = AiEnrichmentClient::new(
            ai_config(),
            Arc::new(ProgressCounters::new()),
            Arc::new(TracingAlertSink),
            "run-1".to_string(),
        );
        let row = RawRow {
            identity: "wo-1".to_string(),
            watermark: 1,
            text: "contact jane@example.com about the pump".to_string(),
        };

        let result = enrich_row(&client, row).await;
        assert!(result.is_err());
    }
}
