use std::sync::Arc;

use ai_enrichment::{enrich_row, AiEnrichmentClient, EnrichedRow, RawRow};
use chrono::{DateTime, Utc};
use common::{
    error::{AppError, ErrorKind},
    progress::{Alert, AlertKind, AlertSink, ProgressCounters},
    storage::{
        db::SurrealDbClient,
        types::{
            ai_extraction::AiExtraction, dead_letter::DeadLetter, embedding::Embedding,
            etl_metadata::EtlMetadata, work_order::WorkOrder,
        },
    },
};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use source_reader::{Cursor, SourceReader, SourceRow};
use tracing::{info, warn};

use crate::run_state::idle;

/// Totals for a single run, reported at `commit_run`/`abort_run` time.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub rows_read: u64,
    pub rows_upserted: u64,
    pub rows_quarantined: u64,
    pub final_watermark: Option<DateTime<Utc>>,
}

/// Drives the incremental sync loop for one table: lease -> stream batches
/// forward from the watermark -> enrich each row concurrently -> upsert the
/// batch transactionally -> checkpoint -> repeat until the source is
/// exhausted, then release the lease.
pub struct SyncOrchestrator {
    source: Arc<dyn SourceReader>,
    sink: Arc<SurrealDbClient>,
    ai_client: Arc<AiEnrichmentClient>,
    counters: Arc<ProgressCounters>,
    alert_sink: Arc<dyn AlertSink>,
    worker_id: String,
    batch_size: usize,
    row_concurrency: usize,
    lease_secs: i64,
}

impl SyncOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn SourceReader>,
        sink: Arc<SurrealDbClient>,
        ai_client: Arc<AiEnrichmentClient>,
        counters: Arc<ProgressCounters>,
        alert_sink: Arc<dyn AlertSink>,
        worker_id: String,
        batch_size: usize,
        row_concurrency: usize,
        lease_secs: i64,
    ) -> Self {
        Self {
            source,
            sink,
            ai_client,
            counters,
            alert_sink,
            worker_id,
            batch_size,
            row_concurrency,
            lease_secs,
        }
    }

    #[tracing::instrument(skip(self), fields(table))]
    pub async fn run_table(&self, table: &str) -> Result<RunSummary, AppError> {
        let machine = idle();

        let lease = match EtlMetadata::acquire_lease(table, &self.worker_id, self.lease_secs, &self.sink)
            .await
        {
            Ok(lease) => lease,
            Err(err) => {
                let _aborted = machine.abort();
                return Err(err);
            }
        };
        let machine = machine.lease();

        let since = lease.last_watermark.timestamp_millis();
        let mut cursor = self.source.open_stream(table, since, self.batch_size).await?;

        let mut summary = RunSummary::default();
        let mut machine = machine.read();

        loop {
            let batch = match cursor.fetch_batch().await {
                Ok(batch) => batch,
                Err(err) => {
                    let _aborted = machine.abort();
                    EtlMetadata::release_lease(table, &self.sink).await?;
                    return Err(err);
                }
            };
            if batch.is_empty() {
                let _done = machine.complete();
                break;
            }
            summary.rows_read += batch.len() as u64;
            self.counters.record_extracted(batch.len() as u64);

            let writing = machine.write();
            let outcome = self.enrich_and_upsert(table, batch).await;
            let advancing = writing.advance();

            match outcome {
                Ok(batch_summary) => {
                    summary.rows_upserted += batch_summary.upserted;
                    summary.rows_quarantined += batch_summary.quarantined;
                    if let Some(watermark) = batch_summary.max_watermark {
                        summary.final_watermark = Some(watermark);
                        EtlMetadata::advance_and_release(table, watermark, String::new(), &self.sink)
                            .await?;
                        EtlMetadata::acquire_lease(table, &self.worker_id, self.lease_secs, &self.sink)
                            .await?;
                    }
                    self.counters.log_snapshot(&self.worker_id);
                }
                Err(err) if err.kind() == ErrorKind::Persistent => {
                    let _aborted = advancing.abort();
                    EtlMetadata::release_lease(table, &self.sink).await?;
                    self.raise_alert(AlertKind::ErrorRateExceeded, err.to_string()).await;
                    return Err(err);
                }
                Err(err) => {
                    warn!(table, error = %err, "batch failed but run continues");
                }
            }

            machine = advancing.next_batch();
        }

        EtlMetadata::release_lease(table, &self.sink).await?;
        info!(
            table,
            rows_read = summary.rows_read,
            rows_upserted = summary.rows_upserted,
            rows_quarantined = summary.rows_quarantined,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Reads and counts rows from the current watermark without acquiring a
    /// lease, calling the AI client, or writing to the sink (`--dry-run`).
    #[tracing::instrument(skip(self), fields(table))]
    pub async fn preview_table(&self, table: &str) -> Result<RunSummary, AppError> {
        let metadata = EtlMetadata::get_or_create(table, &self.sink).await?;
        let since = metadata.last_watermark.timestamp_millis();
        let mut cursor = self.source.open_stream(table, since, self.batch_size).await?;

        let mut summary = RunSummary::default();
        loop {
            let batch = cursor.fetch_batch().await?;
            if batch.is_empty() {
                break;
            }
            summary.rows_read += batch.len() as u64;
            if let Some(max_watermark) = batch.iter().map(|r| r.watermark).max() {
                summary.final_watermark =
                    DateTime::<Utc>::from_timestamp_millis(max_watermark);
            }
        }

        info!(table, rows_read = summary.rows_read, "dry run: would sync this many rows");
        Ok(summary)
    }

    async fn enrich_and_upsert(
        &self,
        table: &str,
        batch: Vec<SourceRow>,
    ) -> Result<BatchSummary, AppError> {
        let results: Vec<(SourceRow, Result<EnrichedRow, AppError>)> = stream::iter(batch)
            .map(|row| {
                let client = Arc::clone(&self.ai_client);
                async move {
                    let raw = source_row_to_raw_row(&row);
                    let outcome = enrich_row(&client, raw).await;
                    (row, outcome)
                }
            })
            .buffer_unordered(self.row_concurrency.max(1))
            .collect()
            .await;

        let mut work_orders = Vec::with_capacity(results.len());
        let mut side_tables = Vec::with_capacity(results.len());
        let mut quarantined = 0u64;

        for (row, outcome) in results {
            match outcome {
                Ok(enriched) => {
                    let order = build_work_order(table, &row, &enriched);
                    side_tables.push((order.id.clone(), enriched));
                    work_orders.push(order);
                }
                Err(err) => {
                    quarantined += 1;
                    self.counters.record_quarantined(1);
                    let dead_letter = DeadLetter::new(
                        table.to_string(),
                        row.identity.clone(),
                        "enrichment_failed".to_string(),
                        err.to_string(),
                        row.fields.clone(),
                    );
                    dead_letter.record(&self.sink).await?;
                }
            }
        }

        let max_watermark = work_orders.iter().map(|o| o.watermark).max();

        let outcome = self.sink.upsert_work_order_batch(work_orders).await?;
        self.counters.record_upserted(outcome.committed as u64);
        quarantined += outcome.quarantined.len() as u64;
        self.counters.record_quarantined(outcome.quarantined.len() as u64);

        let committed_ids: std::collections::HashSet<_> = side_tables
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| !outcome.quarantined.iter().any(|q| &q.id == id))
            .collect();

        for (id, enriched) in side_tables {
            if !committed_ids.contains(&id) {
                continue;
            }
            if let Err(err) =
                Embedding::upsert_for_work_order(&id, "embedding-model".to_string(), enriched.extraction.model_version.clone(), enriched.embedding, &self.sink)
                    .await
            {
                warn!(work_order_id = %id, error = %err, "failed to persist embedding, work order content still committed");
            }
            let extraction_json = serde_json::to_value(&enriched.extraction).unwrap_or(Value::Null);
            let extraction = AiExtraction::new(&id, enriched.extraction.model_version.clone(), extraction_json, 0, 0, 0.0);
            if let Err(err) = self.sink.store_item(extraction).await {
                warn!(work_order_id = %id, error = %err, "failed to persist extraction record");
            }
        }

        Ok(BatchSummary {
            upserted: outcome.committed as u64,
            quarantined,
            max_watermark,
        })
    }

    async fn raise_alert(&self, kind: AlertKind, message: String) {
        self.alert_sink
            .send(&Alert {
                run_id: self.worker_id.clone(),
                kind,
                message,
            })
            .await;
    }
}

struct BatchSummary {
    upserted: u64,
    quarantined: u64,
    max_watermark: Option<DateTime<Utc>>,
}

fn source_row_to_raw_row(row: &SourceRow) -> RawRow {
    let text = row
        .fields
        .get("text")
        .or_else(|| row.fields.get("description"))
        .or_else(|| row.fields.get("notes"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    RawRow {
        identity: row.identity.clone(),
        watermark: row.watermark,
        text,
    }
}

fn field_str(fields: &Value, key: &str, default: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn build_work_order(table: &str, source_row: &SourceRow, enriched: &EnrichedRow) -> WorkOrder {
    let watermark =
        DateTime::<Utc>::from_timestamp_millis(enriched.watermark).unwrap_or_else(Utc::now);
    let facility_id = field_str(&source_row.fields, "facility_id", "unknown");
    let order_type = field_str(&source_row.fields, "order_type", "unknown");
    let status = field_str(&source_row.fields, "status", "unknown");

    let payload = json!({
        "redacted_text": enriched.redacted_text,
        "extraction": enriched.extraction,
        "redaction_span_count": enriched.redaction_spans.len(),
    });

    WorkOrder::new(
        table.to_string(),
        enriched.identity.clone(),
        watermark,
        facility_id,
        order_type,
        status,
        payload,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_row_prefers_the_text_field() {
        let row = SourceRow {
            identity: "wo-1".to_string(),
            watermark: 10,
            fields: json!({ "text": "primary", "notes": "secondary" }),
        };
        let raw = source_row_to_raw_row(&row);
        assert_eq!(raw.text, "primary");
    }

    #[test]
    fn source_row_falls_back_to_notes_when_text_is_absent() {
        let row = SourceRow {
            identity: "wo-2".to_string(),
            watermark: 10,
            fields: json!({ "notes": "fallback" }),
        };
        let raw = source_row_to_raw_row(&row);
        assert_eq!(raw.text, "fallback");
    }
}
