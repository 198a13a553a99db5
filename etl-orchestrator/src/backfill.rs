use std::sync::Arc;

use ai_enrichment::{enrich_row, AiEnrichmentClient, EnrichedRow, RawRow};
use chrono::{DateTime, TimeZone, Utc};
use common::{
    error::AppError,
    progress::ProgressCounters,
    storage::{
        db::SurrealDbClient,
        types::{
            ai_extraction::AiExtraction, dead_letter::DeadLetter, embedding::Embedding,
            work_order::WorkOrder,
        },
    },
};
use futures::{stream, StreamExt};
use serde_json::Value;
use source_reader::{Cursor, SourceReader, SourceRow};
use tracing::{info, warn};

use crate::memory_optimizer::MemoryOptimizer;

/// Totals reported at the end of a historical backfill run.
#[derive(Debug, Default, Clone)]
pub struct BackfillSummary {
    pub rows_read: u64,
    pub rows_upserted: u64,
    pub rows_quarantined: u64,
}

/// Runs a one-off historical backfill over a fixed `[start, end)` watermark
/// range rather than from a table's live checkpoint, adapting the fetch
/// batch size to observed row size as it goes.
///
/// Shares the enrich/upsert path with `SyncOrchestrator` but does not take
/// or release a metadata lease: backfill and incremental sync for the same
/// table are expected to run sequentially, not concurrently, and the caller
/// is responsible for keeping them apart.
pub struct BackfillOrchestrator {
    source: Arc<dyn SourceReader>,
    sink: Arc<SurrealDbClient>,
    ai_client: Arc<AiEnrichmentClient>,
    counters: Arc<ProgressCounters>,
    row_concurrency: usize,
    memory_optimizer: MemoryOptimizer,
}

impl BackfillOrchestrator {
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceReader>,
        sink: Arc<SurrealDbClient>,
        ai_client: Arc<AiEnrichmentClient>,
        counters: Arc<ProgressCounters>,
        row_concurrency: usize,
        configured_batch_size: usize,
        target_bytes_per_batch: usize,
    ) -> Self {
        Self {
            source,
            sink,
            ai_client,
            counters,
            row_concurrency,
            memory_optimizer: MemoryOptimizer::new(configured_batch_size, target_bytes_per_batch),
        }
    }

    #[tracing::instrument(skip(self), fields(table, start, end))]
    pub async fn run_range(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BackfillSummary, AppError> {
        let mut summary = BackfillSummary::default();
        let mut since = start.timestamp_millis();
        let end_millis = end.timestamp_millis();
        let mut batch_size = self.memory_optimizer.next_batch_size(0);

        let mut cursor = self.source.open_stream(table, since, batch_size).await?;

        loop {
            if since >= end_millis {
                break;
            }

            let batch = cursor.fetch_batch().await?;
            if batch.is_empty() {
                break;
            }

            let in_range: Vec<SourceRow> = batch
                .into_iter()
                .take_while(|row| row.watermark < end_millis)
                .collect();
            if in_range.is_empty() {
                break;
            }

            let avg_row_bytes = average_row_bytes(&in_range);
            summary.rows_read += in_range.len() as u64;
            self.counters.record_extracted(in_range.len() as u64);

            if let Some(max_watermark) = in_range.iter().map(|r| r.watermark).max() {
                since = max_watermark;
            }

            let batch_outcome = self.enrich_and_upsert(table, in_range).await?;
            summary.rows_upserted += batch_outcome.upserted;
            summary.rows_quarantined += batch_outcome.quarantined;
            self.counters.log_snapshot(table);

            batch_size = self.memory_optimizer.next_batch_size(avg_row_bytes);
            cursor = self.source.open_stream(table, since, batch_size).await?;
        }

        info!(
            table,
            rows_read = summary.rows_read,
            rows_upserted = summary.rows_upserted,
            rows_quarantined = summary.rows_quarantined,
            "backfill run finished"
        );
        Ok(summary)
    }

    /// Reads and counts rows across the range without calling the AI client
    /// or writing to the sink (`--dry-run`).
    #[tracing::instrument(skip(self), fields(table, start, end))]
    pub async fn preview_range(
        &self,
        table: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BackfillSummary, AppError> {
        let mut summary = BackfillSummary::default();
        let mut since = start.timestamp_millis();
        let end_millis = end.timestamp_millis();
        let batch_size = self.memory_optimizer.next_batch_size(0);
        let mut cursor = self.source.open_stream(table, since, batch_size).await?;

        loop {
            if since >= end_millis {
                break;
            }
            let batch = cursor.fetch_batch().await?;
            if batch.is_empty() {
                break;
            }
            let in_range: Vec<SourceRow> = batch
                .into_iter()
                .take_while(|row| row.watermark < end_millis)
                .collect();
            if in_range.is_empty() {
                break;
            }
            summary.rows_read += in_range.len() as u64;
            if let Some(max_watermark) = in_range.iter().map(|r| r.watermark).max() {
                since = max_watermark;
            }
        }

        info!(table, rows_read = summary.rows_read, "dry run: would backfill this many rows");
        Ok(summary)
    }

    async fn enrich_and_upsert(
        &self,
        table: &str,
        batch: Vec<SourceRow>,
    ) -> Result<BatchOutcomeTotals, AppError> {
        let results: Vec<(SourceRow, Result<EnrichedRow, AppError>)> = stream::iter(batch)
            .map(|row| {
                let client = Arc::clone(&self.ai_client);
                async move {
                    let raw = RawRow {
                        identity: row.identity.clone(),
                        watermark: row.watermark,
                        text: row
                            .fields
                            .get("text")
                            .or_else(|| row.fields.get("description"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    };
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
                    let watermark = Utc
                        .timestamp_millis_opt(enriched.watermark)
                        .single()
                        .unwrap_or_else(Utc::now);
                    let facility_id = row
                        .fields
                        .get("facility_id")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let order_type = row
                        .fields
                        .get("order_type")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let status = row
                        .fields
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();

                    let payload = serde_json::json!({
                        "redacted_text": enriched.redacted_text,
                        "extraction": enriched.extraction,
                        "redaction_span_count": enriched.redaction_spans.len(),
                    });

                    let order = WorkOrder::new(
                        table.to_string(),
                        enriched.identity.clone(),
                        watermark,
                        facility_id,
                        order_type,
                        status,
                        payload,
                    );
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
            if let Err(err) = Embedding::upsert_for_work_order(
                &id,
                "embedding-model".to_string(),
                enriched.extraction.model_version.clone(),
                enriched.embedding,
                &self.sink,
            )
            .await
            {
                warn!(work_order_id = %id, error = %err, "failed to persist embedding during backfill");
            }
            let extraction_json = serde_json::to_value(&enriched.extraction).unwrap_or(Value::Null);
            let extraction =
                AiExtraction::new(&id, enriched.extraction.model_version.clone(), extraction_json, 0, 0, 0.0);
            if let Err(err) = self.sink.store_item(extraction).await {
                warn!(work_order_id = %id, error = %err, "failed to persist extraction during backfill");
            }
        }

        Ok(BatchOutcomeTotals {
            upserted: outcome.committed as u64,
            quarantined,
        })
    }
}

struct BatchOutcomeTotals {
    upserted: u64,
    quarantined: u64,
}

fn average_row_bytes(rows: &[SourceRow]) -> usize {
    if rows.is_empty() {
        return 0;
    }
    let total: usize = rows
        .iter()
        .map(|row| row.fields.to_string().len())
        .sum();
    total / rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn average_row_bytes_is_zero_for_an_empty_batch() {
        assert_eq!(average_row_bytes(&[]), 0);
    }

    #[test]
    fn average_row_bytes_reflects_json_payload_size() {
        let rows = vec![
            SourceRow {
                identity: "a".to_string(),
                watermark: 1,
                fields: json!({ "text": "short" }),
            },
            SourceRow {
                identity: "b".to_string(),
                watermark: 2,
                fields: json!({ "text": "a much longer description of the work order" }),
            },
        ];
        assert!(average_row_bytes(&rows) > 0);
    }
}
