//! Seed end-to-end scenarios and cross-cutting property checks for the ETL
//! pipeline, run against in-memory fakes (`InMemorySourceReader`,
//! `SurrealDbClient::memory`, a `wiremock`-backed OpenAI endpoint) rather
//! than a live warehouse or model provider.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use ai_enrichment::AiEnrichmentClient;
use anyhow::{ensure, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use common::{
    error::{AiError, AppError},
    progress::{AlertSink, ProgressCounters, TracingAlertSink},
    resilience::backoff::{retry_with_backoff, BackoffPolicy},
    storage::{
        db::SurrealDbClient,
        types::{dead_letter::DeadLetter, etl_metadata::EtlMetadata, work_order::WorkOrder, StoredObject},
    },
};
use etl_orchestrator::{BackfillOrchestrator, SyncOrchestrator};
use serde_json::json;
use source_reader::{SourceReader, SourceRow};

use crate::{
    fake_source::InMemorySourceReader,
    mock_ai,
    scenario_state::ready,
};

/// Result of a single scenario or property run, reported by the CLI harness.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

async fn run_named<F>(name: &'static str, body: F) -> ScenarioOutcome
where
    F: std::future::Future<Output = Result<()>>,
{
    let machine = ready().start();
    match body.await {
        Ok(()) => {
            let _passed = machine.pass();
            ScenarioOutcome { name, passed: true, detail: "ok".to_string() }
        }
        Err(err) => {
            let _failed = machine.fail();
            ScenarioOutcome { name, passed: false, detail: err.to_string() }
        }
    }
}

/// Runs every seed scenario and property check, in order, and collects
/// their outcomes. Never stops early on a failure, so a single report
/// reflects the state of the whole suite.
pub async fn run_all() -> Vec<ScenarioOutcome> {
    vec![
        run_named("cold_start", scenario_cold_start()).await,
        run_named("incremental_after_watermark", scenario_incremental_after_watermark()).await,
        run_named("equal_watermark_boundary", scenario_equal_watermark_boundary()).await,
        run_named("poison_row_quarantine", scenario_poison_row_quarantine()).await,
        run_named("ai_circuit_opens", scenario_ai_circuit_opens()).await,
        run_named("backfill_resume", scenario_backfill_resume()).await,
        run_named("property_scrub_idempotence", property_scrub_idempotence()).await,
        run_named("property_pii_redaction_quality", property_pii_redaction_quality()).await,
        run_named("property_retry_bound", property_retry_bound()).await,
        run_named("property_embedding_cache_determinism", property_embedding_cache_determinism()).await,
    ]
}

fn fresh_namespace_database() -> (String, String) {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    (format!("scenario_{suffix}"), format!("scenario_db_{suffix}"))
}

fn source_row(identity: &str, watermark_millis: i64, status: &str) -> SourceRow {
    SourceRow {
        identity: identity.to_string(),
        watermark: watermark_millis,
        fields: json!({
            "text": format!("work order {identity}: pump vibration reported by technician"),
            "facility_id": "facility-1",
            "order_type": "repair",
            "status": status,
        }),
    }
}

struct Harness {
    source: InMemorySourceReader,
    sink: Arc<SurrealDbClient>,
    ai_client: Arc<AiEnrichmentClient>,
    counters: Arc<ProgressCounters>,
    alert_sink: Arc<dyn AlertSink>,
    #[allow(dead_code)]
    mock_server: wiremock::MockServer,
}

/// Builds a fresh in-memory sink, in-memory source, and mock-backed AI
/// client, with the mock stubbed to always succeed.
async fn build_harness(run_id: &str) -> Result<Harness> {
    let (namespace, database) = fresh_namespace_database();
    let sink = Arc::new(
        SurrealDbClient::memory(&namespace, &database)
            .await
            .context("starting in-memory surrealdb")?,
    );
    sink.ensure_initialized(8).await.context("initializing sink indexes")?;

    let mock_server = mock_ai::start().await;
    mock_ai::stub_extraction_always(&mock_server, &mock_ai::sample_extraction()).await;
    mock_ai::stub_embedding_always(&mock_server, &[0.1_f32; 8]).await;

    let counters = Arc::new(ProgressCounters::new());
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
    let ai_client = Arc::new(AiEnrichmentClient::new(
        mock_ai::test_ai_config(&mock_server.uri(), 8),
        Arc::clone(&counters),
        alert_sink.clone(),
        run_id.to_string(),
    ));

    Ok(Harness {
        source: InMemorySourceReader::new(),
        sink,
        ai_client,
        counters,
        alert_sink,
        mock_server,
    })
}

async fn count_work_orders(sink: &SurrealDbClient, table: &str) -> Result<usize> {
    let all = sink
        .get_all_stored_items::<WorkOrder>()
        .await
        .context("listing work orders")?;
    Ok(all.iter().filter(|o| o.source_table == table).count())
}

// --- Scenario 1: cold start, 5 rows -----------------------------------

async fn scenario_cold_start() -> Result<()> {
    let harness = build_harness("scenario-cold-start").await?;
    let table = "lab_orders";
    let rows: Vec<SourceRow> = (1..=5).map(|i| source_row(&format!("wo-{i}"), i * 1000, "closed")).collect();
    harness.source.seed(table, rows);

    let orchestrator = SyncOrchestrator::new(
        Arc::new(harness.source.clone()) as Arc<dyn SourceReader>,
        Arc::clone(&harness.sink),
        Arc::clone(&harness.ai_client),
        Arc::clone(&harness.counters),
        harness.alert_sink.clone(),
        "scenario-cold-start".to_string(),
        10,
        4,
        300,
    );

    let summary = orchestrator.run_table(table).await.context("running cold start sync")?;
    ensure!(summary.rows_upserted == 5, "expected 5 rows upserted, got {}", summary.rows_upserted);
    ensure!(summary.rows_quarantined == 0, "expected no quarantined rows");

    let metadata = EtlMetadata::get_or_create(table, &harness.sink).await?;
    ensure!(
        metadata.last_watermark.timestamp_millis() == 5000,
        "expected watermark to advance to the last row, got {}",
        metadata.last_watermark.timestamp_millis()
    );
    ensure!(count_work_orders(&harness.sink, table).await? == 5, "expected 5 committed work orders");
    Ok(())
}

// --- Scenario 2: incremental sync after watermark = t3 ------------------

async fn scenario_incremental_after_watermark() -> Result<()> {
    let harness = build_harness("scenario-incremental").await?;
    let table = "lab_orders";
    let rows: Vec<SourceRow> = (1..=5).map(|i| source_row(&format!("wo-{i}"), i * 1000, "closed")).collect();
    harness.source.seed(table, rows);

    // Seed prior state as if rows 1-3 were already committed on an earlier run.
    for i in 1..=3 {
        let order = WorkOrder::new(
            table.to_string(),
            format!("wo-{i}"),
            DateTime::<Utc>::from_timestamp_millis(i * 1000).unwrap_or_else(Utc::now),
            "facility-1".to_string(),
            "repair".to_string(),
            "closed".to_string(),
            json!({ "redacted_text": "previously committed" }),
        );
        order.upsert(&harness.sink).await?;
    }
    let watermark_t3 = DateTime::<Utc>::from_timestamp_millis(3000).unwrap_or_else(Utc::now);
    let metadata = EtlMetadata::new(table.to_string(), watermark_t3);
    harness.sink.store_item(metadata).await.context("seeding prior watermark")?;

    let orchestrator = SyncOrchestrator::new(
        Arc::new(harness.source.clone()) as Arc<dyn SourceReader>,
        Arc::clone(&harness.sink),
        Arc::clone(&harness.ai_client),
        Arc::clone(&harness.counters),
        harness.alert_sink.clone(),
        "scenario-incremental".to_string(),
        10,
        4,
        300,
    );

    let summary = orchestrator.run_table(table).await?;
    // Resume is inclusive of t3, so row 3 is re-delivered alongside 4 and 5;
    // its upsert is a no-op overwrite since the identity already exists.
    ensure!(summary.rows_upserted == 3, "expected 3 rows in this run, got {}", summary.rows_upserted);
    ensure!(count_work_orders(&harness.sink, table).await? == 5, "expected 5 distinct work orders total");

    let metadata = EtlMetadata::get_or_create(table, &harness.sink).await?;
    ensure!(metadata.last_watermark.timestamp_millis() == 5000, "expected watermark to reach t5");
    Ok(())
}

// --- Scenario 3: equal-watermark boundary --------------------------------

async fn scenario_equal_watermark_boundary() -> Result<()> {
    let harness = build_harness("scenario-equal-watermark").await?;
    let table = "lab_orders";
    let watermark = 5000_i64;
    harness.source.seed(
        table,
        vec![
            source_row("a", watermark, "closed"),
            source_row("b", watermark, "closed"),
            source_row("c", watermark, "closed"),
        ],
    );

    let orchestrator = SyncOrchestrator::new(
        Arc::new(harness.source.clone()) as Arc<dyn SourceReader>,
        Arc::clone(&harness.sink),
        Arc::clone(&harness.ai_client),
        Arc::clone(&harness.counters),
        harness.alert_sink.clone(),
        "scenario-equal-watermark".to_string(),
        2, // batch size smaller than the tied group, forcing two internal batches
        4,
        300,
    );

    let first_run = orchestrator.run_table(table).await?;
    ensure!(first_run.rows_upserted == 3, "expected all 3 tied rows upserted in the first run");

    // Simulate a restart: a fresh orchestrator reopens the cursor from the
    // committed watermark, which re-delivers the whole tied group.
    let second_run = orchestrator.run_table(table).await?;
    ensure!(second_run.rows_upserted == 3, "expected the tied group to be re-delivered, not skipped");

    ensure!(
        count_work_orders(&harness.sink, table).await? == 3,
        "expected exactly-once effect: re-delivery must not duplicate rows"
    );
    Ok(())
}

// --- Scenario 4: poison row quarantine -----------------------------------

async fn scenario_poison_row_quarantine() -> Result<()> {
    let (namespace, database) = fresh_namespace_database();
    let sink = SurrealDbClient::memory(&namespace, &database).await?;
    sink.build_indexes().await?;
    // Enforce a type constraint so one row in the batch is structurally
    // invalid, mirroring a NOT NULL/type violation from a real warehouse sink.
    sink.client
        .query("DEFINE FIELD status ON work_order TYPE int;")
        .await?
        .check()?;

    let good_a = WorkOrder::new(
        "orders".to_string(),
        "a".to_string(),
        Utc::now(),
        "facility-1".to_string(),
        "repair".to_string(),
        "1".to_string(),
        json!({}),
    );
    let poison_b = WorkOrder::new(
        "orders".to_string(),
        "b".to_string(),
        Utc::now(),
        "facility-1".to_string(),
        "repair".to_string(),
        "open".to_string(), // not coercible to int: poisons the batch
        json!({}),
    );
    let good_c = WorkOrder::new(
        "orders".to_string(),
        "c".to_string(),
        Utc::now(),
        "facility-1".to_string(),
        "repair".to_string(),
        "2".to_string(),
        json!({}),
    );

    let outcome = sink.upsert_work_order_batch(vec![good_a, poison_b, good_c]).await?;
    ensure!(outcome.committed == 2, "expected the two valid rows to commit, got {}", outcome.committed);
    ensure!(outcome.quarantined.len() == 1, "expected exactly one quarantined row");
    ensure!(outcome.quarantined[0].source_identity == "b", "expected row 'b' to be the poison row");

    let quarantined_count = DeadLetter::count_for_table("orders", &sink).await?;
    ensure!(quarantined_count == 1, "expected a dead-letter record for the poison row");
    Ok(())
}

// --- Scenario 5: AI circuit opens ----------------------------------------

async fn scenario_ai_circuit_opens() -> Result<()> {
    let server = mock_ai::start().await;
    mock_ai::stub_extraction_failures(&server, 50).await;

    let counters = Arc::new(ProgressCounters::new());
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
    let client = AiEnrichmentClient::new(
        mock_ai::test_ai_config(&server.uri(), 8),
        counters,
        alert_sink,
        "scenario-circuit".to_string(),
    );

    for attempt in 0..5 {
        let outcome = client.extract("pump failure report").await;
        ensure!(outcome.is_err(), "expected attempt {attempt} to fail against the broken endpoint");
    }

    match client.extract("pump failure report").await {
        Err(AppError::Ai(AiError::CircuitOpen(_))) => Ok(()),
        Err(other) => Err(anyhow::anyhow!("expected CircuitOpen after threshold failures, got {other}")),
        Ok(_) => Err(anyhow::anyhow!("expected the circuit to be open, call unexpectedly succeeded")),
    }
}

// --- Scenario 6: backfill resume -----------------------------------------

async fn scenario_backfill_resume() -> Result<()> {
    let harness = build_harness("scenario-backfill").await?;
    let table = "legacy_orders";

    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().context("building start timestamp")?;
    let day_millis = 86_400_000_i64;
    let total_rows = 10;
    let spacing_days = 3;
    let rows: Vec<SourceRow> = (0..total_rows)
        .map(|i| {
            let watermark = start.timestamp_millis() + i64::from(i) * spacing_days * day_millis;
            source_row(&format!("bf-{i}"), watermark, "closed")
        })
        .collect();
    harness.source.seed(table, rows);

    let orchestrator = BackfillOrchestrator::new(
        Arc::new(harness.source.clone()) as Arc<dyn SourceReader>,
        Arc::clone(&harness.sink),
        Arc::clone(&harness.ai_client),
        Arc::clone(&harness.counters),
        4,
        3,
        50_000_000,
    );

    let end = start + chrono::Duration::days(30);
    let midpoint = start + chrono::Duration::days(15);

    let first_half = orchestrator.run_range(table, start, midpoint).await.context("first half of backfill")?;
    ensure!(first_half.rows_upserted > 0, "expected the first half to process some rows");
    ensure!(first_half.rows_upserted < u64::try_from(total_rows).unwrap_or(0), "first half should not process everything");

    let resume_from = WorkOrder::max_watermark(table, &harness.sink)
        .await?
        .context("expected a watermark to resume from after the first half")?;

    let second_half = orchestrator
        .run_range(table, resume_from, end)
        .await
        .context("resumed second half of backfill")?;
    ensure!(second_half.rows_upserted > 0, "expected the resumed run to process the remaining rows");

    let total_committed = count_work_orders(&harness.sink, table).await?;
    ensure!(
        total_committed == total_rows as usize,
        "expected the union of both halves to cover every row exactly once, got {total_committed}"
    );
    Ok(())
}

// --- Property: scrub is idempotent ---------------------------------------

async fn property_scrub_idempotence() -> Result<()> {
    let samples = [
        "Contact Jane Doe at jane.doe@example.com or (555) 123-4567 about work order WO-991.",
        "SSN 123-45-6789 on file for patient; device serial SN-88213-XX replaced.",
        "No PII in this line, just a pump bearing failure description.",
    ];
    for sample in samples {
        let (once, _) = pii_scrubber::scrub(sample);
        let (twice, _) = pii_scrubber::scrub(&once);
        ensure!(once == twice, "scrub was not idempotent for input: {sample}");
    }
    Ok(())
}

// --- Property: PII redaction catches the obvious categories --------------

async fn property_pii_redaction_quality() -> Result<()> {
    let cases: &[(&str, &str)] = &[
        ("email me at jane.doe@example.com", "EMAIL"),
        ("call (555) 123-4567 for details", "PHONE"),
    ];
    for (text, category) in cases {
        let (redacted, spans) = pii_scrubber::scrub(text);
        ensure!(
            spans.iter().any(|s| s.category == *category),
            "expected a {category} span for input: {text}"
        );
        ensure!(!redacted.is_empty(), "redacted output should not be empty");
    }

    let clean = "pump bearing replaced after vibration complaint";
    let (redacted, spans) = pii_scrubber::scrub(clean);
    ensure!(spans.is_empty(), "clean text should produce no redaction spans");
    ensure!(redacted == clean, "clean text should pass through unchanged");
    Ok(())
}

// --- Property: retry_with_backoff makes exactly max_attempts tries -------

async fn property_retry_bound() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let policy = BackoffPolicy { base_delay_secs: 0, max_delay_secs: 0, backoff_cap_exponent: 0, max_attempts: 4 };

    let attempts_for_closure = Arc::clone(&attempts);
    let result: Result<(), String> = retry_with_backoff(policy, "property-retry-bound", move || {
        let attempts = Arc::clone(&attempts_for_closure);
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), String>("synthetic failure".to_string())
        }
    })
    .await;

    ensure!(result.is_err(), "expected the operation to fail after exhausting retries");
    ensure!(
        attempts.load(Ordering::SeqCst) == 4,
        "expected exactly 4 attempts, got {}",
        attempts.load(Ordering::SeqCst)
    );
    Ok(())
}

// --- Property: embedding is deterministic per cached text ----------------

async fn property_embedding_cache_determinism() -> Result<()> {
    let server = mock_ai::start().await;
    mock_ai::stub_embedding_once(&server, &[1.0, 2.0, 3.0]).await;

    let counters = Arc::new(ProgressCounters::new());
    let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
    let client = AiEnrichmentClient::new(
        mock_ai::test_ai_config(&server.uri(), 3),
        counters,
        alert_sink,
        "property-embed-cache".to_string(),
    );

    let first = client.embed("identical work order text").await.context("first embed call")?;
    // The mock only answers once; a second distinct network call would fail
    // to match any stub, so a matching second result proves the cache hit.
    let second = client.embed("identical work order text").await.context("second embed call")?;
    ensure!(first == second, "expected cached embedding to be returned verbatim");

    let identities: HashSet<_> = [first, second].into_iter().map(|v| format!("{v:?}")).collect();
    ensure!(identities.len() == 1, "expected a single distinct embedding value");
    Ok(())
}
