mod cli;

use std::{process::ExitCode, sync::Arc};

use ai_enrichment::AiEnrichmentClient;
use chrono::{NaiveTime, TimeZone, Utc};
use clap::Parser;
use cli::{Cli, Command};
use common::{
    error::{AppError, ErrorKind},
    progress::{ProgressCounters, TracingAlertSink},
    storage::{db::SurrealDbClient, types::etl_metadata::EtlMetadata},
    utils::config::AppConfig,
};
use etl_orchestrator::{BackfillOrchestrator, SyncOrchestrator};
use source_reader::HttpSourceReader;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            return ExitCode::from(2);
        }
    };

    let cli = Cli::parse();

    match run(config, cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "run aborted");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &AppError) -> ExitCode {
    match err.kind() {
        ErrorKind::Persistent | ErrorKind::CircuitOpen | ErrorKind::Budget => ExitCode::from(3),
        ErrorKind::Transient | ErrorKind::Data => ExitCode::from(1),
    }
}

async fn run(config: AppConfig, cli: Cli) -> Result<ExitCode, AppError> {
    let db = Arc::new(
        SurrealDbClient::new(
            &config.sink.surrealdb_address,
            &config.sink.surrealdb_username,
            &config.sink.surrealdb_password,
            &config.sink.surrealdb_namespace,
            &config.sink.surrealdb_database,
        )
        .await
        .map_err(AppError::Database)?,
    );
    db.ensure_initialized(config.ai.embedding_dimensions as usize)
        .await?;

    let source = Arc::new(HttpSourceReader::new(config.source.clone()));
    let counters = Arc::new(ProgressCounters::new());
    let alert_sink = Arc::new(TracingAlertSink);
    let worker_id = format!("etl-cli-{}", std::process::id());
    let ai_client = Arc::new(AiEnrichmentClient::new(
        config.ai.clone(),
        Arc::clone(&counters),
        alert_sink.clone(),
        worker_id.clone(),
    ));

    match cli.command {
        Command::RunEtl {
            tables,
            batch_size,
            dry_run,
        } => {
            if tables.is_empty() {
                error!("run-etl requires at least one --tables entry");
                return Ok(ExitCode::from(2));
            }

            let orchestrator = SyncOrchestrator::new(
                Arc::clone(&source) as Arc<dyn source_reader::SourceReader>,
                Arc::clone(&db),
                Arc::clone(&ai_client),
                Arc::clone(&counters),
                alert_sink.clone(),
                worker_id.clone(),
                batch_size.unwrap_or(config.etl.batch_size),
                config.etl.max_workers,
                config.etl.lease_secs,
            );

            let mut any_failed = false;
            for table in &tables {
                let started = std::time::Instant::now();
                let outcome = if dry_run {
                    orchestrator.preview_table(table).await
                } else {
                    orchestrator.run_table(table).await
                };

                match outcome {
                    Ok(summary) => {
                        info!(
                            table,
                            status = "completed",
                            rows = summary.rows_upserted,
                            duration_secs = started.elapsed().as_secs_f64(),
                            "table={} status=completed rows={} duration={:.2}s",
                            table,
                            summary.rows_upserted,
                            started.elapsed().as_secs_f64(),
                        );
                    }
                    Err(err) => {
                        any_failed = true;
                        error!(
                            table,
                            status = "failed",
                            error = %err,
                            "table={} status=failed error={}",
                            table,
                            err,
                        );
                    }
                }
            }

            Ok(if any_failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Backfill {
            tables,
            start_date,
            end_date,
            resume,
            max_workers,
            dry_run,
            verbose: _verbose,
        } => {
            if tables.is_empty() {
                error!("backfill requires at least one --tables entry");
                return Ok(ExitCode::from(2));
            }

            let start = Utc.from_utc_datetime(&start_date.and_time(NaiveTime::MIN));
            let end = Utc.from_utc_datetime(&end_date.and_time(NaiveTime::MIN));
            if start >= end {
                error!("--start-date must be before --end-date");
                return Ok(ExitCode::from(2));
            }

            let orchestrator = BackfillOrchestrator::new(
                Arc::clone(&source) as Arc<dyn source_reader::SourceReader>,
                Arc::clone(&db),
                Arc::clone(&ai_client),
                Arc::clone(&counters),
                max_workers.unwrap_or(config.etl.max_workers),
                config.etl.batch_size,
                50_000_000,
            );

            let mut any_failed = false;
            for table in &tables {
                let effective_start = if resume {
                    let metadata = EtlMetadata::get_or_create(table, &db).await?;
                    metadata.last_watermark.max(start)
                } else {
                    start
                };

                let started = std::time::Instant::now();
                let outcome = if dry_run {
                    orchestrator.preview_range(table, effective_start, end).await
                } else {
                    orchestrator.run_range(table, effective_start, end).await
                };

                match outcome {
                    Ok(summary) => {
                        info!(
                            table,
                            status = "completed",
                            rows = summary.rows_upserted,
                            duration_secs = started.elapsed().as_secs_f64(),
                            "table={} status=completed rows={} duration={:.2}s",
                            table,
                            summary.rows_upserted,
                            started.elapsed().as_secs_f64(),
                        );
                    }
                    Err(err) => {
                        any_failed = true;
                        error!(
                            table,
                            status = "failed",
                            error = %err,
                            "table={} status=failed error={}",
                            table,
                            err,
                        );
                    }
                }
            }

            Ok(if any_failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}
