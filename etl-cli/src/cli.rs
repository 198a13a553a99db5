use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Runs the incremental sync or historical backfill engine for one or more
/// source tables.
#[derive(Parser, Debug)]
#[command(name = "etl-cli", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an incremental sync pass over one or more tables.
    RunEtl {
        /// Comma-separated list of source tables to sync.
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        /// Override the configured fetch batch size.
        #[arg(long)]
        batch_size: Option<usize>,
        /// Plan the run without writing to the sink.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run a historical backfill over a fixed date range.
    Backfill {
        /// Comma-separated list of source tables to backfill.
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        /// Resume from the table's last committed watermark instead of `start_date`.
        #[arg(long, default_value_t = false)]
        resume: bool,
        /// Override the configured worker concurrency.
        #[arg(long)]
        max_workers: Option<usize>,
        /// Plan the run without writing to the sink.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
}
