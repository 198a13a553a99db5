use std::process::ExitCode;

use clap::Parser;
use scenarios::run_all;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runs the seed scenario and property-check suite against in-memory fakes
/// and prints a pass/fail report, one line per check.
#[derive(Parser, Debug)]
#[command(name = "scenarios", about = "Run ETL pipeline seed scenarios against in-memory fakes")]
struct Cli {
    /// Only run checks whose name contains this substring.
    #[arg(long)]
    filter: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    let outcomes = run_all().await;
    let mut any_failed = false;

    for outcome in &outcomes {
        if let Some(filter) = &cli.filter {
            if !outcome.name.contains(filter.as_str()) {
                continue;
            }
        }

        if outcome.passed {
            info!(scenario = outcome.name, status = "passed", "scenario={} status=passed", outcome.name);
        } else {
            any_failed = true;
            error!(
                scenario = outcome.name,
                status = "failed",
                detail = %outcome.detail,
                "scenario={} status=failed detail={}",
                outcome.name,
                outcome.detail,
            );
        }
    }

    let passed = outcomes.iter().filter(|o| o.passed).count();
    info!(passed, total = outcomes.len(), "scenario run finished");

    if any_failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
