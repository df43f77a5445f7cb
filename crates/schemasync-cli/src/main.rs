//! schemasync CLI - connection schema reconciler

use schemasync_cli::cli;
use schemasync_cli::output;

use anyhow::{bail, Context, Result};
use clap::Parser;
use is_terminal::IsTerminal;
use schemasync_cli::{JsonSnapshotWriter, PlanFilePlanner};
use schemasync_core::postgres::{PgSchemaPool, PgStateStore};
use schemasync_core::{Reconciler, RefreshConnectionResult};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Args;
use output::{format_result, format_result_json, StderrStatus};

/// Reconciliation finished with errors.
const EXIT_FAILURE: u8 = 1;
/// Configuration error (e.g. unreachable database or missing plan file).
const EXIT_CONFIG_ERROR: u8 = 66;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURE),
        Err(e) => {
            eprintln!("schemasync: error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

/// Run one reconciliation pass and report the result.
///
/// Returns `Ok(false)` when the pass itself failed.
fn run(args: Args) -> Result<bool> {
    if !args.plan.is_file() {
        bail!("plan file not found: {}", args.plan.display());
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let result = runtime.block_on(reconcile(&args))?;

    if args.json {
        let json = format_result_json(&result, args.compact).context("failed to serialize result")?;
        println!("{json}");
    } else if !args.quiet {
        let colored = io::stderr().is_terminal();
        eprint!("{}", format_result(&result, colored));
    }

    Ok(result.is_ok())
}

async fn reconcile(args: &Args) -> Result<RefreshConnectionResult> {
    let config = args.reconcile_config();

    let pool = PgSchemaPool::connect(&args.database_url, args.max_connections)
        .await
        .context("failed to connect to database")?;
    let state_store = PgStateStore::new(pool.pg_pool().clone(), &config.state_table)
        .await
        .with_context(|| format!("failed to prepare state table {}", config.state_table))?;

    let status = Arc::new(StderrStatus::new(args.quiet));
    let mut reconciler = Reconciler::new(
        Arc::new(pool.clone()),
        Arc::new(PlanFilePlanner::new(&args.plan)),
        Arc::new(state_store),
    )
    .with_config(config)
    .with_status(status.clone());
    if let Some(path) = &args.snapshot {
        reconciler = reconciler.with_snapshot_writer(Arc::new(JsonSnapshotWriter::new(path)));
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling reconciliation");
            interrupt.cancel();
        }
    });

    let result = reconciler
        .refresh_connections_and_search_paths(&args.force_update, cancel)
        .await;
    status.finish();
    pool.close().await;
    Ok(result)
}
