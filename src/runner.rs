//! Runs one workload from parsed CLI arguments.

use crate::cli::{Backend, CommonArgs, OutputFormat};
use crate::config::pool_size;
use crate::logging::mask_connection_password;
use anyhow::Context;
use loadtest_engine::{MemoryStore, Orchestrator, Progress, RunConfig, RunObserver, RunSummary, Store};
use loadtest_store_postgresql::PostgresStore;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the caller does once the summary has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Drop the account table after the run.
    pub teardown: bool,
    /// Treat a changed conserved total as a failure.
    pub fail_on_violation: bool,
}

/// Exit status for a run that finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Violation,
}

/// Prints live status lines to stdout.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn on_progress(&self, progress: &Progress) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{progress}");
        let _ = stdout.flush();
    }
}

fn memory_store(config: &RunConfig) -> MemoryStore {
    match config.seed {
        Some(seed) => MemoryStore::new().with_seed(seed),
        None => MemoryStore::new(),
    }
}

async fn connect(common: &CommonArgs, config: &RunConfig) -> anyhow::Result<Arc<dyn Store>> {
    match common.backend {
        Backend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(memory_store(config)))
        }
        Backend::Postgresql => {
            let url = common
                .url
                .as_deref()
                .context("--url (or DATABASE_URL) is required for the postgresql backend")?;
            let pool_size = pool_size(config);
            info!(
                "Connecting to {} (pool size {})",
                mask_connection_password(url),
                pool_size
            );
            let store = PostgresStore::connect(url, pool_size)
                .await
                .with_context(|| format!("Failed to connect to {}", mask_connection_password(url)))?
                .with_batch_size(common.batch_size);
            Ok(Arc::new(store))
        }
    }
}

/// Sets up a shutdown signal handler
fn setup_interrupt_handler() -> CancellationToken {
    let interrupt = CancellationToken::new();
    let token = interrupt.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal (Ctrl+C)");
                token.cancel();
            }
            Err(e) => warn!("Failed to install CTRL+C signal handler: {}", e),
        }
    });

    interrupt
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    match format {
        OutputFormat::Text => write!(stdout, "{summary}")?,
        OutputFormat::Json => {
            let json = summary.to_json().context("Failed to serialize summary")?;
            writeln!(stdout, "{json}")?;
        }
    }
    stdout.flush()?;
    Ok(())
}

/// Connect, run, print the summary and tear down.
///
/// `config` must already be validated so that a bad configuration never
/// reaches the database.
pub async fn run_workload(
    common: &CommonArgs,
    config: RunConfig,
    options: RunOptions,
) -> anyhow::Result<RunStatus> {
    let store = connect(common, &config).await?;

    let observer: Arc<dyn RunObserver> = Arc::new(ConsoleObserver);
    let orchestrator = Orchestrator::new(config, store)
        .context("Invalid configuration")?
        .with_observer(observer);

    let summary = orchestrator
        .run(setup_interrupt_handler())
        .await
        .context("Workload run failed")?;

    print_summary(&summary, common.format)?;

    if options.teardown {
        orchestrator
            .teardown()
            .await
            .context("Failed to tear down workload tables")?;
    }

    if summary.violated() && options.fail_on_violation {
        return Ok(RunStatus::Violation);
    }
    Ok(RunStatus::Completed)
}
