//! Command-line interface for docstress
//!
//! # Usage Examples
//!
//! ```bash
//! # Run a workload for at most ten minutes and keep the metrics
//! docstress run \
//!   --workload demos/multi_collection_update.yml \
//!   --mongodb-uri mongodb://localhost:27017 \
//!   --timeout "10 minutes" \
//!   --metrics-output metrics.json
//!
//! # Validate a workload file only
//! docstress run --workload demos/crud.yml --dry-run
//! ```
//!
//! Logging is controlled with `RUST_LOG`, e.g. `RUST_LOG=docstress=debug`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use docstress::{MetricsRegistry, Workload};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use workload_core::parse_duration;
use workload_mongodb::MongoClientFactory;

#[derive(Parser)]
#[command(name = "docstress")]
#[command(about = "Drive phase-based synthetic load against a document store")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload file
    Run {
        /// Workload YAML file
        #[arg(long, value_name = "PATH")]
        workload: PathBuf,

        /// MongoDB connection string
        #[arg(long, default_value = "mongodb://localhost:27017", env = "MONGODB_URI")]
        mongodb_uri: String,

        /// Override the workload's Seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write the metrics report as JSON to this file
        #[arg(long, value_name = "PATH")]
        metrics_output: Option<PathBuf>,

        /// Stop the workload after this long (e.g. "30 seconds")
        #[arg(long, value_parser = parse_timeout)]
        timeout: Option<Duration>,

        /// Load and compile the workload without connecting
        #[arg(long)]
        dry_run: bool,
    },
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            mongodb_uri,
            seed,
            metrics_output,
            timeout,
            dry_run,
        } => {
            run_workload(
                &workload,
                &mongodb_uri,
                seed,
                metrics_output.as_deref(),
                timeout,
                dry_run,
            )
            .await
        }
    }
}

async fn run_workload(
    path: &Path,
    mongodb_uri: &str,
    seed: Option<u64>,
    metrics_output: Option<&Path>,
    timeout: Option<Duration>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mut workload = Workload::from_file(path)
        .with_context(|| format!("Failed to load workload from {path:?}"))?;
    if let Some(seed) = seed {
        workload.set_seed(seed);
    }

    if dry_run {
        info!(
            "Workload {:?} is valid: {} actor(s), {} instance(s), {} phase(s)",
            path,
            workload.blueprints().len(),
            workload.instance_count(),
            workload.phase_count()
        );
        return Ok(());
    }

    let factory = MongoClientFactory::from_uri(mongodb_uri)
        .await
        .with_context(|| format!("Failed to connect to {mongodb_uri}"))?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_watcher(shutdown.clone(), timeout);

    let metrics = MetricsRegistry::new();
    let summary = workload.run(&factory, &metrics, shutdown.clone()).await?;
    shutdown.cancel();

    let report = metrics.snapshot();
    info!(
        "{} operation(s) timed, {} failed",
        report.total_operations(),
        report.total_failures()
    );
    if let Some(output) = metrics_output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write metrics to {output:?}"))?;
        info!("Metrics written to {:?}", output);
    }

    if !summary.is_success() {
        for failure in &summary.failures {
            warn!("{}: {}", failure.actor, failure.error);
        }
        anyhow::bail!("{} actor instance(s) failed", summary.failures.len());
    }
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or once `timeout` elapses.
fn spawn_shutdown_watcher(shutdown: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, stopping workload"),
            _ = deadline => info!("Timeout reached, stopping workload"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}
