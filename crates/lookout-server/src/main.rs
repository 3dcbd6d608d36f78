//! CLI entry point for the Lookout scan daemon.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::time::{interval, MissedTickBehavior};
use tracing_subscriber::{fmt, EnvFilter};

use lookout_core::{JobId, JobState, ScanMode};
use lookout_scan::ScanEngine;
use lookout_server::{router, LookoutConfig};
use lookout_store::FileJobStore;

#[derive(Parser)]
#[command(name = "lookoutd")]
#[command(about = "Scan orchestration daemon for the Lookout inventory console")]
struct Cli {
    /// Config file prefix (default: lookout).
    #[arg(short, long, default_value = "lookout", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Listen address, overriding server.bind.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a single scan, print its results as JSON, and exit.
    Scan {
        /// Comma-separated IPs, CIDR networks, ranges, or hostnames.
        #[arg(short, long)]
        targets: String,

        /// Scan mode: quick, full.
        #[arg(short, long, default_value = "quick")]
        mode: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = LookoutConfig::load(&cli.config)?;

    let store = Arc::new(FileJobStore::open(&config.scan.data_dir)?);
    // Recovery runs here, before any request can be served.
    let engine = Arc::new(ScanEngine::new(config.scan.clone(), store)?);

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or(config.server.bind);
            serve(engine, &bind).await
        }
        Command::Scan { targets, mode } => {
            let mode: ScanMode = mode.parse()?;
            run_once(&engine, &targets, mode).await
        }
    }
}

async fn serve(engine: Arc<ScanEngine>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(bind = %listener.local_addr()?, "Lookout API listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Lookout API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Start one scan and poll it to a terminal state. Ctrl-C cancels the scan.
async fn run_once(engine: &ScanEngine, targets: &str, mode: ScanMode) -> anyhow::Result<()> {
    let id: JobId = engine.start_scan(targets, mode)?;
    tracing::info!(job_id = %id, "Scan submitted");

    let mut ticker = interval(engine.config().poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cancel_sent = false;
    let mut last_progress = None;

    let job = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = true;
                if let Err(e) = engine.cancel_scan(id) {
                    tracing::warn!(job_id = %id, error = %e, "Cancel request rejected");
                }
            }
        }

        let job = engine.get_job(id)?;
        if last_progress != Some(job.progress) {
            tracing::info!(
                job_id = %id,
                progress = job.progress,
                status = %job.status_message,
                "Scan progress"
            );
            last_progress = Some(job.progress);
        }
        if job.state.is_terminal() {
            break job;
        }
    };

    match job.state {
        JobState::Completed => {
            let results = engine.get_results(id)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        state => anyhow::bail!("Scan {id} ended {state}: {}", job.status_message),
    }
}
