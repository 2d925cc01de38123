//! slipwayd — the Slipway release pipeline daemon.
//!
//! Single binary that assembles all Slipway subsystems:
//! - State store (redb)
//! - Job queue + runner
//! - Pipeline coordinator
//! - Automatic rollout engine
//! - Release health poller
//!
//! # Usage
//!
//! ```text
//! slipwayd run --config slipway.toml --data-dir /var/lib/slipway
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use slipway_coordinator::{Coordinator, ExecutionContext, PipelineHandler};
use slipway_health::HealthPoller;
use slipway_jobs::{job_queue, JobHandler};
use slipway_lock::LockManager;
use slipway_providers::{
    CiProvider, FakeCi, FakeNotifier, FakeStore, FakeVcs, Notifier, StoreProvider, VcsProvider,
};
use slipway_rollout::AutoRolloutEngine;

use config::SlipwayConfig;

#[derive(Parser)]
#[command(name = "slipwayd", about = "Slipway release pipeline daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline daemon.
    Run {
        /// Path to slipway.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/slipway")]
        data_dir: PathBuf,

        /// Scheduled release kickoff check interval in seconds.
        #[arg(long, default_value = "60")]
        kickoff_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slipwayd=debug,slipway=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            kickoff_interval,
        } => run(config, data_dir, kickoff_interval).await,
    }
}

async fn run(
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    kickoff_interval: u64,
) -> anyhow::Result<()> {
    info!("slipway daemon starting");

    let config = match config_path {
        Some(path) => {
            let config = SlipwayConfig::from_file(&path)?;
            info!(path = ?path, "configuration loaded");
            config
        }
        None => SlipwayConfig::default(),
    };

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("slipway.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = slipway_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // In-memory providers; real VCS/CI/store integrations plug in here.
    let vcs: Arc<dyn VcsProvider> = Arc::new(FakeVcs::new());
    let ci: Arc<dyn CiProvider> = Arc::new(FakeCi::new());
    let store: Arc<dyn StoreProvider> = Arc::new(FakeStore::new());
    let notifier: Arc<dyn Notifier> = Arc::new(FakeNotifier::new());
    warn!("running with in-memory providers; no external systems will be called");

    let locks = LockManager::new();
    let (queue, runner) = job_queue();

    let coordinator = Coordinator::new(
        state.clone(),
        vcs,
        ci,
        store.clone(),
        notifier,
        locks,
        queue.clone(),
        config.coordinator_config(),
    );
    info!("coordinator initialized");

    let mut engine = AutoRolloutEngine::new(
        state.clone(),
        coordinator.rollout_controller().clone(),
        queue.clone(),
    );
    if let Some(interval) = config.rollout_interval() {
        engine = engine.with_interval(interval);
    }
    info!("auto rollout engine initialized");

    let mut poller = HealthPoller::new(state, store, queue.clone());
    if let Some(window) = config.monitor_window() {
        poller = poller.with_monitor_window(window);
    }
    info!("health poller initialized");

    let handler: Arc<dyn JobHandler> =
        Arc::new(PipelineHandler::new(coordinator.clone(), engine.clone(), poller));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner_shutdown = shutdown_rx.clone();
    let engine_shutdown = shutdown_rx.clone();
    let kickoff_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let runner_handle = tokio::spawn(async move {
        runner.run(handler, queue, runner_shutdown).await;
    });

    let sweep_interval = config.sweep_interval();
    let engine_handle = tokio::spawn(async move {
        engine.run(sweep_interval, engine_shutdown).await;
    });

    let kickoff_handle = tokio::spawn(kickoff_loop(
        coordinator,
        Duration::from_secs(kickoff_interval),
        kickoff_shutdown,
    ));

    // ── Graceful shutdown on Ctrl-C ────────────────────────────

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = runner_handle.await;
    let _ = engine_handle.await;
    let _ = kickoff_handle.await;

    info!("slipway daemon stopped");
    Ok(())
}

/// Start due scheduled releases until shutdown.
async fn kickoff_loop(
    coordinator: Coordinator,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let ctx = ExecutionContext::system();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {
                match coordinator.kickoff_due_scheduled(&ctx).await {
                    Ok(0) => {}
                    Ok(kicked) => info!(kicked, "scheduled releases started"),
                    Err(err) => warn!(%err, "scheduled kickoff sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown requested, kickoff loop exiting");
                    return;
                }
            }
        }
    }
}
