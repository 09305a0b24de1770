// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! grit: crash-recoverable job queue
//!
//! `grit serve` runs the queue controller in the foreground: it recovers
//! state from snapshot + WAL, processes jobs until SIGINT/SIGTERM, then
//! shuts down cleanly (final snapshot, WAL close).

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;

use clap::{Args, Parser, Subcommand};
use grit_core::Payload;
use grit_engine::{Controller, JobSpec};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "grit", version, about = "Crash-recoverable job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the queue controller until interrupted
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// State directory for the WAL and snapshots (overrides config)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Worker pool size (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Enqueue this many simulated jobs after startup
    #[arg(long)]
    demo: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let file = config::FileConfig::load(args.config.as_deref())?;
    let cfg = file.into_controller_config(args.state_dir, args.workers);

    info!(
        wal = %cfg.wal_path.display(),
        snapshot = %cfg.snapshot_path.display(),
        workers = cfg.worker_count,
        "starting grit",
    );
    let controller = Controller::start(cfg)?;

    if let Some(count) = args.demo {
        let specs: Vec<JobSpec> = (0..count)
            .map(|_| JobSpec::new(uuid::Uuid::new_v4().to_string(), Payload::new()))
            .collect();
        controller.enqueue_jobs(specs)?;
        info!(count, "enqueued demo jobs");
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down..."),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down..."),
    }

    controller.stop().await?;

    let stats = controller.stats();
    info!(
        pending = stats.pending,
        in_flight = stats.in_flight,
        completed = stats.completed,
        dead = stats.dead,
        "grit stopped",
    );
    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
