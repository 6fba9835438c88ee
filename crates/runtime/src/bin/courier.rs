//! courier: runs the scheduling substrate as a standalone process.
//!
//! Starts the worker pool, job groups, timer heap, crontab and callout,
//! schedules the `[[crontab]]` and `[[timers]]` jobs from the config file,
//! and runs until Ctrl-C / SIGTERM or the optional deadline.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, no scheduled jobs
//! courier
//!
//! # Config file with scheduled jobs, stop after a minute
//! courier --config courier.toml --run-for-secs 60
//!
//! # Via environment variables
//! COURIER_CONFIG=courier.toml COURIER_POOL_WORKERS=8 courier
//! ```
//!
//! Built-in functions available to scheduled jobs:
//! - `log(message)`: logs `message` at info level
//! - `heartbeat()`: logs a running beat counter

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use courier_core::Callable;
use courier_runtime::{global, Courier, CourierConfig};

/// In-process task dispatch and scheduling runtime.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the number of pool workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Shut down after this many seconds instead of waiting for a signal.
    #[arg(long)]
    run_for_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_core::config::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting courier");

    let mut config = match &cli.config {
        Some(path) => CourierConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let mut config = CourierConfig::default();
            config.apply_env_overrides();
            config.validate().context("invalid configuration")?;
            config
        }
    };
    if let Some(workers) = cli.workers {
        config.pool.initial_workers = workers;
    }
    config.log_summary();

    let courier = global::init(config.clone()).context("failed to start courier")?;
    register_builtins(courier).context("failed to register built-in functions")?;
    courier
        .schedule_configured(&config)
        .context("failed to schedule configured jobs")?;

    match cli.run_for_secs {
        Some(secs) => {
            tokio::select! {
                _ = shutdown_signal() => tracing::info!("shutdown signal received"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::info!(secs, "run deadline reached");
                }
            }
        }
        None => {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
        }
    }

    // Joining worker threads blocks; keep it off the async executor.
    tokio::task::spawn_blocking(global::shutdown)
        .await
        .context("shutdown task failed")?;

    let metrics = courier.pool().metrics();
    tracing::info!(
        executed = metrics.total_executed(),
        dropped = metrics.dropped,
        "courier stopped"
    );
    Ok(())
}

fn register_builtins(courier: &Courier) -> anyhow::Result<()> {
    courier.register(
        "log",
        Callable::dynamic(|message: String| {
            tracing::info!(%message, "log");
        }),
    )?;

    let beats = Arc::new(AtomicI64::new(0));
    courier.register(
        "heartbeat",
        Callable::dynamic(move || {
            let beat = beats.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(beat, "heartbeat");
            beat
        }),
    )?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
