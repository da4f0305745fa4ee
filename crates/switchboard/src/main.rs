//! Switchboard - Main Entry Point
//!
//! One binary, two roles. Started normally it is the controller: it loads the
//! configuration, starts the worker pool and runs the reference controller
//! until a shutdown signal arrives. Started with the worker environment
//! variables set, which only the supervisor does, it is a socket worker.

mod cli;
mod config;
mod controller;
mod logging;
mod signals;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::Args;
use config::AppConfig;
use controller::Lobby;
use logging::LogOutput;
use std::time::Duration;
use switchboard_protocol::WorkerEnv;
use switchboard_supervisor::{ListenOptions, ProcessLauncher, Supervisor};
use tracing::{error, info};

/// How long workers get to exit on their own during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    match WorkerEnv::from_process_env().context("Invalid worker environment")? {
        Some(env) => run_worker(env).await,
        None => run_controller(Args::parse()).await,
    }
}

async fn run_controller(args: Args) -> Result<()> {
    let mut config = config::load_config(&args.config)
        .await
        .context("Failed to load config")?;
    if args.json_logs {
        config.logging.json_format = true;
    }
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
    logging::setup_logging(&config.logging, args.debug, LogOutput::Stdout)?;

    info!("🚀 Switchboard v{}", env!("CARGO_PKG_VERSION"));
    info!("📂 Config: {}", args.config.display());

    let config_path = std::fs::canonicalize(&args.config).unwrap_or_else(|_| args.config.clone());
    let launcher = ProcessLauncher::current_exe().context("Cannot locate the worker executable")?;
    let (supervisor, events) = Supervisor::new(launcher, config.network_settings(), Some(config_path));

    supervisor
        .listen(ListenOptions {
            port: args.port,
            bind_address: args.bind.clone(),
            workers: args.workers,
        })
        .context("Failed to start the worker pool")?;
    let lobby = tokio::spawn(Lobby::new(supervisor.clone()).run(events));

    info!("🛑 Press Ctrl+C to gracefully shutdown");
    let received = signals::wait_for_shutdown().await?;

    info!("🛑 Received {}, stopping workers...", received);
    supervisor.shutdown(SHUTDOWN_GRACE).await;
    lobby.abort();
    info!("👋 Switchboard stopped");
    Ok(())
}

async fn run_worker(env: WorkerEnv) -> Result<()> {
    let config = match &env.config_path {
        Some(path) => config::read_config(path).await?,
        None => AppConfig::default(),
    };
    logging::setup_logging(&config.logging, false, LogOutput::Stderr)?;

    let settings = config.worker_settings()?;
    let worker_id = env.worker_id;
    // Exit explicitly: a pending stdin read would otherwise hold up runtime
    // shutdown.
    match switchboard_worker::run_worker(env, settings).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("❌ Worker {} failed: {}", worker_id, e);
            std::process::exit(1);
        }
    }
}
