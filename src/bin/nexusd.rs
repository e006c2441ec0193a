//! Nexus Daemon - display platform manager
//!
//! Owns the display hardware resource for the lifetime of the process,
//! joins the display server under a callsign and keeps the client registry
//! until SIGTERM or SIGINT.
//!
//! # Usage
//!
//! ```bash
//! # Run against the simulated driver with default configuration
//! nexusd --simulate
//!
//! # Load configuration from a file and attach two demo clients
//! nexusd --simulate --config /etc/nexus/platform.json --client netflix --client youtube
//! ```

use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nexus_core::PlatformState;
use nexusd::driver::sim::SimulatedDriver;
use nexusd::observer::Observers;
use nexusd::platform::spawn_platform;

/// Nexus daemon - display platform session manager
#[derive(Parser, Debug)]
#[command(name = "nexusd", version, about)]
struct Args {
    /// Identity used when joining the display server
    #[arg(long, default_value = "Compositor")]
    callsign: String,

    /// Platform configuration file (JSON)
    #[arg(long, env = "NEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Run against the in-process simulated driver
    #[arg(long)]
    simulate: bool,

    /// Simulated client to attach once operational (repeatable)
    #[arg(long = "client", value_name = "NAME", requires = "simulate")]
    clients: Vec<String>,
}

fn load_configuration(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display())),
        None => Ok(String::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("nexusd=info".parse()?)
                .add_directive("nexus_core=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        callsign = %args.callsign,
        "Nexus daemon starting"
    );

    if !args.simulate {
        bail!("No hardware driver is linked into this build; run with --simulate");
    }

    let configuration = load_configuration(args.config.as_ref())?;

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let driver = Arc::new(SimulatedDriver::new());
    let platform = spawn_platform(
        args.callsign.as_str(),
        &configuration,
        driver.clone(),
        Observers::tracing(),
    )
    .await
    .context("Failed to construct display platform")?;

    platform
        .join()
        .await
        .context("Failed to join display server")?;
    platform
        .start()
        .await
        .context("Failed to start display server")?;

    let resolution = platform.resolution().await.context("Failed to read resolution")?;
    info!(state = %platform.state(), resolution = %resolution, "Display platform ready");

    for name in args.clients {
        let sim = driver.clone();
        let status = tokio::task::spawn_blocking(move || sim.connect(&name))
            .await
            .context("Simulated client task failed")?;
        if !status.is_accepted() {
            warn!(status = status.code(), "Simulated client was rejected");
        }
    }

    let mut state_changes = platform.state_changes();
    tokio::select! {
        _ = cancel_token.cancelled() => {}
        _ = async {
            // Stops waiting once the platform fails on its own
            while state_changes.changed().await.is_ok() {
                if *state_changes.borrow_and_update() == PlatformState::Failure {
                    warn!("Display platform failed");
                    break;
                }
            }
        } => {}
    }

    let clients = platform.clients().await;
    info!(clients = clients.len(), "Shutting down display platform");

    platform
        .shutdown()
        .await
        .context("Failed to shut down display platform")?;

    info!("Nexus daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
