//! clocksmith - clock maintenance service for networked embedded terminals
//!
//! # Usage
//!
//! ```bash
//! # Run against the simulated terminal with built-in defaults
//! cargo run --release
//!
//! # Run with a config file and a drifted terminal clock
//! cargo run --release -- --config clocksmith.toml --drift-secs 180
//!
//! # Run for a bounded duration, then print the status snapshot
//! cargo run --release -- --run-for 60
//! ```
//!
//! # Environment Variables
//!
//! - `CLOCKSMITH_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::Result;
use clap::Parser;
use clocksmith::config::ServiceConfig;
use clocksmith::{DeviceEndpoint, DeviceManager, Scheduler, SchedulerEvent, SimulatedDevice};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "clocksmith")]
#[command(about = "Resilient clock maintenance service for networked embedded terminals")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration file (overrides CLOCKSMITH_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial clock drift of the simulated terminal, in seconds
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    drift_secs: i64,

    /// Run for this many seconds, then stop and print the status snapshot
    #[arg(long, value_name = "SECONDS")]
    run_for: Option<u64>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let raw = match &args.config {
        Some(path) => ServiceConfig::from_path(path)?,
        None => ServiceConfig::load()?,
    };
    let config = raw.validate()?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  clocksmith v{}", env!("CARGO_PKG_VERSION"));
    info!("  Terminal Clock Maintenance Service");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "Terminal: {}:{} | Window: {}-{} (cutoff {})",
        config.device.address,
        config.device.port,
        config.window.window_start,
        config.window.window_end,
        config.window.cutoff,
    );

    let endpoint = DeviceEndpoint {
        address: config.device.address.clone(),
        port: config.device.port,
        user: config.device.user.clone(),
        secret: config.device.secret.clone(),
    };

    // The in-tree backend is the simulated terminal. A protocol-backed
    // session drops in behind the same DeviceSession trait.
    let session = SimulatedDevice::new(
        &config.device.address,
        config.device.port,
        chrono::Duration::seconds(args.drift_secs),
    );
    let manager = Arc::new(DeviceManager::new(Box::new(session), config.connection));
    let scheduler = Arc::new(Scheduler::new(
        manager,
        endpoint,
        config.window,
        config.scheduler,
    ));

    scheduler.register_callback(SchedulerEvent::HealthCheck, |ctx| {
        if let Some(report) = &ctx.health {
            debug!(healthy = report.all_healthy(), "Periodic health report");
        }
        Ok(())
    });

    if !scheduler.start().await {
        anyhow::bail!("scheduler failed to start");
    }

    match args.run_for {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run duration elapsed, shutting down");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating shutdown");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating shutdown");
        }
    }

    scheduler.stop().await;

    let status = scheduler.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    info!("clocksmith shutdown complete");
    Ok(())
}
