//! PLDM Agent - Main entry point
//!
//! Watches USB serial ports, re-identifies reconnected PLDM endpoints by
//! their FRU data, and keeps the Redfish resource tree's availability in step.

mod config;
mod inspect;
mod redfish;

use anyhow::{Context, Result};
use clap::Parser;
use pldm_core::Snapshot;
use pldm_discovery::{HotplugAgent, SerialInventoryReader, ShutdownToken, SysfsScanner};
use pldm_mctp::SerialTransport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::redfish::{HttpResourceTree, Propagator};

#[derive(Parser, Debug)]
#[command(name = "pldm-agent")]
#[command(about = "PLDM endpoint hot-plug agent for Redfish resource trees")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pldm-agent.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Snapshot file written by the configurator
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,

    /// Read and decode everything one device exposes, print it as JSON, and exit
    #[arg(long, value_name = "DEVICE")]
    inspect: Option<String>,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// First of Ctrl-C or SIGTERM
#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is read before logging so its level can apply
    let config_result = config::load_config(&args.config);
    let level = args
        .log_level
        .clone()
        .or_else(|| config_result.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&level))
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("PLDM agent v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config_result?;
    if let Some(snapshot) = args.snapshot {
        config.agent.snapshot_path = snapshot;
    }

    if let Some(device) = args.inspect {
        let transport = SerialTransport::open(&device, config.serial.baud_rate, config.read_timing())
            .with_context(|| format!("Failed to open {device}"))?;
        let doc = tokio::task::spawn_blocking({
            let walk = config.walk_options();
            let fru = config.fru_options();
            move || inspect::inspect(&device, transport, &walk, &fru)
        })
        .await?;
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    let snapshot = Snapshot::load(&config.agent.snapshot_path)
        .with_context(|| format!("Failed to load snapshot {}", config.agent.snapshot_path.display()))?;

    let base_url = config.server.base_url();
    info!(
        server = %base_url,
        snapshot = %config.agent.snapshot_path.display(),
        poll_secs = config.agent.poll_interval_secs,
        probe = config.probe.enabled,
        "Configuration loaded"
    );
    if config.serial.experimental_inline_io {
        warn!("Inline serial I/O enabled, full reads will block the polling task");
    }

    let tree = HttpResourceTree::new(
        base_url,
        Duration::from_secs(config.server.request_timeout_secs),
    )?;

    let shutdown = ShutdownToken::new();
    let reader = SerialInventoryReader::new(config.reader_config(), shutdown.flag());
    let mut agent = HotplugAgent::new(
        config.agent_config(),
        snapshot,
        Box::new(SysfsScanner::new(config.serial.sysfs_root.clone())),
        Arc::new(reader),
        Arc::new(Propagator::new(tree)),
    );

    if args.once {
        let summary = agent.poll_once().await?;
        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            enabled = summary.enabled.len(),
            disabled = summary.disabled.len(),
            "Single poll cycle complete"
        );
        return Ok(());
    }

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match wait_for_signal().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }
            }
            shutdown.cancel();
        }
    });

    agent.run(shutdown).await;
    Ok(())
}
