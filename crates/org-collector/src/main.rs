//! org-collector: tenant-scoped HTTP ingress relayed to an authenticated HTTP egress.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use org_collector::{relay, CollectorConfig, EgressClient, IngressBridge};

/// How long in-flight requests get to finish on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Org Collector: accepts pushes from agents and forwards them downstream
#[derive(Parser, Debug)]
#[command(name = "org-collector")]
#[command(version, about = "Tenant-scoped HTTP collector with token introspection")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "org-collector.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs)?;

    let config = CollectorConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    let bridge = Arc::new(IngressBridge::from_config(config.input.clone())?);
    let egress = Arc::new(EgressClient::from_config(&config.output)?);

    let addr = bridge.start().await?;
    info!(addr = %addr, version = org_collector::VERSION, "Collector running. Press Ctrl+C to stop.");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let relay = tokio::spawn(relay::run(
        Arc::clone(&bridge),
        egress,
        config.pipeline.max_in_flight,
        async move {
            let _ = stop_rx.await;
        },
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    // Drain HTTP first: callers still waiting on acks need the relay running
    bridge.shutdown(SHUTDOWN_GRACE).await?;
    let _ = stop_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, relay).await {
        Ok(joined) => joined.context("relay task panicked")??,
        Err(_) => warn!("Relay did not finish in time"),
    }

    let stats = bridge.stats();
    info!(
        received = stats.received.load(Ordering::Relaxed),
        delivered = stats.delivered.load(Ordering::Relaxed),
        abandoned = stats.abandoned.load(Ordering::Relaxed),
        "Collector stopped"
    );
    Ok(())
}
