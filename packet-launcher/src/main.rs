//! packet-launcher: Device controller for Packet bare-metal machines.
//!
//! This daemon:
//! - Loads Device objects and credentials from a manifest into an in-memory registry
//! - Reconciles every Device against the provisioning API (simulated in-process)
//! - Requeues converging devices quickly and ready devices for periodic re-checks
//! - Prints the final state of all devices on shutdown

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use packet_launcher::clients::SimulatedProvider;
use packet_launcher::events::TracingRecorder;
use packet_launcher::registry::Registry;
use packet_launcher::{Config, Controller, Device, DeviceReconciler, MemoryRegistry, Secret};

/// Packet device controller
#[derive(Parser, Debug)]
#[command(name = "packet-launcher", version, about)]
struct Args {
    /// JSON manifest with `devices` and `secrets` to load
    #[arg(long)]
    manifest: PathBuf,

    /// Requeue interval in seconds for devices that are not ready
    #[arg(long, default_value = "15")]
    not_ready_requeue: u64,

    /// Re-check interval in seconds for ready devices
    #[arg(long, default_value = "300")]
    ready_requeue: u64,

    /// Name of the credentials secret in each namespace
    #[arg(long, default_value = "packet-secret")]
    secret_name: String,

    /// Maximum concurrent reconciliations
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Deadline in seconds for a single reconciliation
    #[arg(long, default_value = "60")]
    reconcile_timeout: u64,

    /// Reads before a simulated device becomes active
    #[arg(long, default_value = "2")]
    activation_reads: u32,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            not_ready_requeue: Duration::from_secs(self.not_ready_requeue),
            ready_requeue: Duration::from_secs(self.ready_requeue),
            secret_name: self.secret_name.clone(),
            workers: self.workers,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout),
            ..Config::default()
        }
    }
}

/// Objects loaded at startup.
#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    secrets: Vec<Secret>,
    #[serde(default)]
    devices: Vec<Device>,
}

async fn load_manifest(path: &PathBuf, registry: &MemoryRegistry) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;

    info!(
        "Loading manifest: {} devices, {} secrets",
        manifest.devices.len(),
        manifest.secrets.len()
    );
    for secret in manifest.secrets {
        registry.put_secret(secret).await;
    }
    for device in manifest.devices {
        let key = device.key();
        registry
            .create_device(device)
            .await
            .with_context(|| format!("Failed to add device {}", key))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "packet_launcher=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = args.config();

    let registry = Arc::new(MemoryRegistry::new());
    load_manifest(&args.manifest, &registry).await?;

    let provider = SimulatedProvider::new().with_activation_reads(args.activation_reads);
    let reconciler = Arc::new(DeviceReconciler::new(
        registry.clone(),
        Arc::new(provider),
        config.clone(),
    ));
    let controller = Controller::new(
        reconciler,
        registry.clone(),
        Arc::new(TracingRecorder),
        config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.await {
        warn!("Controller task failed: {}", e);
    }

    let devices = registry.list_devices().await?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}
