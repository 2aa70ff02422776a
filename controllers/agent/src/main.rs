//! Agent Controller
//!
//! Mirrors assisted-installer hosts into `Agent` resources:
//! - Agent spec (binding, hostname, role, disk, approval, ignition overrides,
//!   installer args) is pushed to the backend host
//! - Host state is projected back onto Agent conditions, inventory labels and
//!   debug info
//! - Hosts joining an installed cluster get their node CSRs approved
//!
//! The same process runs the cluster lifecycle monitor on the elected leader.

mod backoff;
mod config;
mod controller;
mod error;
mod kube_api;
mod leader;
mod metrics_server;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use anyhow::Result;
use config::ControllerConfig;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Agent Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Assisted service URL: {}", config.assisted_service_url);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Lease: {}/{} as {}", config.pod_namespace, config.lease_name, config.pod_name);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
