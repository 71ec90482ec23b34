//! Auto-Expose Controller
//!
//! Watches Deployments and keeps a managed Service in lockstep with every
//! workload that opts in via the `mode: autoExpose` metadata label: the
//! Service is created when the workload appears and removed when it goes,
//! with the workload's template labels as selector and one port per valid
//! declared container port.

mod backoff;
mod cache;
mod controller;
mod error;
mod event;
mod exposure;
mod filter;
mod queue;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use std::env;

use controller::Controller;
use error::ControllerError;
use kube::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Verbose flag widens the default filter; RUST_LOG still wins.
    let debug = env::var("AUTO_EXPOSE_DEBUG")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("Starting Auto-Expose Controller");

    // Load configuration from environment variables
    let namespace = env::var("WATCH_NAMESPACE").ok();
    let workers = match env::var("RECONCILE_WORKERS") {
        Ok(raw) => raw.parse::<usize>().map_err(|_| {
            ControllerError::InvalidConfig(format!(
                "RECONCILE_WORKERS must be a number, got `{}`",
                raw
            ))
        })?,
        Err(_) => 1,
    };

    info!("Configuration:");
    info!("  Namespace: {}", namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", workers);

    // In-cluster config and kubeconfig are both handled by the client.
    let client = Client::try_default().await?;

    let mut controller = Controller::new(client, namespace, workers);
    controller.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutdown signal received");
    controller.stop().await;

    Ok(())
}
