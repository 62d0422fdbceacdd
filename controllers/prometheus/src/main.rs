//! Prometheus Controller
//!
//! Reconciles `Prometheus` objects into sharded StatefulSets:
//! - selects ServiceMonitors, PodMonitors, Probes and ScrapeConfigs
//! - packs PrometheusRules into size-limited ConfigMaps
//! - resolves credentials and TLS assets into Secrets
//! - creates, updates or recreates one StatefulSet per shard

mod assets;
mod backoff;
mod config;
mod config_generator;
mod controller;
mod error;
mod metrics;
mod naming;
mod reconcile_helpers;
mod reconciler;
mod refmanager;
mod rules;
mod selector;
mod server;
mod sharded_secret;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Prometheus Controller");

    let config = OperatorConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Default image: {}:{}", config.prometheus_default_image, config.prometheus_default_version);
    info!("  Reference manager: {:?}", config.ref_manager_strategy);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
