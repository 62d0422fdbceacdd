//! Main controller implementation.
//!
//! Builds the cluster client, Reference Manager and reconciler, then runs
//! the watchers and the metrics server until one of them stops.

use crate::config::{OperatorConfig, RefManagerStrategy};
use crate::config_generator::YamlConfigGenerator;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::refmanager::RefManager;
use crate::server::{ServerState, serve};
use crate::watcher::{Context, reflect_secrets, watch_prometheuses, watch_service_monitors};
use cluster_client::{ClusterClientTrait, KubeClusterClient};
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube_runtime::reflector;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for Prometheus shard management.
pub struct Controller {
    prometheus_watcher: Task,
    service_monitor_watcher: Task,
    secret_cache: Task,
    server: Task,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Prometheus Controller");

        let kube_client = Client::try_default().await?;
        let metrics = Arc::new(Metrics::new()?);
        let state = Arc::new(ServerState::new(metrics.clone()));
        let namespace = config.watch_namespace.clone();

        let (secrets, writer) = reflector::store::<Secret>();
        let ref_manager = Arc::new(RefManager::new(
            config.ref_manager_strategy,
            kube_client.clone(),
            secrets,
        ));

        let cluster: Arc<dyn ClusterClientTrait> = Arc::new(KubeClusterClient::new(kube_client.clone()));
        let reconciler = Arc::new(
            Reconciler::new(cluster, config.clone(), Arc::new(YamlConfigGenerator), metrics)
                .with_ref_manager(ref_manager.clone()),
        );
        let ctx = Arc::new(Context::new(reconciler));

        let server = tokio::spawn(serve(config.metrics_addr, state.clone()));

        // Only the cache strategy reads the shared Secret cache.
        let secret_cache = match config.ref_manager_strategy {
            RefManagerStrategy::Cache => tokio::spawn(reflect_secrets(kube_client.clone(), namespace.clone(), writer)),
            RefManagerStrategy::Watch => {
                drop(writer);
                tokio::spawn(std::future::pending::<Result<(), ControllerError>>())
            }
        };

        let service_monitor_watcher =
            tokio::spawn(watch_service_monitors(kube_client.clone(), namespace.clone(), ref_manager));
        let prometheus_watcher = tokio::spawn(watch_prometheuses(kube_client, namespace, ctx, state));

        Ok(Self {
            prometheus_watcher,
            service_monitor_watcher,
            secret_cache,
            server,
        })
    }

    /// Runs until the Prometheus watcher shuts down or any task fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Prometheus Controller running");

        let result = tokio::select! {
            result = &mut self.prometheus_watcher => join("Prometheus watcher", result),
            result = &mut self.service_monitor_watcher => join("ServiceMonitor watcher", result),
            result = &mut self.secret_cache => join("Secret cache", result),
            result = &mut self.server => join("HTTP server", result),
        };

        self.service_monitor_watcher.abort();
        self.secret_cache.abort();
        self.server.abort();
        result
    }
}

fn join(task: &str, result: Result<Result<(), ControllerError>, tokio::task::JoinError>) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{task} panicked: {e}")))?
        .map_err(|e| ControllerError::Watch(format!("{task} error: {e}")))
}
