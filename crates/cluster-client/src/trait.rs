//! ClusterClient trait for mocking
//!
//! This trait abstracts the Kubernetes API to enable mocking in unit tests.
//! [`crate::KubeClusterClient`] implements it on top of `kube::Api`, tests
//! use [`crate::MockClusterClient`].

use crate::error::ClusterError;
use crds::{PodMonitor, Probe, Prometheus, PrometheusRule, ScrapeConfig, ServiceMonitor};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use kube::core::Selector;

/// Trait for cluster API operations
///
/// `get_*` calls return `Ok(None)` for missing objects. Writes report a
/// missing object as [`ClusterError::NotFound`]. All async methods must be
/// `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Prometheus
    async fn get_prometheus(&self, namespace: &str, name: &str) -> Result<Option<Prometheus>, ClusterError>;
    async fn update_prometheus_status(&self, prometheus: &Prometheus) -> Result<(), ClusterError>;

    // Dependent resources
    async fn list_service_monitors(&self, namespace: &str, selector: &Selector) -> Result<Vec<ServiceMonitor>, ClusterError>;
    async fn list_pod_monitors(&self, namespace: &str, selector: &Selector) -> Result<Vec<PodMonitor>, ClusterError>;
    async fn list_probes(&self, namespace: &str, selector: &Selector) -> Result<Vec<Probe>, ClusterError>;
    async fn list_scrape_configs(&self, namespace: &str, selector: &Selector) -> Result<Vec<ScrapeConfig>, ClusterError>;
    async fn list_prometheus_rules(&self, namespace: &str, selector: &Selector) -> Result<Vec<PrometheusRule>, ClusterError>;

    // Namespaces
    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>, ClusterError>;

    // Secrets
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;
    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // ConfigMaps
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError>;
    async fn list_config_maps(&self, namespace: &str, selector: &Selector) -> Result<Vec<ConfigMap>, ClusterError>;
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError>;
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // StatefulSets
    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, ClusterError>;
    async fn list_stateful_sets(&self, namespace: &str, selector: &Selector) -> Result<Vec<StatefulSet>, ClusterError>;
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError>;
    async fn update_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError>;
    /// Delete a StatefulSet, optionally with foreground propagation.
    async fn delete_stateful_set(&self, namespace: &str, name: &str, foreground: bool) -> Result<(), ClusterError>;

    // Services
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError>;
    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError>;

    // Pods
    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, ClusterError>;
}
