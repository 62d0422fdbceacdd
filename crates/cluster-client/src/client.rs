//! Cluster API client
//!
//! Implements [`ClusterClientTrait`] with `kube::Api` handles built on demand
//! from a shared `kube::Client`.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crds::{PodMonitor, Probe, Prometheus, PrometheusRule, ScrapeConfig, ServiceMonitor};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use kube::Resource;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::Selector;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Cluster client backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: kube::Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Create a new cluster client
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// The underlying kube client
    pub fn client(&self) -> &kube::Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K>(&self, namespace: &str, selector: &Selector) -> Result<Vec<K>, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let params = ListParams::default().labels_from(selector);
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K>(&self, obj: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let (namespace, name) = object_ref(obj)?;
        debug!(namespace = %namespace, name = %name, "Creating {}", K::kind(&K::DynamicType::default()));
        Ok(self.api::<K>(&namespace).create(&PostParams::default(), obj).await?)
    }

    async fn replace<K>(&self, obj: &K) -> Result<K, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let (namespace, name) = object_ref(obj)?;
        debug!(namespace = %namespace, name = %name, "Updating {}", K::kind(&K::DynamicType::default()));
        Ok(self
            .api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete<K>(&self, namespace: &str, name: &str, params: &DeleteParams) -> Result<(), ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        debug!(namespace = %namespace, name = %name, "Deleting {}", K::kind(&K::DynamicType::default()));
        self.api::<K>(namespace).delete(name, params).await?;
        Ok(())
    }
}

fn object_ref<K: Resource>(obj: &K) -> Result<(String, String), ClusterError> {
    let meta = obj.meta();
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => Ok((ns.to_string(), name.to_string())),
        _ => Err(ClusterError::Api {
            code: 400,
            message: "object must have a namespace and a name".to_string(),
        }),
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_prometheus(&self, namespace: &str, name: &str) -> Result<Option<Prometheus>, ClusterError> {
        self.get_opt(namespace, name).await
    }

    async fn update_prometheus_status(&self, prometheus: &Prometheus) -> Result<(), ClusterError> {
        let (namespace, name) = object_ref(prometheus)?;
        let patch = serde_json::json!({ "status": prometheus.status });
        self.api::<Prometheus>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_service_monitors(&self, namespace: &str, selector: &Selector) -> Result<Vec<ServiceMonitor>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn list_pod_monitors(&self, namespace: &str, selector: &Selector) -> Result<Vec<PodMonitor>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn list_probes(&self, namespace: &str, selector: &Selector) -> Result<Vec<Probe>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn list_scrape_configs(&self, namespace: &str, selector: &Selector) -> Result<Vec<ScrapeConfig>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn list_prometheus_rules(&self, namespace: &str, selector: &Selector) -> Result<Vec<PrometheusRule>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>, ClusterError> {
        let params = ListParams::default().labels_from(selector);
        Ok(Api::<Namespace>::all(self.client.clone()).list(&params).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.get_opt(namespace, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.create(secret).await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.replace(secret).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete::<Secret>(namespace, name, &DeleteParams::default()).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        self.get_opt(namespace, name).await
    }

    async fn list_config_maps(&self, namespace: &str, selector: &Selector) -> Result<Vec<ConfigMap>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create(config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete::<ConfigMap>(namespace, name, &DeleteParams::default()).await
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, ClusterError> {
        self.get_opt(namespace, name).await
    }

    async fn list_stateful_sets(&self, namespace: &str, selector: &Selector) -> Result<Vec<StatefulSet>, ClusterError> {
        self.list(namespace, selector).await
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        self.create(stateful_set).await
    }

    async fn update_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        self.replace(stateful_set).await
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str, foreground: bool) -> Result<(), ClusterError> {
        let params = if foreground {
            DeleteParams::foreground()
        } else {
            DeleteParams::default()
        };
        self.delete::<StatefulSet>(namespace, name, &params).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        self.get_opt(namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        self.create(service).await
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, ClusterError> {
        self.list(namespace, selector).await
    }
}
