//! Resource Selector
//!
//! Selects the ServiceMonitors, PodMonitors, Probes and ScrapeConfigs a
//! Prometheus asks for, across the namespaces its namespace selectors allow.
//! Each object is validated on its own: an invalid object is logged, counted
//! and left out, the pass carries on with the rest.
//!
//! Credential references are resolved through the pass's
//! [`StoreBuilder`](crate::assets::StoreBuilder), which both proves they
//! exist and warms the cache the configuration generator reads from.

pub mod namespaces;
pub mod validation;

pub use namespaces::select_namespaces;
pub use validation::Version;

use crate::assets::StoreBuilder;
use cluster_client::{ClusterClientTrait, ClusterError};
use crds::{
    LabelSelector, PodMonitor, Probe, Prometheus, PrometheusRule, ScrapeConfig, ServiceMonitor,
};
use futures::future::BoxFuture;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::Resource;
use kube::core::Selector;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that abort a whole selection.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// A selector of the Prometheus itself does not parse
    #[error("invalid {field}: {message}")]
    InvalidSelector { field: String, message: String },

    /// The Prometheus version does not parse
    #[error("failed to parse Prometheus version {0:?}")]
    InvalidVersion(String),

    /// Listing candidates failed
    #[error("failed to list {kind} objects in namespace {namespace:?}: {source}")]
    List {
        kind: String,
        namespace: String,
        #[source]
        source: ClusterError,
    },
}

/// Convert a CRD label selector into a kube selector.
pub fn label_selector(field: &str, selector: &LabelSelector) -> Result<Selector, SelectorError> {
    Selector::try_from(metav1::LabelSelector::from(selector)).map_err(|e| SelectorError::InvalidSelector {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// `namespace/name` of an object.
pub fn object_key<K: Resource>(obj: &K) -> Option<String> {
    let meta = obj.meta();
    Some(format!("{}/{}", meta.namespace.as_deref()?, meta.name.as_deref()?))
}

/// Kinds that can be listed by namespace and label selector.
pub trait Listable: Resource<DynamicType = ()> + Sized + Send {
    fn list<'a>(
        client: &'a dyn ClusterClientTrait,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<Self>, ClusterError>>;
}

impl Listable for ServiceMonitor {
    fn list<'a>(
        client: &'a dyn ClusterClientTrait,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<Self>, ClusterError>> {
        client.list_service_monitors(namespace, selector)
    }
}

impl Listable for PodMonitor {
    fn list<'a>(
        client: &'a dyn ClusterClientTrait,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<Self>, ClusterError>> {
        client.list_pod_monitors(namespace, selector)
    }
}

impl Listable for Probe {
    fn list<'a>(
        client: &'a dyn ClusterClientTrait,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<Self>, ClusterError>> {
        client.list_probes(namespace, selector)
    }
}

impl Listable for ScrapeConfig {
    fn list<'a>(
        client: &'a dyn ClusterClientTrait,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<Self>, ClusterError>> {
        client.list_scrape_configs(namespace, selector)
    }
}

impl Listable for PrometheusRule {
    fn list<'a>(
        client: &'a dyn ClusterClientTrait,
        namespace: &'a str,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<Vec<Self>, ClusterError>> {
        client.list_prometheus_rules(namespace, selector)
    }
}

/// List every object matching `selector` in the namespaces allowed by
/// `namespace_selector`, keyed by `namespace/name`.
///
/// A missing selector selects nothing; an empty one selects everything.
pub async fn list_matching<T: Listable>(
    client: &dyn ClusterClientTrait,
    own_namespace: &str,
    selector: Option<&LabelSelector>,
    namespace_selector: Option<&LabelSelector>,
) -> Result<BTreeMap<String, T>, SelectorError> {
    let kind = T::kind(&()).to_string();
    let Some(selector) = selector else {
        return Ok(BTreeMap::new());
    };
    let selector = label_selector(&format!("{kind} selector"), selector)?;
    let namespaces = select_namespaces(client, own_namespace, namespace_selector).await?;
    debug!(kind = %kind, namespaces = %namespaces.join(","), "Selecting objects");

    let mut objects = BTreeMap::new();
    for namespace in &namespaces {
        let items = T::list(client, namespace, &selector)
            .await
            .map_err(|source| SelectorError::List {
                kind: kind.clone(),
                namespace: namespace.clone(),
                source,
            })?;
        for obj in items {
            if let Some(key) = object_key(&obj) {
                objects.insert(key, obj);
            }
        }
    }
    Ok(objects)
}

/// Accepted objects of one kind plus the number rejected.
#[derive(Debug, Clone)]
pub struct Selection<T> {
    pub resources: BTreeMap<String, T>,
    pub rejected: usize,
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self {
            resources: BTreeMap::new(),
            rejected: 0,
        }
    }
}

impl<T> Selection<T> {
    /// Objects considered, valid or not.
    pub fn selected_len(&self) -> usize {
        self.resources.len() + self.rejected
    }

    pub(crate) fn record(&mut self, kind: &str, key: String, obj: T, result: Result<(), String>) {
        match result {
            Ok(()) => {
                self.resources.insert(key, obj);
            }
            Err(error) => {
                warn!(kind = %kind, object = %key, error = %error, "Skipping object with invalid configuration");
                self.rejected += 1;
            }
        }
    }
}

/// Selects and validates the dependents of one Prometheus.
pub struct ResourceSelector<'a> {
    client: Arc<dyn ClusterClientTrait>,
    prometheus: &'a Prometheus,
    store: &'a mut StoreBuilder,
    version: Version,
}

impl<'a> ResourceSelector<'a> {
    /// `default_version` applies when the Prometheus does not pin one.
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        prometheus: &'a Prometheus,
        store: &'a mut StoreBuilder,
        default_version: &str,
    ) -> Result<Self, SelectorError> {
        let raw = prometheus.spec.version.as_deref().unwrap_or(default_version);
        let version = Version::parse(raw).ok_or_else(|| SelectorError::InvalidVersion(raw.to_string()))?;
        Ok(Self {
            client,
            prometheus,
            store,
            version,
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    fn namespace(&self) -> &'a str {
        self.prometheus.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub async fn select_service_monitors(&mut self) -> Result<Selection<ServiceMonitor>, SelectorError> {
        let spec = &self.prometheus.spec;
        let objects: BTreeMap<String, ServiceMonitor> = list_matching(
            self.client.as_ref(),
            self.namespace(),
            spec.service_monitor_selector.as_ref(),
            spec.service_monitor_namespace_selector.as_ref(),
        )
        .await?;

        let mut selection = Selection::default();
        for (key, sm) in objects {
            let result = self.check_service_monitor(&sm).await;
            selection.record("ServiceMonitor", key, sm, result);
        }
        Ok(selection)
    }

    pub async fn select_pod_monitors(&mut self) -> Result<Selection<PodMonitor>, SelectorError> {
        let spec = &self.prometheus.spec;
        let objects: BTreeMap<String, PodMonitor> = list_matching(
            self.client.as_ref(),
            self.namespace(),
            spec.pod_monitor_selector.as_ref(),
            spec.pod_monitor_namespace_selector.as_ref(),
        )
        .await?;

        let mut selection = Selection::default();
        for (key, pm) in objects {
            let result = self.check_pod_monitor(&pm).await;
            selection.record("PodMonitor", key, pm, result);
        }
        Ok(selection)
    }

    pub async fn select_probes(&mut self) -> Result<Selection<Probe>, SelectorError> {
        let spec = &self.prometheus.spec;
        let objects: BTreeMap<String, Probe> = list_matching(
            self.client.as_ref(),
            self.namespace(),
            spec.probe_selector.as_ref(),
            spec.probe_namespace_selector.as_ref(),
        )
        .await?;

        let mut selection = Selection::default();
        for (key, probe) in objects {
            let result = self.check_probe(&probe).await;
            selection.record("Probe", key, probe, result);
        }
        Ok(selection)
    }

    pub async fn select_scrape_configs(&mut self) -> Result<Selection<ScrapeConfig>, SelectorError> {
        let spec = &self.prometheus.spec;
        let objects: BTreeMap<String, ScrapeConfig> = list_matching(
            self.client.as_ref(),
            self.namespace(),
            spec.scrape_config_selector.as_ref(),
            spec.scrape_config_namespace_selector.as_ref(),
        )
        .await?;

        let mut selection = Selection::default();
        for (key, sc) in objects {
            let result = self.check_scrape_config(&sc).await;
            selection.record("ScrapeConfig", key, sc, result);
        }
        Ok(selection)
    }

    fn check_relabelings(&self, field: &str, configs: &[crds::RelabelConfig]) -> Result<(), String> {
        validation::validate_relabel_configs(configs, self.version).map_err(|e| format!("{field}: {e}"))
    }

    fn check_scrape_timeout(&self, interval: Option<&String>, timeout: Option<&String>) -> Result<(), String> {
        validation::validate_scrape_timeout(
            interval.map(String::as_str),
            timeout.map(String::as_str),
            self.prometheus.spec.scrape_interval.as_deref(),
        )
    }

    async fn check_service_monitor(&mut self, sm: &ServiceMonitor) -> Result<(), String> {
        let ns = sm.metadata.namespace.as_deref().unwrap_or_default();
        label_selector("selector", &sm.spec.selector).map_err(|e| e.to_string())?;
        let deny_fs = self.prometheus.spec.arbitrary_fs_access_through_sms.deny;

        for (i, ep) in sm.spec.endpoints.iter().enumerate() {
            let at = |e: String| format!("endpoints[{i}]: {e}");
            if deny_fs {
                validation::check_arbitrary_fs_access(ep).map_err(at)?;
            }
            self.store
                .add_bearer_token(ns, ep.bearer_token_secret.as_ref())
                .await
                .map_err(|e| at(format!("bearerTokenSecret: {e}")))?;
            self.store
                .add_basic_auth(ns, ep.basic_auth.as_ref())
                .await
                .map_err(|e| at(format!("basicAuth: {e}")))?;
            self.store
                .add_tls_config(ns, ep.tls_config.as_ref())
                .await
                .map_err(|e| at(format!("tlsConfig: {e}")))?;
            self.store
                .add_oauth2(ns, ep.oauth2.as_ref())
                .await
                .map_err(|e| at(format!("oauth2: {e}")))?;
            self.store
                .add_safe_authorization(ns, ep.authorization.as_ref())
                .await
                .map_err(|e| at(format!("authorization: {e}")))?;
            self.check_scrape_timeout(ep.interval.as_ref(), ep.scrape_timeout.as_ref())
                .map_err(at)?;
            self.check_relabelings("relabelConfigs", &ep.relabelings).map_err(at)?;
            self.check_relabelings("metricRelabelConfigs", &ep.metric_relabelings)
                .map_err(at)?;
            self.store
                .add_proxy_config(ns, ep.proxy_config.as_ref())
                .await
                .map_err(|e| at(format!("proxyConfig: {e}")))?;
        }
        Ok(())
    }

    async fn check_pod_monitor(&mut self, pm: &PodMonitor) -> Result<(), String> {
        let ns = pm.metadata.namespace.as_deref().unwrap_or_default();
        label_selector("selector", &pm.spec.selector).map_err(|e| format!("failed to parse label selector: {e}"))?;

        for (i, ep) in pm.spec.pod_metrics_endpoints.iter().enumerate() {
            let at = |e: String| format!("endpoint[{i}]: {e}");
            self.store
                .add_bearer_token(ns, ep.bearer_token_secret.as_ref())
                .await
                .map_err(|e| at(format!("bearerTokenSecret: {e}")))?;
            self.store
                .add_basic_auth(ns, ep.basic_auth.as_ref())
                .await
                .map_err(|e| at(format!("basicAuth: {e}")))?;
            self.store
                .add_safe_tls_config(ns, ep.tls_config.as_ref())
                .await
                .map_err(|e| at(format!("tlsConfig: {e}")))?;
            self.store
                .add_oauth2(ns, ep.oauth2.as_ref())
                .await
                .map_err(|e| at(format!("oauth2: {e}")))?;
            self.store
                .add_safe_authorization(ns, ep.authorization.as_ref())
                .await
                .map_err(|e| at(format!("authorization: {e}")))?;
            self.check_scrape_timeout(ep.interval.as_ref(), ep.scrape_timeout.as_ref())
                .map_err(at)?;
            self.check_relabelings("relabelConfigs", &ep.relabelings).map_err(at)?;
            self.check_relabelings("metricRelabelConfigs", &ep.metric_relabelings)
                .map_err(at)?;
            self.store
                .add_proxy_config(ns, ep.proxy_config.as_ref())
                .await
                .map_err(|e| at(format!("proxyConfig: {e}")))?;
        }
        Ok(())
    }

    async fn check_probe(&mut self, probe: &Probe) -> Result<(), String> {
        let ns = probe.metadata.namespace.as_deref().unwrap_or_default();
        let spec = &probe.spec;

        self.store
            .add_bearer_token(ns, spec.bearer_token_secret.as_ref())
            .await
            .map_err(|e| format!("bearerTokenSecret: {e}"))?;
        self.store
            .add_basic_auth(ns, spec.basic_auth.as_ref())
            .await
            .map_err(|e| format!("basicAuth: {e}"))?;
        self.store
            .add_safe_tls_config(ns, spec.tls_config.as_ref())
            .await
            .map_err(|e| format!("tlsConfig: {e}"))?;
        self.store
            .add_safe_authorization(ns, spec.authorization.as_ref())
            .await
            .map_err(|e| format!("authorization: {e}"))?;
        self.store
            .add_oauth2(ns, spec.oauth2.as_ref())
            .await
            .map_err(|e| format!("oauth2: {e}"))?;
        self.check_scrape_timeout(spec.interval.as_ref(), spec.scrape_timeout.as_ref())?;
        self.check_relabelings("metricRelabelConfigs", &spec.metric_relabelings)?;
        if let Some(static_config) = &spec.targets.static_config {
            self.check_relabelings("targets.staticConfig.relabelConfigs", &static_config.relabelings)?;
        }
        validation::validate_prober_url(&spec.prober.url).map_err(|e| {
            format!(
                "{:?} url specified in proberSpec is invalid, it should be of the format `hostname` or `hostname:port`: {e}",
                spec.prober.url
            )
        })
    }

    async fn check_scrape_config(&mut self, sc: &ScrapeConfig) -> Result<(), String> {
        let ns = sc.metadata.namespace.as_deref().unwrap_or_default();
        let spec = &sc.spec;

        self.check_relabelings("relabelConfigs", &spec.relabelings)?;
        self.store
            .add_basic_auth(ns, spec.basic_auth.as_ref())
            .await
            .map_err(|e| format!("basicAuth: {e}"))?;
        self.store
            .add_safe_authorization(ns, spec.authorization.as_ref())
            .await
            .map_err(|e| format!("authorization: {e}"))?;
        self.store
            .add_oauth2(ns, spec.oauth2.as_ref())
            .await
            .map_err(|e| format!("oauth2: {e}"))?;
        self.store
            .add_safe_tls_config(ns, spec.tls_config.as_ref())
            .await
            .map_err(|e| format!("tlsConfig: {e}"))?;
        self.check_scrape_timeout(spec.scrape_interval.as_ref(), spec.scrape_timeout.as_ref())?;
        self.store
            .add_proxy_config(ns, spec.proxy_config.as_ref())
            .await
            .map_err(|e| format!("proxyConfig: {e}"))?;
        self.check_relabelings("metricRelabelConfigs", &spec.metric_relabelings)?;

        for (i, config) in spec.static_configs.iter().enumerate() {
            if let Some(target) = config.targets.iter().find(|t| t.is_empty() || t.contains("://")) {
                return Err(format!("staticConfigs: [{i}]: invalid target {target:?}"));
            }
            if let Some(label) = config.labels.keys().find(|l| !validation::is_valid_label_name(l)) {
                return Err(format!("staticConfigs: [{i}]: invalid label in map {label}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "selector_test.rs"]
mod selector_test;
