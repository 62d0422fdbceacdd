//! Mock ClusterClient for unit testing
//!
//! This module provides a mock implementation of ClusterClientTrait that can be used
//! in unit tests without requiring a running API server.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crds::{PodMonitor, Probe, Prometheus, PrometheusRule, ScrapeConfig, ServiceMonitor};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use kube::Resource;
use kube::core::{Selector, SelectorExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Store<K> = Arc<Mutex<BTreeMap<(String, String), K>>>;

/// Kind of write recorded by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Object created
    Create,
    /// Object replaced
    Update,
    /// Object deleted
    Delete,
    /// Status subresource written
    UpdateStatus,
}

/// A write issued against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    /// Write verb
    pub verb: Verb,
    /// Resource kind, e.g. `StatefulSet`
    pub kind: String,
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

#[derive(Debug, Clone)]
enum InjectedError {
    Invalid { message: String, causes: Vec<String> },
    Api { code: u16, message: String },
}

impl InjectedError {
    fn to_error(&self) -> ClusterError {
        match self {
            InjectedError::Invalid { message, causes } => ClusterError::Invalid {
                message: message.clone(),
                causes: causes.clone(),
            },
            InjectedError::Api { code, message } => ClusterError::Api {
                code: *code,
                message: message.clone(),
            },
        }
    }
}

/// Mock ClusterClient for testing
///
/// Objects live in per-kind in-memory stores. Every create, update and
/// delete is recorded so tests can assert exactly which writes a pass made.
#[derive(Clone, Default)]
pub struct MockClusterClient {
    prometheuses: Store<Prometheus>,
    service_monitors: Store<ServiceMonitor>,
    pod_monitors: Store<PodMonitor>,
    probes: Store<Probe>,
    scrape_configs: Store<ScrapeConfig>,
    prometheus_rules: Store<PrometheusRule>,
    namespaces: Arc<Mutex<BTreeMap<String, Namespace>>>,
    secrets: Store<Secret>,
    config_maps: Store<ConfigMap>,
    stateful_sets: Store<StatefulSet>,
    services: Store<Service>,
    pods: Store<Pod>,
    calls: Arc<Mutex<Vec<WriteCall>>>,
    gets: Arc<Mutex<HashMap<String, usize>>>,
    stateful_set_update_error: Arc<Mutex<Option<InjectedError>>>,
    next_uid: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient")
            .field("calls", &lock(&self.calls).len())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of<K: Resource>(obj: &K) -> (String, String) {
    let meta = obj.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn labels_match<K: Resource>(obj: &K, selector: &Selector) -> bool {
    let empty = BTreeMap::new();
    selector.matches(obj.meta().labels.as_ref().unwrap_or(&empty))
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn insert<K: Resource + Clone>(store: &Store<K>, obj: K) {
        lock(store).insert(key_of(&obj), obj);
    }

    /// Add a Prometheus (for test setup)
    pub fn add_prometheus(&self, obj: Prometheus) {
        Self::insert(&self.prometheuses, obj);
    }

    /// Add a ServiceMonitor (for test setup)
    pub fn add_service_monitor(&self, obj: ServiceMonitor) {
        Self::insert(&self.service_monitors, obj);
    }

    /// Add a PodMonitor (for test setup)
    pub fn add_pod_monitor(&self, obj: PodMonitor) {
        Self::insert(&self.pod_monitors, obj);
    }

    /// Add a Probe (for test setup)
    pub fn add_probe(&self, obj: Probe) {
        Self::insert(&self.probes, obj);
    }

    /// Add a ScrapeConfig (for test setup)
    pub fn add_scrape_config(&self, obj: ScrapeConfig) {
        Self::insert(&self.scrape_configs, obj);
    }

    /// Add a PrometheusRule (for test setup)
    pub fn add_prometheus_rule(&self, obj: PrometheusRule) {
        Self::insert(&self.prometheus_rules, obj);
    }

    /// Add a Namespace (for test setup)
    pub fn add_namespace(&self, obj: Namespace) {
        let name = obj.metadata.name.clone().unwrap_or_default();
        lock(&self.namespaces).insert(name, obj);
    }

    /// Add a Secret (for test setup)
    pub fn add_secret(&self, obj: Secret) {
        Self::insert(&self.secrets, obj);
    }

    /// Remove a Secret without recording a write (for test setup)
    pub fn remove_secret(&self, namespace: &str, name: &str) {
        lock(&self.secrets).remove(&(namespace.to_string(), name.to_string()));
    }

    /// Add a ConfigMap (for test setup)
    pub fn add_config_map(&self, obj: ConfigMap) {
        Self::insert(&self.config_maps, obj);
    }

    /// Add a StatefulSet (for test setup)
    pub fn add_stateful_set(&self, obj: StatefulSet) {
        Self::insert(&self.stateful_sets, obj);
    }

    /// Add a Pod (for test setup)
    pub fn add_pod(&self, obj: Pod) {
        Self::insert(&self.pods, obj);
    }

    /// Fail every StatefulSet update with a 422 Invalid reply
    pub fn fail_stateful_set_updates_invalid(&self, message: impl Into<String>, causes: Vec<String>) {
        *lock(&self.stateful_set_update_error) = Some(InjectedError::Invalid {
            message: message.into(),
            causes,
        });
    }

    /// Fail every StatefulSet update with an arbitrary API status
    pub fn fail_stateful_set_updates(&self, code: u16, message: impl Into<String>) {
        *lock(&self.stateful_set_update_error) = Some(InjectedError::Api {
            code,
            message: message.into(),
        });
    }

    /// Stop injecting StatefulSet update failures
    pub fn clear_injected_errors(&self) {
        *lock(&self.stateful_set_update_error) = None;
    }

    /// Every write recorded so far, in order
    pub fn calls(&self) -> Vec<WriteCall> {
        lock(&self.calls).clone()
    }

    /// Forget recorded writes and reads
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
        lock(&self.gets).clear();
    }

    /// Number of recorded writes of `verb` against `kind`
    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .count()
    }

    /// Number of `get_*` calls issued for `kind`
    pub fn get_count(&self, kind: &str) -> usize {
        lock(&self.gets).get(kind).copied().unwrap_or(0)
    }

    /// Current copy of a stored StatefulSet
    pub fn stateful_set(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        lock(&self.stateful_sets)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current copy of a stored Secret
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        lock(&self.secrets)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of stored ConfigMaps in `namespace`, sorted
    pub fn config_map_names(&self, namespace: &str) -> Vec<String> {
        lock(&self.config_maps)
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Current copy of a stored Prometheus
    pub fn prometheus(&self, namespace: &str, name: &str) -> Option<Prometheus> {
        lock(&self.prometheuses)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn record(&self, verb: Verb, kind: String, namespace: &str, name: &str) {
        lock(&self.calls).push(WriteCall {
            verb,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn get<K: Resource<DynamicType = ()> + Clone>(&self, store: &Store<K>, namespace: &str, name: &str) -> Option<K> {
        *lock(&self.gets).entry(kind_of::<K>()).or_default() += 1;
        lock(store)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn list<K: Resource + Clone>(store: &Store<K>, namespace: &str, selector: &Selector) -> Vec<K> {
        lock(store)
            .iter()
            .filter(|((ns, _), obj)| ns == namespace && labels_match(*obj, selector))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    fn create<K: Resource<DynamicType = ()> + Clone>(&self, store: &Store<K>, obj: &K) -> Result<K, ClusterError> {
        let key = key_of(obj);
        let mut guard = lock(store);
        if guard.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{} {}/{}", kind_of::<K>(), key.0, key.1)));
        }

        let mut created = obj.clone();
        let meta = created.meta_mut();
        if meta.uid.is_none() {
            let mut next = lock(&self.next_uid);
            *next += 1;
            meta.uid = Some(format!("uid-{next}"));
        }
        meta.resource_version = Some("1".to_string());
        guard.insert(key.clone(), created.clone());
        drop(guard);

        self.record(Verb::Create, kind_of::<K>(), &key.0, &key.1);
        Ok(created)
    }

    fn update<K: Resource<DynamicType = ()> + Clone>(&self, store: &Store<K>, obj: &K) -> Result<K, ClusterError> {
        let key = key_of(obj);
        let mut guard = lock(store);
        let Some(existing) = guard.get(&key) else {
            return Err(ClusterError::NotFound(format!("{} {}/{}", kind_of::<K>(), key.0, key.1)));
        };

        let version = existing
            .meta()
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        let mut updated = obj.clone();
        updated.meta_mut().resource_version = Some((version + 1).to_string());
        if updated.meta().uid.is_none() {
            updated.meta_mut().uid = existing.meta().uid.clone();
        }
        guard.insert(key.clone(), updated.clone());
        drop(guard);

        self.record(Verb::Update, kind_of::<K>(), &key.0, &key.1);
        Ok(updated)
    }

    fn delete<K: Resource<DynamicType = ()> + Clone>(&self, store: &Store<K>, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let removed = lock(store).remove(&(namespace.to_string(), name.to_string()));
        if removed.is_none() {
            return Err(ClusterError::NotFound(format!("{} {namespace}/{name}", kind_of::<K>())));
        }
        self.record(Verb::Delete, kind_of::<K>(), namespace, name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_prometheus(&self, namespace: &str, name: &str) -> Result<Option<Prometheus>, ClusterError> {
        Ok(self.get(&self.prometheuses, namespace, name))
    }

    async fn update_prometheus_status(&self, prometheus: &Prometheus) -> Result<(), ClusterError> {
        let key = key_of(prometheus);
        let mut guard = lock(&self.prometheuses);
        let Some(existing) = guard.get_mut(&key) else {
            return Err(ClusterError::NotFound(format!("Prometheus {}/{}", key.0, key.1)));
        };
        existing.status = prometheus.status.clone();
        drop(guard);

        self.record(Verb::UpdateStatus, kind_of::<Prometheus>(), &key.0, &key.1);
        Ok(())
    }

    async fn list_service_monitors(&self, namespace: &str, selector: &Selector) -> Result<Vec<ServiceMonitor>, ClusterError> {
        Ok(Self::list(&self.service_monitors, namespace, selector))
    }

    async fn list_pod_monitors(&self, namespace: &str, selector: &Selector) -> Result<Vec<PodMonitor>, ClusterError> {
        Ok(Self::list(&self.pod_monitors, namespace, selector))
    }

    async fn list_probes(&self, namespace: &str, selector: &Selector) -> Result<Vec<Probe>, ClusterError> {
        Ok(Self::list(&self.probes, namespace, selector))
    }

    async fn list_scrape_configs(&self, namespace: &str, selector: &Selector) -> Result<Vec<ScrapeConfig>, ClusterError> {
        Ok(Self::list(&self.scrape_configs, namespace, selector))
    }

    async fn list_prometheus_rules(&self, namespace: &str, selector: &Selector) -> Result<Vec<PrometheusRule>, ClusterError> {
        Ok(Self::list(&self.prometheus_rules, namespace, selector))
    }

    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>, ClusterError> {
        Ok(lock(&self.namespaces)
            .values()
            .filter(|ns| labels_match(*ns, selector))
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.get(&self.secrets, namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.create(&self.secrets, secret)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        self.update(&self.secrets, secret)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete(&self.secrets, namespace, name)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self.get(&self.config_maps, namespace, name))
    }

    async fn list_config_maps(&self, namespace: &str, selector: &Selector) -> Result<Vec<ConfigMap>, ClusterError> {
        Ok(Self::list(&self.config_maps, namespace, selector))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        self.create(&self.config_maps, config_map)
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete(&self.config_maps, namespace, name)
    }

    async fn get_stateful_set(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>, ClusterError> {
        Ok(self.get(&self.stateful_sets, namespace, name))
    }

    async fn list_stateful_sets(&self, namespace: &str, selector: &Selector) -> Result<Vec<StatefulSet>, ClusterError> {
        Ok(Self::list(&self.stateful_sets, namespace, selector))
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        self.create(&self.stateful_sets, stateful_set)
    }

    async fn update_stateful_set(&self, stateful_set: &StatefulSet) -> Result<StatefulSet, ClusterError> {
        let injected = lock(&self.stateful_set_update_error).clone();
        if let Some(err) = injected {
            return Err(err.to_error());
        }
        self.update(&self.stateful_sets, stateful_set)
    }

    async fn delete_stateful_set(&self, namespace: &str, name: &str, _foreground: bool) -> Result<(), ClusterError> {
        self.delete(&self.stateful_sets, namespace, name)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        Ok(self.get(&self.services, namespace, name))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        self.create(&self.services, service)
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>, ClusterError> {
        Ok(Self::list(&self.pods, namespace, selector))
    }
}
