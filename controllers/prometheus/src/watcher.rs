//! Kubernetes resource watchers.
//!
//! The Prometheus watch runs on `kube_runtime::Controller`. Owned
//! StatefulSets map back to their Prometheus by name, Secrets and ConfigMaps
//! through the objects each pass read, and monitors to every Prometheus
//! that may select them. ServiceMonitors additionally feed the Reference
//! Manager.

use crate::backoff::KeyedBackoff;
use crate::error::ControllerError;
use crate::naming::{MANAGED_BY, MANAGED_BY_LABEL, owner_key, split_key};
use crate::reconciler::Reconciler;
use crate::refmanager::RefManager;
use crate::selector::object_key;
use crate::server::ServerState;
use crds::{LabelSelector, PodMonitor, Probe, Prometheus, PrometheusRule, PrometheusSpec, ScrapeConfig, ServiceMonitor};
use futures::StreamExt;
use futures::future::ready;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::store::Writer;
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::watcher::{self, Event};
use kube_runtime::{Controller, WatchStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Periodic resync of every Prometheus.
const RESYNC_PERIOD: Duration = Duration::from_secs(300);
const DEBOUNCE: Duration = Duration::from_secs(1);
const CONCURRENCY: u16 = 4;

/// Shared state of the reconcile and error policy functions.
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    backoff: KeyedBackoff,
}

impl Context {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            backoff: KeyedBackoff::new(5, 300),
        }
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Sync, then write status whatever the sync outcome.
async fn reconcile(prometheus: Arc<Prometheus>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let key = object_key(prometheus.as_ref())
        .ok_or_else(|| ControllerError::Reconciliation("Prometheus without namespace or name".to_string()))?;

    let synced = ctx.reconciler.sync(&key).await;
    if let Err(e) = ctx.reconciler.update_status(&key).await {
        warn!(key = %key, error = %e, "Failed to update status");
    }
    synced?;

    ctx.backoff.on_success(&key);
    Ok(Action::requeue(RESYNC_PERIOD))
}

fn error_policy(prometheus: Arc<Prometheus>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_key(prometheus.as_ref()).unwrap_or_default();
    let delay = ctx.backoff.on_error(&key);
    error!(key = %key, error = %error, retry_in = ?delay, "Reconciliation failed");
    Action::requeue(delay)
}

fn prometheus_ref(key: &str) -> Option<ObjectRef<Prometheus>> {
    let (namespace, name) = split_key(key)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// The Prometheus owning a shard StatefulSet, by name.
pub(crate) fn stateful_set_owner(sts: &StatefulSet) -> Option<ObjectRef<Prometheus>> {
    prometheus_ref(&owner_key(&object_key(sts)?)?)
}

/// Monitor kinds a Prometheus selects.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Dependent {
    ServiceMonitor,
    PodMonitor,
    Probe,
    ScrapeConfig,
    PrometheusRule,
}

impl Dependent {
    fn selectors(self, spec: &PrometheusSpec) -> (Option<&LabelSelector>, Option<&LabelSelector>) {
        let (selector, namespace_selector) = match self {
            Dependent::ServiceMonitor => (&spec.service_monitor_selector, &spec.service_monitor_namespace_selector),
            Dependent::PodMonitor => (&spec.pod_monitor_selector, &spec.pod_monitor_namespace_selector),
            Dependent::Probe => (&spec.probe_selector, &spec.probe_namespace_selector),
            Dependent::ScrapeConfig => (&spec.scrape_config_selector, &spec.scrape_config_namespace_selector),
            Dependent::PrometheusRule => (&spec.rule_selector, &spec.rule_namespace_selector),
        };
        (selector.as_ref(), namespace_selector.as_ref())
    }
}

/// Whether `prometheus` could select a `kind` object living in `namespace`.
///
/// Cheap over-approximation: label selectors are left to the pass itself.
pub(crate) fn may_select(prometheus: &Prometheus, kind: Dependent, namespace: &str) -> bool {
    let (selector, namespace_selector) = kind.selectors(&prometheus.spec);
    selector.is_some() && (namespace_selector.is_some() || prometheus.metadata.namespace.as_deref() == Some(namespace))
}

fn selecting<K: Resource + 'static>(store: Store<Prometheus>, kind: Dependent) -> impl Fn(K) -> Vec<ObjectRef<Prometheus>> + Send + Sync + 'static {
    move |obj: K| {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        store
            .state()
            .iter()
            .filter(|p| may_select(p, kind, &namespace))
            .map(|p| ObjectRef::from_obj(p.as_ref()))
            .collect()
    }
}

fn referencing<K: Resource<DynamicType = ()> + 'static>(reconciler: Arc<Reconciler>) -> impl Fn(K) -> Vec<ObjectRef<Prometheus>> + Send + Sync + 'static {
    move |obj: K| {
        reconciler
            .keys_referencing(&obj)
            .iter()
            .filter_map(|key| prometheus_ref(key))
            .collect()
    }
}

/// Run the Prometheus controller until shutdown.
pub async fn watch_prometheuses(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
    state: Arc<ServerState>,
) -> Result<(), ControllerError> {
    info!("Starting Prometheus watcher");
    let ns = namespace.as_deref();

    let controller = Controller::new(api::<Prometheus>(&client, ns), watcher::Config::default());
    let store = controller.store();

    let ready_store = store.clone();
    tokio::spawn(async move {
        if ready_store.wait_until_ready().await.is_ok() {
            info!("Prometheus cache synced");
            state.set_ready();
        }
    });

    let managed = watcher::Config::default().labels(&format!("{MANAGED_BY_LABEL}={MANAGED_BY}"));

    controller
        .watches(api::<StatefulSet>(&client, ns), managed, |sts| stateful_set_owner(&sts))
        .watches(
            api::<Secret>(&client, ns),
            watcher::Config::default(),
            referencing::<Secret>(ctx.reconciler.clone()),
        )
        .watches(
            api::<ConfigMap>(&client, ns),
            watcher::Config::default(),
            referencing::<ConfigMap>(ctx.reconciler.clone()),
        )
        .watches(
            api::<ServiceMonitor>(&client, ns),
            watcher::Config::default(),
            selecting::<ServiceMonitor>(store.clone(), Dependent::ServiceMonitor),
        )
        .watches(
            api::<PodMonitor>(&client, ns),
            watcher::Config::default(),
            selecting::<PodMonitor>(store.clone(), Dependent::PodMonitor),
        )
        .watches(
            api::<Probe>(&client, ns),
            watcher::Config::default(),
            selecting::<Probe>(store.clone(), Dependent::Probe),
        )
        .watches(
            api::<ScrapeConfig>(&client, ns),
            watcher::Config::default(),
            selecting::<ScrapeConfig>(store.clone(), Dependent::ScrapeConfig),
        )
        .watches(
            api::<PrometheusRule>(&client, ns),
            watcher::Config::default(),
            selecting::<PrometheusRule>(store, Dependent::PrometheusRule),
        )
        .with_config(ControllerConfig::default().debounce(DEBOUNCE).concurrency(CONCURRENCY))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(prometheus = %obj, "Reconciled"),
                Err(e) => warn!(error = %e, "Controller error"),
            }
        })
        .await;

    info!("Prometheus watcher stopped");
    Ok(())
}

fn apply_service_monitor_event(ref_manager: &RefManager, event: Result<Event<ServiceMonitor>, watcher::Error>) {
    match event {
        Ok(Event::Apply(sm) | Event::InitApply(sm)) => ref_manager.register_dependent(&sm),
        Ok(Event::Delete(sm)) => ref_manager.unregister_dependent(&sm),
        Ok(Event::Init | Event::InitDone) => {}
        Err(e) => warn!(error = %e, "ServiceMonitor watch error"),
    }
}

/// Keep the Reference Manager's dependents in step with ServiceMonitors.
pub async fn watch_service_monitors(
    client: Client,
    namespace: Option<String>,
    ref_manager: Arc<RefManager>,
) -> Result<(), ControllerError> {
    info!("Starting ServiceMonitor registration watcher");
    let sms = api::<ServiceMonitor>(&client, namespace.as_deref());
    watcher::watcher(sms, watcher::Config::default())
        .default_backoff()
        .for_each(|event| {
            apply_service_monitor_event(&ref_manager, event);
            ready(())
        })
        .await;
    Ok(())
}

/// Feed the shared Secret cache behind the cache strategy.
pub async fn reflect_secrets(
    client: Client,
    namespace: Option<String>,
    writer: Writer<Secret>,
) -> Result<(), ControllerError> {
    info!("Starting Secret cache");
    let secrets = api::<Secret>(&client, namespace.as_deref());
    reflector::reflector(writer, watcher::watcher(secrets, watcher::Config::default()))
        .default_backoff()
        .applied_objects()
        .for_each(|res| {
            if let Err(e) = res {
                warn!(error = %e, "Secret watch error");
            }
            ready(())
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refmanager::CacheStrategy;
    use crate::test_utils::{create_test_prometheus, create_test_service_monitor};
    use crds::{BasicAuth, Endpoint, SecretKeySelector};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn sts(namespace: &str, name: &str) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_stateful_set_owner() {
        let owner = stateful_set_owner(&sts("monitoring", "prometheus-k8s-shard-3")).unwrap();
        assert_eq!(owner.name, "k8s");
        assert_eq!(owner.namespace.as_deref(), Some("monitoring"));

        let owner = stateful_set_owner(&sts("monitoring", "prometheus-k8s")).unwrap();
        assert_eq!(owner.name, "k8s");

        assert!(stateful_set_owner(&sts("monitoring", "alertmanager-main")).is_none());
    }

    #[test]
    fn test_may_select() {
        let prometheus = create_test_prometheus("monitoring", "k8s");

        assert!(may_select(&prometheus, Dependent::ServiceMonitor, "monitoring"));
        assert!(!may_select(&prometheus, Dependent::ServiceMonitor, "default"));
        // No PodMonitor selector: nothing is selected.
        assert!(!may_select(&prometheus, Dependent::PodMonitor, "monitoring"));

        let mut cluster_wide = prometheus.clone();
        cluster_wide.spec.service_monitor_namespace_selector = Some(LabelSelector::default());
        assert!(may_select(&cluster_wide, Dependent::ServiceMonitor, "default"));
    }

    #[test]
    fn test_service_monitor_events_drive_registration() {
        let (secrets, _writer) = reflector::store::<Secret>();
        let ref_manager = RefManager::Cache(CacheStrategy::new(secrets));

        let mut sm = create_test_service_monitor("monitoring", "app", &[]);
        sm.spec.endpoints = vec![Endpoint {
            port: Some("web".to_string()),
            basic_auth: Some(BasicAuth {
                username: SecretKeySelector::new("app-creds", "user"),
                password: SecretKeySelector::new("app-creds", "password"),
            }),
            ..Default::default()
        }];

        apply_service_monitor_event(&ref_manager, Ok(Event::Apply(sm.clone())));
        assert!(ref_manager.is_referenced("monitoring", "app-creds"));

        apply_service_monitor_event(&ref_manager, Ok(Event::Delete(sm)));
        assert!(!ref_manager.is_referenced("monitoring", "app-creds"));
    }
}
