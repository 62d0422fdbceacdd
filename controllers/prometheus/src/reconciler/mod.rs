//! Prometheus reconciliation.
//!
//! [`Reconciler::sync`] drives one pass for one Prometheus:
//!
//! 1. select ServiceMonitors, PodMonitors, Probes and ScrapeConfigs
//! 2. render and pack PrometheusRules into ConfigMaps
//! 3. resolve remote endpoint, alerting and API server credentials
//! 4. write the compressed configuration and the sharded TLS assets
//! 5. create, update or recreate one StatefulSet per shard, then delete
//!    StatefulSets of shards that no longer exist
//!
//! [`Reconciler::update_status`] is separate and only reads pods and
//! StatefulSets.

mod hash;
mod objects;
mod statefulset;
mod status;

pub use hash::input_hash;
pub use objects::{base_meta, config_secret, governing_service, tls_assets_template};
pub use statefulset::{ShardInputs, build_stateful_set, sanitize_stateful_set, update_stateful_set};

use crate::assets::{AssetError, RefTracker, StoreBuilder};
use crate::config::OperatorConfig;
use crate::config_generator::{ConfigGenerator, ConfigInput, compress};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::naming::{INPUT_HASH_ANNOTATION, expected_stateful_set_names, managed_labels, owner_key, split_key};
use crate::reconcile_helpers::{create_or_update_secret, create_secret_if_absent, create_service_if_absent};
use crate::refmanager::RefManager;
use crate::rules::{RuleSelector, RuleSyncer};
use crate::selector::{ResourceSelector, Selection, object_key};
use crate::sharded_secret::ShardedSecret;
use cluster_client::{ClusterClientTrait, ClusterError};
use crds::Prometheus;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Resource;
use kube::core::Selector;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a pass selected, ready for the generator.
struct Selected {
    service_monitors: Selection<crds::ServiceMonitor>,
    pod_monitors: Selection<crds::PodMonitor>,
    probes: Selection<crds::Probe>,
    scrape_configs: Selection<crds::ScrapeConfig>,
}

/// Reconciles Prometheus objects into shard StatefulSets.
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    config: OperatorConfig,
    generator: Arc<dyn ConfigGenerator>,
    metrics: Arc<Metrics>,
    ref_manager: Option<Arc<RefManager>>,
    /// Objects read by the last pass of each Prometheus
    trackers: Mutex<HashMap<String, RefTracker>>,
    /// Result of the last pass of each Prometheus
    outcomes: Mutex<HashMap<String, Result<(), String>>>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        config: OperatorConfig,
        generator: Arc<dyn ConfigGenerator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            config,
            generator,
            metrics,
            ref_manager: None,
            trackers: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ref_manager(mut self, ref_manager: Arc<RefManager>) -> Self {
        self.ref_manager = Some(ref_manager);
        self
    }

    /// Reconcile the Prometheus `namespace/name`.
    pub async fn sync(&self, key: &str) -> Result<(), ControllerError> {
        self.metrics.inc_reconcile_operations();
        let result = self.sync_inner(key).await;
        if let Err(e) = &result {
            self.metrics.inc_reconcile_errors();
            warn!(key = %key, error = %e, "Sync failed");
        }
        let outcome = result.as_ref().map(|_| ()).map_err(ToString::to_string);
        lock(&self.outcomes).insert(key.to_string(), outcome);
        result
    }

    /// Keys of every Prometheus whose last pass read `obj`.
    pub fn keys_referencing<K: Resource<DynamicType = ()>>(&self, obj: &K) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.trackers)
            .iter()
            .filter(|(_, tracker)| tracker.has(obj))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop everything remembered about a deleted Prometheus.
    pub fn forget(&self, key: &str) {
        lock(&self.trackers).remove(key);
        lock(&self.outcomes).remove(key);
    }

    /// The Prometheus owning a shard StatefulSet, if it still exists.
    pub async fn resolve(&self, sts: &StatefulSet) -> Option<Prometheus> {
        let key = owner_key(&object_key(sts)?)?;
        let (namespace, name) = split_key(&key)?;
        match self.client.get_prometheus(namespace, name).await {
            Ok(prometheus) => prometheus,
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to resolve StatefulSet owner");
                None
            }
        }
    }

    async fn sync_inner(&self, key: &str) -> Result<(), ControllerError> {
        let (namespace, name) =
            split_key(key).ok_or_else(|| ControllerError::Reconciliation(format!("invalid key {key:?}")))?;

        let Some(prometheus) = self.client.get_prometheus(namespace, name).await? else {
            debug!(key = %key, "Prometheus not found");
            self.forget(key);
            return Ok(());
        };
        if prometheus.spec.paused {
            info!(key = %key, "Prometheus is paused, skipping");
            return Ok(());
        }
        if prometheus.metadata.deletion_timestamp.is_some() {
            debug!(key = %key, "Prometheus is being deleted");
            return Ok(());
        }

        info!(key = %key, "sync prometheus");

        let mut store = StoreBuilder::new(self.client.clone());
        if let Some(ref_manager) = &self.ref_manager {
            store = store.with_ref_manager(ref_manager.clone());
        }

        let (selected, version) = {
            let mut selector =
                ResourceSelector::new(self.client.clone(), &prometheus, &mut store, &self.config.prometheus_default_version)?;
            let selected = Selected {
                service_monitors: selector.select_service_monitors().await?,
                pod_monitors: selector.select_pod_monitors().await?,
                probes: selector.select_probes().await?,
                scrape_configs: selector.select_scrape_configs().await?,
            };
            (selected, selector.version())
        };
        self.record_selection("ServiceMonitor", &selected.service_monitors);
        self.record_selection("PodMonitor", &selected.pod_monitors);
        self.record_selection("Probe", &selected.probes);
        self.record_selection("ScrapeConfig", &selected.scrape_configs);

        let rules = RuleSelector::new(self.client.as_ref(), &prometheus, version).select().await?;
        self.record_selection("PrometheusRule", &rules.rules);

        let base = base_meta(&prometheus, &self.config);
        let rule_config_maps = RuleSyncer::new(self.client.as_ref(), namespace, name, base.clone())
            .sync(&rules.files)
            .await?;

        let warmed = warm_credentials(&prometheus, &mut store).await;
        lock(&self.trackers).insert(key.to_string(), store.ref_tracker().clone());
        warmed?;

        self.write_config(&prometheus, &selected, &rule_config_maps, &store)
            .await?;

        let tls_assets = ShardedSecret::reconcile(
            self.client.as_ref(),
            tls_assets_template(&prometheus, &self.config),
            store.tls_assets(),
        )
        .await?;
        // Tracker again, TLS material may have been read after the first save.
        lock(&self.trackers).insert(key.to_string(), store.ref_tracker().clone());

        create_service_if_absent(self.client.as_ref(), &governing_service(&prometheus, &self.config)).await?;

        for shard in 0..prometheus.shards() {
            let input = ShardInputs {
                prometheus: &prometheus,
                config: &self.config,
                base: &base,
                shard,
                rule_config_maps: &rule_config_maps,
                tls_assets: &tls_assets,
            };
            self.sync_shard(&input).await?;
        }

        self.delete_excess_shards(&prometheus).await
    }

    fn record_selection<T>(&self, resource: &str, selection: &Selection<T>) {
        self.metrics
            .set_resources(resource, selection.resources.len(), selection.rejected);
    }

    /// Write the configuration Secret. Without any monitor selector an
    /// empty Secret is created once and never overwritten.
    async fn write_config(
        &self,
        prometheus: &Prometheus,
        selected: &Selected,
        rule_config_maps: &[String],
        store: &StoreBuilder,
    ) -> Result<(), ControllerError> {
        let spec = &prometheus.spec;
        if spec.service_monitor_selector.is_none() && spec.pod_monitor_selector.is_none() && spec.probe_selector.is_none()
        {
            debug!(
                namespace = prometheus.metadata.namespace.as_deref().unwrap_or_default(),
                prometheus = prometheus.metadata.name.as_deref().unwrap_or_default(),
                "No monitor selectors, keeping user-provided configuration"
            );
            create_secret_if_absent(self.client.as_ref(), &config_secret(prometheus, &self.config, Vec::new())).await?;
            return Ok(());
        }

        let input = ConfigInput {
            prometheus,
            service_monitors: &selected.service_monitors.resources,
            pod_monitors: &selected.pod_monitors.resources,
            probes: &selected.probes.resources,
            scrape_configs: &selected.scrape_configs.resources,
            rule_config_maps,
            store,
        };
        let rendered = self.generator.generate(&input)?;
        let compressed = compress(&rendered)?;
        create_or_update_secret(self.client.as_ref(), &config_secret(prometheus, &self.config, compressed)).await?;
        Ok(())
    }

    async fn sync_shard(&self, input: &ShardInputs<'_>) -> Result<(), ControllerError> {
        let mut desired = build_stateful_set(input);
        sanitize_stateful_set(&mut desired);

        let hash = match &desired.spec {
            Some(spec) => input_hash(
                input.prometheus,
                input.config,
                spec,
                input.rule_config_maps,
                &input.tls_assets.digest(),
            )?,
            None => return Err(ControllerError::Reconciliation("generated StatefulSet has no spec".to_string())),
        };
        desired
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(INPUT_HASH_ANNOTATION.to_string(), hash.clone());

        let namespace = desired.metadata.namespace.clone().unwrap_or_default();
        let sts_name = desired.metadata.name.clone().unwrap_or_default();
        debug!(statefulset = %sts_name, shard = input.shard, "Reconciling StatefulSet");

        let Some(existing) = self.client.get_stateful_set(&namespace, &sts_name).await? else {
            debug!(statefulset = %sts_name, shard = input.shard, "No current StatefulSet found, creating");
            self.client.create_stateful_set(&desired).await?;
            return Ok(());
        };

        if existing.metadata.deletion_timestamp.is_some() {
            info!(statefulset = %sts_name, shard = input.shard, "StatefulSet is being deleted, waiting for recreation");
            return Ok(());
        }

        let existing_hash = existing
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(INPUT_HASH_ANNOTATION))
            .map(String::as_str);
        if existing_hash == Some(hash.as_str()) {
            debug!(statefulset = %sts_name, shard = input.shard, "StatefulSet inputs unchanged, skipping update");
            return Ok(());
        }

        debug!(
            statefulset = %sts_name,
            shard = input.shard,
            new_hash = %hash,
            existing_hash = existing_hash.unwrap_or_default(),
            "Updating StatefulSet because of hash divergence"
        );

        match update_stateful_set(self.client.as_ref(), &desired).await {
            Ok(()) => Ok(()),
            Err(ClusterError::Invalid { causes, .. }) => {
                info!(
                    statefulset = %sts_name,
                    shard = input.shard,
                    reason = %causes.join(", "),
                    "Resolving illegal update of StatefulSet by deleting it"
                );
                self.metrics.inc_stateful_set_delete_create();
                match self.client.delete_stateful_set(&namespace, &sts_name, true).await {
                    Err(e) if !e.is_not_found() => Err(e.into()),
                    _ => Ok(()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete StatefulSets of shards above the current shard count.
    async fn delete_excess_shards(&self, prometheus: &Prometheus) -> Result<(), ControllerError> {
        let namespace = prometheus.metadata.namespace.as_deref().unwrap_or_default();
        let name = prometheus.metadata.name.as_deref().unwrap_or_default();
        let expected = expected_stateful_set_names(name, prometheus.shards());

        let selector = Selector::from_iter(managed_labels(name));
        for sts in self.client.list_stateful_sets(namespace, &selector).await? {
            let Some(sts_name) = sts.metadata.name.as_deref() else {
                continue;
            };
            if expected.iter().any(|e| e == sts_name) || sts.metadata.deletion_timestamp.is_some() {
                continue;
            }

            info!(statefulset = %sts_name, "Deleting StatefulSet of removed shard");
            match self.client.delete_stateful_set(namespace, sts_name, false).await {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Read every credential the generated configuration embeds outside the
/// selected monitors, so it is cached and tracked for this pass.
async fn warm_credentials(prometheus: &Prometheus, store: &mut StoreBuilder) -> Result<(), AssetError> {
    let namespace = prometheus.metadata.namespace.as_deref().unwrap_or_default();
    let spec = &prometheus.spec;

    for rw in &spec.remote_write {
        rw.validate()
            .map_err(|e| AssetError::InvalidConfig(format!("remote write {}: {e}", rw.url)))?;
        store.add_basic_auth(namespace, rw.basic_auth.as_ref()).await?;
        store.add_oauth2(namespace, rw.oauth2.as_ref()).await?;
        store.add_authorization(namespace, rw.authorization.as_ref()).await?;
        store.add_sigv4(namespace, rw.sigv4.as_ref()).await?;
        store
            .add_azure_oauth(namespace, rw.azure_ad.as_ref().and_then(|a| a.oauth.as_ref()))
            .await?;
        store.add_tls_config(namespace, rw.tls_config.as_ref()).await?;
    }

    for rr in &spec.remote_read {
        store.add_basic_auth(namespace, rr.basic_auth.as_ref()).await?;
        store.add_oauth2(namespace, rr.oauth2.as_ref()).await?;
        store.add_authorization(namespace, rr.authorization.as_ref()).await?;
        store.add_tls_config(namespace, rr.tls_config.as_ref()).await?;
    }

    if let Some(alerting) = &spec.alerting {
        for am in &alerting.alertmanagers {
            store.add_basic_auth(namespace, am.basic_auth.as_ref()).await?;
            store.add_safe_authorization(namespace, am.authorization.as_ref()).await?;
            store.add_tls_config(namespace, am.tls_config.as_ref()).await?;
        }
    }

    if let Some(api_server) = &spec.api_server_config {
        store.add_basic_auth(namespace, api_server.basic_auth.as_ref()).await?;
        store.add_authorization(namespace, api_server.authorization.as_ref()).await?;
        store.add_tls_config(namespace, api_server.tls_config.as_ref()).await?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod reconciler_test;
