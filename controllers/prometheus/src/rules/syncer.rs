//! Keeps the rule ConfigMaps of one Prometheus in line with its selected rules.

use super::{MAX_CONFIGMAP_DATA_SIZE, pack};
use crate::error::ControllerError;
use crate::naming::{RULE_CONFIG_MAP_LABEL, rule_config_map_name};
use cluster_client::ClusterClientTrait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::Selector;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Writes packed rule files as `prometheus-<name>-rulefiles-<i>` ConfigMaps.
pub struct RuleSyncer<'a> {
    client: &'a dyn ClusterClientTrait,
    namespace: &'a str,
    name: &'a str,
    /// Labels and owner references stamped on every ConfigMap
    base: ObjectMeta,
}

impl<'a> RuleSyncer<'a> {
    pub fn new(client: &'a dyn ClusterClientTrait, namespace: &'a str, name: &'a str, base: ObjectMeta) -> Self {
        Self {
            client,
            namespace,
            name,
            base,
        }
    }

    fn selector(&self) -> Selector {
        Selector::from_iter([(RULE_CONFIG_MAP_LABEL.to_string(), self.name.to_string())])
    }

    /// Make the cluster hold exactly `rules` and return the ConfigMap names, sorted.
    ///
    /// Nothing is written when the current ConfigMaps already carry the same
    /// files. Otherwise every current ConfigMap is deleted before the new
    /// ones are created, so a crash in between leaves no rule ConfigMaps
    /// until the next pass.
    pub async fn sync(&self, rules: &BTreeMap<String, String>) -> Result<Vec<String>, ControllerError> {
        let current = self.client.list_config_maps(self.namespace, &self.selector()).await?;

        let current_rules: BTreeMap<String, String> = current
            .iter()
            .filter_map(|cm| cm.data.as_ref())
            .flat_map(|data| data.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect();
        let mut current_names: Vec<String> = current.iter().filter_map(|cm| cm.metadata.name.clone()).collect();
        current_names.sort();

        if !current.is_empty() && &current_rules == rules {
            debug!(
                namespace = %self.namespace,
                prometheus = %self.name,
                configmaps = %current_names.join(","),
                "No PrometheusRule changes"
            );
            return Ok(current_names);
        }

        let buckets = pack(rules, MAX_CONFIGMAP_DATA_SIZE)?;
        let desired: Vec<ConfigMap> = buckets
            .into_iter()
            .enumerate()
            .map(|(i, bucket)| {
                debug!(
                    prometheus = %self.name,
                    configmap = i,
                    files = bucket.filenames().count(),
                    bytes = bucket.size(),
                    "Packed rule bucket"
                );
                self.config_map(i, bucket.into_data())
            })
            .collect();

        info!(
            namespace = %self.namespace,
            prometheus = %self.name,
            current = current_names.len(),
            desired = desired.len(),
            "Updating PrometheusRule ConfigMaps"
        );

        // Names are reused, so every old ConfigMap goes before any new one is created.
        for name in &current_names {
            match self.client.delete_config_map(self.namespace, name).await {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }

        let mut names = Vec::with_capacity(desired.len());
        for cm in &desired {
            self.client.create_config_map(cm).await?;
            if let Some(name) = &cm.metadata.name {
                names.push(name.clone());
            }
        }
        names.sort();
        Ok(names)
    }

    fn config_map(&self, index: usize, data: BTreeMap<String, String>) -> ConfigMap {
        let mut labels = self.base.labels.clone().unwrap_or_default();
        labels.insert(RULE_CONFIG_MAP_LABEL.to_string(), self.name.to_string());

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(rule_config_map_name(self.name, index)),
                namespace: Some(self.namespace.to_string()),
                labels: Some(labels),
                annotations: self.base.annotations.clone(),
                owner_references: self.base.owner_references.clone(),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use cluster_client::Verb;

    fn rules(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_creates_single_bucket() {
        let (mock, client) = mock_client();
        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());

        let names = syncer.sync(&rules(&[("a.yaml", "groups: []")])).await.unwrap();

        assert_eq!(names, vec!["prometheus-k8s-rulefiles-0"]);
        assert_eq!(mock.config_map_names("monitoring"), names);
        assert_eq!(mock.count(Verb::Create, "ConfigMap"), 1);
    }

    #[tokio::test]
    async fn test_no_rules_still_creates_one_configmap() {
        let (mock, client) = mock_client();
        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());

        let names = syncer.sync(&BTreeMap::new()).await.unwrap();

        assert_eq!(names, vec!["prometheus-k8s-rulefiles-0"]);
        assert_eq!(mock.count(Verb::Create, "ConfigMap"), 1);
    }

    #[tokio::test]
    async fn test_unchanged_rules_write_nothing() {
        let (mock, client) = mock_client();
        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());
        let desired = rules(&[("a.yaml", "groups: []"), ("b.yaml", "groups: []")]);

        syncer.sync(&desired).await.unwrap();
        mock.clear_calls();
        let names = syncer.sync(&desired).await.unwrap();

        assert_eq!(names, vec!["prometheus-k8s-rulefiles-0"]);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_changed_rules_delete_before_create() {
        let (mock, client) = mock_client();
        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());

        syncer.sync(&rules(&[("a.yaml", "v1")])).await.unwrap();
        mock.clear_calls();
        syncer.sync(&rules(&[("a.yaml", "v2")])).await.unwrap();

        let verbs: Vec<Verb> = mock.calls().iter().map(|c| c.verb).collect();
        assert_eq!(verbs, vec![Verb::Delete, Verb::Create]);
    }

    #[tokio::test]
    async fn test_other_prometheus_configmaps_untouched() {
        let (mock, client) = mock_client();
        let mut foreign = create_test_config_map("monitoring", "prometheus-other-rulefiles-0", &[("x.yaml", "")]);
        foreign.metadata.labels = Some(BTreeMap::from([(RULE_CONFIG_MAP_LABEL.to_string(), "other".to_string())]));
        mock.add_config_map(foreign);

        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());
        syncer.sync(&rules(&[("a.yaml", "v1")])).await.unwrap();

        assert_eq!(mock.count(Verb::Delete, "ConfigMap"), 0);
        assert_eq!(
            mock.config_map_names("monitoring"),
            vec!["prometheus-k8s-rulefiles-0", "prometheus-other-rulefiles-0"]
        );
    }

    #[tokio::test]
    async fn test_oversized_rule_writes_nothing() {
        let (mock, client) = mock_client();
        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());
        syncer.sync(&rules(&[("a.yaml", "v1")])).await.unwrap();
        mock.clear_calls();

        let huge = "x".repeat(MAX_CONFIGMAP_DATA_SIZE + 1);
        let err = syncer.sync(&rules(&[("a.yaml", &huge)])).await.unwrap_err();

        assert!(matches!(err, ControllerError::Pack(_)));
        assert!(mock.calls().is_empty());
        assert_eq!(mock.config_map_names("monitoring"), vec!["prometheus-k8s-rulefiles-0"]);
    }

    #[tokio::test]
    async fn test_large_rule_sets_split_across_configmaps() {
        let (mock, client) = mock_client();
        let syncer = RuleSyncer::new(client.as_ref(), "monitoring", "k8s", ObjectMeta::default());
        let big = "x".repeat(MAX_CONFIGMAP_DATA_SIZE * 6 / 10);

        let names = syncer
            .sync(&rules(&[("b.yaml", &big), ("a.yaml", &big)]))
            .await
            .unwrap();

        assert_eq!(names, vec!["prometheus-k8s-rulefiles-0", "prometheus-k8s-rulefiles-1"]);
        assert_eq!(mock.config_map_names("monitoring"), names);
    }
}
