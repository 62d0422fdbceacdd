use super::*;
use crate::config_generator::YamlConfigGenerator;
use crate::naming::{RESTARTED_AT_ANNOTATION, shard_labels};
use crate::test_utils::*;
use cluster_client::{MockClusterClient, Verb};
use crds::{BasicAuth, ConditionStatus, RemoteWriteSpec, SecretKeySelector};
use k8s_openapi::api::apps::v1::StatefulSetStatus;
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

const NS: &str = "monitoring";
const KEY: &str = "monitoring/k8s";

fn setup() -> (MockClusterClient, Reconciler, Arc<Metrics>) {
    let (mock, client) = mock_client();
    let metrics = Arc::new(Metrics::new().unwrap());
    let reconciler = Reconciler::new(
        client,
        OperatorConfig::default(),
        Arc::new(YamlConfigGenerator),
        metrics.clone(),
    );
    (mock, reconciler, metrics)
}

fn with_monitor(mock: &MockClusterClient) {
    mock.add_service_monitor(create_test_service_monitor(NS, "node-exporter", &[("team", "obs")]));
    mock.add_prometheus_rule(create_test_rule(NS, "node", &[("team", "obs")]));
}

fn bump_generation(mock: &MockClusterClient, edit: impl FnOnce(&mut Prometheus)) {
    let mut prometheus = mock.prometheus(NS, "k8s").unwrap();
    prometheus.metadata.generation = Some(prometheus.metadata.generation.unwrap_or(1) + 1);
    edit(&mut prometheus);
    mock.add_prometheus(prometheus);
}

fn pod(shard: i32, index: usize, revision: &str, ready: bool) -> Pod {
    let mut labels = shard_labels("k8s", shard);
    labels.insert("controller-revision-hash".to_string(), revision.to_string());
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{}-{index}", crate::naming::stateful_set_name("k8s", shard))),
            namespace: Some(NS.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                message: (!ready).then(|| "containers with unready status: [prometheus]".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn set_update_revision(mock: &MockClusterClient, name: &str, revision: &str) {
    let mut sts = mock.stateful_set(NS, name).unwrap();
    sts.status = Some(StatefulSetStatus {
        update_revision: Some(revision.to_string()),
        ..Default::default()
    });
    mock.add_stateful_set(sts);
}

#[tokio::test]
async fn test_first_sync_creates_everything() {
    let (mock, reconciler, metrics) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    with_monitor(&mock);

    reconciler.sync(KEY).await.unwrap();

    let sts = mock.stateful_set(NS, "prometheus-k8s").unwrap();
    assert!(
        sts.metadata
            .annotations
            .as_ref()
            .unwrap()
            .contains_key(INPUT_HASH_ANNOTATION)
    );
    assert!(mock.secret(NS, "prometheus-k8s").is_some());
    assert!(mock.secret(NS, "prometheus-k8s-tls-assets-0").is_some());
    assert_eq!(mock.config_map_names(NS), vec!["prometheus-k8s-rulefiles-0"]);
    assert_eq!(mock.count(Verb::Create, "Service"), 1);
    assert_eq!(metrics.selected("ServiceMonitor"), 1);
    assert_eq!(metrics.selected("PrometheusRule"), 1);
}

#[tokio::test]
async fn test_unchanged_prometheus_makes_no_writes() {
    let (mock, reconciler, _) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    with_monitor(&mock);

    reconciler.sync(KEY).await.unwrap();
    assert_eq!(mock.count(Verb::Create, "StatefulSet"), 1);
    mock.clear_calls();

    reconciler.sync(KEY).await.unwrap();

    assert_eq!(mock.count(Verb::Create, "StatefulSet"), 0);
    assert_eq!(mock.count(Verb::Update, "StatefulSet"), 0);
    assert_eq!(mock.count(Verb::Update, "Secret"), 0);
    assert_eq!(mock.count(Verb::Create, "ConfigMap"), 0);
    assert!(mock.calls().is_empty(), "unexpected writes: {:?}", mock.calls());
}

#[tokio::test]
async fn test_changed_prometheus_updates_in_place() {
    let (mock, reconciler, _) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    reconciler.sync(KEY).await.unwrap();
    let before = mock.stateful_set(NS, "prometheus-k8s").unwrap();

    bump_generation(&mock, |p| p.spec.replicas = Some(3));
    reconciler.sync(KEY).await.unwrap();

    let after = mock.stateful_set(NS, "prometheus-k8s").unwrap();
    assert_eq!(mock.count(Verb::Update, "StatefulSet"), 1);
    assert_eq!(after.spec.unwrap().replicas, Some(3));
    assert_ne!(
        before.metadata.annotations.unwrap().get(INPUT_HASH_ANNOTATION),
        after.metadata.annotations.unwrap().get(INPUT_HASH_ANNOTATION)
    );
}

#[tokio::test]
async fn test_shards_created_and_scaled_down() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.shards = Some(3);
    mock.add_prometheus(prometheus);

    reconciler.sync(KEY).await.unwrap();
    for name in ["prometheus-k8s", "prometheus-k8s-shard-1", "prometheus-k8s-shard-2"] {
        assert!(mock.stateful_set(NS, name).is_some(), "{name} missing");
    }

    bump_generation(&mock, |p| p.spec.shards = Some(1));
    mock.clear_calls();
    reconciler.sync(KEY).await.unwrap();

    assert!(mock.stateful_set(NS, "prometheus-k8s").is_some());
    assert!(mock.stateful_set(NS, "prometheus-k8s-shard-1").is_none());
    assert!(mock.stateful_set(NS, "prometheus-k8s-shard-2").is_none());
    assert_eq!(mock.count(Verb::Delete, "StatefulSet"), 2);
}

#[tokio::test]
async fn test_excess_shard_being_deleted_is_left_alone() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.shards = Some(2);
    mock.add_prometheus(prometheus);
    reconciler.sync(KEY).await.unwrap();

    let mut deleting = mock.stateful_set(NS, "prometheus-k8s-shard-1").unwrap();
    deleting.metadata.deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2026-10-01T00:00:00Z")).unwrap());
    mock.add_stateful_set(deleting);

    bump_generation(&mock, |p| p.spec.shards = None);
    mock.clear_calls();
    reconciler.sync(KEY).await.unwrap();

    assert_eq!(mock.count(Verb::Delete, "StatefulSet"), 0);
}

#[tokio::test]
async fn test_invalid_update_deletes_for_recreation() {
    let (mock, reconciler, metrics) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    reconciler.sync(KEY).await.unwrap();

    bump_generation(&mock, |p| p.spec.retention = Some("7d".to_string()));
    mock.fail_stateful_set_updates_invalid(
        "StatefulSet.apps \"prometheus-k8s\" is invalid",
        vec!["spec: Forbidden: updates to statefulset spec are forbidden".to_string()],
    );

    reconciler.sync(KEY).await.unwrap();
    assert!(mock.stateful_set(NS, "prometheus-k8s").is_none());
    assert_eq!(metrics.delete_create_total(), 1);

    mock.clear_injected_errors();
    reconciler.sync(KEY).await.unwrap();
    assert!(mock.stateful_set(NS, "prometheus-k8s").is_some());
}

#[tokio::test]
async fn test_other_update_error_fails_pass() {
    let (mock, reconciler, metrics) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    reconciler.sync(KEY).await.unwrap();

    bump_generation(&mock, |_| {});
    mock.fail_stateful_set_updates(500, "etcdserver: request timed out");

    assert!(reconciler.sync(KEY).await.is_err());
    assert!(mock.stateful_set(NS, "prometheus-k8s").is_some());
    assert_eq!(metrics.delete_create_total(), 0);
}

#[tokio::test]
async fn test_paused_prometheus_writes_nothing() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.paused = true;
    mock.add_prometheus(prometheus);
    with_monitor(&mock);

    reconciler.sync(KEY).await.unwrap();

    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_missing_prometheus_is_not_an_error() {
    let (mock, reconciler, _) = setup();
    reconciler.sync(KEY).await.unwrap();
    assert!(mock.calls().is_empty());
    assert!(reconciler.sync("no-slash").await.is_err());
}

#[tokio::test]
async fn test_restarted_at_survives_update() {
    let (mock, reconciler, _) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    reconciler.sync(KEY).await.unwrap();

    let mut sts = mock.stateful_set(NS, "prometheus-k8s").unwrap();
    sts.spec
        .as_mut()
        .and_then(|s| s.template.metadata.as_mut())
        .unwrap()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(RESTARTED_AT_ANNOTATION.to_string(), "2026-10-01T10:00:00Z".to_string());
    mock.add_stateful_set(sts);

    bump_generation(&mock, |_| {});
    reconciler.sync(KEY).await.unwrap();

    let sts = mock.stateful_set(NS, "prometheus-k8s").unwrap();
    let annotations = sts.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
    assert_eq!(
        annotations.get(RESTARTED_AT_ANNOTATION).map(String::as_str),
        Some("2026-10-01T10:00:00Z")
    );
}

#[tokio::test]
async fn test_no_monitor_selectors_keeps_existing_config() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.service_monitor_selector = None;
    mock.add_prometheus(prometheus);
    mock.add_secret(create_test_secret(NS, "prometheus-k8s", &[("prometheus.yaml.gz", "custom")]));

    reconciler.sync(KEY).await.unwrap();

    let secret = mock.secret(NS, "prometheus-k8s").unwrap();
    let data = secret.data.unwrap();
    assert_eq!(data.get("prometheus.yaml.gz").unwrap().0, b"custom".to_vec());
    assert_eq!(mock.count(Verb::Update, "Secret"), 0);
}

#[tokio::test]
async fn test_tracker_fans_out_credential_changes() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.remote_write = vec![RemoteWriteSpec {
        url: "https://remote.example.com/api/v1/write".to_string(),
        basic_auth: Some(BasicAuth {
            username: SecretKeySelector::new("remote-creds", "user"),
            password: SecretKeySelector::new("remote-creds", "password"),
        }),
        ..Default::default()
    }];
    mock.add_prometheus(prometheus);
    let creds = create_test_secret(NS, "remote-creds", &[("user", "admin"), ("password", "hunter2")]);
    mock.add_secret(creds.clone());

    reconciler.sync(KEY).await.unwrap();

    assert_eq!(reconciler.keys_referencing(&creds), vec![KEY.to_string()]);
    let unrelated = create_test_secret(NS, "unrelated", &[]);
    assert!(reconciler.keys_referencing(&unrelated).is_empty());
}

#[tokio::test]
async fn test_missing_credentials_fail_but_stay_tracked() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.remote_write = vec![RemoteWriteSpec {
        url: "https://remote.example.com/api/v1/write".to_string(),
        basic_auth: Some(BasicAuth {
            username: SecretKeySelector::new("late-creds", "user"),
            password: SecretKeySelector::new("late-creds", "password"),
        }),
        ..Default::default()
    }];
    mock.add_prometheus(prometheus);

    assert!(reconciler.sync(KEY).await.is_err());
    assert_eq!(mock.count(Verb::Create, "StatefulSet"), 0);

    // The Secret showing up later must still wake this Prometheus.
    let late = create_test_secret(NS, "late-creds", &[("user", "u"), ("password", "p")]);
    assert_eq!(reconciler.keys_referencing(&late), vec![KEY.to_string()]);
}

#[tokio::test]
async fn test_resolve_maps_shards_to_owner() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.shards = Some(2);
    mock.add_prometheus(prometheus);
    reconciler.sync(KEY).await.unwrap();

    for name in ["prometheus-k8s", "prometheus-k8s-shard-1"] {
        let sts = mock.stateful_set(NS, name).unwrap();
        let owner = reconciler.resolve(&sts).await.unwrap();
        assert_eq!(owner.metadata.name.as_deref(), Some("k8s"));
    }

    let mut orphan = mock.stateful_set(NS, "prometheus-k8s").unwrap();
    orphan.metadata.name = Some("prometheus-gone".to_string());
    assert!(reconciler.resolve(&orphan).await.is_none());
}

#[tokio::test]
async fn test_status_counts_pods_per_shard() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.replicas = Some(2);
    mock.add_prometheus(prometheus);
    reconciler.sync(KEY).await.unwrap();

    set_update_revision(&mock, "prometheus-k8s", "rev-2");
    mock.add_pod(pod(0, 0, "rev-2", true));
    mock.add_pod(pod(0, 1, "rev-1", false));

    reconciler.update_status(KEY).await.unwrap();

    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    assert_eq!(status.replicas, 2);
    assert_eq!(status.updated_replicas, 1);
    assert_eq!(status.available_replicas, 1);
    assert_eq!(status.unavailable_replicas, 1);
    assert_eq!(status.shard_statuses.len(), 1);
    assert_eq!(status.shard_statuses[0].shard_id, "0");

    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.status, ConditionStatus::Degraded);
    assert_eq!(available.reason.as_deref(), Some("SomePodsNotReady"));
    assert!(available.message.as_deref().unwrap().contains("prometheus-k8s-1"));

    let reconciled = status.conditions.iter().find(|c| c.type_ == "Reconciled").unwrap();
    assert_eq!(reconciled.status, ConditionStatus::True);
    assert_eq!(reconciled.observed_generation, 1);
}

#[tokio::test]
async fn test_status_available_transitions() {
    let (mock, reconciler, _) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    reconciler.sync(KEY).await.unwrap();
    set_update_revision(&mock, "prometheus-k8s", "rev-1");

    mock.add_pod(pod(0, 0, "rev-1", false));
    reconciler.update_status(KEY).await.unwrap();
    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.status, ConditionStatus::False);
    assert_eq!(available.reason.as_deref(), Some("NoPodReady"));

    mock.add_pod(pod(0, 0, "rev-1", true));
    reconciler.update_status(KEY).await.unwrap();
    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.status, ConditionStatus::True);
    let first_transition = available.last_transition_time;

    mock.clear_calls();
    reconciler.update_status(KEY).await.unwrap();
    assert_eq!(mock.count(Verb::UpdateStatus, "Prometheus"), 0);
    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.last_transition_time, first_transition);
}

#[tokio::test]
async fn test_status_skips_missing_shard_stateful_set() {
    let (mock, reconciler, _) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));

    reconciler.update_status(KEY).await.unwrap();

    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    assert!(status.shard_statuses.is_empty());
    assert_eq!(status.replicas, 0);
    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.status, ConditionStatus::True);
    assert_eq!(available.reason, None);
}

#[tokio::test]
async fn test_status_zero_replicas_is_available() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.replicas = Some(0);
    mock.add_prometheus(prometheus);
    reconciler.sync(KEY).await.unwrap();

    reconciler.update_status(KEY).await.unwrap();

    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    assert_eq!(status.shard_statuses.len(), 1);
    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.status, ConditionStatus::True);
    assert_eq!(available.reason, None);
}

#[tokio::test]
async fn test_status_messages_only_for_unready_shards() {
    let (mock, reconciler, _) = setup();
    let mut prometheus = create_test_prometheus(NS, "k8s");
    prometheus.spec.shards = Some(2);
    mock.add_prometheus(prometheus);
    reconciler.sync(KEY).await.unwrap();

    mock.add_pod(pod(0, 0, "rev-1", true));
    mock.add_pod(pod(1, 0, "rev-1", false));
    reconciler.update_status(KEY).await.unwrap();

    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    assert_eq!(status.shard_statuses.len(), 2);
    let available = status.conditions.iter().find(|c| c.type_ == "Available").unwrap();
    assert_eq!(available.status, ConditionStatus::False);
    assert_eq!(available.reason.as_deref(), Some("NoPodReady"));
    assert_eq!(
        available.message.as_deref(),
        Some("shard 1: pod prometheus-k8s-shard-1-0: containers with unready status: [prometheus]")
    );
}

#[tokio::test]
async fn test_status_reports_failed_sync() {
    let (mock, reconciler, _) = setup();
    mock.add_prometheus(create_test_prometheus(NS, "k8s"));
    reconciler.sync(KEY).await.unwrap();

    bump_generation(&mock, |_| {});
    mock.fail_stateful_set_updates(500, "etcdserver: request timed out");
    assert!(reconciler.sync(KEY).await.is_err());

    reconciler.update_status(KEY).await.unwrap();
    let status = mock.prometheus(NS, "k8s").unwrap().status.unwrap();
    let reconciled = status.conditions.iter().find(|c| c.type_ == "Reconciled").unwrap();
    assert_eq!(reconciled.status, ConditionStatus::False);
    assert!(reconciled.message.as_deref().unwrap().contains("request timed out"));
}
