//! Unit tests for the Resource Selector

use super::*;
use crate::assets::StoreBuilder;
use crate::test_utils::*;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some([("team".to_string(), "obs".to_string())].into()),
        ..Default::default()
    }
}

fn relabel(action: &str) -> RelabelConfig {
    RelabelConfig {
        action: Some(action.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_service_monitors_selected_in_own_namespace() {
    let (mock, client) = mock_client();
    mock.add_service_monitor(create_test_service_monitor("monitoring", "api", &[("team", "obs")]));
    mock.add_service_monitor(create_test_service_monitor("monitoring", "other", &[("team", "web")]));
    mock.add_service_monitor(create_test_service_monitor("apps", "db", &[("team", "obs")]));
    let prometheus = create_test_prometheus("monitoring", "k8s");
    let mut store = StoreBuilder::new(client.clone());

    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_service_monitors().await.unwrap();

    assert_eq!(selection.resources.keys().collect::<Vec<_>>(), vec!["monitoring/api"]);
    assert_eq!(selection.rejected, 0);
    assert_eq!(selection.selected_len(), 1);
}

#[tokio::test]
async fn test_missing_selector_selects_nothing() {
    let (mock, client) = mock_client();
    mock.add_service_monitor(create_test_service_monitor("monitoring", "api", &[("team", "obs")]));
    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    prometheus.spec.service_monitor_selector = None;
    let mut store = StoreBuilder::new(client.clone());

    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_service_monitors().await.unwrap();

    assert!(selection.resources.is_empty());
    assert_eq!(selection.selected_len(), 0);
}

#[tokio::test]
async fn test_namespace_selector_widens_search() {
    let (mock, client) = mock_client();
    mock.add_namespace(create_test_namespace("apps", &[("monitored", "true")]));
    mock.add_namespace(create_test_namespace("monitoring", &[]));
    mock.add_service_monitor(create_test_service_monitor("apps", "db", &[("team", "obs")]));
    mock.add_service_monitor(create_test_service_monitor("monitoring", "api", &[("team", "obs")]));
    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    prometheus.spec.service_monitor_namespace_selector = Some(LabelSelector::from_labels([("monitored", "true")]));
    let mut store = StoreBuilder::new(client.clone());

    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_service_monitors().await.unwrap();

    assert_eq!(selection.resources.keys().collect::<Vec<_>>(), vec!["apps/db"]);
}

#[tokio::test]
async fn test_invalid_service_monitor_is_rejected_not_fatal() {
    let (mock, client) = mock_client();
    mock.add_service_monitor(create_test_service_monitor("monitoring", "good", &[("team", "obs")]));

    let mut bad = create_test_service_monitor("monitoring", "bad", &[("team", "obs")]);
    bad.spec.endpoints[0].basic_auth = Some(BasicAuth {
        username: SecretKeySelector::new("missing", "user"),
        password: SecretKeySelector::new("missing", "pass"),
    });
    mock.add_service_monitor(bad);

    let prometheus = create_test_prometheus("monitoring", "k8s");
    let mut store = StoreBuilder::new(client.clone());
    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_service_monitors().await.unwrap();

    assert_eq!(selection.resources.keys().collect::<Vec<_>>(), vec!["monitoring/good"]);
    assert_eq!(selection.rejected, 1);
    assert_eq!(selection.selected_len(), 2);
}

#[tokio::test]
async fn test_credentials_warm_the_store() {
    let (mock, client) = mock_client();
    mock.add_secret(create_test_secret("monitoring", "creds", &[("user", "admin"), ("pass", "s3cret")]));
    let mut sm = create_test_service_monitor("monitoring", "api", &[("team", "obs")]);
    sm.spec.endpoints[0].basic_auth = Some(BasicAuth {
        username: SecretKeySelector::new("creds", "user"),
        password: SecretKeySelector::new("creds", "pass"),
    });
    mock.add_service_monitor(sm);

    let prometheus = create_test_prometheus("monitoring", "k8s");
    let mut store = StoreBuilder::new(client.clone());
    {
        let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
        let selection = selector.select_service_monitors().await.unwrap();
        assert_eq!(selection.resources.len(), 1);
    }

    let getter = store.for_namespace("monitoring");
    assert_eq!(getter.get_secret_key(&SecretKeySelector::new("creds", "pass")).unwrap(), b"s3cret");
    assert_eq!(store.ref_tracker().len(), 1);
}

#[tokio::test]
async fn test_arbitrary_fs_access_denied() {
    let (mock, client) = mock_client();
    let mut sm = create_test_service_monitor("monitoring", "api", &[("team", "obs")]);
    sm.spec.endpoints[0].bearer_token_file = Some("/var/run/secrets/token".to_string());
    mock.add_service_monitor(sm);

    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    let mut store = StoreBuilder::new(client.clone());
    let allowed = {
        let mut selector = ResourceSelector::new(client.clone(), &prometheus, &mut store, "v3.1.0").unwrap();
        selector.select_service_monitors().await.unwrap()
    };
    assert_eq!(allowed.resources.len(), 1);

    prometheus.spec.arbitrary_fs_access_through_sms.deny = true;
    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let denied = selector.select_service_monitors().await.unwrap();
    assert!(denied.resources.is_empty());
    assert_eq!(denied.rejected, 1);
}

#[tokio::test]
async fn test_relabel_actions_gated_by_version() {
    let (mock, client) = mock_client();
    let mut sm = create_test_service_monitor("monitoring", "api", &[("team", "obs")]);
    sm.spec.endpoints[0].relabelings = vec![RelabelConfig {
        source_labels: vec!["__meta_kubernetes_pod_name".to_string()],
        target_label: Some("pod".to_string()),
        ..relabel("lowercase")
    }];
    mock.add_service_monitor(sm);
    let prometheus = create_test_prometheus("monitoring", "k8s");

    let mut store = StoreBuilder::new(client.clone());
    let mut selector = ResourceSelector::new(client.clone(), &prometheus, &mut store, "v2.30.0").unwrap();
    assert_eq!(selector.select_service_monitors().await.unwrap().rejected, 1);

    let mut store = StoreBuilder::new(client.clone());
    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v2.36.0").unwrap();
    assert_eq!(selector.select_service_monitors().await.unwrap().rejected, 0);
}

#[tokio::test]
async fn test_scrape_timeout_exceeding_interval_rejected() {
    let (mock, client) = mock_client();
    mock.add_pod_monitor(PodMonitor {
        metadata: meta("monitoring", "slow"),
        spec: PodMonitorSpec {
            pod_metrics_endpoints: vec![PodMetricsEndpoint {
                interval: Some("10s".to_string()),
                scrape_timeout: Some("15s".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        },
    });
    mock.add_pod_monitor(PodMonitor {
        metadata: meta("monitoring", "fast"),
        spec: PodMonitorSpec {
            pod_metrics_endpoints: vec![PodMetricsEndpoint {
                scrape_timeout: Some("15s".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        },
    });
    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    prometheus.spec.pod_monitor_selector = Some(LabelSelector::from_labels([("team", "obs")]));

    let mut store = StoreBuilder::new(client.clone());
    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_pod_monitors().await.unwrap();

    assert_eq!(selection.resources.keys().collect::<Vec<_>>(), vec!["monitoring/fast"]);
    assert_eq!(selection.rejected, 1);
}

#[tokio::test]
async fn test_probe_url_without_scheme() {
    let (mock, client) = mock_client();
    for (name, url) in [("ok", "blackbox-exporter:9115"), ("scheme", "http://blackbox:9115")] {
        mock.add_probe(Probe {
            metadata: meta("monitoring", name),
            spec: ProbeSpec {
                prober: ProberSpec {
                    url: url.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        });
    }
    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    prometheus.spec.probe_selector = Some(LabelSelector::default());

    let mut store = StoreBuilder::new(client.clone());
    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_probes().await.unwrap();

    assert_eq!(selection.resources.keys().collect::<Vec<_>>(), vec!["monitoring/ok"]);
    assert_eq!(selection.rejected, 1);
}

#[tokio::test]
async fn test_scrape_config_static_labels() {
    let (mock, client) = mock_client();
    for (name, label) in [("good", "env"), ("bad", "1env")] {
        mock.add_scrape_config(ScrapeConfig {
            metadata: meta("monitoring", name),
            spec: ScrapeConfigSpec {
                static_configs: vec![StaticConfig {
                    targets: vec!["node:9100".to_string()],
                    labels: [(label.to_string(), "prod".to_string())].into(),
                }],
                ..Default::default()
            },
        });
    }
    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    prometheus.spec.scrape_config_selector = Some(LabelSelector::from_labels([("team", "obs")]));

    let mut store = StoreBuilder::new(client.clone());
    let mut selector = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0").unwrap();
    let selection = selector.select_scrape_configs().await.unwrap();

    assert_eq!(selection.resources.keys().collect::<Vec<_>>(), vec!["monitoring/good"]);
    assert_eq!(selection.rejected, 1);
}

#[tokio::test]
async fn test_invalid_version_rejected() {
    let (_mock, client) = mock_client();
    let mut prometheus = create_test_prometheus("monitoring", "k8s");
    prometheus.spec.version = Some("latest".to_string());
    let mut store = StoreBuilder::new(client.clone());

    let result = ResourceSelector::new(client, &prometheus, &mut store, "v3.1.0");
    assert!(matches!(result, Err(SelectorError::InvalidVersion(v)) if v == "latest"));
}

#[test]
fn test_label_selector_rejects_bad_operator() {
    let selector = LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: "team".to_string(),
            operator: "Near".to_string(),
            values: Some(vec!["obs".to_string()]),
        }]),
        ..Default::default()
    };
    assert!(matches!(
        label_selector("serviceMonitorSelector", &selector),
        Err(SelectorError::InvalidSelector { .. })
    ));
}
