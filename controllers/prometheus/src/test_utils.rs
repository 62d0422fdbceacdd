//! Test utilities for unit testing the reconciliation engine
//!
//! Builders for the objects a pass reads, plus a mock cluster wired up the
//! way the reconciler expects it.

use cluster_client::{ClusterClientTrait, MockClusterClient};
use crds::*;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TLS_CA: &str = include_str!("assets/testdata/ca.pem");
pub const TLS_CERT: &str = include_str!("assets/testdata/client.pem");
pub const TLS_KEY: &str = include_str!("assets/testdata/client.key");
pub const TLS_OTHER_KEY: &str = include_str!("assets/testdata/other.key");

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("{namespace}-{name}-uid")),
        ..Default::default()
    }
}

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

/// Mock cluster plus the trait object handed to the engine.
pub fn mock_client() -> (MockClusterClient, Arc<dyn ClusterClientTrait>) {
    let mock = MockClusterClient::new();
    let client: Arc<dyn ClusterClientTrait> = Arc::new(mock.clone());
    (mock, client)
}

/// Helper to create a test Prometheus selecting ServiceMonitors labelled `team=obs`
pub fn create_test_prometheus(namespace: &str, name: &str) -> Prometheus {
    Prometheus {
        metadata: ObjectMeta {
            generation: Some(1),
            ..meta(namespace, name)
        },
        spec: PrometheusSpec {
            service_monitor_selector: Some(LabelSelector::from_labels([("team", "obs")])),
            rule_selector: Some(LabelSelector::from_labels([("team", "obs")])),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a test Secret
pub fn create_test_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: meta(namespace, name),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Helper to create a test ConfigMap
pub fn create_test_config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> ConfigMap {
    ConfigMap {
        metadata: meta(namespace, name),
        data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        ..Default::default()
    }
}

/// Helper to create a test Namespace
pub fn create_test_namespace(name: &str, label_pairs: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: labels(label_pairs),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a test ServiceMonitor with one `web` endpoint
pub fn create_test_service_monitor(namespace: &str, name: &str, label_pairs: &[(&str, &str)]) -> ServiceMonitor {
    ServiceMonitor {
        metadata: ObjectMeta {
            labels: labels(label_pairs),
            ..meta(namespace, name)
        },
        spec: ServiceMonitorSpec {
            endpoints: vec![Endpoint {
                port: Some("web".to_string()),
                ..Default::default()
            }],
            selector: LabelSelector::from_labels([("app", name)]),
            ..Default::default()
        },
    }
}

/// Helper to create a test PrometheusRule with one recording rule
pub fn create_test_rule(namespace: &str, name: &str, label_pairs: &[(&str, &str)]) -> PrometheusRule {
    PrometheusRule {
        metadata: ObjectMeta {
            labels: labels(label_pairs),
            ..meta(namespace, name)
        },
        spec: PrometheusRuleSpec {
            groups: vec![RuleGroup {
                name: format!("{name}.rules"),
                rules: vec![Rule {
                    record: Some("job:up:sum".to_string()),
                    expr: "sum by (job) (up)".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        },
    }
}
