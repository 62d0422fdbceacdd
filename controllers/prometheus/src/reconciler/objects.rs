//! Metadata and the small objects written next to the StatefulSets.

use crate::config::OperatorConfig;
use crate::naming::{
    APP_NAME_LABEL, CONFIG_FILENAME, GOVERNING_SERVICE_NAME, MANAGED_BY, MANAGED_BY_LABEL, PREFIX, WEB_PORT,
    WEB_PORT_NAME, config_secret_name, managed_labels, tls_assets_secret_name,
};
use crds::Prometheus;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use std::collections::BTreeMap;

/// Namespace, operator labels and controller owner reference shared by
/// every object written for `prometheus`. The name is left to the caller.
pub fn base_meta(prometheus: &Prometheus, config: &OperatorConfig) -> ObjectMeta {
    let name = prometheus.metadata.name.as_deref().unwrap_or_default();
    let mut labels = config.labels.clone();
    labels.extend(managed_labels(name));
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    ObjectMeta {
        namespace: prometheus.metadata.namespace.clone(),
        labels: Some(labels),
        owner_references: prometheus.controller_owner_ref(&()).map(|owner| vec![owner]),
        ..Default::default()
    }
}

/// Secret holding the gzipped configuration under [`CONFIG_FILENAME`].
pub fn config_secret(prometheus: &Prometheus, config: &OperatorConfig, compressed: Vec<u8>) -> Secret {
    let name = prometheus.metadata.name.as_deref().unwrap_or_default();
    Secret {
        metadata: ObjectMeta {
            name: Some(config_secret_name(name)),
            ..base_meta(prometheus, config)
        },
        data: Some(BTreeMap::from([(CONFIG_FILENAME.to_string(), ByteString(compressed))])),
        ..Default::default()
    }
}

/// Template of the sharded TLS assets Secrets.
pub fn tls_assets_template(prometheus: &Prometheus, config: &OperatorConfig) -> Secret {
    let name = prometheus.metadata.name.as_deref().unwrap_or_default();
    Secret {
        metadata: ObjectMeta {
            name: Some(tls_assets_secret_name(name)),
            ..base_meta(prometheus, config)
        },
        ..Default::default()
    }
}

/// Headless Service giving every shard pod a stable DNS name.
pub fn governing_service(prometheus: &Prometheus, config: &OperatorConfig) -> Service {
    let mut meta = base_meta(prometheus, config);
    meta.name = Some(GOVERNING_SERVICE_NAME.to_string());
    // Shared by all Prometheus objects of the namespace.
    meta.labels = Some(BTreeMap::from([
        ("operated-prometheus".to_string(), "true".to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
    ]));

    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(WEB_PORT_NAME.to_string()),
                port: WEB_PORT,
                target_port: Some(IntOrString::String(WEB_PORT_NAME.to_string())),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([(APP_NAME_LABEL.to_string(), PREFIX.to_string())])),
            ..Default::default()
        }),
        ..Default::default()
    }
}
