//! Desired shard StatefulSets.

use crate::config::OperatorConfig;
use crate::config_generator::{RULES_DIR, TLS_ASSETS_DIR};
use crate::naming::{
    CONFIG_FILENAME, RESTARTED_AT_ANNOTATION, WEB_PORT, WEB_PORT_NAME, GOVERNING_SERVICE_NAME, config_secret_name,
    prefixed_name, shard_labels, stateful_set_name,
};
use crate::reconcile_helpers::{merge_metadata, retry_on_conflict};
use crate::sharded_secret::ShardedSecret;
use cluster_client::{ClusterClientTrait, ClusterError};
use crds::{Prometheus, StorageSpec};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, HTTPGetAction,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe,
    SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const CONFIG_DIR: &str = "/etc/prometheus/config";
const CONFIG_OUT_DIR: &str = "/etc/prometheus/config_out";
const CONFIG_OUT_FILE: &str = "prometheus.env.yaml";
const STORAGE_DIR: &str = "/prometheus";
const DEFAULT_RETENTION: &str = "24h";
const REVISION_HISTORY_LIMIT: i32 = 10;

/// Everything that shapes one shard's StatefulSet.
pub struct ShardInputs<'a> {
    pub prometheus: &'a Prometheus,
    pub config: &'a OperatorConfig,
    pub base: &'a ObjectMeta,
    pub shard: i32,
    pub rule_config_maps: &'a [String],
    pub tls_assets: &'a ShardedSecret,
}

fn image(prometheus: &Prometheus, config: &OperatorConfig) -> String {
    match &prometheus.spec.image {
        Some(image) if !image.is_empty() => image.clone(),
        _ => {
            let version = prometheus
                .spec
                .version
                .as_deref()
                .unwrap_or(&config.prometheus_default_version);
            format!("{}:{}", config.prometheus_default_image, version)
        }
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..Default::default()
    }
}

fn empty_dir(name: &str, size_limit: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            size_limit: size_limit.map(|s| Quantity(s.to_string())),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn db_volume_name(name: &str) -> String {
    format!("{}-db", prefixed_name(name))
}

fn claim_template(name: &str, storage: &StorageSpec) -> Option<PersistentVolumeClaim> {
    let template = storage.volume_claim_template.as_ref()?;
    let access_modes = if template.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        template.access_modes.clone()
    };
    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(template.name.clone().unwrap_or_else(|| db_volume_name(name))),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: template.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(template.storage.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build the StatefulSet of one shard, without the input hash annotation.
pub fn build_stateful_set(input: &ShardInputs<'_>) -> StatefulSet {
    let prometheus = input.prometheus;
    let spec = &prometheus.spec;
    let name = prometheus.metadata.name.as_deref().unwrap_or_default();
    let selector_labels = shard_labels(name, input.shard);

    let mut labels = prometheus.metadata.labels.clone().unwrap_or_default();
    labels.extend(input.base.labels.clone().unwrap_or_default());
    labels.extend(selector_labels.clone());

    let mut pod_labels = selector_labels.clone();
    let mut pod_annotations = BTreeMap::from([(
        "kubectl.kubernetes.io/default-container".to_string(),
        "prometheus".to_string(),
    )]);
    if let Some(pod_metadata) = &spec.pod_metadata {
        for (k, v) in &pod_metadata.labels {
            pod_labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
        pod_annotations.extend(pod_metadata.annotations.clone());
    }

    let claim = spec.storage.as_ref().and_then(|storage| claim_template(name, storage));
    let db_volume = claim
        .as_ref()
        .and_then(|c| c.metadata.name.clone())
        .unwrap_or_else(|| db_volume_name(name));

    let mut volumes = vec![
        Volume {
            name: "config".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(config_secret_name(name)),
                ..Default::default()
            }),
            ..Default::default()
        },
        empty_dir("config-out", None),
        input.tls_assets.volume("tls-assets"),
    ];
    if claim.is_none() {
        let size_limit = spec.storage.as_ref().and_then(|s| s.empty_dir_size_limit.as_deref());
        volumes.push(empty_dir(&db_volume, size_limit));
    }

    let mut mounts = vec![
        mount("config-out", CONFIG_OUT_DIR, true),
        mount("tls-assets", TLS_ASSETS_DIR, true),
        mount(&db_volume, STORAGE_DIR, false),
    ];
    for cm in input.rule_config_maps {
        volumes.push(Volume {
            name: cm.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: cm.clone().into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(mount(cm, &format!("{RULES_DIR}/{cm}"), true));
    }

    let mut args = vec![
        format!("--config.file={CONFIG_OUT_DIR}/{CONFIG_OUT_FILE}"),
        format!("--storage.tsdb.path={STORAGE_DIR}"),
        format!(
            "--storage.tsdb.retention.time={}",
            spec.retention.as_deref().unwrap_or(DEFAULT_RETENTION)
        ),
        format!("--web.listen-address=:{WEB_PORT}"),
        "--web.enable-lifecycle".to_string(),
        "--web.route-prefix=/".to_string(),
    ];
    if let Some(level) = &spec.log_level {
        args.push(format!("--log.level={level}"));
    }

    let prometheus_container = Container {
        name: "prometheus".to_string(),
        image: Some(image(prometheus, input.config)),
        args: Some(args),
        ports: Some(vec![ContainerPort {
            name: Some(WEB_PORT_NAME.to_string()),
            container_port: WEB_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/-/ready".to_string()),
                port: IntOrString::String(WEB_PORT_NAME.to_string()),
                ..Default::default()
            }),
            period_seconds: Some(5),
            failure_threshold: Some(3),
            ..Default::default()
        }),
        volume_mounts: Some(mounts),
        ..Default::default()
    };

    // Expands $(SHARD) in the decompressed configuration.
    let init_container = Container {
        name: "init-config-reloader".to_string(),
        image: Some(input.config.reloader_image.clone()),
        args: Some(vec![
            "--watch-interval=0".to_string(),
            format!("--config-file={CONFIG_DIR}/{CONFIG_FILENAME}"),
            format!("--config-envsubst-file={CONFIG_OUT_DIR}/{CONFIG_OUT_FILE}"),
        ]),
        env: Some(vec![
            EnvVar {
                name: "POD_NAME".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.name".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "SHARD".to_string(),
                value: Some(input.shard.to_string()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            mount("config", CONFIG_DIR, true),
            mount("config-out", CONFIG_OUT_DIR, false),
        ]),
        ..Default::default()
    };

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(stateful_set_name(name, input.shard)),
            labels: Some(labels),
            annotations: prometheus.metadata.annotations.clone(),
            ..input.base.clone()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(prometheus.replicas()),
            service_name: GOVERNING_SERVICE_NAME.to_string().into(),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![prometheus_container],
                    init_containers: Some(vec![init_container]),
                    volumes: Some(volumes),
                    service_account_name: spec.service_account_name.clone(),
                    node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
                    termination_grace_period_seconds: Some(600),
                    ..Default::default()
                }),
            },
            volume_claim_templates: claim.map(|c| vec![c]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Strip server-populated fields from the volume claim templates.
///
/// Claim templates copied from a live object carry status and identity
/// fields the API server rejects or keeps flagging as a diff.
pub fn sanitize_stateful_set(sts: &mut StatefulSet) {
    let Some(templates) = sts.spec.as_mut().and_then(|s| s.volume_claim_templates.as_mut()) else {
        return;
    };
    for claim in templates {
        claim.status = None;
        claim.metadata.uid = None;
        claim.metadata.resource_version = None;
        claim.metadata.creation_timestamp = None;
        claim.metadata.managed_fields = None;
    }
}

fn pod_template_annotations(sts: &StatefulSet) -> Option<&BTreeMap<String, String>> {
    sts.spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.annotations.as_ref())
}

/// Update a StatefulSet in place, keeping foreign metadata and a pending
/// `kubectl rollout restart`. Re-reads and retries on conflicts.
pub async fn update_stateful_set(client: &dyn ClusterClientTrait, desired: &StatefulSet) -> Result<(), ClusterError> {
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    let name = desired.metadata.name.as_deref().unwrap_or_default();

    retry_on_conflict(|| async move {
        let Some(existing) = client.get_stateful_set(namespace, name).await? else {
            client.create_stateful_set(desired).await?;
            return Ok(());
        };

        let mut sts = desired.clone();
        merge_metadata(&mut sts.metadata, &existing.metadata);

        if let Some(restarted_at) = pod_template_annotations(&existing).and_then(|a| a.get(RESTARTED_AT_ANNOTATION)) {
            if let Some(meta) = sts.spec.as_mut().and_then(|s| s.template.metadata.as_mut()) {
                meta.annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(RESTARTED_AT_ANNOTATION.to_string(), restarted_at.clone());
            }
        }

        client.update_stateful_set(&sts).await?;
        Ok(())
    })
    .await
}
