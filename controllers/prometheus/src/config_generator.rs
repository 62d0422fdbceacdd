//! Rendering of the Prometheus configuration file.
//!
//! The reconciler only depends on [`ConfigGenerator`]. The bundled
//! [`YamlConfigGenerator`] emits the global section, one scrape job per
//! accepted monitor endpoint, the rule file globs and remote endpoints.
//! Credentials are read from the pass's [`StoreBuilder`] cache; TLS material
//! is referenced by file under [`TLS_ASSETS_DIR`].

use crate::assets::{AssetError, AssetKey, StoreBuilder, StoreGetter};
use crds::{
    BasicAuth, PodMonitor, Probe, Prometheus, RelabelConfig, SafeAuthorization, SafeTlsConfig, ScrapeConfig,
    SecretKeySelector, ServiceMonitor, TlsConfig,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

/// Mount path of the sharded TLS assets volume.
pub const TLS_ASSETS_DIR: &str = "/etc/prometheus/certs";

/// Parent directory of the rule ConfigMap mounts.
pub const RULES_DIR: &str = "/etc/prometheus/rules";

/// Placeholder the config reloader substitutes with the shard index.
pub const SHARD_PLACEHOLDER: &str = "$(SHARD)";

const DEFAULT_EVALUATION_INTERVAL: &str = "30s";

#[derive(Debug, Error)]
pub enum GenerateError {
    /// A credential could not be read from the pass cache
    #[error("failed to resolve credentials: {0}")]
    Asset(#[from] AssetError),

    /// YAML serialization failed
    #[error("failed to serialize configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Compression failed
    #[error("failed to compress configuration: {0}")]
    Compress(#[from] std::io::Error),
}

/// Everything a generator may read.
pub struct ConfigInput<'a> {
    pub prometheus: &'a Prometheus,
    pub service_monitors: &'a BTreeMap<String, ServiceMonitor>,
    pub pod_monitors: &'a BTreeMap<String, PodMonitor>,
    pub probes: &'a BTreeMap<String, Probe>,
    pub scrape_configs: &'a BTreeMap<String, ScrapeConfig>,
    /// Names of the rule ConfigMaps, each mounted under [`RULES_DIR`]
    pub rule_config_maps: &'a [String],
    pub store: &'a StoreBuilder,
}

/// Produces the Prometheus configuration text.
pub trait ConfigGenerator: Send + Sync {
    fn generate(&self, input: &ConfigInput<'_>) -> Result<String, GenerateError>;
}

/// Gzip the rendered configuration for the config Secret.
pub fn compress(config: &str) -> Result<Vec<u8>, GenerateError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(config.as_bytes())?;
    Ok(encoder.finish()?)
}

#[derive(Debug, Serialize)]
struct PrometheusConfig {
    global: GlobalConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rule_files: Vec<String>,
    scrape_configs: Vec<ScrapeJob>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remote_write: Vec<RemoteEndpoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remote_read: Vec<RemoteEndpoint>,
}

#[derive(Debug, Serialize)]
struct GlobalConfig {
    scrape_interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scrape_timeout: Option<String>,
    evaluation_interval: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    external_labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize)]
struct ScrapeJob {
    job_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scrape_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scrape_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheme: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    basic_auth: Option<BasicAuthOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization: Option<AuthorizationOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_config: Option<TlsOut>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    kubernetes_sd_configs: Vec<KubernetesSd>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    static_configs: Vec<StaticTargets>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    relabel_configs: Vec<Relabel>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    metric_relabel_configs: Vec<Relabel>,
}

#[derive(Debug, Serialize)]
struct BasicAuthOut {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct AuthorizationOut {
    #[serde(rename = "type")]
    type_: String,
    credentials: String,
}

#[derive(Debug, Default, Serialize)]
struct TlsOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cert_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    insecure_skip_verify: Option<bool>,
}

#[derive(Debug, Serialize)]
struct KubernetesSd {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespaces: Option<SdNamespaces>,
}

#[derive(Debug, Serialize)]
struct SdNamespaces {
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StaticTargets {
    targets: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize)]
struct Relabel {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    source_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modulus: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replacement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
}

impl Relabel {
    fn keep(source: &str, regex: &str) -> Self {
        Self {
            source_labels: vec![source.to_string()],
            regex: Some(regex.to_string()),
            action: Some("keep".to_string()),
            ..Default::default()
        }
    }

    fn copy(source: &str, target: &str) -> Self {
        Self {
            source_labels: vec![source.to_string()],
            target_label: Some(target.to_string()),
            ..Default::default()
        }
    }

    fn set(target: &str, value: &str) -> Self {
        Self {
            target_label: Some(target.to_string()),
            replacement: Some(value.to_string()),
            ..Default::default()
        }
    }
}

impl From<&RelabelConfig> for Relabel {
    fn from(rc: &RelabelConfig) -> Self {
        Self {
            source_labels: rc.source_labels.clone(),
            separator: rc.separator.clone(),
            target_label: rc.target_label.clone(),
            regex: rc.regex.clone(),
            modulus: rc.modulus,
            replacement: rc.replacement.clone(),
            action: rc.action.as_ref().map(|a| a.to_ascii_lowercase()),
        }
    }
}

#[derive(Debug, Serialize)]
struct RemoteEndpoint {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    basic_auth: Option<BasicAuthOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_config: Option<TlsOut>,
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// `[^a-zA-Z0-9_]` becomes `_`, as Prometheus does for discovery labels.
fn sanitize_label(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn asset_path(key: &AssetKey) -> String {
    format!("{TLS_ASSETS_DIR}/{key}")
}

fn basic_auth(getter: &StoreGetter<'_>, auth: Option<&BasicAuth>) -> Result<Option<BasicAuthOut>, AssetError> {
    auth.map(|auth| {
        Ok(BasicAuthOut {
            username: text(getter.get_secret_key(&auth.username)?),
            password: text(getter.get_secret_key(&auth.password)?),
        })
    })
    .transpose()
}

fn authorization(
    getter: &StoreGetter<'_>,
    bearer: Option<&SecretKeySelector>,
    auth: Option<&SafeAuthorization>,
) -> Result<Option<AuthorizationOut>, AssetError> {
    if let Some(credentials) = auth.and_then(|a| a.credentials.as_ref()) {
        let type_ = auth
            .and_then(|a| a.type_.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Bearer".to_string());
        return Ok(Some(AuthorizationOut {
            type_,
            credentials: text(getter.get_secret_key(credentials)?),
        }));
    }
    bearer
        .filter(|sel| !sel.name.is_empty())
        .map(|sel| {
            Ok(AuthorizationOut {
                type_: "Bearer".to_string(),
                credentials: text(getter.get_secret_key(sel)?),
            })
        })
        .transpose()
}

fn safe_tls(namespace: &str, tls: &SafeTlsConfig) -> TlsOut {
    TlsOut {
        ca_file: AssetKey::from_source(namespace, &tls.ca).map(|k| asset_path(&k)),
        cert_file: AssetKey::from_source(namespace, &tls.cert).map(|k| asset_path(&k)),
        key_file: tls
            .key_secret
            .as_ref()
            .map(|sel| asset_path(&AssetKey::secret(namespace, sel))),
        server_name: tls.server_name.clone(),
        insecure_skip_verify: tls.insecure_skip_verify,
    }
}

fn tls(namespace: &str, tls: &TlsConfig) -> TlsOut {
    let mut out = safe_tls(namespace, &tls.safe);
    out.ca_file = tls.ca_file.clone().or(out.ca_file);
    out.cert_file = tls.cert_file.clone().or(out.cert_file);
    out.key_file = tls.key_file.clone().or(out.key_file);
    out
}

/// Keeps only the targets of the shard this Prometheus runs as.
fn shard_relabelings(shards: i32) -> [Relabel; 2] {
    [
        Relabel {
            source_labels: vec!["__address__".to_string()],
            target_label: Some("__tmp_hash".to_string()),
            modulus: Some(u64::try_from(shards.max(1)).unwrap_or(1)),
            action: Some("hashmod".to_string()),
            ..Default::default()
        },
        Relabel::keep("__tmp_hash", SHARD_PLACEHOLDER),
    ]
}

fn object_namespace(meta: &kube::api::ObjectMeta) -> Option<&str> {
    meta.namespace.as_deref().filter(|ns| !ns.is_empty())
}

/// Minimal configuration rendered with `serde_yaml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlConfigGenerator;

impl YamlConfigGenerator {
    fn service_monitor_jobs(&self, input: &ConfigInput<'_>, sm: &ServiceMonitor) -> Result<Vec<ScrapeJob>, AssetError> {
        let Some(namespace) = object_namespace(&sm.metadata) else {
            return Ok(Vec::new());
        };
        let name = sm.metadata.name.as_deref().unwrap_or_default();
        let getter = input.store.for_namespace(namespace);
        let names = match &sm.spec.namespace_selector {
            Some(sel) if sel.any => None,
            Some(sel) if !sel.match_names.is_empty() => Some(sel.match_names.clone()),
            _ => Some(vec![namespace.to_string()]),
        };

        let mut jobs = Vec::with_capacity(sm.spec.endpoints.len());
        for (i, ep) in sm.spec.endpoints.iter().enumerate() {
            let mut relabel_configs: Vec<Relabel> = sm
                .spec
                .selector
                .match_labels
                .iter()
                .flatten()
                .map(|(k, v)| {
                    Relabel::keep(&format!("__meta_kubernetes_service_label_{}", sanitize_label(k)), v)
                })
                .collect();
            if let Some(port) = &ep.port {
                relabel_configs.push(Relabel::keep("__meta_kubernetes_endpoint_port_name", port));
            }
            relabel_configs.push(Relabel::copy("__meta_kubernetes_namespace", "namespace"));
            relabel_configs.push(Relabel::copy("__meta_kubernetes_service_name", "service"));
            relabel_configs.push(Relabel::copy("__meta_kubernetes_pod_name", "pod"));
            match &sm.spec.job_label {
                Some(label) => relabel_configs.push(Relabel::copy(
                    &format!("__meta_kubernetes_service_label_{}", sanitize_label(label)),
                    "job",
                )),
                None => relabel_configs.push(Relabel::copy("__meta_kubernetes_service_name", "job")),
            }
            if let Some(port) = &ep.port {
                relabel_configs.push(Relabel::set("endpoint", port));
            }
            relabel_configs.extend(ep.relabelings.iter().map(Relabel::from));
            relabel_configs.extend(shard_relabelings(input.prometheus.shards()));

            jobs.push(ScrapeJob {
                job_name: format!("serviceMonitor/{namespace}/{name}/{i}"),
                scrape_interval: ep.interval.clone(),
                scrape_timeout: ep.scrape_timeout.clone(),
                metrics_path: ep.path.clone(),
                scheme: ep.scheme.clone(),
                basic_auth: basic_auth(&getter, ep.basic_auth.as_ref())?,
                authorization: authorization(&getter, ep.bearer_token_secret.as_ref(), ep.authorization.as_ref())?,
                tls_config: ep.tls_config.as_ref().map(|t| tls(namespace, t)),
                kubernetes_sd_configs: vec![KubernetesSd {
                    role: "endpoints",
                    namespaces: names.clone().map(|names| SdNamespaces { names }),
                }],
                relabel_configs,
                metric_relabel_configs: ep.metric_relabelings.iter().map(Relabel::from).collect(),
                ..Default::default()
            });
        }
        Ok(jobs)
    }

    fn pod_monitor_jobs(&self, input: &ConfigInput<'_>, pm: &PodMonitor) -> Result<Vec<ScrapeJob>, AssetError> {
        let Some(namespace) = object_namespace(&pm.metadata) else {
            return Ok(Vec::new());
        };
        let name = pm.metadata.name.as_deref().unwrap_or_default();
        let getter = input.store.for_namespace(namespace);

        let mut jobs = Vec::with_capacity(pm.spec.pod_metrics_endpoints.len());
        for (i, ep) in pm.spec.pod_metrics_endpoints.iter().enumerate() {
            let mut relabel_configs: Vec<Relabel> = pm
                .spec
                .selector
                .match_labels
                .iter()
                .flatten()
                .map(|(k, v)| Relabel::keep(&format!("__meta_kubernetes_pod_label_{}", sanitize_label(k)), v))
                .collect();
            if let Some(port) = &ep.port {
                relabel_configs.push(Relabel::keep("__meta_kubernetes_pod_container_port_name", port));
            }
            relabel_configs.push(Relabel::copy("__meta_kubernetes_namespace", "namespace"));
            relabel_configs.push(Relabel::copy("__meta_kubernetes_pod_name", "pod"));
            relabel_configs.push(Relabel::set("job", &format!("{namespace}/{name}")));
            relabel_configs.extend(ep.relabelings.iter().map(Relabel::from));
            relabel_configs.extend(shard_relabelings(input.prometheus.shards()));

            jobs.push(ScrapeJob {
                job_name: format!("podMonitor/{namespace}/{name}/{i}"),
                scrape_interval: ep.interval.clone(),
                scrape_timeout: ep.scrape_timeout.clone(),
                metrics_path: ep.path.clone(),
                scheme: ep.scheme.clone(),
                basic_auth: basic_auth(&getter, ep.basic_auth.as_ref())?,
                authorization: authorization(&getter, ep.bearer_token_secret.as_ref(), ep.authorization.as_ref())?,
                tls_config: ep.tls_config.as_ref().map(|t| safe_tls(namespace, t)),
                kubernetes_sd_configs: vec![KubernetesSd {
                    role: "pod",
                    namespaces: Some(SdNamespaces {
                        names: vec![namespace.to_string()],
                    }),
                }],
                relabel_configs,
                metric_relabel_configs: ep.metric_relabelings.iter().map(Relabel::from).collect(),
                ..Default::default()
            });
        }
        Ok(jobs)
    }

    fn probe_job(&self, input: &ConfigInput<'_>, probe: &Probe) -> Result<Option<ScrapeJob>, AssetError> {
        let Some(namespace) = object_namespace(&probe.metadata) else {
            return Ok(None);
        };
        let name = probe.metadata.name.as_deref().unwrap_or_default();
        let getter = input.store.for_namespace(namespace);
        let spec = &probe.spec;

        let static_config = spec.targets.static_config.as_ref();
        let mut relabel_configs = vec![
            Relabel::copy("__address__", "__param_target"),
            Relabel::copy("__param_target", "instance"),
            Relabel::set("__address__", &spec.prober.url),
        ];
        relabel_configs.extend(static_config.iter().flat_map(|c| c.relabelings.iter()).map(Relabel::from));
        relabel_configs.extend(shard_relabelings(input.prometheus.shards()));

        Ok(Some(ScrapeJob {
            job_name: format!("probe/{namespace}/{name}"),
            scrape_interval: spec.interval.clone(),
            scrape_timeout: spec.scrape_timeout.clone(),
            metrics_path: Some(spec.prober.path.clone().unwrap_or_else(|| "/probe".to_string())),
            scheme: spec.prober.scheme.clone(),
            params: spec
                .module
                .iter()
                .map(|m| ("module".to_string(), vec![m.clone()]))
                .collect(),
            basic_auth: basic_auth(&getter, spec.basic_auth.as_ref())?,
            authorization: authorization(&getter, spec.bearer_token_secret.as_ref(), spec.authorization.as_ref())?,
            tls_config: spec.tls_config.as_ref().map(|t| safe_tls(namespace, t)),
            static_configs: static_config
                .map(|c| StaticTargets {
                    targets: c.targets.clone(),
                    labels: c.labels.clone(),
                })
                .into_iter()
                .collect(),
            relabel_configs,
            metric_relabel_configs: spec.metric_relabelings.iter().map(Relabel::from).collect(),
            ..Default::default()
        }))
    }

    fn scrape_config_job(&self, input: &ConfigInput<'_>, sc: &ScrapeConfig) -> Result<Option<ScrapeJob>, AssetError> {
        let Some(namespace) = object_namespace(&sc.metadata) else {
            return Ok(None);
        };
        let name = sc.metadata.name.as_deref().unwrap_or_default();
        let getter = input.store.for_namespace(namespace);
        let spec = &sc.spec;

        let mut relabel_configs: Vec<Relabel> = vec![Relabel::set("job", &format!("scrapeConfig/{namespace}/{name}"))];
        relabel_configs.extend(spec.relabelings.iter().map(Relabel::from));
        relabel_configs.extend(shard_relabelings(input.prometheus.shards()));

        Ok(Some(ScrapeJob {
            job_name: format!("scrapeConfig/{namespace}/{name}"),
            scrape_interval: spec.scrape_interval.clone(),
            scrape_timeout: spec.scrape_timeout.clone(),
            metrics_path: spec.metrics_path.clone(),
            scheme: spec.scheme.clone(),
            basic_auth: basic_auth(&getter, spec.basic_auth.as_ref())?,
            authorization: authorization(&getter, None, spec.authorization.as_ref())?,
            tls_config: spec.tls_config.as_ref().map(|t| safe_tls(namespace, t)),
            static_configs: spec
                .static_configs
                .iter()
                .map(|c| StaticTargets {
                    targets: c.targets.clone(),
                    labels: c.labels.clone(),
                })
                .collect(),
            relabel_configs,
            metric_relabel_configs: spec.metric_relabelings.iter().map(Relabel::from).collect(),
            ..Default::default()
        }))
    }
}

impl ConfigGenerator for YamlConfigGenerator {
    fn generate(&self, input: &ConfigInput<'_>) -> Result<String, GenerateError> {
        let spec = &input.prometheus.spec;
        let own_namespace = input.prometheus.metadata.namespace.as_deref().unwrap_or_default();

        let mut scrape_configs = Vec::new();
        for sm in input.service_monitors.values() {
            scrape_configs.extend(self.service_monitor_jobs(input, sm)?);
        }
        for pm in input.pod_monitors.values() {
            scrape_configs.extend(self.pod_monitor_jobs(input, pm)?);
        }
        for probe in input.probes.values() {
            scrape_configs.extend(self.probe_job(input, probe)?);
        }
        for sc in input.scrape_configs.values() {
            scrape_configs.extend(self.scrape_config_job(input, sc)?);
        }

        let (remote_write, remote_read) = if own_namespace.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let getter = input.store.for_namespace(own_namespace);
            let write = spec
                .remote_write
                .iter()
                .map(|rw| {
                    Ok(RemoteEndpoint {
                        url: rw.url.clone(),
                        basic_auth: basic_auth(&getter, rw.basic_auth.as_ref())?,
                        tls_config: rw.tls_config.as_ref().map(|t| tls(own_namespace, t)),
                    })
                })
                .collect::<Result<Vec<_>, AssetError>>()?;
            let read = spec
                .remote_read
                .iter()
                .map(|rr| {
                    Ok(RemoteEndpoint {
                        url: rr.url.clone(),
                        basic_auth: basic_auth(&getter, rr.basic_auth.as_ref())?,
                        tls_config: rr.tls_config.as_ref().map(|t| tls(own_namespace, t)),
                    })
                })
                .collect::<Result<Vec<_>, AssetError>>()?;
            (write, read)
        };

        let config = PrometheusConfig {
            global: GlobalConfig {
                scrape_interval: spec
                    .scrape_interval
                    .clone()
                    .unwrap_or_else(|| crate::selector::validation::DEFAULT_SCRAPE_INTERVAL.to_string()),
                scrape_timeout: spec.scrape_timeout.clone(),
                evaluation_interval: spec
                    .evaluation_interval
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EVALUATION_INTERVAL.to_string()),
                external_labels: spec.external_labels.clone(),
            },
            rule_files: input
                .rule_config_maps
                .iter()
                .map(|cm| format!("{RULES_DIR}/{cm}/*.yaml"))
                .collect(),
            scrape_configs,
            remote_write,
            remote_read,
        };
        Ok(serde_yaml::to_string(&config)?)
    }
}
