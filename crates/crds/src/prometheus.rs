//! Prometheus CRD
//!
//! Declares a fleet of Prometheus servers: how many shards and replicas to
//! run, which monitors and rules to select, and where to send data.

use crate::auth::{Authorization, AzureAd, BasicAuth, OAuth2, SafeAuthorization, Sigv4, TlsConfig};
use crate::references::{LabelSelector, SecretKeySelector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "Prometheus",
    plural = "prometheuses",
    shortname = "prom",
    namespaced,
    status = "PrometheusStatus",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Paused","type":"boolean","jsonPath":".status.paused"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    /// Stop reconciling this object when true
    #[serde(default)]
    pub paused: bool,

    /// Container image, overrides the operator default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Prometheus version, used for feature gating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Replicas per shard (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Number of shards (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<i32>,

    /// Labels and annotations propagated to the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_metadata: Option<EmbeddedObjectMetadata>,

    /// ServiceMonitors to select
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_selector: Option<LabelSelector>,

    /// Namespaces to look for ServiceMonitors in (own namespace when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_namespace_selector: Option<LabelSelector>,

    /// PodMonitors to select
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_monitor_selector: Option<LabelSelector>,

    /// Namespaces to look for PodMonitors in (own namespace when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_monitor_namespace_selector: Option<LabelSelector>,

    /// Probes to select
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_selector: Option<LabelSelector>,

    /// Namespaces to look for Probes in (own namespace when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_namespace_selector: Option<LabelSelector>,

    /// ScrapeConfigs to select
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_config_selector: Option<LabelSelector>,

    /// Namespaces to look for ScrapeConfigs in (own namespace when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_config_namespace_selector: Option<LabelSelector>,

    /// PrometheusRules to select
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_selector: Option<LabelSelector>,

    /// Namespaces to look for PrometheusRules in (own namespace when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_namespace_selector: Option<LabelSelector>,

    /// Default scrape interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_interval: Option<String>,

    /// Default scrape timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    /// Rule evaluation interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_interval: Option<String>,

    /// Labels attached to every series and alert
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,

    /// How long to retain samples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,

    /// Log level of the Prometheus container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Service account the pods run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Node selector for the pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Web server settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<PrometheusWebSpec>,

    /// Restrictions on file system access from ServiceMonitors
    #[serde(default, rename = "arbitraryFSAccessThroughSMs")]
    pub arbitrary_fs_access_through_sms: ArbitraryFsAccessThroughSms,

    /// Remote write endpoints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_write: Vec<RemoteWriteSpec>,

    /// Remote read endpoints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_read: Vec<RemoteReadSpec>,

    /// Alertmanager endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alerting: Option<AlertingSpec>,

    /// Kubernetes API server access for service discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_config: Option<ApiServerConfig>,

    /// Extra scrape configs appended verbatim to the generated configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_scrape_configs: Option<SecretKeySelector>,

    /// Storage of the TSDB, an emptyDir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
}

impl Prometheus {
    /// Replicas per shard, defaulting to 1.
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    /// Effective shard count. Unset or values below 2 mean a single shard.
    pub fn shards(&self) -> i32 {
        match self.spec.shards {
            Some(n) if n > 1 => n,
            _ => 1,
        }
    }

    /// The HTTP/2 toggle of the web server, if set.
    pub fn web_http2(&self) -> Option<bool> {
        self.spec
            .web
            .as_ref()
            .and_then(|w| w.http_config.as_ref())
            .and_then(|h| h.http2)
    }
}

/// Subset of object metadata that can be set on generated pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedObjectMetadata {
    /// Pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// TSDB storage. A claim template takes precedence over an emptyDir.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Size limit of the emptyDir volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir_size_limit: Option<String>,

    /// PersistentVolumeClaim template for each pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<VolumeClaimTemplate>,
}

/// Subset of a PersistentVolumeClaim used as a StatefulSet claim template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VolumeClaimTemplate {
    /// Claim name, defaults to `prometheus-<name>-db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Storage class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Access modes, ReadWriteOnce when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    /// Requested size, e.g. `50Gi`
    pub storage: String,
}

/// Web server settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusWebSpec {
    /// HTTP server settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_config: Option<WebHttpConfig>,

    /// Page title of the web UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebHttpConfig {
    /// Enable HTTP/2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http2: Option<bool>,
}

/// Controls whether ServiceMonitors may read files from the Prometheus container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArbitraryFsAccessThroughSms {
    /// Reject ServiceMonitors that reference files
    #[serde(default)]
    pub deny: bool,
}

/// Remote write endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWriteSpec {
    /// Endpoint URL
    pub url: String,

    /// Endpoint name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// OAuth2 authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2>,

    /// Authorization header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,

    /// AWS SigV4 signing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigv4: Option<Sigv4>,

    /// Azure AD authentication
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "azureAd")]
    pub azure_ad: Option<AzureAd>,

    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

impl RemoteWriteSpec {
    /// At most one authentication mechanism may be configured.
    pub fn validate(&self) -> Result<(), String> {
        let configured = [
            self.basic_auth.is_some(),
            self.oauth2.is_some(),
            self.authorization.is_some(),
            self.sigv4.is_some(),
            self.azure_ad.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        if configured > 1 {
            return Err("at most one of basicAuth, oauth2, authorization, sigv4 and azureAd can be configured".to_string());
        }
        Ok(())
    }
}

/// Remote read endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReadSpec {
    /// Endpoint URL
    pub url: String,

    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// OAuth2 authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2>,

    /// Authorization header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,

    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

/// Alerting settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertingSpec {
    /// Alertmanager endpoints
    #[serde(default)]
    pub alertmanagers: Vec<AlertmanagerEndpoints>,
}

/// A set of Alertmanagers behind a Service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerEndpoints {
    /// Namespace of the Service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the Service
    pub name: String,

    /// Port name
    pub port: String,

    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// Authorization header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<SafeAuthorization>,

    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

/// API server access settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    /// API server host
    pub host: String,

    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// Authorization header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,

    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusStatus {
    /// Mirrors `spec.paused`
    #[serde(default)]
    pub paused: bool,

    /// Pods targeted by the StatefulSets
    #[serde(default)]
    pub replicas: i32,

    /// Pods running the desired revision
    #[serde(default)]
    pub updated_replicas: i32,

    /// Ready pods
    #[serde(default)]
    pub available_replicas: i32,

    /// Pods that are not ready
    #[serde(default)]
    pub unavailable_replicas: i32,

    /// Per-shard breakdown
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shard_statuses: Vec<ShardStatus>,

    /// Latest observations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Replica counts of one shard.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShardStatus {
    /// Shard index
    #[serde(rename = "shardID")]
    pub shard_id: String,

    /// Pods targeted by the StatefulSet
    pub replicas: i32,

    /// Pods running the desired revision
    pub updated_replicas: i32,

    /// Ready pods
    pub available_replicas: i32,

    /// Pods that are not ready
    pub unavailable_replicas: i32,
}

/// Status condition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (Available, Reconciled)
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False, Unknown or Degraded
    pub status: ConditionStatus,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,

    /// Machine readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation observed when the condition was computed
    #[serde(default)]
    pub observed_generation: i64,
}

/// Condition status
///
/// Serializes as PascalCase like the core condition statuses, with the extra
/// `Degraded` state for partially available fleets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    /// Condition holds
    True,

    /// Condition does not hold
    False,

    /// Condition holds partially
    Degraded,

    /// Not determined
    #[default]
    Unknown,
}
