//! Probe CRD
//!
//! Describes black-box probing of static targets through a prober such as
//! the blackbox exporter.

use crate::auth::{BasicAuth, OAuth2, SafeAuthorization, SafeTlsConfig};
use crate::references::SecretKeySelector;
use crate::relabel::RelabelConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "Probe",
    shortname = "prb",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSpec {
    /// Job name assigned to scraped metrics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    /// Prober used for the checks
    #[serde(default)]
    pub prober: ProberSpec,

    /// Prober module
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,

    /// Targets to probe
    #[serde(default)]
    pub targets: ProbeTargets,

    /// Probe interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Probe timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    /// TLS settings for the prober
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<SafeTlsConfig>,

    /// Bearer token read from a Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_secret: Option<SecretKeySelector>,

    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// OAuth2 authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2>,

    /// Authorization header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<SafeAuthorization>,

    /// Sample relabeling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_relabelings: Vec<RelabelConfig>,
}

/// Prober endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProberSpec {
    /// `host:port` of the prober, without scheme
    #[serde(default)]
    pub url: String,

    /// HTTP scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// Probe path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Probe targets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProbeTargets {
    /// Static targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_config: Option<ProbeTargetStaticConfig>,
}

/// Static probe targets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProbeTargetStaticConfig {
    /// Target addresses
    #[serde(default, rename = "static")]
    pub targets: Vec<String>,

    /// Labels attached to every target
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Target relabeling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabelings: Vec<RelabelConfig>,
}
