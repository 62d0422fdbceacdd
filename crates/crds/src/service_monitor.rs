//! ServiceMonitor CRD
//!
//! Describes how to scrape the endpoints behind a set of Services.

use crate::auth::{BasicAuth, OAuth2, ProxyConfig, SafeAuthorization, TlsConfig};
use crate::references::{LabelSelector, SecretKeySelector};
use crate::relabel::RelabelConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    shortname = "smon",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    /// Label used as the `job` label value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,

    /// Service labels copied onto the scraped targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_labels: Vec<String>,

    /// Endpoints to scrape
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Services to select
    #[serde(default)]
    pub selector: LabelSelector,

    /// Namespaces the Services are looked up in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,

    /// Per-scrape sample limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_limit: Option<u64>,
}

/// Namespaces to discover targets in.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    /// Select all namespaces
    #[serde(default)]
    pub any: bool,

    /// Explicit namespace names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

/// One scrapable Service port.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Service port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// HTTP path to scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// HTTP scheme
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// Scrape interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    /// Scrape timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_timeout: Option<String>,

    /// TLS settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,

    /// Bearer token read from a file in the Prometheus container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<String>,

    /// Bearer token read from a Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_secret: Option<SecretKeySelector>,

    /// Authorization header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<SafeAuthorization>,

    /// Basic authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,

    /// OAuth2 authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2>,

    /// Proxy settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_config: Option<ProxyConfig>,

    /// Target relabeling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relabelings: Vec<RelabelConfig>,

    /// Sample relabeling
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_relabelings: Vec<RelabelConfig>,
}

impl ServiceMonitor {
    /// Names of every Secret this monitor references in its own namespace.
    pub fn referenced_secrets(&self) -> std::collections::BTreeSet<String> {
        let mut names = std::collections::BTreeSet::new();
        let mut add = |sel: &SecretKeySelector| {
            if !sel.name.is_empty() {
                names.insert(sel.name.clone());
            }
        };

        for ep in &self.spec.endpoints {
            if let Some(sel) = &ep.bearer_token_secret {
                add(sel);
            }
            if let Some(ba) = &ep.basic_auth {
                add(&ba.username);
                add(&ba.password);
            }
            if let Some(auth) = ep.authorization.as_ref().and_then(|a| a.credentials.as_ref()) {
                add(auth);
            }
            if let Some(oauth2) = &ep.oauth2 {
                add(&oauth2.client_secret);
                if let Some(sel) = &oauth2.client_id.secret {
                    add(sel);
                }
            }
            if let Some(tls) = &ep.tls_config {
                if let Some(sel) = &tls.safe.ca.secret {
                    add(sel);
                }
                if let Some(sel) = &tls.safe.cert.secret {
                    add(sel);
                }
                if let Some(sel) = &tls.safe.key_secret {
                    add(sel);
                }
            }
        }
        names
    }
}
