//! Operator configuration.
//!
//! Read once from environment variables at startup. The hashed part of the
//! configuration feeds into every StatefulSet input hash, so a change of
//! default image rolls all shards.

use crate::error::ControllerError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;

pub const DEFAULT_PROMETHEUS_VERSION: &str = "v3.1.0";
pub const DEFAULT_PROMETHEUS_IMAGE: &str = "quay.io/prometheus/prometheus";
pub const DEFAULT_RELOADER_IMAGE: &str = "quay.io/prometheus-operator/prometheus-config-reloader:v0.79.2";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// How the Reference Manager keeps referenced Secrets fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefManagerStrategy {
    /// Serve from a shared, externally maintained cache
    #[default]
    Cache,
    /// Run one watch per referenced Secret
    Watch,
}

impl std::str::FromStr for RefManagerStrategy {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache" => Ok(RefManagerStrategy::Cache),
            "watch" => Ok(RefManagerStrategy::Watch),
            other => Err(ControllerError::InvalidConfig(format!(
                "unknown REF_MANAGER_STRATEGY {other:?}, expected \"cache\" or \"watch\""
            ))),
        }
    }
}

/// Static operator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Namespace to watch, all namespaces when unset
    #[serde(skip)]
    pub watch_namespace: Option<String>,

    /// Image used when a Prometheus does not set one, without tag
    pub prometheus_default_image: String,

    /// Version used when a Prometheus does not set one
    pub prometheus_default_version: String,

    /// Image of the init container that decompresses the configuration
    pub reloader_image: String,

    /// Labels added to every managed object
    pub labels: BTreeMap<String, String>,

    /// Reference Manager strategy
    #[serde(skip)]
    pub ref_manager_strategy: RefManagerStrategy,

    /// Address of the metrics and probes server
    #[serde(skip)]
    pub metrics_addr: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            prometheus_default_image: DEFAULT_PROMETHEUS_IMAGE.to_string(),
            prometheus_default_version: DEFAULT_PROMETHEUS_VERSION.to_string(),
            reloader_image: DEFAULT_RELOADER_IMAGE.to_string(),
            labels: BTreeMap::new(),
            ref_manager_strategy: RefManagerStrategy::Cache,
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        config.watch_namespace = get("WATCH_NAMESPACE");
        if let Some(image) = get("PROMETHEUS_DEFAULT_IMAGE") {
            config.prometheus_default_image = image;
        }
        if let Some(version) = get("PROMETHEUS_DEFAULT_VERSION") {
            config.prometheus_default_version = version;
        }
        if let Some(image) = get("PROMETHEUS_CONFIG_RELOADER_IMAGE") {
            config.reloader_image = image;
        }
        if let Some(labels) = get("OPERATOR_LABELS") {
            config.labels = parse_labels(&labels)?;
        }
        if let Some(strategy) = get("REF_MANAGER_STRATEGY") {
            config.ref_manager_strategy = strategy.parse()?;
        }
        let addr = get("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        config.metrics_addr = addr
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("invalid METRICS_ADDR {addr:?}: {e}")))?;

        Ok(config)
    }
}

/// Parse `k=v,k=v`.
fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, ControllerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(ControllerError::InvalidConfig(format!(
                "invalid label {pair:?} in OPERATOR_LABELS, expected key=value"
            ))),
        })
        .collect()
}
