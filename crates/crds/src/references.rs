//! Kubernetes object references used by monitoring CRDs
//!
//! Key selectors point at a single key inside a Secret or ConfigMap living in
//! the same namespace as the referencing resource. Label selectors follow the
//! `metav1.LabelSelector` shape and convert into the k8s-openapi type for
//! matching and list calls.

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Selects a key of a Secret in the referencing resource's namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the Secret
    #[serde(default)]
    pub name: String,

    /// Key within the Secret data
    pub key: String,

    /// Whether the Secret or its key must be defined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl SecretKeySelector {
    /// Create a selector for `name`/`key`.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            optional: None,
        }
    }
}

/// Selects a key of a ConfigMap in the referencing resource's namespace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapKeySelector {
    /// Name of the ConfigMap
    #[serde(default)]
    pub name: String,

    /// Key within the ConfigMap data
    pub key: String,

    /// Whether the ConfigMap or its key must be defined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl ConfigMapKeySelector {
    /// Create a selector for `name`/`key`.
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            optional: None,
        }
    }
}

/// Data sourced from either a Secret or a ConfigMap key.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretOrConfigMap {
    /// Secret containing the data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeySelector>,

    /// ConfigMap containing the data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapKeySelector>,
}

impl SecretOrConfigMap {
    /// Reference a Secret key.
    pub fn from_secret(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret: Some(SecretKeySelector::new(name, key)),
            config_map: None,
        }
    }

    /// Reference a ConfigMap key.
    pub fn from_config_map(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            secret: None,
            config_map: Some(ConfigMapKeySelector::new(name, key)),
        }
    }

    /// True when neither source is set.
    pub fn is_empty(&self) -> bool {
        self.secret.is_none() && self.config_map.is_none()
    }

    /// Secret and ConfigMap are mutually exclusive.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_some() && self.config_map.is_some() {
            return Err("cannot specify both Secret and ConfigMap".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for SecretOrConfigMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.secret, &self.config_map) {
            (Some(s), _) => write!(f, "<secret={},key={}>", s.name, s.key),
            (None, Some(c)) => write!(f, "<configmap={},key={}>", c.name, c.key),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

/// Label selector requirement (`key operator values`).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key the selector applies to
    pub key: String,

    /// One of In, NotIn, Exists, DoesNotExist
    pub operator: String,

    /// Values for In/NotIn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// Label query over a set of resources.
///
/// An empty selector matches everything. Absence of a selector (a `None`
/// field on the owning spec) has kind-specific meaning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

impl LabelSelector {
    /// Selector matching exactly the given labels.
    pub fn from_labels<I, K, V>(labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            match_labels: Some(labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            match_expressions: None,
        }
    }
}

impl From<&LabelSelector> for metav1::LabelSelector {
    fn from(sel: &LabelSelector) -> Self {
        metav1::LabelSelector {
            match_labels: sel.match_labels.clone(),
            match_expressions: sel.match_expressions.as_ref().map(|exprs| {
                exprs
                    .iter()
                    .map(|e| metav1::LabelSelectorRequirement {
                        key: e.key.clone(),
                        operator: e.operator.clone(),
                        values: e.values.clone(),
                    })
                    .collect()
            }),
        }
    }
}
