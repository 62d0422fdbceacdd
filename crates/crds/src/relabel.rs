//! Relabeling rules as embedded in monitors and scrape configs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One relabeling step applied to a target's label set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RelabelConfig {
    /// Source labels whose values are concatenated
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,

    /// Separator placed between concatenated source label values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,

    /// Label receiving the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,

    /// Regular expression matched against the extracted value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,

    /// Modulus taken of the hash of the source label values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulus: Option<u64>,

    /// Replacement value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,

    /// Action to perform, defaults to `replace`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}
