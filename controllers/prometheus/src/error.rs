//! Controller-specific error types.
//!
//! Each engine module owns its error enum. `ControllerError` is what a
//! reconciliation pass returns to the controller runtime.

use crate::assets::AssetError;
use crate::config_generator::GenerateError;
use crate::rules::PackError;
use crate::selector::SelectorError;
use crate::sharded_secret::ShardedSecretError;
use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Prometheus Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster API call failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Credential or TLS asset could not be resolved
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Rule files could not be packed into ConfigMaps
    #[error("Rule packing failed: {0}")]
    Pack(#[from] PackError),

    /// Dependent resources could not be selected
    #[error("Selection failed: {0}")]
    Selector(#[from] SelectorError),

    /// Sharded Secret could not be written
    #[error("Sharded secret error: {0}")]
    ShardedSecret(#[from] ShardedSecretError),

    /// Configuration generation failed
    #[error("Config generation failed: {0}")]
    Generate(#[from] GenerateError),

    /// Hash input could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry setup failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Server socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
