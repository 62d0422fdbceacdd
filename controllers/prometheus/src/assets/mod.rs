//! Asset Store
//!
//! Resolves Secret and ConfigMap references found in a Prometheus and its
//! dependent resources. A [`StoreBuilder`] lives for one reconciliation pass:
//! it fetches each object at most once, validates TLS material before
//! accepting it, and records every object it touched in a [`RefTracker`].

mod key;
mod store;
pub mod tls;
mod tracker;


pub use key::{AssetKey, SourceKind};
pub use store::{StoreBuilder, StoreGetter};
pub use tracker::{ObjectKey, RefTracker};

use cluster_client::ClusterError;
use tls::TlsError;
use thiserror::Error;

/// Errors raised while resolving assets.
#[derive(Debug, Error)]
pub enum AssetError {
    /// Lookup without a namespace
    #[error("namespace must not be empty")]
    EmptyNamespace,

    /// Cluster call failed while fetching the object
    #[error("failed to get {kind} {namespace}/{name}: {source}")]
    Fetch {
        kind: SourceKind,
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    /// Referenced object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    /// Cache-only lookup of an object the pass never fetched
    #[error("{kind} {namespace}/{name} not in store")]
    NotCached {
        kind: SourceKind,
        namespace: String,
        name: String,
    },

    /// Referenced key is absent from the object
    #[error("key {key:?} in {kind} {namespace}/{name} not found")]
    MissingKey {
        kind: SourceKind,
        namespace: String,
        name: String,
        key: String,
    },

    /// PEM material failed to parse or the keypair does not match
    #[error("{context}: {source}")]
    InvalidTls {
        context: String,
        #[source]
        source: TlsError,
    },

    /// Structural validation of the referencing config failed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
