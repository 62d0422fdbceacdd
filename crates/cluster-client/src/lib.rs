//! Kubernetes cluster client
//!
//! A narrow, typed view of the Kubernetes API covering exactly the objects
//! the Prometheus shard operator reads and writes. The operator only talks to
//! the cluster through [`ClusterClientTrait`], so reconciliation logic can be
//! exercised against [`MockClusterClient`] without an API server.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, KubeClusterClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let secret = client.get_secret("monitoring", "prometheus-k8s").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, Verb, WriteCall};
