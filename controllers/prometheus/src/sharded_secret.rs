//! Secret data split across numbered Secrets.
//!
//! A single Secret is capped at 1 MiB. TLS assets of a large fleet can
//! exceed that, so entries are spread over `<template>-0`, `<template>-1`
//! and so on, and mounted together through one projected volume.

use crate::reconcile_helpers::create_or_update_secret;
use cluster_client::{ClusterClientTrait, ClusterError};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ProjectedVolumeSource, Secret, SecretProjection, Volume, VolumeProjection};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Data bytes per shard, leaving room for metadata under the 1 MiB limit.
pub const MAX_SECRET_DATA_SIZE: usize = 1_048_576 - 50_000;

#[derive(Debug, Error)]
pub enum ShardedSecretError {
    /// Template without namespace or name
    #[error("sharded secret template must have a namespace and a name")]
    InvalidTemplate,

    /// Writing a shard failed
    #[error("failed to write secret shard {name:?}: {source}")]
    Write {
        name: String,
        #[source]
        source: ClusterError,
    },

    /// Removing an excess shard failed
    #[error("failed to delete excess secret shard {name:?}: {source}")]
    Cleanup {
        name: String,
        #[source]
        source: ClusterError,
    },
}

/// Data written across numbered Secrets derived from one template.
#[derive(Debug, Clone)]
pub struct ShardedSecret {
    template: Secret,
    data: BTreeMap<String, Vec<u8>>,
    shards: usize,
}

impl ShardedSecret {
    fn name(&self) -> &str {
        self.template.metadata.name.as_deref().unwrap_or_default()
    }

    fn shard_name(&self, index: usize) -> String {
        format!("{}-{index}", self.name())
    }

    /// Write `data` across as many shards as needed and delete shards left
    /// over from a larger previous run.
    pub async fn reconcile(
        client: &dyn ClusterClientTrait,
        template: Secret,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<Self, ShardedSecretError> {
        let namespace = match (&template.metadata.namespace, &template.metadata.name) {
            (Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => ns.clone(),
            _ => return Err(ShardedSecretError::InvalidTemplate),
        };

        let mut sharded = Self {
            template,
            data,
            shards: 0,
        };
        let secrets = sharded.shard();
        sharded.shards = secrets.len();

        for secret in &secrets {
            create_or_update_secret(client, secret)
                .await
                .map_err(|source| ShardedSecretError::Write {
                    name: secret.metadata.name.clone().unwrap_or_default(),
                    source,
                })?;
        }

        for index in sharded.shards.. {
            let name = sharded.shard_name(index);
            match client.delete_secret(&namespace, &name).await {
                Ok(()) => debug!(namespace = %namespace, name = %name, "Deleted excess secret shard"),
                Err(e) if e.is_not_found() => break,
                Err(source) => return Err(ShardedSecretError::Cleanup { name, source }),
            }
        }

        Ok(sharded)
    }

    /// Split the data in key order, an entry weighing `len(key) + len(value)`.
    fn shard(&self) -> Vec<Secret> {
        let mut shards = vec![self.new_shard(0)];
        let mut size = 0;

        for (key, value) in &self.data {
            let entry = key.len() + value.len();
            if size + entry > MAX_SECRET_DATA_SIZE {
                shards.push(self.new_shard(shards.len()));
                size = 0;
            }
            size += entry;
            if let Some(data) = shards.last_mut().and_then(|s| s.data.as_mut()) {
                data.insert(key.clone(), ByteString(value.clone()));
            }
        }
        shards
    }

    fn new_shard(&self, index: usize) -> Secret {
        let mut secret = self.template.clone();
        secret.metadata.name = Some(self.shard_name(index));
        secret.data = Some(BTreeMap::new());
        secret.string_data = None;
        secret
    }

    /// Names of the shards written by the last reconcile.
    pub fn shard_names(&self) -> Vec<String> {
        (0..self.shards).map(|i| self.shard_name(i)).collect()
    }

    /// Projected volume mounting every shard.
    pub fn volume(&self, name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(
                    self.shard_names()
                        .into_iter()
                        .map(|shard| VolumeProjection {
                            secret: Some(SecretProjection {
                                name: shard,
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Hex sha256 over the sorted entries, so a content change rolls the pods.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.data {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value);
        }
        format!("{:x}", hasher.finalize())
    }
}
