//! Helper functions for common reconciliation patterns
//!
//! Create-or-update of owned objects with metadata merging and
//! conflict retries, shared by the config, TLS and StatefulSet writers.

use cluster_client::{ClusterClientTrait, ClusterError};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempts made by [`retry_on_conflict`], matching client-go's default.
pub const CONFLICT_RETRIES: usize = 5;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

/// Run `op` again while it fails with a 409 conflict, at most
/// [`CONFLICT_RETRIES`] times in total.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                debug!(attempt, error = %e, "Conflict, retrying");
                attempt += 1;
                tokio::time::sleep(CONFLICT_BACKOFF).await;
            }
            result => return result,
        }
    }
}

/// Keep labels and annotations set by others on `existing`; ours win on
/// conflicting keys. The resource version is carried over so the update
/// is checked against what was read.
pub fn merge_metadata(desired: &mut ObjectMeta, existing: &ObjectMeta) {
    for (ours, theirs) in [
        (&mut desired.labels, &existing.labels),
        (&mut desired.annotations, &existing.annotations),
    ] {
        if let Some(theirs) = theirs {
            let merged = ours.get_or_insert_with(Default::default);
            for (k, v) in theirs {
                merged.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
    desired.resource_version = existing.resource_version.clone();
    if desired.uid.is_none() {
        desired.uid = existing.uid.clone();
    }
}

fn secret_unchanged(existing: &Secret, desired: &Secret) -> bool {
    existing.data == desired.data
        && existing.type_ == desired.type_
        && existing.metadata.labels == desired.metadata.labels
        && existing.metadata.annotations == desired.metadata.annotations
        && existing.metadata.owner_references == desired.metadata.owner_references
}

/// Create `desired`, or update the existing Secret when its content or
/// metadata differ after merging.
pub async fn create_or_update_secret(client: &dyn ClusterClientTrait, desired: &Secret) -> Result<(), ClusterError> {
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    let name = desired.metadata.name.as_deref().unwrap_or_default();

    retry_on_conflict(|| async move {
        let Some(existing) = client.get_secret(namespace, name).await? else {
            client.create_secret(desired).await?;
            return Ok(());
        };

        let mut merged = desired.clone();
        merge_metadata(&mut merged.metadata, &existing.metadata);
        if secret_unchanged(&existing, &merged) {
            debug!(namespace = %namespace, name = %name, "Secret unchanged");
            return Ok(());
        }
        client.update_secret(&merged).await?;
        Ok(())
    })
    .await
}

/// Create `secret` unless one with its name already exists.
pub async fn create_secret_if_absent(client: &dyn ClusterClientTrait, secret: &Secret) -> Result<(), ClusterError> {
    match client.create_secret(secret).await {
        Err(ClusterError::AlreadyExists(_)) | Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create `service` unless it already exists.
pub async fn create_service_if_absent(client: &dyn ClusterClientTrait, service: &Service) -> Result<(), ClusterError> {
    let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
    let name = service.metadata.name.as_deref().unwrap_or_default();
    if client.get_service(namespace, name).await?.is_some() {
        return Ok(());
    }
    match client.create_service(service).await {
        Err(ClusterError::AlreadyExists(_)) | Ok(_) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;
