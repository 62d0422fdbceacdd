//! Unit tests for reconcile_helpers module

use super::*;
use crate::test_utils::*;
use cluster_client::Verb;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

#[test]
fn test_merge_metadata_keeps_foreign_keys() {
    let mut desired = ObjectMeta {
        labels: labels(&[("app", "prometheus"), ("team", "obs")]),
        ..Default::default()
    };
    let existing = ObjectMeta {
        labels: labels(&[("team", "web"), ("argocd", "tracked")]),
        annotations: labels(&[("note", "kept")]),
        resource_version: Some("7".to_string()),
        ..Default::default()
    };

    merge_metadata(&mut desired, &existing);

    assert_eq!(desired.labels, labels(&[("app", "prometheus"), ("argocd", "tracked"), ("team", "obs")]));
    assert_eq!(desired.annotations, labels(&[("note", "kept")]));
    assert_eq!(desired.resource_version.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_retry_on_conflict_gives_up_after_limit() {
    let attempts = &AtomicUsize::new(0);
    let result: Result<(), ClusterError> = retry_on_conflict(|| async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClusterError::Conflict("stale".to_string()))
    })
    .await;

    assert!(result.unwrap_err().is_conflict());
    assert_eq!(attempts.load(Ordering::SeqCst), CONFLICT_RETRIES);
}

#[tokio::test]
async fn test_retry_on_conflict_recovers() {
    let attempts = &AtomicUsize::new(0);
    let result = retry_on_conflict(|| async move {
        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(ClusterError::Conflict("stale".to_string()))
        } else {
            Ok(42)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_does_not_repeat_other_errors() {
    let attempts = &AtomicUsize::new(0);
    let result: Result<(), ClusterError> = retry_on_conflict(|| async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err(ClusterError::NotFound("gone".to_string()))
    })
    .await;

    assert!(result.unwrap_err().is_not_found());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_create_or_update_secret_skips_identical() {
    let (mock, client) = mock_client();
    let desired = create_test_secret("monitoring", "prometheus-k8s", &[("a", "1")]);

    create_or_update_secret(client.as_ref(), &desired).await.unwrap();
    create_or_update_secret(client.as_ref(), &desired).await.unwrap();
    assert_eq!(mock.count(Verb::Create, "Secret"), 1);
    assert_eq!(mock.count(Verb::Update, "Secret"), 0);

    let changed = create_test_secret("monitoring", "prometheus-k8s", &[("a", "2")]);
    create_or_update_secret(client.as_ref(), &changed).await.unwrap();
    assert_eq!(mock.count(Verb::Update, "Secret"), 1);
}

#[tokio::test]
async fn test_create_secret_if_absent_never_overwrites() {
    let (mock, client) = mock_client();
    mock.add_secret(create_test_secret("monitoring", "prometheus-k8s", &[("custom", "x")]));

    let empty = create_test_secret("monitoring", "prometheus-k8s", &[]);
    create_secret_if_absent(client.as_ref(), &empty).await.unwrap();

    let stored = mock.secret("monitoring", "prometheus-k8s").unwrap();
    assert!(stored.data.unwrap().contains_key("custom"));
    assert!(mock.calls().is_empty());
}
