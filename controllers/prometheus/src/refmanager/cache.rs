use super::{RefManagerError, Registry, SYNC_TIMEOUT, SecretRef};
use k8s_openapi::api::core::v1::Secret;
use kube_runtime::reflector::{ObjectRef, Store};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Serves Secrets from a store kept fresh by a watch running elsewhere.
///
/// Refcounts are kept for parity with [`super::WatchStrategy`] but never
/// start or stop anything. Lookups do not require registration, but they
/// wait for the store's initial list so an empty store is never read as
/// "every Secret is missing".
pub struct CacheStrategy {
    secrets: Store<Secret>,
    registry: Mutex<Registry>,
    sync_timeout: Duration,
}

impl CacheStrategy {
    pub fn new(secrets: Store<Secret>) -> Self {
        Self::with_sync_timeout(secrets, SYNC_TIMEOUT)
    }

    pub fn with_sync_timeout(secrets: Store<Secret>, sync_timeout: Duration) -> Self {
        Self {
            secrets,
            registry: Mutex::new(Registry::default()),
            sync_timeout,
        }
    }

    pub(super) async fn get_object(&self, r: &SecretRef) -> Result<Arc<Secret>, RefManagerError> {
        match tokio::time::timeout(self.sync_timeout, self.secrets.wait_until_ready()).await {
            Ok(Ok(())) => {}
            _ => return Err(RefManagerError::SyncTimeout(r.clone())),
        }

        self.secrets
            .get(&ObjectRef::new(&r.name).within(&r.namespace))
            .ok_or_else(|| RefManagerError::NotFound(r.clone()))
    }

    pub(super) fn register(&self, dependent: &str, refs: BTreeSet<SecretRef>) {
        let transitions = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(dependent, refs);
        for r in &transitions.started {
            debug!(secret = %r, dependent = %dependent, "Secret referenced");
        }
        for r in &transitions.stopped {
            debug!(secret = %r, dependent = %dependent, "Secret no longer referenced");
        }
    }

    pub(super) fn unregister(&self, dependent: &str) {
        let transitions = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(dependent);
        for r in &transitions.stopped {
            debug!(secret = %r, dependent = %dependent, "Secret no longer referenced");
        }
    }

    pub(super) fn refcount(&self, r: &SecretRef) -> usize {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).refcount(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_secret;
    use kube_runtime::reflector;
    use kube_runtime::watcher::Event;

    #[tokio::test]
    async fn test_get_object_from_shared_store() {
        let (store, mut writer) = reflector::store::<Secret>();
        writer.apply_watcher_event(&Event::Init);
        writer.apply_watcher_event(&Event::InitApply(create_test_secret("monitoring", "creds", &[("pass", "x")])));
        writer.apply_watcher_event(&Event::InitDone);
        let cache = CacheStrategy::new(store);

        let secret = cache.get_object(&SecretRef::new("monitoring", "creds")).await.unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("creds"));

        let missing = SecretRef::new("monitoring", "other");
        assert_eq!(cache.get_object(&missing).await, Err(RefManagerError::NotFound(missing)));
    }

    #[tokio::test]
    async fn test_get_object_times_out_before_initial_list() {
        let (store, mut writer) = reflector::store::<Secret>();
        let cache = CacheStrategy::with_sync_timeout(store, Duration::from_millis(20));
        let creds = SecretRef::new("monitoring", "creds");

        // Applied objects alone do not make the store ready.
        writer.apply_watcher_event(&Event::Apply(create_test_secret("monitoring", "creds", &[("pass", "x")])));
        assert_eq!(cache.get_object(&creds).await, Err(RefManagerError::SyncTimeout(creds.clone())));

        writer.apply_watcher_event(&Event::Init);
        writer.apply_watcher_event(&Event::InitApply(create_test_secret("monitoring", "creds", &[("pass", "x")])));
        writer.apply_watcher_event(&Event::InitDone);
        assert!(cache.get_object(&creds).await.is_ok());
    }

    #[test]
    fn test_refcounts_follow_registrations() {
        let (store, _writer) = reflector::store::<Secret>();
        let cache = CacheStrategy::new(store);
        let creds = SecretRef::new("monitoring", "creds");

        cache.register("monitoring/a", [creds.clone()].into());
        cache.register("monitoring/b", [creds.clone()].into());
        assert_eq!(cache.refcount(&creds), 2);

        cache.unregister("monitoring/a");
        assert_eq!(cache.refcount(&creds), 1);
    }
}
