use super::{RefManagerError, Registry, SYNC_TIMEOUT, SecretRef};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::{WatchStreamExt, watcher};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running per-Secret watch and the store it feeds.
pub struct WatchHandle {
    store: Store<Secret>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn new(store: Store<Secret>, task: JoinHandle<()>) -> Self {
        Self { store, task }
    }

    /// Consumes the handle, so a watch is stopped at most once.
    fn stop(self) {
        self.task.abort();
    }
}

pub type Starter = Box<dyn Fn(&SecretRef) -> WatchHandle + Send + Sync>;

#[derive(Default)]
struct State {
    registry: Registry,
    watches: HashMap<SecretRef, WatchHandle>,
}

/// One watch per referenced Secret.
///
/// The first reference starts the watch and the last one stops it and drops
/// its store. Registry and watch map sit behind the same lock.
pub struct WatchStrategy {
    state: Mutex<State>,
    start: Starter,
    sync_timeout: Duration,
}

impl WatchStrategy {
    pub fn new(client: kube::Client) -> Self {
        Self::with_starter(Box::new(move |r| start_secret_watch(client.clone(), r)), SYNC_TIMEOUT)
    }

    pub fn with_starter(start: Starter, sync_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            start,
            sync_timeout,
        }
    }

    pub(super) async fn get_object(&self, r: &SecretRef) -> Result<Arc<Secret>, RefManagerError> {
        let store = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state
                .watches
                .get(r)
                .map(|handle| handle.store.clone())
                .ok_or_else(|| RefManagerError::NotRegistered(r.clone()))?
        };

        match tokio::time::timeout(self.sync_timeout, store.wait_until_ready()).await {
            Ok(Ok(())) => {}
            _ => return Err(RefManagerError::SyncTimeout(r.clone())),
        }

        store
            .get(&ObjectRef::new(&r.name).within(&r.namespace))
            .ok_or_else(|| RefManagerError::NotFound(r.clone()))
    }

    pub(super) fn register(&self, dependent: &str, refs: BTreeSet<SecretRef>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let transitions = state.registry.register(dependent, refs);
        for r in transitions.started {
            let handle = (self.start)(&r);
            debug!(secret = %r, dependent = %dependent, "Started secret watch");
            state.watches.insert(r, handle);
        }
        for r in transitions.stopped {
            if let Some(handle) = state.watches.remove(&r) {
                handle.stop();
                debug!(secret = %r, dependent = %dependent, "Stopped secret watch");
            }
        }
    }

    pub(super) fn unregister(&self, dependent: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let transitions = state.registry.unregister(dependent);
        for r in transitions.stopped {
            if let Some(handle) = state.watches.remove(&r) {
                handle.stop();
                debug!(secret = %r, dependent = %dependent, "Stopped secret watch");
            }
        }
    }

    pub(super) fn refcount(&self, r: &SecretRef) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).registry.refcount(r)
    }

    /// Number of running watches.
    pub fn active_watches(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).watches.len()
    }
}

/// Watch a single Secret through a field selector.
fn start_secret_watch(client: kube::Client, r: &SecretRef) -> WatchHandle {
    let api: Api<Secret> = Api::namespaced(client, &r.namespace);
    let config = watcher::Config::default().fields(&format!("metadata.name={}", r.name));
    let (store, writer) = reflector::store();
    let secret = r.clone();

    let task = tokio::spawn(async move {
        reflector::reflector(writer, watcher(api, config))
            .default_backoff()
            .applied_objects()
            .for_each(|res| {
                if let Err(e) = res {
                    warn!(secret = %secret, error = %e, "Secret watch error");
                }
                futures::future::ready(())
            })
            .await;
    });
    WatchHandle::new(store, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_secret;
    use kube_runtime::watcher::Event;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Starter whose stores sync at once, except for Secrets named `slow`.
    fn fake_starter(started: Arc<AtomicUsize>) -> Starter {
        Box::new(move |r: &SecretRef| {
            started.fetch_add(1, Ordering::SeqCst);
            let (store, mut writer) = reflector::store::<Secret>();
            if r.name != "slow" {
                writer.apply_watcher_event(&Event::Init);
                if r.name != "missing" {
                    writer.apply_watcher_event(&Event::InitApply(create_test_secret(
                        &r.namespace,
                        &r.name,
                        &[("token", "abc")],
                    )));
                }
                writer.apply_watcher_event(&Event::InitDone);
            }
            let task = tokio::spawn(async move {
                let _writer = writer;
                std::future::pending::<()>().await;
            });
            WatchHandle::new(store, task)
        })
    }

    fn strategy() -> (WatchStrategy, Arc<AtomicUsize>) {
        let started = Arc::new(AtomicUsize::new(0));
        (
            WatchStrategy::with_starter(fake_starter(started.clone()), Duration::from_millis(50)),
            started,
        )
    }

    fn refs(names: &[&str]) -> BTreeSet<SecretRef> {
        names.iter().map(|n| SecretRef::new("monitoring", n)).collect()
    }

    #[tokio::test]
    async fn test_watch_lifecycle_follows_refcount() {
        let (watch, started) = strategy();

        watch.register("monitoring/a", refs(&["creds"]));
        watch.register("monitoring/b", refs(&["creds"]));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(watch.active_watches(), 1);

        watch.unregister("monitoring/a");
        assert_eq!(watch.active_watches(), 1);
        watch.unregister("monitoring/b");
        assert_eq!(watch.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_reregister_keeps_shared_watch() {
        let (watch, started) = strategy();
        watch.register("monitoring/a", refs(&["creds", "old"]));

        watch.register("monitoring/a", refs(&["creds", "new"]));

        // creds, old, new: creds is never restarted.
        assert_eq!(started.load(Ordering::SeqCst), 3);
        assert_eq!(watch.active_watches(), 2);
    }

    #[tokio::test]
    async fn test_get_object() {
        let (watch, _) = strategy();
        watch.register("monitoring/a", refs(&["creds", "missing", "slow"]));

        let secret = watch.get_object(&SecretRef::new("monitoring", "creds")).await.unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("creds"));

        let missing = SecretRef::new("monitoring", "missing");
        assert_eq!(watch.get_object(&missing).await, Err(RefManagerError::NotFound(missing)));

        let slow = SecretRef::new("monitoring", "slow");
        assert_eq!(watch.get_object(&slow).await, Err(RefManagerError::SyncTimeout(slow)));

        let other = SecretRef::new("monitoring", "other");
        assert_eq!(watch.get_object(&other).await, Err(RefManagerError::NotRegistered(other)));
    }
}
