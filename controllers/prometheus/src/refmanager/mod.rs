//! Reference Manager.
//!
//! Keeps the Secrets referenced by registered ServiceMonitors available to
//! the engine. Each referenced Secret is refcounted across dependents. Two
//! strategies share those semantics:
//!
//! - [`CacheStrategy`] serves from a Secret store maintained elsewhere.
//! - [`WatchStrategy`] runs one watch per referenced Secret, started on the
//!   first reference and stopped on the last.
//!
//! The strategy is picked once at construction ([`RefManager::new`]).

mod cache;
mod watch;

pub use cache::CacheStrategy;
pub use watch::{WatchHandle, WatchStrategy};

use crate::config::RefManagerStrategy;
use crate::selector::object_key;
use crds::ServiceMonitor;
use k8s_openapi::api::core::v1::Secret;
use kube_runtime::reflector::Store;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long `get_object` waits for a store's initial list.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RefManagerError {
    /// No registered dependent references the object
    #[error("secret {0} is not referenced by any registered dependent")]
    NotRegistered(SecretRef),

    /// The object's watch did not complete its initial sync in time
    #[error("timed out waiting for the watch of secret {0} to sync")]
    SyncTimeout(SecretRef),

    #[error("secret {0} not found")]
    NotFound(SecretRef),
}

/// Namespace and name of a referenced Secret.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl SecretRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Every Secret a ServiceMonitor mentions, in its own namespace.
pub fn referenced_secrets(sm: &ServiceMonitor) -> BTreeSet<SecretRef> {
    match sm.metadata.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        Some(namespace) => sm
            .referenced_secrets()
            .iter()
            .map(|name| SecretRef::new(namespace, name))
            .collect(),
        None => BTreeSet::new(),
    }
}

/// Refcounts of referenced objects, keyed by dependent.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    dependents: HashMap<String, BTreeSet<SecretRef>>,
    refcounts: HashMap<SecretRef, usize>,
}

/// Objects whose refcount crossed zero during one registry update.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Transitions {
    pub started: Vec<SecretRef>,
    pub stopped: Vec<SecretRef>,
}

impl Registry {
    /// Replace the reference set of `dependent` with `refs`.
    ///
    /// Only the set difference is applied: objects in both the old and the
    /// new set keep their count untouched.
    pub fn register(&mut self, dependent: &str, refs: BTreeSet<SecretRef>) -> Transitions {
        let old = self.dependents.remove(dependent).unwrap_or_default();
        let mut transitions = Transitions::default();

        for added in refs.difference(&old) {
            let count = self.refcounts.entry(added.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                transitions.started.push(added.clone());
            }
        }
        for removed in old.difference(&refs) {
            if self.release(removed) {
                transitions.stopped.push(removed.clone());
            }
        }

        if !refs.is_empty() {
            self.dependents.insert(dependent.to_string(), refs);
        }
        transitions
    }

    pub fn unregister(&mut self, dependent: &str) -> Transitions {
        let old = self.dependents.remove(dependent).unwrap_or_default();
        Transitions {
            started: Vec::new(),
            stopped: old.iter().filter(|r| self.release(r)).cloned().collect(),
        }
    }

    pub fn refcount(&self, r: &SecretRef) -> usize {
        self.refcounts.get(r).copied().unwrap_or(0)
    }

    /// Returns true when the count dropped to zero.
    fn release(&mut self, r: &SecretRef) -> bool {
        match self.refcounts.get_mut(r) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.refcounts.remove(r);
                true
            }
            None => false,
        }
    }
}

/// Reference Manager with its strategy fixed at construction.
pub enum RefManager {
    Cache(CacheStrategy),
    Watch(WatchStrategy),
}

impl RefManager {
    /// `secrets` backs the cache strategy and is ignored by the watch strategy.
    pub fn new(strategy: RefManagerStrategy, client: kube::Client, secrets: Store<Secret>) -> Self {
        match strategy {
            RefManagerStrategy::Cache => RefManager::Cache(CacheStrategy::new(secrets)),
            RefManagerStrategy::Watch => RefManager::Watch(WatchStrategy::new(client)),
        }
    }

    pub async fn get_object(&self, namespace: &str, name: &str) -> Result<Arc<Secret>, RefManagerError> {
        let r = SecretRef::new(namespace, name);
        match self {
            RefManager::Cache(cache) => cache.get_object(&r).await,
            RefManager::Watch(watch) => watch.get_object(&r).await,
        }
    }

    /// Register or re-register a ServiceMonitor.
    pub fn register_dependent(&self, sm: &ServiceMonitor) {
        let Some(key) = object_key(sm) else {
            return;
        };
        let refs = referenced_secrets(sm);
        match self {
            RefManager::Cache(cache) => cache.register(&key, refs),
            RefManager::Watch(watch) => watch.register(&key, refs),
        }
    }

    pub fn unregister_dependent(&self, sm: &ServiceMonitor) {
        let Some(key) = object_key(sm) else {
            return;
        };
        match self {
            RefManager::Cache(cache) => cache.unregister(&key),
            RefManager::Watch(watch) => watch.unregister(&key),
        }
    }

    /// True when a registered dependent references the Secret.
    pub fn is_referenced(&self, namespace: &str, name: &str) -> bool {
        let r = SecretRef::new(namespace, name);
        match self {
            RefManager::Cache(cache) => cache.refcount(&r) > 0,
            RefManager::Watch(watch) => watch.refcount(&r) > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_service_monitor;
    use crds::{BasicAuth, SafeTlsConfig, SecretKeySelector, SecretOrConfigMap, TlsConfig};

    fn refs(names: &[&str]) -> BTreeSet<SecretRef> {
        names.iter().map(|n| SecretRef::new("monitoring", n)).collect()
    }

    #[test]
    fn test_register_counts_each_reference() {
        let mut registry = Registry::default();
        let t = registry.register("monitoring/a", refs(&["creds", "tls"]));
        assert_eq!(t.started, vec![SecretRef::new("monitoring", "creds"), SecretRef::new("monitoring", "tls")]);

        let t = registry.register("monitoring/b", refs(&["creds"]));
        assert!(t.started.is_empty());
        assert_eq!(registry.refcount(&SecretRef::new("monitoring", "creds")), 2);
    }

    #[test]
    fn test_reregister_applies_set_difference() {
        let mut registry = Registry::default();
        registry.register("monitoring/a", refs(&["creds", "old"]));

        let t = registry.register("monitoring/a", refs(&["creds", "new"]));

        assert_eq!(t.started, vec![SecretRef::new("monitoring", "new")]);
        assert_eq!(t.stopped, vec![SecretRef::new("monitoring", "old")]);
        // Shared reference never dropped to zero.
        assert_eq!(registry.refcount(&SecretRef::new("monitoring", "creds")), 1);
    }

    #[test]
    fn test_unregister_releases_last_reference_only() {
        let mut registry = Registry::default();
        registry.register("monitoring/a", refs(&["creds"]));
        registry.register("monitoring/b", refs(&["creds"]));

        assert!(registry.unregister("monitoring/a").stopped.is_empty());
        assert_eq!(registry.unregister("monitoring/b").stopped, vec![SecretRef::new("monitoring", "creds")]);
        assert_eq!(registry.refcount(&SecretRef::new("monitoring", "creds")), 0);
        assert_eq!(registry.unregister("monitoring/b"), Transitions::default());
    }

    #[test]
    fn test_referenced_secrets() {
        let mut sm = create_test_service_monitor("monitoring", "api", &[("team", "obs")]);
        let ep = &mut sm.spec.endpoints[0];
        ep.basic_auth = Some(BasicAuth {
            username: SecretKeySelector::new("creds", "user"),
            password: SecretKeySelector::new("creds", "pass"),
        });
        ep.tls_config = Some(TlsConfig {
            safe: SafeTlsConfig {
                ca: SecretOrConfigMap::from_config_map("ca", "ca.crt"),
                key_secret: Some(SecretKeySelector::new("tls", "tls.key")),
                ..Default::default()
            },
            ..Default::default()
        });

        assert_eq!(referenced_secrets(&sm), refs(&["creds", "tls"]));
    }
}
