//! Record of the Secrets and ConfigMaps a pass looked at.

use super::key::SourceKind;
use kube::Resource;
use std::collections::HashSet;

/// Identity of a Secret or ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: SourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Key of a Secret or ConfigMap object, `None` for other kinds.
    pub fn of<K: Resource<DynamicType = ()>>(obj: &K) -> Option<Self> {
        let kind = match K::kind(&()).as_ref() {
            "Secret" => SourceKind::Secret,
            "ConfigMap" => SourceKind::ConfigMap,
            _ => return None,
        };
        let meta = obj.meta();
        Some(Self::new(
            kind,
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
        ))
    }
}

/// Objects touched during one pass, including fetches that found nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefTracker {
    refs: HashSet<ObjectKey>,
}

impl RefTracker {
    pub(crate) fn insert(&mut self, key: ObjectKey) {
        self.refs.insert(key);
    }

    /// True when the pass fetched `obj` (or tried to).
    pub fn has<K: Resource<DynamicType = ()>>(&self, obj: &K) -> bool {
        ObjectKey::of(obj).is_some_and(|key| self.refs.contains(&key))
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.refs.contains(key)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}
