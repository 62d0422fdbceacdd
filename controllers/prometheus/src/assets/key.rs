//! Identity of a referenced credential fragment.

use crds::{ConfigMapKeySelector, SecretKeySelector, SecretOrConfigMap};
use std::fmt;

/// Kind of object an asset is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Secret,
    ConfigMap,
}

impl SourceKind {
    /// Lowercase token used in encoded keys.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Secret => "secret",
            SourceKind::ConfigMap => "configmap",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Secret => f.write_str("Secret"),
            SourceKind::ConfigMap => f.write_str("ConfigMap"),
        }
    }
}

/// One key of one Secret or ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey {
    pub kind: SourceKind,
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl AssetKey {
    pub fn secret(namespace: &str, sel: &SecretKeySelector) -> Self {
        Self {
            kind: SourceKind::Secret,
            namespace: namespace.to_string(),
            name: sel.name.clone(),
            key: sel.key.clone(),
        }
    }

    pub fn config_map(namespace: &str, sel: &ConfigMapKeySelector) -> Self {
        Self {
            kind: SourceKind::ConfigMap,
            namespace: namespace.to_string(),
            name: sel.name.clone(),
            key: sel.key.clone(),
        }
    }

    /// Key of whichever source is set, `None` when neither is.
    pub fn from_source(namespace: &str, source: &SecretOrConfigMap) -> Option<Self> {
        match (&source.secret, &source.config_map) {
            (Some(sel), _) => Some(Self::secret(namespace, sel)),
            (None, Some(sel)) => Some(Self::config_map(namespace, sel)),
            (None, None) => None,
        }
    }

    /// Stable string form, usable as a Secret data key.
    ///
    /// Every variable component is prefixed with its byte length, so no
    /// choice of namespace, name or key can make two tuples encode alike:
    /// `secret_10_monitoring_3_tls_7_tls.crt`.
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}_{}_{}",
            self.kind.as_str(),
            self.namespace.len(),
            self.namespace,
            self.name.len(),
            self.name,
            self.key.len(),
            self.key
        )
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: SourceKind, ns: &str, name: &str, k: &str) -> AssetKey {
        AssetKey {
            kind,
            namespace: ns.to_string(),
            name: name.to_string(),
            key: k.to_string(),
        }
    }

    #[test]
    fn test_encode_format() {
        let k = key(SourceKind::Secret, "monitoring", "tls", "tls.crt");
        assert_eq!(k.encode(), "secret_10_monitoring_3_tls_7_tls.crt");
        let k = key(SourceKind::ConfigMap, "ns", "ca", "ca.crt");
        assert_eq!(k.encode(), "configmap_2_ns_2_ca_6_ca.crt");
    }

    #[test]
    fn test_encode_is_injective_across_delimiters() {
        // each pair joins to the same string with a plain "_" delimiter
        let pairs = [
            (
                key(SourceKind::Secret, "a_b", "c", "d"),
                key(SourceKind::Secret, "a", "b_c", "d"),
            ),
            (
                key(SourceKind::Secret, "ns", "name_key", "x"),
                key(SourceKind::Secret, "ns", "name", "key_x"),
            ),
            (
                key(SourceKind::Secret, "1", "2", "3_4"),
                key(SourceKind::Secret, "1_2", "3", "4"),
            ),
        ];
        for (left, right) in pairs {
            assert_ne!(left, right);
            assert_ne!(left.encode(), right.encode(), "{left:?} and {right:?} collide");
        }
    }

    #[test]
    fn test_encode_distinguishes_kind() {
        let s = key(SourceKind::Secret, "ns", "n", "k");
        let c = key(SourceKind::ConfigMap, "ns", "n", "k");
        assert_ne!(s.encode(), c.encode());
    }

    #[test]
    fn test_from_source() {
        let from_secret = AssetKey::from_source("ns", &SecretOrConfigMap::from_secret("s", "k"));
        assert_eq!(from_secret.map(|k| k.kind), Some(SourceKind::Secret));
        let from_cm = AssetKey::from_source("ns", &SecretOrConfigMap::from_config_map("c", "k"));
        assert_eq!(from_cm.map(|k| k.kind), Some(SourceKind::ConfigMap));
        assert!(AssetKey::from_source("ns", &SecretOrConfigMap::default()).is_none());
    }
}
