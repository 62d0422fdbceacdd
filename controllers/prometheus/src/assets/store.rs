use super::key::{AssetKey, SourceKind};
use super::tls::{self, TlsError};
use super::tracker::{ObjectKey, RefTracker};
use super::AssetError;
use crate::refmanager::{RefManager, RefManagerError};
use cluster_client::{ClusterClientTrait, ClusterError};
use crds::{
    Authorization, AzureOAuth, BasicAuth, ConfigMapKeySelector, OAuth2, ProxyConfig, SafeAuthorization,
    SafeTlsConfig, SecretKeySelector, SecretOrConfigMap, Sigv4, TlsConfig,
};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

type ObjectCache<K> = HashMap<(String, String), Option<K>>;

/// Pass-scoped asset resolver.
///
/// Objects are fetched lazily and cached for the rest of the pass, misses
/// included. Not meant to be shared between tasks.
pub struct StoreBuilder {
    client: Arc<dyn ClusterClientTrait>,
    secrets: ObjectCache<Secret>,
    config_maps: ObjectCache<ConfigMap>,
    tls_keys: BTreeSet<AssetKey>,
    tracker: RefTracker,
    ref_manager: Option<Arc<RefManager>>,
}

impl StoreBuilder {
    pub fn new(client: Arc<dyn ClusterClientTrait>) -> Self {
        Self {
            client,
            secrets: HashMap::new(),
            config_maps: HashMap::new(),
            tls_keys: BTreeSet::new(),
            tracker: RefTracker::default(),
            ref_manager: None,
        }
    }

    /// Serve Secrets referenced by registered ServiceMonitors from `ref_manager`.
    pub fn with_ref_manager(mut self, ref_manager: Arc<RefManager>) -> Self {
        self.ref_manager = Some(ref_manager);
        self
    }

    /// Objects fetched so far.
    pub fn ref_tracker(&self) -> &RefTracker {
        &self.tracker
    }

    /// Cache-only view over `namespace`.
    ///
    /// # Panics
    ///
    /// Panics when `namespace` is empty.
    pub fn for_namespace(&self, namespace: &str) -> StoreGetter<'_> {
        assert!(!namespace.is_empty(), "StoreBuilder::for_namespace called with an empty namespace");
        StoreGetter {
            store: self,
            namespace: namespace.to_string(),
        }
    }

    pub async fn get_secret_key(&mut self, namespace: &str, sel: &SecretKeySelector) -> Result<Vec<u8>, AssetError> {
        let secret = self.fetch_secret(namespace, &sel.name).await?;
        secret_value(secret, namespace, sel)
    }

    pub async fn get_config_map_key(
        &mut self,
        namespace: &str,
        sel: &ConfigMapKeySelector,
    ) -> Result<Vec<u8>, AssetError> {
        let config_map = self.fetch_config_map(namespace, &sel.name).await?;
        config_map_value(config_map, namespace, sel)
    }

    /// Value of whichever source is set, empty when neither is.
    pub async fn get_key(&mut self, namespace: &str, source: &SecretOrConfigMap) -> Result<Vec<u8>, AssetError> {
        match (&source.secret, &source.config_map) {
            (Some(sel), _) => self.get_secret_key(namespace, sel).await,
            (None, Some(sel)) => self.get_config_map_key(namespace, sel).await,
            (None, None) => Ok(Vec::new()),
        }
    }

    async fn fetch_secret(&mut self, namespace: &str, name: &str) -> Result<&Secret, AssetError> {
        if namespace.is_empty() {
            return Err(AssetError::EmptyNamespace);
        }
        let id = (namespace.to_string(), name.to_string());
        if !self.secrets.contains_key(&id) {
            self.tracker.insert(ObjectKey::new(SourceKind::Secret, namespace, name));
            debug!(namespace = %namespace, name = %name, "Fetching secret");
            let secret = self
                .read_secret(namespace, name)
                .await
                .map_err(|source| AssetError::Fetch {
                    kind: SourceKind::Secret,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?;
            self.secrets.insert(id.clone(), secret);
        }
        self.secrets
            .get(&id)
            .and_then(Option::as_ref)
            .ok_or_else(|| AssetError::NotFound {
                kind: SourceKind::Secret,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn read_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        if let Some(rm) = self.ref_manager.as_ref().filter(|rm| rm.is_referenced(namespace, name)) {
            match rm.get_object(namespace, name).await {
                Ok(secret) => return Ok(Some(Secret::clone(&secret))),
                Err(RefManagerError::NotFound(_)) => return Ok(None),
                Err(e) => debug!(error = %e, "Falling back to the API for secret"),
            }
        }
        self.client.get_secret(namespace, name).await
    }

    async fn fetch_config_map(&mut self, namespace: &str, name: &str) -> Result<&ConfigMap, AssetError> {
        if namespace.is_empty() {
            return Err(AssetError::EmptyNamespace);
        }
        let id = (namespace.to_string(), name.to_string());
        if !self.config_maps.contains_key(&id) {
            self.tracker.insert(ObjectKey::new(SourceKind::ConfigMap, namespace, name));
            debug!(namespace = %namespace, name = %name, "Fetching configmap");
            let config_map = self
                .client
                .get_config_map(namespace, name)
                .await
                .map_err(|source| AssetError::Fetch {
                    kind: SourceKind::ConfigMap,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?;
            self.config_maps.insert(id.clone(), config_map);
        }
        self.config_maps
            .get(&id)
            .and_then(Option::as_ref)
            .ok_or_else(|| AssetError::NotFound {
                kind: SourceKind::ConfigMap,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    /// Validate and retain the TLS material of a Secret/ConfigMap-only config.
    pub async fn add_safe_tls_config(&mut self, namespace: &str, config: Option<&SafeTlsConfig>) -> Result<(), AssetError> {
        let Some(config) = config else {
            return Ok(());
        };
        config
            .validate()
            .map_err(|e| AssetError::InvalidConfig(format!("failed to validate TLS configuration: {e}")))?;
        self.add_tls_material(namespace, config).await
    }

    /// Validate and retain the TLS material of a config that may use files.
    pub async fn add_tls_config(&mut self, namespace: &str, config: Option<&TlsConfig>) -> Result<(), AssetError> {
        let Some(config) = config else {
            return Ok(());
        };
        config
            .validate()
            .map_err(|e| AssetError::InvalidConfig(format!("failed to validate TLS configuration: {e}")))?;
        self.add_tls_material(namespace, &config.safe).await
    }

    async fn add_tls_material(&mut self, namespace: &str, config: &SafeTlsConfig) -> Result<(), AssetError> {
        let ca = self.get_key(namespace, &config.ca).await?;
        let cert = self.get_key(namespace, &config.cert).await?;
        let key = match &config.key_secret {
            Some(sel) => self.get_secret_key(namespace, sel).await?,
            None => Vec::new(),
        };

        let mut wanted = Vec::with_capacity(3);
        if !ca.is_empty() {
            tls::validate_ca(&ca).map_err(|source| invalid_tls(format!("ca {}", config.ca), source))?;
            wanted.extend(AssetKey::from_source(namespace, &config.ca));
        }
        if let Some(key_sel) = config.key_secret.as_ref().filter(|_| !cert.is_empty() && !key.is_empty()) {
            tls::validate_keypair(&cert, &key).map_err(|source| {
                invalid_tls(
                    format!("cert {}, key <{}/{}>", config.cert, key_sel.name, key_sel.key),
                    source,
                )
            })?;
            wanted.extend(AssetKey::from_source(namespace, &config.cert));
            wanted.push(AssetKey::secret(namespace, key_sel));
        }

        self.tls_keys.extend(wanted);
        Ok(())
    }

    pub async fn add_basic_auth(&mut self, namespace: &str, auth: Option<&BasicAuth>) -> Result<(), AssetError> {
        let Some(auth) = auth else {
            return Ok(());
        };
        self.get_secret_key(namespace, &auth.username).await?;
        self.get_secret_key(namespace, &auth.password).await?;
        Ok(())
    }

    /// A selector without a name means no token is configured.
    pub async fn add_bearer_token(&mut self, namespace: &str, sel: Option<&SecretKeySelector>) -> Result<(), AssetError> {
        match sel {
            Some(sel) if !sel.name.is_empty() => self.get_secret_key(namespace, sel).await.map(drop),
            _ => Ok(()),
        }
    }

    pub async fn add_oauth2(&mut self, namespace: &str, oauth2: Option<&OAuth2>) -> Result<(), AssetError> {
        let Some(oauth2) = oauth2 else {
            return Ok(());
        };
        oauth2.validate().map_err(AssetError::InvalidConfig)?;
        self.get_key(namespace, &oauth2.client_id).await?;
        self.get_secret_key(namespace, &oauth2.client_secret).await?;
        self.add_safe_tls_config(namespace, oauth2.tls_config.as_ref()).await?;
        self.add_proxy_config(namespace, oauth2.proxy_config.as_ref()).await
    }

    /// Static keys are optional, but come as a pair.
    pub async fn add_sigv4(&mut self, namespace: &str, sigv4: Option<&Sigv4>) -> Result<(), AssetError> {
        let Some(sigv4) = sigv4 else {
            return Ok(());
        };
        match (&sigv4.access_key, &sigv4.secret_key) {
            (Some(access), Some(secret)) => {
                self.get_secret_key(namespace, access).await?;
                self.get_secret_key(namespace, secret).await?;
                Ok(())
            }
            (None, None) => Ok(()),
            _ => Err(AssetError::InvalidConfig(
                "sigv4 accessKey and secretKey must be set together".to_string(),
            )),
        }
    }

    pub async fn add_azure_oauth(&mut self, namespace: &str, oauth: Option<&AzureOAuth>) -> Result<(), AssetError> {
        let Some(oauth) = oauth else {
            return Ok(());
        };
        self.get_secret_key(namespace, &oauth.client_secret).await.map(drop)
    }

    pub async fn add_safe_authorization(
        &mut self,
        namespace: &str,
        auth: Option<&SafeAuthorization>,
    ) -> Result<(), AssetError> {
        let Some(auth) = auth else {
            return Ok(());
        };
        auth.validate().map_err(AssetError::InvalidConfig)?;
        self.add_authorization_credentials(namespace, auth.credentials.as_ref()).await
    }

    pub async fn add_authorization(&mut self, namespace: &str, auth: Option<&Authorization>) -> Result<(), AssetError> {
        let Some(auth) = auth else {
            return Ok(());
        };
        auth.validate().map_err(AssetError::InvalidConfig)?;
        self.add_authorization_credentials(namespace, auth.safe.credentials.as_ref()).await
    }

    async fn add_authorization_credentials(
        &mut self,
        namespace: &str,
        credentials: Option<&SecretKeySelector>,
    ) -> Result<(), AssetError> {
        match credentials {
            Some(sel) => self.get_secret_key(namespace, sel).await.map(drop),
            None => Ok(()),
        }
    }

    pub async fn add_proxy_config(&mut self, namespace: &str, proxy: Option<&ProxyConfig>) -> Result<(), AssetError> {
        let Some(proxy) = proxy else {
            return Ok(());
        };
        proxy.validate().map_err(AssetError::InvalidConfig)?;
        for selectors in proxy.proxy_connect_header.values() {
            for sel in selectors {
                self.get_secret_key(namespace, sel).await?;
            }
        }
        Ok(())
    }

    /// Validated TLS material keyed by [`AssetKey::encode`].
    ///
    /// Reads the pass cache only. Assets whose object left the cache since
    /// validation, or whose value is now empty, are skipped.
    pub fn tls_assets(&self) -> BTreeMap<String, Vec<u8>> {
        self.tls_keys
            .iter()
            .filter_map(|key| {
                let id = (key.namespace.clone(), key.name.clone());
                let value = match key.kind {
                    SourceKind::Secret => lookup_secret(self.secrets.get(&id)?.as_ref()?, &key.key),
                    SourceKind::ConfigMap => lookup_config_map(self.config_maps.get(&id)?.as_ref()?, &key.key),
                }?;
                (!value.is_empty()).then(|| (key.encode(), value))
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn evict_secret(&mut self, namespace: &str, name: &str) {
        self.secrets.remove(&(namespace.to_string(), name.to_string()));
    }
}

/// Read-only view of a [`StoreBuilder`] cache for one namespace.
pub struct StoreGetter<'a> {
    store: &'a StoreBuilder,
    namespace: String,
}

impl StoreGetter<'_> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn get_secret_key(&self, sel: &SecretKeySelector) -> Result<Vec<u8>, AssetError> {
        let id = (self.namespace.clone(), sel.name.clone());
        let secret = cached(self.store.secrets.get(&id), SourceKind::Secret, &self.namespace, &sel.name)?;
        secret_value(secret, &self.namespace, sel)
    }

    pub fn get_config_map_key(&self, sel: &ConfigMapKeySelector) -> Result<Vec<u8>, AssetError> {
        let id = (self.namespace.clone(), sel.name.clone());
        let config_map = cached(self.store.config_maps.get(&id), SourceKind::ConfigMap, &self.namespace, &sel.name)?;
        config_map_value(config_map, &self.namespace, sel)
    }

    pub fn get_key(&self, source: &SecretOrConfigMap) -> Result<Vec<u8>, AssetError> {
        match (&source.secret, &source.config_map) {
            (Some(sel), _) => self.get_secret_key(sel),
            (None, Some(sel)) => self.get_config_map_key(sel),
            (None, None) => Ok(Vec::new()),
        }
    }
}

fn cached<'a, K>(entry: Option<&'a Option<K>>, kind: SourceKind, namespace: &str, name: &str) -> Result<&'a K, AssetError> {
    match entry {
        Some(Some(obj)) => Ok(obj),
        Some(None) => Err(AssetError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
        None => Err(AssetError::NotCached {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }),
    }
}

fn invalid_tls(context: String, source: TlsError) -> AssetError {
    AssetError::InvalidTls { context, source }
}

fn secret_value(secret: &Secret, namespace: &str, sel: &SecretKeySelector) -> Result<Vec<u8>, AssetError> {
    lookup_secret(secret, &sel.key).ok_or_else(|| AssetError::MissingKey {
        kind: SourceKind::Secret,
        namespace: namespace.to_string(),
        name: sel.name.clone(),
        key: sel.key.clone(),
    })
}

fn config_map_value(config_map: &ConfigMap, namespace: &str, sel: &ConfigMapKeySelector) -> Result<Vec<u8>, AssetError> {
    lookup_config_map(config_map, &sel.key).ok_or_else(|| AssetError::MissingKey {
        kind: SourceKind::ConfigMap,
        namespace: namespace.to_string(),
        name: sel.name.clone(),
        key: sel.key.clone(),
    })
}

fn lookup_secret(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|v| v.0.clone())
        .or_else(|| {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|v| v.as_bytes().to_vec())
        })
}

fn lookup_config_map(config_map: &ConfigMap, key: &str) -> Option<Vec<u8>> {
    config_map
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|v| v.as_bytes().to_vec())
        .or_else(|| {
            config_map
                .binary_data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|v| v.0.clone())
        })
}
