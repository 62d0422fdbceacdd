//! Credential and transport settings shared by monitoring CRDs
//!
//! Every type carries a `validate()` that enforces the structural rules the
//! API server cannot express in the schema. Resolving the referenced Secret
//! and ConfigMap data is the operator's job, not this crate's.

use crate::references::{SecretKeySelector, SecretOrConfigMap};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// TLS settings that only reference Secrets and ConfigMaps.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafeTlsConfig {
    /// Certificate authority used when verifying server certificates
    #[serde(default, skip_serializing_if = "SecretOrConfigMap::is_empty")]
    pub ca: SecretOrConfigMap,

    /// Client certificate presented for client authentication
    #[serde(default, skip_serializing_if = "SecretOrConfigMap::is_empty")]
    pub cert: SecretOrConfigMap,

    /// Secret containing the client key file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<SecretKeySelector>,

    /// Server name used to verify the target hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Disable target certificate validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,

    /// Minimum acceptable TLS version (TLS10..TLS13)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,

    /// Maximum acceptable TLS version (TLS10..TLS13)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
}

impl SafeTlsConfig {
    /// Structural validation.
    pub fn validate(&self) -> Result<(), String> {
        if !self.ca.is_empty() {
            self.ca.validate().map_err(|e| format!("ca {}: {e}", self.ca))?;
        }
        if !self.cert.is_empty() {
            self.cert.validate().map_err(|e| format!("cert {}: {e}", self.cert))?;
        }
        if !self.cert.is_empty() && self.key_secret.is_none() {
            return Err("client cert specified without client key".to_string());
        }
        if self.key_secret.is_some() && self.cert.is_empty() {
            return Err("client key specified without client cert".to_string());
        }
        if let (Some(max), Some(min)) = (&self.max_version, &self.min_version) {
            if max < min {
                return Err("maxVersion must more than or equal to minVersion".to_string());
            }
        }
        Ok(())
    }
}

/// TLS settings that may also reference files mounted in the Prometheus container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    /// Secret/ConfigMap based settings
    #[serde(flatten)]
    pub safe: SafeTlsConfig,

    /// Path to the CA cert in the Prometheus container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,

    /// Path to the client cert file in the Prometheus container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,

    /// Path to the client key file in the Prometheus container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
}

impl TlsConfig {
    /// True when any `*File` field is set.
    pub fn uses_files(&self) -> bool {
        self.ca_file.is_some() || self.cert_file.is_some() || self.key_file.is_some()
    }

    /// Structural validation.
    pub fn validate(&self) -> Result<(), String> {
        let safe = &self.safe;
        if !safe.ca.is_empty() {
            if self.ca_file.is_some() {
                return Err("cannot specify both caFile and ca".to_string());
            }
            safe.ca.validate().map_err(|e| format!("SecretOrConfigMap ca: {e}"))?;
        }
        if !safe.cert.is_empty() {
            if self.cert_file.is_some() {
                return Err("cannot specify both certFile and cert".to_string());
            }
            safe.cert.validate().map_err(|e| format!("SecretOrConfigMap cert: {e}"))?;
        }
        if self.key_file.is_some() && safe.key_secret.is_some() {
            return Err("cannot specify both keyFile and keySecret".to_string());
        }

        let has_cert = self.cert_file.is_some() || !safe.cert.is_empty();
        let has_key = self.key_file.is_some() || safe.key_secret.is_some();
        if has_cert && !has_key {
            return Err("cannot specify client cert without client key".to_string());
        }
        if has_key && !has_cert {
            return Err("cannot specify client key without client cert".to_string());
        }
        if let (Some(max), Some(min)) = (&safe.max_version, &safe.min_version) {
            if max < min {
                return Err("maxVersion must more than or equal to minVersion".to_string());
            }
        }
        Ok(())
    }
}

/// HTTP basic authentication credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuth {
    /// Secret key holding the username
    pub username: SecretKeySelector,

    /// Secret key holding the password
    pub password: SecretKeySelector,
}

/// OAuth2 client credentials flow.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2 {
    /// Client ID
    pub client_id: SecretOrConfigMap,

    /// Secret key holding the client secret
    pub client_secret: SecretKeySelector,

    /// Token endpoint
    pub token_url: String,

    /// OAuth2 scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Extra parameters appended to the token URL
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoint_params: BTreeMap<String, String>,

    /// TLS settings for the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<SafeTlsConfig>,

    /// Proxy settings for the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_config: Option<ProxyConfig>,
}

impl OAuth2 {
    /// Structural validation.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_url.is_empty() {
            return Err("OAuth2 tokenURL must be specified".to_string());
        }
        if self.client_id.is_empty() {
            return Err("OAuth2 clientID must be specified".to_string());
        }
        self.client_id
            .validate()
            .map_err(|e| format!("invalid OAuth2 clientID: {e}"))?;
        if let Some(tls) = &self.tls_config {
            tls.validate()?;
        }
        if let Some(proxy) = &self.proxy_config {
            proxy.validate()?;
        }
        Ok(())
    }
}

/// AWS Signature Version 4 request signing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Sigv4 {
    /// AWS region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Secret key holding the AWS access key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<SecretKeySelector>,

    /// Secret key holding the AWS secret access key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<SecretKeySelector>,

    /// Named AWS profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Role ARN to assume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
}

/// Azure AD OAuth client credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AzureOAuth {
    /// Client ID of the Azure AD application
    pub client_id: String,

    /// Secret key holding the client secret
    pub client_secret: SecretKeySelector,

    /// Tenant ID of the Azure AD application
    pub tenant_id: String,
}

/// Azure AD settings for remote write.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AzureAd {
    /// Azure cloud name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,

    /// OAuth client credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<AzureOAuth>,
}

/// Authorization header settings referencing a Secret only.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafeAuthorization {
    /// Authentication type, defaults to Bearer
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub type_: Option<String>,

    /// Secret key holding the credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
}

fn is_basic(type_: Option<&String>) -> bool {
    type_.is_some_and(|t| t.trim().eq_ignore_ascii_case("basic"))
}

impl SafeAuthorization {
    /// Structural validation.
    pub fn validate(&self) -> Result<(), String> {
        if is_basic(self.type_.as_ref()) {
            return Err("authorization type cannot be set to \"basic\", use \"basicAuth\" instead".to_string());
        }
        if self.credentials.is_none() {
            return Err("authorization credentials are required".to_string());
        }
        Ok(())
    }
}

/// Authorization header settings which may also use a credentials file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Secret based settings
    #[serde(flatten)]
    pub safe: SafeAuthorization,

    /// File in the Prometheus container holding the credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

impl Authorization {
    /// Structural validation.
    pub fn validate(&self) -> Result<(), String> {
        if self.safe.credentials.is_some() && self.credentials_file.is_some() {
            return Err("authorization can not specify both \"credentials\" and \"credentialsFile\"".to_string());
        }
        if is_basic(self.safe.type_.as_ref()) {
            return Err("authorization type cannot be set to \"basic\", use \"basicAuth\" instead".to_string());
        }
        Ok(())
    }
}

/// HTTP proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Proxy URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Comma-separated hosts excluded from proxying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,

    /// Use the proxy from environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_from_environment: Option<bool>,

    /// Headers sent to the proxy during CONNECT
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proxy_connect_header: BTreeMap<String, Vec<SecretKeySelector>>,
}

impl ProxyConfig {
    /// Structural validation.
    pub fn validate(&self) -> Result<(), String> {
        let has_url = self.proxy_url.as_deref().is_some_and(|u| !u.is_empty());
        let has_no_proxy = self.no_proxy.as_deref().is_some_and(|u| !u.is_empty());
        if self.proxy_from_environment == Some(true) && (has_url || has_no_proxy) {
            return Err("if proxyFromEnvironment is configured, proxyUrl and noProxy must not be configured".to_string());
        }
        if !has_url && has_no_proxy {
            return Err("if noProxy is configured, proxyUrl must also be configured".to_string());
        }
        if !has_url && !self.proxy_connect_header.is_empty() {
            return Err("if proxyConnectHeader is configured, proxyUrl must also be configured".to_string());
        }
        Ok(())
    }
}
