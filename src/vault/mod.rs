//! Vault client SDK.
//!
//! A [`Vault`] owns one session ([`core::VaultCore`]) shared by a family of
//! API handles, one per Vault area: auth methods, Kubernetes auth, mounts, KV,
//! transit, PKI, ACL policies and random data. Every `update_*` operation
//! reconciles: it reads the current state, compares it with the desired one
//! and only writes when they differ.
//!
//! ## Layers
//! - `client`: reqwest transport, one HTTP attempt per call
//! - `request`: the request pipeline (token injection, retries, backoff, error envelopes)
//! - `core`: address, transport, auth provider and the current token
//! - domain modules: typed requests and reconcile logic on top of `core`
//!
//! ## Testing
//! - Unit tests sit in each module and run against a `wiremock` server (see `test_utils`)
//! - `tests/` runs end-to-end scenarios against a Vault dev container

pub mod api;
pub mod auth;
pub mod auth_provider;
pub mod client;
pub mod codec;
pub mod common;
pub mod core;
pub mod entity;
pub mod error;
pub mod kubernetes;
pub mod kv;
pub mod mount;
pub mod pki;
pub mod policy;
pub mod random;
pub mod request;
pub mod source;
#[cfg(test)]
pub mod test_utils;
pub mod transit;
pub mod ttl;

pub use api::{Vault, VaultBuilder};
pub use auth_provider::{AuthProvider, AuthToken, EnvTokenProvider, StaticTokenProvider};
pub use error::{ErrorKind, ResultExt, VaultError};
pub use kubernetes::KubernetesAuthProvider;
pub use source::StringSource;
pub use ttl::VaultTtl;

use crate::vault::client::DEFAULT_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

/// Address used when none is configured.
pub const DEFAULT_ADDRESS: &str = "http://127.0.0.1:8200";

pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_CACERT_ENV: &str = "VAULT_CACERT";
pub const VAULT_CLIENT_TIMEOUT_ENV: &str = "VAULT_CLIENT_TIMEOUT";

/// Connection settings, see [`Vault::from_config`].
#[derive(Clone, PartialEq)]
pub struct VaultConfig {
    /// Vault API URL, e.g. "http://127.0.0.1:8200".
    pub address: String,
    pub token: Option<String>,
    /// PEM files trusted in addition to the system roots.
    pub ca_cert_paths: Vec<PathBuf>,
    /// Deadline of a single HTTP attempt.
    pub timeout: Duration,
    /// Kubernetes auth mount to log in with when no token is set.
    pub auth_mount: Option<String>,
    /// Kubernetes auth role used together with `auth_mount`.
    pub auth_role: Option<String>,
}

impl std::fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_cert_paths", &self.ca_cert_paths)
            .field("timeout", &self.timeout)
            .field("auth_mount", &self.auth_mount)
            .field("auth_role", &self.auth_role)
            .finish()
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            token: None,
            ca_cert_paths: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            auth_mount: None,
            auth_role: None,
        }
    }
}

impl VaultConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self::default().with_address(address)
    }

    /// Reads `VAULT_ADDR`, `VAULT_TOKEN`, `VAULT_CACERT` and `VAULT_CLIENT_TIMEOUT`.
    ///
    /// Unset or empty variables keep their defaults.
    pub fn from_env() -> Result<Self, VaultError> {
        let mut config = Self::default();
        if let Some(address) = non_empty_env(VAULT_ADDR_ENV) {
            config.address = address;
        }
        config.token = non_empty_env(auth_provider::VAULT_TOKEN_ENV);
        if let Some(path) = non_empty_env(VAULT_CACERT_ENV) {
            config.ca_cert_paths.push(PathBuf::from(path));
        }
        if let Some(timeout) = non_empty_env(VAULT_CLIENT_TIMEOUT_ENV) {
            config.timeout = parse_timeout(&timeout)?;
        }
        Ok(config)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_paths.push(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kubernetes_auth(mut self, mount: impl Into<String>, role: impl Into<String>) -> Self {
        self.auth_mount = Some(mount.into());
        self.auth_role = Some(role.into());
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

// Plain integers are seconds, like the vault CLI accepts.
fn parse_timeout(value: &str) -> Result<Duration, VaultError> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).setup_context(format!("invalid {} value {}", VAULT_CLIENT_TIMEOUT_ENV, value))
}
