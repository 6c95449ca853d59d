//! Pluggable authentication strategies.
//!
//! A provider turns some credential into a Vault token plus its lease duration.
//! The session calls it once when it is installed and again whenever Vault
//! rejects the current token.

use crate::vault::core::VaultCore;
use crate::vault::error::VaultError;
use crate::vault::ttl::VaultTtl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Environment variable read by [`EnvTokenProvider`].
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

/// Token produced by a successful authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    /// Zero means the token carries no lease information.
    pub lease_duration: VaultTtl,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"..")
            .field("lease_duration", &self.lease_duration)
            .finish()
    }
}

/// Response envelope returned by Vault login endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub auth: AuthInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthInfo {
    pub client_token: String,
    pub accessor: String,
    #[serde(deserialize_with = "crate::vault::common::null_as_default")]
    pub policies: Vec<String>,
    pub lease_duration: VaultTtl,
    pub renewable: bool,
    /// Login metadata, for Kubernetes logins `role`, `service_account_name`,
    /// `service_account_namespace`, `service_account_secret_name` and `service_account_uid`.
    #[serde(deserialize_with = "crate::vault::common::null_as_default")]
    pub metadata: HashMap<String, String>,
}

impl From<AuthResponse> for AuthToken {
    fn from(response: AuthResponse) -> Self {
        AuthToken {
            token: response.auth.client_token,
            lease_duration: response.auth.lease_duration,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Produces a fresh token.
    ///
    /// Providers that talk to Vault must use [`VaultCore::send_unauthenticated`]:
    /// this method runs while the session holds its authentication lock.
    async fn authenticate(&self, core: &VaultCore) -> Result<AuthToken, VaultError>;
}

/// Uses a fixed token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        StaticTokenProvider {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn authenticate(&self, _core: &VaultCore) -> Result<AuthToken, VaultError> {
        if self.token.is_empty() {
            return Err(VaultError::api("vault token is empty"));
        }
        Ok(AuthToken {
            token: self.token.clone(),
            lease_duration: VaultTtl::ZERO,
        })
    }
}

/// Reads the token from `VAULT_TOKEN` on every authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvTokenProvider;

#[async_trait]
impl AuthProvider for EnvTokenProvider {
    async fn authenticate(&self, _core: &VaultCore) -> Result<AuthToken, VaultError> {
        match std::env::var(VAULT_TOKEN_ENV) {
            Ok(token) if !token.is_empty() => Ok(AuthToken {
                token,
                lease_duration: VaultTtl::ZERO,
            }),
            _ => Err(VaultError::api(format!(
                "required env var {} is not set",
                VAULT_TOKEN_ENV
            ))),
        }
    }
}
