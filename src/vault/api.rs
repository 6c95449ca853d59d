//! The top-level client handle and its builder.

use crate::vault::auth::AuthMethodApi;
use crate::vault::auth_provider::{AuthProvider, StaticTokenProvider};
use crate::vault::client::DEFAULT_TIMEOUT;
use crate::vault::core::{VaultCore, DEFAULT_MAX_ATTEMPTS};
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::kubernetes::{KubernetesAuthApi, KubernetesAuthProvider};
use crate::vault::kv::KvApi;
use crate::vault::mount::MountApi;
use crate::vault::pki::PkiApi;
use crate::vault::policy::PolicyApi;
use crate::vault::random::RandomApi;
use crate::vault::source::StringSource;
use crate::vault::transit::TransitApi;
use crate::vault::VaultConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// A Vault client.
///
/// Cloning is cheap; every clone and every API handle shares one session, so a
/// token refreshed by one caller is seen by all of them.
#[derive(Debug, Clone)]
pub struct Vault {
    core: Arc<VaultCore>,
}

impl Vault {
    pub fn builder() -> VaultBuilder {
        VaultBuilder::default()
    }

    /// Wraps an already built session.
    pub fn from_core(core: Arc<VaultCore>) -> Self {
        Vault { core }
    }

    /// Builds a client from a [`VaultConfig`].
    ///
    /// A configured token wins over Kubernetes login; Kubernetes login needs both
    /// `auth_mount` and `auth_role`.
    pub async fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        let mut builder = Vault::builder()
            .address_from(StringSource::value(config.address.clone()))
            .ca_certs_from(config.ca_cert_paths.iter().cloned().map(StringSource::File).collect())
            .timeout(config.timeout);
        match (&config.token, &config.auth_mount, &config.auth_role) {
            (Some(token), _, _) => builder = builder.token_from(StringSource::value(token.clone())),
            (None, Some(mount), Some(role)) => {
                builder = builder.auth_provider(Arc::new(KubernetesAuthProvider::in_cluster(
                    mount.clone(),
                    StringSource::value(role.clone()),
                )))
            }
            _ => {}
        }
        builder.complete().await
    }

    pub fn address(&self) -> &Url {
        self.core.address()
    }

    /// PEM bundles trusted in addition to the system roots.
    pub fn ca_certs(&self) -> &[String] {
        self.core.ca_certs()
    }

    pub fn core(&self) -> &Arc<VaultCore> {
        &self.core
    }

    pub fn auth_methods(&self) -> AuthMethodApi {
        AuthMethodApi::new(self.core.clone())
    }

    pub fn kubernetes_auth(&self) -> KubernetesAuthApi {
        KubernetesAuthApi::new(self.core.clone())
    }

    pub fn mounts(&self) -> MountApi {
        MountApi::new(self.core.clone())
    }

    pub fn kv(&self) -> KvApi {
        KvApi::new(self.core.clone())
    }

    pub fn transit(&self) -> TransitApi {
        TransitApi::new(self.core.clone())
    }

    pub fn pki(&self) -> PkiApi {
        PkiApi::new(self.core.clone())
    }

    pub fn policies(&self) -> PolicyApi {
        PolicyApi::new(self.core.clone())
    }

    pub fn random(&self) -> RandomApi {
        RandomApi::new(self.core.clone())
    }
}

/// Assembles a [`Vault`] from string sources.
///
/// Sources are only read in [`VaultBuilder::complete`].
pub struct VaultBuilder {
    address: StringSource,
    token: Option<StringSource>,
    ca_certs: Vec<StringSource>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    timeout: Duration,
    max_attempts: u32,
}

impl Default for VaultBuilder {
    fn default() -> Self {
        VaultBuilder {
            address: StringSource::value(crate::vault::DEFAULT_ADDRESS),
            token: None,
            ca_certs: Vec::new(),
            auth_provider: None,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl VaultBuilder {
    pub fn address_from(mut self, source: StringSource) -> Self {
        self.address = source;
        self
    }

    /// Authenticates with a fixed token. Replaces any provider set before.
    pub fn token_from(mut self, source: StringSource) -> Self {
        self.token = Some(source);
        self.auth_provider = None;
        self
    }

    /// Each source yields a PEM bundle or a path to one.
    pub fn ca_certs_from(mut self, sources: Vec<StringSource>) -> Self {
        self.ca_certs = sources;
        self
    }

    /// Replaces any token set before.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self.token = None;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Reads every source, builds the session and authenticates once.
    pub async fn complete(self) -> Result<Vault, VaultError> {
        let address = self.address.fetch().setup_context("failed to read vault address")?;

        let mut ca_certs = Vec::with_capacity(self.ca_certs.len());
        for source in &self.ca_certs {
            let value = source.fetch().setup_context("failed to read vault ca certificate")?;
            ca_certs.push(load_pem(value)?);
        }

        let provider = match (self.token, self.auth_provider) {
            (Some(token), _) => {
                let token = token.fetch().setup_context("failed to read vault token")?;
                Some(Arc::new(StaticTokenProvider::new(token)) as Arc<dyn AuthProvider>)
            }
            (None, provider) => provider,
        };

        let mut builder = VaultCore::builder(address)
            .with_ca_certs(ca_certs)
            .with_timeout(self.timeout)
            .with_max_attempts(self.max_attempts);
        if let Some(provider) = provider {
            builder = builder.with_auth_provider(provider);
        }
        let core = builder.build().await?;
        info!(address = %core.address(), "connected to vault");
        Ok(Vault { core: Arc::new(core) })
    }
}

// A value that does not look like PEM is taken as a path to a PEM file.
fn load_pem(value: String) -> Result<String, VaultError> {
    if value.contains("-----BEGIN") {
        return Ok(value);
    }
    StringSource::file(value).fetch()
}
