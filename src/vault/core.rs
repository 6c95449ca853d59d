//! Session shared by every API of a [`crate::vault::Vault`] client.
//!
//! The core owns the base address, the HTTP transport, the auth provider and
//! the current token. Token and expiry are only written by the authentication
//! path, which is serialized through an async mutex; request sending samples
//! the token without taking that mutex.

use crate::vault::auth_provider::AuthProvider;
use crate::vault::client::{HttpClient, HttpTransport, DEFAULT_TIMEOUT};
use crate::vault::common::join_path;
use crate::vault::error::{ResultExt, VaultError};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Maximum number of retries per failure class for a single request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Upper bound on how long a token is trusted without re-authenticating.
const MAX_TOKEN_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// Three quarters of the lease, capped so huge leases cannot overflow an Instant.
fn token_validity(lease: Duration) -> Duration {
    lease
        .checked_mul(3)
        .map(|scaled| scaled / 4)
        .unwrap_or(MAX_TOKEN_VALIDITY)
        .min(MAX_TOKEN_VALIDITY)
}

#[derive(Debug, Default, Clone)]
struct AuthState {
    token: String,
    valid_until: Option<Instant>,
    /// Incremented on every successful authentication.
    generation: u64,
}

pub struct VaultCore {
    address: Url,
    transport: Arc<dyn HttpTransport>,
    ca_certs: Vec<String>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    auth_lock: Mutex<()>,
    auth_state: RwLock<AuthState>,
    pub(crate) timeout: Duration,
    pub(crate) max_attempts: u32,
}

impl std::fmt::Debug for VaultCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCore")
            .field("address", &self.address.as_str())
            .field("ca_certs", &self.ca_certs.len())
            .field("has_auth_provider", &self.auth_provider.is_some())
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Builder for [`VaultCore`].
pub struct CoreBuilder {
    address: String,
    ca_certs: Vec<String>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    transport: Option<Arc<dyn HttpTransport>>,
    timeout: Duration,
    max_attempts: u32,
}

impl CoreBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        CoreBuilder {
            address: address.into(),
            ca_certs: Vec::new(),
            auth_provider: None,
            transport: None,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Trusts the given PEM bundles in addition to the system roots.
    pub fn with_ca_certs(mut self, pem_bundles: Vec<String>) -> Self {
        self.ca_certs.extend(pem_bundles);
        self
    }

    /// Installs an auth provider; [`CoreBuilder::build`] authenticates with it once.
    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Replaces the reqwest transport, mostly useful for tests.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn build(self) -> Result<VaultCore, VaultError> {
        let address = Url::parse(&self.address)
            .setup_context(format!("failed to parse vault address {}", self.address))?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None if self.ca_certs.is_empty() => Arc::new(HttpClient::new(address.clone())?),
            None => Arc::new(HttpClient::with_ca_certs(address.clone(), &self.ca_certs)?),
        };

        let core = VaultCore {
            address,
            transport,
            ca_certs: self.ca_certs,
            auth_provider: self.auth_provider,
            auth_lock: Mutex::new(()),
            auth_state: RwLock::new(AuthState::default()),
            timeout: self.timeout,
            max_attempts: self.max_attempts,
        };

        if core.auth_provider.is_some() {
            core.authenticate()
                .await
                .setup_context("failed to perform initial authentication")?;
        }

        Ok(core)
    }
}

impl VaultCore {
    pub fn builder(address: impl Into<String>) -> CoreBuilder {
        CoreBuilder::new(address)
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn ca_certs(&self) -> &[String] {
        &self.ca_certs
    }

    /// Builds an absolute URL below the vault address.
    ///
    /// `core.url(&["v1", "managed/pki", "crl"])` yields `https://vault:8200/v1/managed/pki/crl`.
    pub fn url(&self, segments: &[&str]) -> String {
        format!(
            "{}{}",
            self.address.as_str().trim_end_matches('/'),
            join_path(segments)
        )
    }

    pub(crate) fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub(crate) fn has_auth_provider(&self) -> bool {
        self.auth_provider.is_some()
    }

    fn state(&self) -> AuthState {
        self.auth_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The token currently attached to requests.
    pub fn token(&self) -> String {
        self.state().token
    }

    pub(crate) fn token_snapshot(&self) -> (String, u64) {
        let state = self.state();
        (state.token, state.generation)
    }

    pub(crate) fn token_generation(&self) -> u64 {
        self.state().generation
    }

    pub fn auth_valid_until(&self) -> Option<Instant> {
        self.state().valid_until
    }

    pub fn is_token_valid(&self) -> bool {
        self.state()
            .valid_until
            .is_some_and(|valid_until| Instant::now() < valid_until)
    }

    /// Authenticates with the installed provider unless the current token is still valid.
    pub async fn authenticate(&self) -> Result<(), VaultError> {
        let provider = self.provider()?;
        let _guard = self.auth_lock.lock().await;
        if self.is_token_valid() {
            debug!("vault token still valid, skipping authentication");
            return Ok(());
        }
        self.run_provider(provider).await
    }

    /// Forces a new authentication unless another caller already replaced the
    /// token identified by `stale_generation`.
    pub(crate) async fn reauthenticate(&self, stale_generation: u64) -> Result<(), VaultError> {
        let provider = self.provider()?;
        let _guard = self.auth_lock.lock().await;
        if self.token_generation() != stale_generation {
            debug!("vault token was renewed by another caller");
            return Ok(());
        }
        self.run_provider(provider).await
    }

    fn provider(&self) -> Result<&Arc<dyn AuthProvider>, VaultError> {
        self.auth_provider
            .as_ref()
            .ok_or_else(|| VaultError::api("no auth provider configured"))
    }

    // Caller must hold `auth_lock`.
    async fn run_provider(&self, provider: &Arc<dyn AuthProvider>) -> Result<(), VaultError> {
        let started = Instant::now();
        let token = provider
            .authenticate(self)
            .await
            .api_context("failed to authenticate against vault")?;

        let lease = token.lease_duration.duration();
        let valid_until = started + token_validity(lease);

        let mut state = self
            .auth_state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        state.token = token.token;
        state.valid_until = Some(valid_until);
        state.generation += 1;
        info!(
            lease_secs = lease.as_secs(),
            generation = state.generation,
            "authenticated against vault"
        );
        Ok(())
    }
}
