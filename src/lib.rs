//! vault-steward - typed client SDK for HashiCorp Vault
//!
//! The crate declaratively manages Vault state: auth methods (Kubernetes),
//! secrets engines (KV v2, transit, PKI), ACL policies and random data. Desired
//! state is described with plain Rust values and every `update_*` call
//! reconciles Vault towards it.
//!
//! ## Architecture
//!
//! - `vault` module - the SDK: session, request pipeline and one API per Vault area
//! - `cli` module - the `vault-steward` command line, a thin layer over `vault`
//!
//! ```no_run
//! # async fn run() -> Result<(), vault_steward::VaultError> {
//! use vault_steward::{StringSource, Vault};
//!
//! let vault = Vault::builder()
//!     .address_from(StringSource::env("VAULT_ADDR"))
//!     .token_from(StringSource::env("VAULT_TOKEN"))
//!     .complete()
//!     .await?;
//! let bytes = vault.random().generate_random_bytes(32).await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod vault;

pub use vault::{StringSource, Vault, VaultBuilder, VaultConfig, VaultError};

/// Initialize logging for tests
#[allow(dead_code)]
pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer() // This ensures output goes to both stdout and test output
        .try_init();
}
