//! PKI secrets engine: engines, root and intermediate CAs, roles and certificates.
//!
//! A PKI mount moves through three states. It is absent, then mounted without
//! CA material, then initialized once a CA certificate can be read from it.
//! Intermediate CAs pass through one more step where a CSR has been generated
//! and is waiting for the issuer's signature.
//!
//! The operations are split by concern: [`ca`] covers CA lifecycle, [`role`]
//! issuance roles and [`cert`] issued certificates and CRLs.

pub mod ca;
pub mod cert;
pub mod role;
pub mod serial;
pub mod types;

pub use serial::{format_serial_number, private_key_type};
pub use types::*;

use crate::vault::codec::{JsonDecoder, RawDecoder};
use crate::vault::common::{join_path, ListResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::MountPathEntity;
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::mount::{Mount, MountApi};
use crate::vault::request::RequestMethod;
use std::sync::Arc;
use tracing::{debug, info};

/// Mount type used when an engine does not name a plugin.
pub const DEFAULT_PKI_PLUGIN: &str = "pki";

#[derive(Debug, Clone)]
pub struct PkiApi {
    core: Arc<VaultCore>,
    mounts: MountApi,
}

impl PkiApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        let mounts = MountApi::new(core.clone());
        PkiApi { core, mounts }
    }

    /// Mounts the engine if needed, then tunes it when its config differs.
    ///
    /// Unlike the other engines, an existing PKI mount is retuned.
    pub async fn update_pki_engine(&self, engine: &PkiEngine) -> Result<(), VaultError> {
        let path = engine.path.as_str();
        let plugin = if engine.plugin_name.is_empty() {
            DEFAULT_PKI_PLUGIN
        } else {
            engine.plugin_name.as_str()
        };

        let exists = self
            .mounts
            .has_engine(engine)
            .await
            .api_context("failed to check if pki engine exists")?;
        if !exists {
            info!(path, plugin, "creating new pki engine");
            let mount = Mount::new(path, plugin).with_config(engine.config.clone());
            self.mounts
                .mount_engine(&mount)
                .await
                .api_context("failed to create pki engine")?;
        }

        let current = self
            .mounts
            .read_tune_config(engine)
            .await
            .api_context("failed to read pki tune mount config")?;
        if current == engine.config {
            debug!(path, "pki engine config is up to date");
            return Ok(());
        }
        self.mounts
            .tune_engine(engine, &engine.config)
            .await
            .api_context("failed to write desired pki tune configuration")
    }

    pub async fn read_pki_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<PkiEngine, VaultError> {
        let mount = self.mounts.read_mount(engine).await?;
        let config = self.mounts.read_tune_config(engine).await?;
        Ok(PkiEngine {
            path: mount.path,
            plugin_name: mount.engine_type.to_string(),
            config,
        })
    }

    pub async fn delete_pki_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<(), VaultError> {
        self.mounts.delete_engine(engine).await
    }

    /// True once the engine is mounted and serves a CA certificate.
    pub async fn is_pki_engine_initialized(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<bool, VaultError> {
        if !self.mounts.has_engine(engine).await? {
            return Ok(false);
        }
        match self.read_ca_certificate_pem(engine).await {
            Ok(pem) => Ok(!pem.trim().is_empty()),
            Err(err) if err.is_status(404) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Reads the CA certificate of the engine in PEM form; empty if no CA is set up.
    pub async fn read_ca_certificate_pem(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<String, VaultError> {
        let path = engine.mount_path();
        let mut response = RawDecoder::new();
        self.core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", path, "ca", "pem"]),
                None,
                Some(&mut response),
            )
            .await
            .api_context("failed to get ca cert in pem format")?;
        response.into_string()
    }

    /// Lists the serial numbers of all certificates the engine has stored.
    pub async fn list_certificates(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<Vec<String>, VaultError> {
        let path = engine.mount_path();
        let mut response = JsonDecoder::<ListResponse>::new();
        match self
            .core
            .make_request(
                RequestMethod::List,
                &join_path(&["/v1", path, "certs"]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => Ok(response
                .into_inner()
                .map(|r| r.data.keys)
                .unwrap_or_default()
                .iter()
                .map(|key| serial::normalize_listed_serial(key))
                .collect()),
            Err(err) if err.is_status(404) => Ok(Vec::new()),
            Err(err) => Err(err).api_context("failed to list certs in pki engine"),
        }
    }
}
