//! Secret engine mounts.
//!
//! Listing normalizes the `kv` engine mounted with `version=2` into
//! [`EngineType::KvV2`] and strips the trailing slash Vault reports on paths.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{empty_as_none, join_path, null_as_default, trim_slashes, DataResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::MountPathEntity;
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::request::RequestMethod;
use crate::vault::ttl::VaultTtl;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Type of a secret engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EngineType {
    Kv,
    KvV2,
    Transit,
    Pki,
    Other(String),
}

impl EngineType {
    pub fn as_str(&self) -> &str {
        match self {
            EngineType::Kv => "kv",
            EngineType::KvV2 => "kv-v2",
            EngineType::Transit => "transit",
            EngineType::Pki => "pki",
            EngineType::Other(other) => other,
        }
    }
}

impl From<String> for EngineType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "kv" => EngineType::Kv,
            "kv-v2" => EngineType::KvV2,
            "transit" => EngineType::Transit,
            "pki" => EngineType::Pki,
            _ => EngineType::Other(value),
        }
    }
}

impl From<&str> for EngineType {
    fn from(value: &str) -> Self {
        EngineType::from(value.to_string())
    }
}

impl From<EngineType> for String {
    fn from(value: EngineType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Hidden,
    Unauth,
}

/// Tunable mount settings.
///
/// Missing and empty collections decode to the same value, so a config read back
/// from Vault compares equal to the one that was written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_lease_ttl: Option<VaultTtl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lease_ttl: Option<VaultTtl>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub audit_non_hmac_request_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub audit_non_hmac_response_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub listing_visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub passthrough_request_headers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub allowed_response_headers: Vec<String>,
}

/// A mounted secret engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub path: String,
    pub engine_type: EngineType,
    pub options: HashMap<String, String>,
    pub config: TuneConfig,
}

impl Mount {
    pub fn new(path: impl Into<String>, engine_type: impl Into<EngineType>) -> Self {
        Mount {
            path: path.into(),
            engine_type: engine_type.into(),
            options: HashMap::new(),
            config: TuneConfig::default(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, config: TuneConfig) -> Self {
        self.config = config;
        self
    }
}

impl MountPathEntity for Mount {
    fn mount_path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Deserialize)]
struct MountListEntry {
    #[serde(rename = "type")]
    engine_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    options: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    config: TuneConfig,
    #[serde(default)]
    description: String,
}

#[derive(Serialize)]
struct MountRequest<'a> {
    #[serde(rename = "type")]
    engine_type: &'a str,
    config: &'a TuneConfig,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    options: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct ReloadPluginRequest<'a> {
    plugin: &'a str,
    scope: &'a str,
}

/// Administration of secret engine mounts under `/v1/sys/mounts`.
#[derive(Debug, Clone)]
pub struct MountApi {
    core: Arc<VaultCore>,
}

impl MountApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        MountApi { core }
    }

    pub async fn list_mounts(&self) -> Result<Vec<Mount>, VaultError> {
        let mut response = JsonDecoder::<DataResponse<HashMap<String, MountListEntry>>>::new();
        self.core
            .make_request(RequestMethod::Get, "/v1/sys/mounts", None, Some(&mut response))
            .await
            .api_context("failed to list mounts")?;

        let entries = response.into_inner().map(|r| r.data).unwrap_or_default();
        let mut mounts: Vec<Mount> = entries
            .into_iter()
            .map(|(path, entry)| {
                let mut engine_type = EngineType::from(entry.engine_type);
                if engine_type == EngineType::Kv
                    && entry.options.get("version").map(String::as_str) == Some("2")
                {
                    engine_type = EngineType::KvV2;
                }
                let mut config = entry.config;
                if config.description.is_empty() {
                    config.description = entry.description;
                }
                Mount {
                    path: trim_slashes(&path).to_string(),
                    engine_type,
                    options: entry.options,
                    config,
                }
            })
            .collect();
        mounts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(mounts)
    }

    pub async fn has_engine(&self, engine: &(impl MountPathEntity + ?Sized)) -> Result<bool, VaultError> {
        let path = trim_slashes(engine.mount_path());
        let mounts = self.list_mounts().await?;
        Ok(mounts.iter().any(|mount| mount.path == path))
    }

    /// Reads a mount from the mount list; [`VaultError::DoesNotExist`] if it is absent.
    pub async fn read_mount(&self, engine: &(impl MountPathEntity + ?Sized)) -> Result<Mount, VaultError> {
        let path = trim_slashes(engine.mount_path());
        self.list_mounts()
            .await?
            .into_iter()
            .find(|mount| mount.path == path)
            .ok_or(VaultError::DoesNotExist)
    }

    /// Mounts `mount.engine_type` at `mount.path` with its options and config.
    pub async fn mount_engine(&self, mount: &Mount) -> Result<(), VaultError> {
        let request = MountRequest {
            engine_type: mount.engine_type.as_str(),
            config: &mount.config,
            options: &mount.options,
        };
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1/sys/mounts", &mount.path]),
                Some(&Json(&request)),
                None,
            )
            .await
            .api_context(format!("failed to mount {} engine at {}", mount.engine_type, mount.path))?;
        info!(path = %mount.path, engine_type = %mount.engine_type, "mounted secret engine");
        Ok(())
    }

    /// Mounts the engine unless a mount already exists at its path.
    ///
    /// Returns true if a mount was created. The tune config of an existing mount is
    /// left untouched.
    pub async fn ensure_engine(&self, mount: &Mount) -> Result<bool, VaultError> {
        if self.has_engine(mount).await? {
            debug!(path = %mount.path, "secret engine already mounted");
            return Ok(false);
        }
        self.mount_engine(mount).await?;
        Ok(true)
    }

    /// Unmounts the engine; absent mounts are not an error.
    pub async fn delete_engine(&self, engine: &(impl MountPathEntity + ?Sized)) -> Result<(), VaultError> {
        let path = engine.mount_path();
        match self
            .core
            .make_request(
                RequestMethod::Delete,
                &join_path(&["/v1/sys/mounts", path]),
                None,
                None,
            )
            .await
        {
            Ok(()) => {
                info!(path, "unmounted secret engine");
                Ok(())
            }
            Err(err) if err.is_status(404) => Ok(()),
            Err(err) => Err(err).api_context(format!("failed to unmount engine at {}", path)),
        }
    }

    pub async fn read_tune_config(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<TuneConfig, VaultError> {
        let path = engine.mount_path();
        let mut response = JsonDecoder::<TuneConfig>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1/sys/mounts", path, "tune"]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => Ok(response.into_inner().unwrap_or_default()),
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to read tune config of {}", path)),
        }
    }

    pub async fn tune_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        config: &TuneConfig,
    ) -> Result<(), VaultError> {
        let path = engine.mount_path();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1/sys/mounts", path, "tune"]),
                Some(&Json(config)),
                None,
            )
            .await
            .api_context(format!("failed to tune engine at {}", path))?;
        info!(path, "tuned secret engine");
        Ok(())
    }

    /// Reloads every backend of `plugin` on all nodes of the cluster.
    pub async fn reload_plugin_backends(&self, plugin: &str) -> Result<(), VaultError> {
        let request = ReloadPluginRequest {
            plugin,
            scope: "global",
        };
        self.core
            .make_request(
                RequestMethod::Put,
                "/v1/sys/plugins/reload/backend",
                Some(&Json(&request)),
                None,
            )
            .await
            .api_context(format!("failed to reload plugin backends of {}", plugin))?;
        info!(plugin, "reloaded plugin backends");
        Ok(())
    }
}
