//! Versioned key/value engines (kv-v2) and the secrets stored in them.
//!
//! Secret writes use check-and-set: an update always sends the version it was
//! computed against, so a concurrent writer makes the update fail instead of
//! being silently overwritten.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, null_as_default, DataResponse, ListResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::{MountPathEntity, SecretPathEntity};
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::mount::{EngineType, Mount, MountApi};
use crate::vault::request::RequestMethod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KvEngineConfig {
    pub max_versions: u32,
    pub cas_required: bool,
    /// Duration string such as `"768h"`; empty, `"0"` and `"0s"` all disable deletion.
    pub delete_version_after: String,
}

impl KvEngineConfig {
    // Vault answers with Go durations such as "768h0m0s".
    fn delete_version_after_duration(&self) -> Option<Duration> {
        match self.delete_version_after.trim() {
            "" | "0" => Some(Duration::ZERO),
            other => humantime::parse_duration(other).ok(),
        }
    }
}

impl PartialEq for KvEngineConfig {
    fn eq(&self, other: &Self) -> bool {
        let same_delete_after = match (self.delete_version_after_duration(), other.delete_version_after_duration()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => self.delete_version_after == other.delete_version_after,
        };
        self.max_versions == other.max_versions && self.cas_required == other.cas_required && same_delete_after
    }
}

impl Eq for KvEngineConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvEngine {
    pub path: String,
    pub config: KvEngineConfig,
}

impl KvEngine {
    pub fn new(path: impl Into<String>, config: KvEngineConfig) -> Self {
        KvEngine {
            path: path.into(),
            config,
        }
    }
}

impl MountPathEntity for KvEngine {
    fn mount_path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvSecret {
    pub path: String,
    pub fields: BTreeMap<String, String>,
}

impl KvSecret {
    pub fn new(path: impl Into<String>) -> Self {
        KvSecret {
            path: path.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl SecretPathEntity for KvSecret {
    fn secret_path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecretVersion {
    #[serde(deserialize_with = "null_as_default")]
    data: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    metadata: VersionMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VersionMetadata {
    pub version: u64,
    pub created_time: String,
    pub deletion_time: String,
    pub destroyed: bool,
}

#[derive(Serialize)]
struct CasOptions {
    cas: u64,
}

#[derive(Serialize)]
struct WriteSecretRequest<'a> {
    options: CasOptions,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct KvApi {
    core: Arc<VaultCore>,
    mounts: MountApi,
}

impl KvApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        let mounts = MountApi::new(core.clone());
        KvApi { core, mounts }
    }

    /// Mounts a kv-v2 engine if needed and writes its config when it differs.
    pub async fn update_kv_engine(&self, engine: &KvEngine) -> Result<(), VaultError> {
        let mount = Mount::new(engine.path.as_str(), EngineType::KvV2).with_option("version", "2");
        self.mounts
            .ensure_engine(&mount)
            .await
            .api_context(format!("failed to create kv engine at {}", engine.path))?;

        match self.read_kv_engine_config(engine).await {
            Ok(current) if current == engine.config => {
                debug!(path = %engine.path, "kv engine config is up to date");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_does_not_exist() => {}
            Err(err) => return Err(err),
        }

        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", &engine.path, "config"]),
                Some(&Json(&engine.config)),
                None,
            )
            .await
            .api_context(format!("failed to write config of kv engine {}", engine.path))?;
        info!(path = %engine.path, "updated kv engine config");
        Ok(())
    }

    pub async fn read_kv_engine_config(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<KvEngineConfig, VaultError> {
        let path = engine.mount_path();
        let mut response = JsonDecoder::<DataResponse<KvEngineConfig>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", path, "config"]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => Ok(response.into_inner().map(|r| r.data).unwrap_or_default()),
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to fetch config of kv engine {}", path)),
        }
    }

    pub async fn read_kv_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<KvEngine, VaultError> {
        let config = self.read_kv_engine_config(engine).await?;
        Ok(KvEngine::new(engine.mount_path(), config))
    }

    pub async fn delete_kv_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<(), VaultError> {
        self.mounts.delete_engine(engine).await
    }

    /// Writes `secret` unless the latest version already holds the same fields.
    pub async fn update_kv_secret(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        secret: &KvSecret,
    ) -> Result<(), VaultError> {
        let path = data_path(engine, secret);
        let cas = match self.fetch_version(&path).await {
            Ok(current) if current.data == secret.fields => {
                debug!(path = %path, version = current.metadata.version, "kv secret is up to date");
                return Ok(());
            }
            Ok(current) => current.metadata.version,
            Err(err) if err.is_does_not_exist() => 0,
            Err(err) => return Err(err).api_context("failed to check state of secret in vault"),
        };

        let request = WriteSecretRequest {
            options: CasOptions { cas },
            data: &secret.fields,
        };
        let mut response = JsonDecoder::<DataResponse<VersionMetadata>>::new();
        self.core
            .make_request(
                RequestMethod::Post,
                &path,
                Some(&Json(&request)),
                Some(&mut response),
            )
            .await
            .api_context(format!("failed to write kv secret {}", secret.path))?;
        info!(
            path = %path,
            cas,
            version = response.value().map(|r| r.data.version).unwrap_or_default(),
            "wrote kv secret"
        );
        Ok(())
    }

    pub async fn read_kv_secret(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        secret: &(impl SecretPathEntity + ?Sized),
    ) -> Result<KvSecret, VaultError> {
        let version = self.fetch_version(&data_path(engine, secret)).await?;
        Ok(KvSecret {
            path: secret.secret_path().to_string(),
            fields: version.data,
        })
    }

    /// Lists every secret below the engine, descending into nested folders.
    pub async fn list_kv_secrets(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<Vec<String>, VaultError> {
        let mount = engine.mount_path();
        let mut secrets = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(prefix) = pending.pop() {
            let mut response = JsonDecoder::<ListResponse>::new();
            match self
                .core
                .make_request(
                    RequestMethod::List,
                    &join_path(&["/v1", mount, "metadata", &prefix]),
                    None,
                    Some(&mut response),
                )
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_status(404) => continue,
                Err(err) => {
                    return Err(err).api_context(format!("failed to list secrets in kv engine {}", mount))
                }
            }

            for key in response.into_inner().map(|r| r.data.keys).unwrap_or_default() {
                let full = format!("{}{}", prefix, key);
                if key.ends_with('/') {
                    pending.push(full);
                } else {
                    secrets.push(full);
                }
            }
        }

        secrets.sort();
        Ok(secrets)
    }

    /// Deletes all versions and the metadata of a secret; absent secrets are not an error.
    pub async fn delete_kv_secret(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        secret: &(impl SecretPathEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let path = join_path(&["/v1", engine.mount_path(), "metadata", secret.secret_path()]);
        match self
            .core
            .make_request(RequestMethod::Delete, &path, None, None)
            .await
        {
            Ok(()) => {
                info!(path = %path, "deleted kv secret");
                Ok(())
            }
            Err(err) if err.is_status(404) => Ok(()),
            Err(err) => Err(err).api_context(format!("failed to delete kv secret {}", path)),
        }
    }

    async fn fetch_version(&self, path: &str) -> Result<SecretVersion, VaultError> {
        let mut response = JsonDecoder::<DataResponse<SecretVersion>>::new();
        match self
            .core
            .make_request(RequestMethod::Get, path, None, Some(&mut response))
            .await
        {
            Ok(()) => Ok(response.into_inner().map(|r| r.data).unwrap_or_default()),
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to fetch kv secret {}", path)),
        }
    }
}

fn data_path(
    engine: &(impl MountPathEntity + ?Sized),
    secret: &(impl SecretPathEntity + ?Sized),
) -> String {
    join_path(&["/v1", engine.mount_path(), "data", secret.secret_path()])
}
