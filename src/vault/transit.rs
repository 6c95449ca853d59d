//! Transit secrets engine operations for Vault.
//!
//! This module manages transit engines and their named keys, and exposes the
//! encrypt, decrypt, sign and verify operations. Plaintext and signature inputs
//! travel base64 encoded; [`Base64Blob`] takes care of that on the wire.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, DataResponse, ListResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::{KeyNameEntity, MountPathEntity};
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::mount::{Mount, MountApi};
use crate::vault::request::RequestMethod;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Plugin name used when an engine does not name one.
pub const DEFAULT_TRANSIT_PLUGIN: &str = "transit";

const DELETION_NOT_ALLOWED: &str = "deletion is not allowed for this key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitKeyType {
    #[serde(rename = "aes128-gcm96")]
    Aes128Gcm96,
    #[serde(rename = "aes256-gcm96")]
    Aes256Gcm96,
    #[serde(rename = "chacha20-poly1305")]
    Chacha20Poly1305,
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa-p256")]
    EcdsaP256,
    #[serde(rename = "ecdsa-p384")]
    EcdsaP384,
    #[serde(rename = "ecdsa-p521")]
    EcdsaP521,
    #[serde(rename = "rsa-2048")]
    Rsa2048,
    #[serde(rename = "rsa-3072")]
    Rsa3072,
    #[serde(rename = "rsa-4096")]
    Rsa4096,
}

impl TransitKeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitKeyType::Aes128Gcm96 => "aes128-gcm96",
            TransitKeyType::Aes256Gcm96 => "aes256-gcm96",
            TransitKeyType::Chacha20Poly1305 => "chacha20-poly1305",
            TransitKeyType::Ed25519 => "ed25519",
            TransitKeyType::EcdsaP256 => "ecdsa-p256",
            TransitKeyType::EcdsaP384 => "ecdsa-p384",
            TransitKeyType::EcdsaP521 => "ecdsa-p521",
            TransitKeyType::Rsa2048 => "rsa-2048",
            TransitKeyType::Rsa3072 => "rsa-3072",
            TransitKeyType::Rsa4096 => "rsa-4096",
        }
    }

    /// True for key types that can encrypt and decrypt.
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            TransitKeyType::Aes128Gcm96 | TransitKeyType::Aes256Gcm96 | TransitKeyType::Chacha20Poly1305
        )
    }
}

impl fmt::Display for TransitKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransitKeyType {
    type Err = VaultError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(value.to_string()))
            .map_err(|_| VaultError::request(format!("unknown transit key type {}", value)))
    }
}

/// Tunable settings of a transit key. Zero and false values are not sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitKeyConfig {
    #[serde(skip_serializing_if = "is_zero")]
    pub min_decryption_version: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub min_encryption_version: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deletion_allowed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exportable: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub allow_plaintext_backup: bool,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl TransitKeyConfig {
    // Vault reports a minimum decryption version of 1 for keys where none was set.
    fn normalized(mut self) -> Self {
        self.min_decryption_version = self.min_decryption_version.max(1);
        self
    }

    fn matches(&self, other: &TransitKeyConfig) -> bool {
        self.normalized() == other.normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitKey {
    pub name: String,
    pub key_type: TransitKeyType,
    /// When absent, an existing key's config is left alone and a new key gets the defaults.
    pub config: Option<TransitKeyConfig>,
}

impl TransitKey {
    pub fn new(name: impl Into<String>, key_type: TransitKeyType) -> Self {
        TransitKey {
            name: name.into(),
            key_type,
            config: None,
        }
    }

    pub fn with_config(mut self, config: TransitKeyConfig) -> Self {
        self.config = Some(config);
        self
    }
}

impl KeyNameEntity for TransitKey {
    fn key_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitCacheConfig {
    pub size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitEngineConfig {
    pub cache: TransitCacheConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitEngine {
    pub path: String,
    /// Mount type of the engine; empty means [`DEFAULT_TRANSIT_PLUGIN`].
    pub plugin_name: String,
    pub config: Option<TransitEngineConfig>,
}

impl TransitEngine {
    pub fn new(path: impl Into<String>) -> Self {
        TransitEngine {
            path: path.into(),
            plugin_name: String::new(),
            config: None,
        }
    }

    pub fn with_config(mut self, config: TransitEngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    fn plugin(&self) -> &str {
        if self.plugin_name.is_empty() {
            DEFAULT_TRANSIT_PLUGIN
        } else {
            &self.plugin_name
        }
    }
}

impl MountPathEntity for TransitEngine {
    fn mount_path(&self) -> &str {
        &self.path
    }
}

/// Bytes that travel as a base64 string in JSON bodies.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Base64Blob(pub Vec<u8>);

impl fmt::Debug for Base64Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base64Blob({} bytes)", self.0.len())
    }
}

impl Serialize for Base64Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Base64Blob)
            .map_err(de::Error::custom)
    }
}

#[derive(Debug, Deserialize)]
struct ReadKeyData {
    #[serde(rename = "type")]
    key_type: TransitKeyType,
    #[serde(flatten)]
    config: TransitKeyConfig,
}

#[derive(Serialize)]
struct CreateKeyRequest {
    #[serde(rename = "type")]
    key_type: TransitKeyType,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    plaintext: &'a Base64Blob,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: Base64Blob,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    input: &'a Base64Blob,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<&'a str>,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

#[derive(Debug, Clone)]
pub struct TransitApi {
    core: Arc<VaultCore>,
    mounts: MountApi,
}

impl TransitApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        let mounts = MountApi::new(core.clone());
        TransitApi { core, mounts }
    }

    /// Mounts the engine if needed and applies its cache config.
    ///
    /// A changed cache config only takes effect after the plugin backends are
    /// reloaded, so that happens right after the write.
    pub async fn update_transit_engine(&self, engine: &TransitEngine) -> Result<(), VaultError> {
        let mount = Mount::new(engine.path.as_str(), engine.plugin());
        self.mounts
            .ensure_engine(&mount)
            .await
            .api_context(format!("failed to create transit engine at {}", engine.path))?;

        let Some(desired) = engine.config else {
            return Ok(());
        };
        match self.read_cache_config(engine).await {
            Ok(current) if current == desired.cache => {
                debug!(path = %engine.path, "transit cache config is up to date");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_does_not_exist() => {}
            Err(err) => return Err(err),
        }

        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", &engine.path, "cache-config"]),
                Some(&Json(&desired.cache)),
                None,
            )
            .await
            .api_context("failed to write transit engine config")?;
        self.mounts
            .reload_plugin_backends(engine.plugin())
            .await
            .api_context("failed to reload plugin backends so changes to the transit cache are live immediately")?;
        info!(path = %engine.path, size = desired.cache.size, "updated transit cache config");
        Ok(())
    }

    pub async fn read_transit_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<TransitEngine, VaultError> {
        let mount = self.mounts.read_mount(engine).await?;
        let cache = self.read_cache_config(engine).await?;
        Ok(TransitEngine {
            path: mount.path,
            plugin_name: mount.engine_type.to_string(),
            config: Some(TransitEngineConfig { cache }),
        })
    }

    pub async fn delete_transit_engine(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<(), VaultError> {
        self.mounts.delete_engine(engine).await
    }

    async fn read_cache_config(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<TransitCacheConfig, VaultError> {
        let path = engine.mount_path();
        let mut response = JsonDecoder::<DataResponse<TransitCacheConfig>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", path, "cache-config"]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => Ok(response.into_inner().map(|r| r.data).unwrap_or_default()),
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to fetch transit engine config of {}", path)),
        }
    }

    /// Creates the key if needed and writes its config when it differs.
    ///
    /// The type of an existing key cannot change; asking for a different type
    /// fails without sending any write.
    pub async fn update_transit_key(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &TransitKey,
    ) -> Result<(), VaultError> {
        let path = engine.mount_path();
        let current = match self.read_transit_key(engine, key).await {
            Ok(current) => Some(current),
            Err(err) if err.is_does_not_exist() => None,
            Err(err) => return Err(err).api_context("failed to check current state of transit key"),
        };

        let config_update_required = match &current {
            Some(current) if current.key_type != key.key_type => {
                return Err(VaultError::api(
                    "a key with this name but different type already exists in the engine, key type is immutable after creation",
                ));
            }
            Some(current) => match (&key.config, &current.config) {
                (Some(desired), Some(actual)) => !desired.matches(actual),
                (Some(_), None) => true,
                (None, _) => false,
            },
            None => true,
        };

        if current.is_none() {
            self.core
                .make_request(
                    RequestMethod::Post,
                    &join_path(&["/v1", path, "keys", &key.name]),
                    Some(&Json(&CreateKeyRequest {
                        key_type: key.key_type,
                    })),
                    None,
                )
                .await
                .api_context(format!("failed to create transit key {}", key.name))?;
            info!(path, key = %key.name, key_type = %key.key_type, "created transit key");
        }

        if config_update_required {
            // A freshly created key is always configured, with defaults when none is given.
            let config = key.config.unwrap_or_default();
            self.core
                .make_request(
                    RequestMethod::Post,
                    &join_path(&["/v1", path, "keys", &key.name, "config"]),
                    Some(&Json(&config)),
                    None,
                )
                .await
                .api_context(format!("failed to update config of transit key {}", key.name))?;
            info!(path, key = %key.name, "updated transit key config");
        }
        Ok(())
    }

    pub async fn read_transit_key(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
    ) -> Result<TransitKey, VaultError> {
        let name = key.key_name();
        let mut response = JsonDecoder::<DataResponse<ReadKeyData>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", engine.mount_path(), "keys", name]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => {
                let data = response
                    .into_inner()
                    .map(|r| r.data)
                    .ok_or_else(|| VaultError::api(format!("empty response for transit key {}", name)))?;
                Ok(TransitKey {
                    name: name.to_string(),
                    key_type: data.key_type,
                    config: Some(data.config),
                })
            }
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to fetch transit key {}", name)),
        }
    }

    /// Lists the key names of the engine; an engine without keys yields an empty list.
    pub async fn list_transit_keys(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
    ) -> Result<Vec<String>, VaultError> {
        let path = engine.mount_path();
        let mut response = JsonDecoder::<ListResponse>::new();
        match self
            .core
            .make_request(
                RequestMethod::List,
                &join_path(&["/v1", path, "keys"]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => Ok(response.into_inner().map(|r| r.data.keys).unwrap_or_default()),
            Err(err) if err.is_status(404) => Ok(Vec::new()),
            Err(err) => Err(err).api_context(format!("failed to list keys in transit engine {}", path)),
        }
    }

    pub async fn rotate_transit_key(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let name = key.key_name();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", engine.mount_path(), "keys", name, "rotate"]),
                None,
                None,
            )
            .await
            .api_context(format!("failed to rotate transit key {}", name))?;
        info!(key = name, "rotated transit key");
        Ok(())
    }

    /// Deletes a transit key.
    ///
    /// Only a refusal because the key does not allow deletion is reported as an
    /// error. Other error statuses, 404 included, count as deleted. Transport
    /// failures are returned.
    pub async fn delete_transit_key(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let name = key.key_name();
        match self
            .core
            .make_request(
                RequestMethod::Delete,
                &join_path(&["/v1", engine.mount_path(), "keys", name]),
                None,
                None,
            )
            .await
        {
            Ok(()) => {
                info!(key = name, "deleted transit key");
                Ok(())
            }
            Err(err @ VaultError::HttpStatus { status: 400, .. })
                if err
                    .remote_errors()
                    .iter()
                    .any(|message| message.contains(DELETION_NOT_ALLOWED)) =>
            {
                Err(err)
            }
            Err(VaultError::HttpStatus { status, messages }) => {
                if status != 404 {
                    warn!(key = name, status, ?messages, "ignoring error while deleting transit key");
                }
                Ok(())
            }
            Err(err) => Err(err).api_context(format!("failed to delete transit key {}", name)),
        }
    }

    /// Encrypts `plaintext` with the named key.
    ///
    /// # Returns
    ///
    /// The ciphertext in Vault's `vault:v<version>:<data>` format.
    pub async fn encrypt(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
        plaintext: &[u8],
    ) -> Result<String, VaultError> {
        let blob = Base64Blob(plaintext.to_vec());
        let response: EncryptResponse = self
            .crypto_request(engine, key, "encrypt", &EncryptRequest { plaintext: &blob })
            .await
            .api_context("failed to encrypt plain text")?;
        Ok(response.ciphertext)
    }

    pub async fn decrypt(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
        ciphertext: &str,
    ) -> Result<Vec<u8>, VaultError> {
        let response: DecryptResponse = self
            .crypto_request(engine, key, "decrypt", &DecryptRequest { ciphertext })
            .await
            .api_context("failed to decrypt cipher text")?;
        Ok(response.plaintext.0)
    }

    /// Signs `input`; symmetric keys are rejected by Vault and the error is returned.
    pub async fn sign(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
        input: &[u8],
    ) -> Result<String, VaultError> {
        let blob = Base64Blob(input.to_vec());
        let request = SignRequest {
            input: &blob,
            signature: None,
        };
        let response: SignResponse = self
            .crypto_request(engine, key, "sign", &request)
            .await
            .api_context("failed to sign data")?;
        Ok(response.signature)
    }

    pub async fn verify(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
        input: &[u8],
        signature: &str,
    ) -> Result<bool, VaultError> {
        let blob = Base64Blob(input.to_vec());
        let request = SignRequest {
            input: &blob,
            signature: Some(signature),
        };
        let response: VerifyResponse = self
            .crypto_request(engine, key, "verify", &request)
            .await
            .api_context("failed to verify signature")?;
        Ok(response.valid)
    }

    async fn crypto_request<Req, Resp>(
        &self,
        engine: &(impl MountPathEntity + ?Sized),
        key: &(impl KeyNameEntity + ?Sized),
        operation: &str,
        request: &Req,
    ) -> Result<Resp, VaultError>
    where
        Req: Serialize + Sync,
        Resp: serde::de::DeserializeOwned + Send,
    {
        let path = join_path(&["/v1", engine.mount_path(), operation, key.key_name()]);
        let mut response = JsonDecoder::<DataResponse<Resp>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Post,
                &path,
                Some(&Json(request)),
                Some(&mut response),
            )
            .await
        {
            Ok(()) => response
                .into_inner()
                .map(|r| r.data)
                .ok_or_else(|| VaultError::coding(format!("empty response from {}", path))),
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::error::ErrorKind;
    use crate::vault::test_utils::{core_for, request_count};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key_body(key_type: &str) -> serde_json::Value {
        json!({
            "data": {
                "name": "k",
                "type": key_type,
                "min_decryption_version": 1,
                "min_encryption_version": 0,
                "deletion_allowed": false,
                "exportable": false,
                "allow_plaintext_backup": false,
                "latest_version": 1,
                "supports_encryption": true
            }
        })
    }

    #[test]
    fn test_base64_blob_wire_format() {
        let blob = Base64Blob(b"ASDF ASDF".to_vec());
        assert_eq!(serde_json::to_value(&blob).unwrap(), json!("QVNERiBBU0RG"));
        let decoded: Base64Blob = serde_json::from_value(json!("QVNERiBBU0RG")).unwrap();
        assert_eq!(decoded, blob);
        assert!(serde_json::from_value::<Base64Blob>(json!("not base64!")).is_err());
    }

    #[test]
    fn test_key_type_parsing() {
        assert_eq!("rsa-2048".parse::<TransitKeyType>().unwrap(), TransitKeyType::Rsa2048);
        assert!("hmac".parse::<TransitKeyType>().is_err());
        assert!(TransitKeyType::Chacha20Poly1305.is_symmetric());
        assert!(!TransitKeyType::Ed25519.is_symmetric());
    }

    #[tokio::test]
    async fn test_update_key_rejects_type_change_without_writes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/managed/transit/keys/k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_body("aes256-gcm96")))
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let key = TransitKey::new("k", TransitKeyType::Rsa2048)
            .with_config(TransitKeyConfig::default());
        let err = api.update_transit_key("managed/transit", &key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("key type is immutable"));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
    }

    #[tokio::test]
    async fn test_update_key_creates_then_configures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/managed/transit/keys/k"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/keys/k"))
            .and(body_json(json!({"type": "ed25519"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/keys/k/config"))
            .and(body_json(json!({"deletion_allowed": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let key = TransitKey::new("k", TransitKeyType::Ed25519).with_config(TransitKeyConfig {
            deletion_allowed: true,
            ..Default::default()
        });
        api.update_transit_key("managed/transit", &key).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_key_configures_new_key_with_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/managed/transit/keys/rsa"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/keys/rsa"))
            .and(body_json(json!({"type": "rsa-2048"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/keys/rsa/config"))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let key = TransitKey::new("rsa", TransitKeyType::Rsa2048);
        api.update_transit_key("managed/transit", &key).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_key_is_noop_when_config_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/managed/transit/keys/k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(key_body("aes256-gcm96")))
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let key = TransitKey::new("k", TransitKeyType::Aes256Gcm96)
            .with_config(TransitKeyConfig::default());
        api.update_transit_key("managed/transit", &key).await.unwrap();
        assert_eq!(request_count(&server, "POST", "/v1/managed/transit/keys/k").await, 0);
        assert_eq!(
            request_count(&server, "POST", "/v1/managed/transit/keys/k/config").await,
            0
        );
    }

    #[tokio::test]
    async fn test_delete_key_surfaces_only_deletion_refusal() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/managed/transit/keys/locked"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["deletion is not allowed for this key"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/managed/transit/keys/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/managed/transit/keys/odd"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"errors": ["something else"]})))
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let err = api
            .delete_transit_key("managed/transit", "locked")
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(400));
        api.delete_transit_key("managed/transit", "gone").await.unwrap();
        api.delete_transit_key("managed/transit", "odd").await.unwrap();
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_wire_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/encrypt/k"))
            .and(body_json(json!({"plaintext": "aGVsbG8="})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"ciphertext": "vault:v1:abcd", "key_version": 1}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/decrypt/k"))
            .and(body_json(json!({"ciphertext": "vault:v1:abcd"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"plaintext": "aGVsbG8="}
            })))
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let ciphertext = api.encrypt("managed/transit", "k", b"hello").await.unwrap();
        assert_eq!(ciphertext, "vault:v1:abcd");
        let plaintext = api.decrypt("managed/transit", "k", &ciphertext).await.unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[tokio::test]
    async fn test_sign_with_symmetric_key_surfaces_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/sign/aes"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["key type aes256-gcm96 does not support signing"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/verify/rsa"))
            .and(body_json(json!({"input": "QVNERiBBU0RG", "signature": "vault:v1:sig"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"valid": true}})))
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let err = api.sign("managed/transit", "aes", b"ASDF ASDF").await.unwrap_err();
        assert_eq!(
            err.remote_errors(),
            ["key type aes256-gcm96 does not support signing".to_string()]
        );
        assert!(api
            .verify("managed/transit", "rsa", b"ASDF ASDF", "vault:v1:sig")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_verify_malformed_signature_surfaces_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/verify/rsa"))
            .and(body_json(json!({"input": "QVNERiBBU0RG", "signature": "vault:v1:aaaa"})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": ["invalid signature"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let err = api
            .verify("managed/transit", "rsa", b"ASDF ASDF", "vault:v1:aaaa")
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(400));
        assert_eq!(err.remote_errors(), ["invalid signature".to_string()]);
        assert_eq!(err.kind(), ErrorKind::Api);
    }

    #[tokio::test]
    async fn test_engine_cache_change_reloads_plugin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/mounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"managed/transit/": {"type": "transit", "options": null}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/managed/transit/cache-config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"size": 0}})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/managed/transit/cache-config"))
            .and(body_json(json!({"size": 500})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/plugins/reload/backend"))
            .and(body_json(json!({"plugin": "transit", "scope": "global"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let api = TransitApi::new(core_for(&server).await);
        let engine = TransitEngine::new("managed/transit").with_config(TransitEngineConfig {
            cache: TransitCacheConfig { size: 500 },
        });
        api.update_transit_engine(&engine).await.unwrap();
        assert_eq!(request_count(&server, "POST", "/v1/sys/mounts/managed/transit").await, 0);
    }
}
