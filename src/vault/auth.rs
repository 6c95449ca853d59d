//! Authentication method mounts under `/v1/sys/auth`.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, trim_slashes, DataResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::MountPathEntity;
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::request::RequestMethod;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthType {
    Kubernetes,
    Token,
    Other(String),
}

impl AuthType {
    pub fn as_str(&self) -> &str {
        match self {
            AuthType::Kubernetes => "kubernetes",
            AuthType::Token => "token",
            AuthType::Other(other) => other,
        }
    }
}

impl From<String> for AuthType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "kubernetes" => AuthType::Kubernetes,
            "token" => AuthType::Token,
            _ => AuthType::Other(value),
        }
    }
}

impl From<AuthType> for String {
    fn from(value: AuthType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enabled auth method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthMethod {
    pub path: String,
    pub method_type: AuthType,
}

impl AuthMethod {
    pub fn new(path: impl Into<String>, method_type: AuthType) -> Self {
        AuthMethod {
            path: path.into(),
            method_type,
        }
    }
}

impl MountPathEntity for AuthMethod {
    fn mount_path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Deserialize)]
struct AuthListEntry {
    #[serde(rename = "type")]
    method_type: AuthType,
}

#[derive(Serialize)]
struct CreateAuthMethodRequest<'a> {
    #[serde(rename = "type")]
    method_type: &'a str,
}

#[derive(Debug, Clone)]
pub struct AuthMethodApi {
    core: Arc<VaultCore>,
}

impl AuthMethodApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        AuthMethodApi { core }
    }

    pub async fn list_auth_methods(&self) -> Result<Vec<AuthMethod>, VaultError> {
        let mut response = JsonDecoder::<DataResponse<HashMap<String, AuthListEntry>>>::new();
        self.core
            .make_request(RequestMethod::Get, "/v1/sys/auth", None, Some(&mut response))
            .await
            .api_context("failed to list auth methods")?;

        let mut methods: Vec<AuthMethod> = response
            .into_inner()
            .map(|r| r.data)
            .unwrap_or_default()
            .into_iter()
            .map(|(path, entry)| AuthMethod::new(trim_slashes(&path), entry.method_type))
            .collect();
        methods.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(methods)
    }

    pub async fn has_auth_method(
        &self,
        method: &(impl MountPathEntity + ?Sized),
    ) -> Result<bool, VaultError> {
        let path = trim_slashes(method.mount_path());
        let methods = self.list_auth_methods().await?;
        Ok(methods.iter().any(|m| m.path == path))
    }

    /// Reads an auth method; [`VaultError::DoesNotExist`] if nothing is mounted at the path.
    pub async fn read_auth_method(
        &self,
        method: &(impl MountPathEntity + ?Sized),
    ) -> Result<AuthMethod, VaultError> {
        let path = trim_slashes(method.mount_path());
        self.list_auth_methods()
            .await?
            .into_iter()
            .find(|m| m.path == path)
            .ok_or(VaultError::DoesNotExist)
    }

    /// Enables an auth method. Vault rejects a second method at the same path.
    pub async fn create_auth_method(&self, method: &AuthMethod) -> Result<(), VaultError> {
        let request = CreateAuthMethodRequest {
            method_type: method.method_type.as_str(),
        };
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1/sys/auth", &method.path]),
                Some(&Json(&request)),
                None,
            )
            .await
            .api_context(format!(
                "failed to create {} auth method at {}",
                method.method_type, method.path
            ))?;
        info!(path = %method.path, method_type = %method.method_type, "created auth method");
        Ok(())
    }

    /// Disables an auth method; an absent method is not an error.
    pub async fn delete_auth_method(
        &self,
        method: &(impl MountPathEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let path = method.mount_path();
        match self
            .core
            .make_request(
                RequestMethod::Delete,
                &join_path(&["/v1/sys/auth", path]),
                None,
                None,
            )
            .await
        {
            Ok(()) => {
                info!(path, "deleted auth method");
                Ok(())
            }
            Err(err) if err.is_status(404) => Ok(()),
            Err(err) => Err(err).api_context(format!("failed to delete auth method at {}", path)),
        }
    }
}
