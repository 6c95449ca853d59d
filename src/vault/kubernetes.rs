//! Kubernetes auth method: method config, roles and service account login.

use crate::vault::auth::{AuthMethod, AuthMethodApi, AuthType};
use crate::vault::auth_provider::{AuthProvider, AuthResponse, AuthToken};
use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, null_as_default, DataResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::{MountPathEntity, RoleNameEntity};
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::request::RequestMethod;
use crate::vault::source::StringSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Where the kubelet mounts the service account token inside a pod.
pub const DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesAuthConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubernetes_host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub pem_keys: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubernetes_ca_cert: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token_reviewer_jwt: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_iss_validation: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_local_ca_jwt: bool,
}

/// A role binding service accounts to Vault policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubernetesAuthRole {
    pub name: String,
    pub policies: Vec<String>,
    pub bound_namespaces: Vec<String>,
    pub bound_service_accounts: Vec<String>,
}

impl RoleNameEntity for KubernetesAuthRole {
    fn role_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RoleBody {
    #[serde(deserialize_with = "null_as_default")]
    bound_service_account_names: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    bound_service_account_namespaces: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    policies: Vec<String>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

async fn login(
    core: &VaultCore,
    method: &str,
    role: &str,
    jwt: &str,
) -> Result<AuthResponse, VaultError> {
    let mut response = JsonDecoder::<AuthResponse>::new();
    core.send_unauthenticated(
        RequestMethod::Post,
        &join_path(&["/v1/auth", method, "login"]),
        Some(&Json(&LoginRequest { role, jwt })),
        Some(&mut response),
    )
    .await
    .api_context("failed to login using kubernetes authentication")?;
    debug!(method, role, "logged in with kubernetes service account");
    Ok(response.into_inner().unwrap_or_default())
}

#[derive(Debug, Clone)]
pub struct KubernetesAuthApi {
    core: Arc<VaultCore>,
    auth: AuthMethodApi,
}

impl KubernetesAuthApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        let auth = AuthMethodApi::new(core.clone());
        KubernetesAuthApi { core, auth }
    }

    /// Enables the auth method at `method` if needed and writes `config` when it differs.
    pub async fn update_kubernetes_auth_method(
        &self,
        method: &(impl MountPathEntity + ?Sized),
        config: &KubernetesAuthConfig,
    ) -> Result<(), VaultError> {
        let path = method.mount_path();
        if !self
            .auth
            .has_auth_method(path)
            .await
            .api_context("failed to check if k8s auth method exists")?
        {
            self.auth
                .create_auth_method(&AuthMethod::new(path, AuthType::Kubernetes))
                .await
                .api_context("failed to create k8s auth method")?;
        }

        let current = match self.read_kubernetes_auth_config(path).await {
            Ok(current) => Some(current),
            Err(err) if err.is_does_not_exist() => None,
            Err(err) => return Err(err),
        };
        if current.as_ref() == Some(config) {
            debug!(path, "k8s auth config is up to date");
            return Ok(());
        }

        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1/auth", path, "config"]),
                Some(&Json(config)),
                None,
            )
            .await
            .api_context(format!("failed to configure k8s auth method at {}", path))?;
        info!(path, "configured k8s auth method");
        Ok(())
    }

    pub async fn read_kubernetes_auth_config(
        &self,
        method: &(impl MountPathEntity + ?Sized),
    ) -> Result<KubernetesAuthConfig, VaultError> {
        let path = method.mount_path();
        let mut response = JsonDecoder::<DataResponse<KubernetesAuthConfig>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1/auth", path, "config"]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => Ok(response.into_inner().map(|r| r.data).unwrap_or_default()),
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to read k8s auth config at {}", path)),
        }
    }

    pub async fn update_kubernetes_auth_role(
        &self,
        method: &(impl MountPathEntity + ?Sized),
        role: &KubernetesAuthRole,
    ) -> Result<(), VaultError> {
        match self.read_kubernetes_auth_role(method, role).await {
            Ok(current) if current == *role => {
                debug!(role = %role.name, "k8s auth role is up to date");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_does_not_exist() => {}
            Err(err) => {
                return Err(err).api_context("failed to check current state of k8s role");
            }
        }

        let body = RoleBody {
            bound_service_account_names: role.bound_service_accounts.clone(),
            bound_service_account_namespaces: role.bound_namespaces.clone(),
            policies: role.policies.clone(),
        };
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1/auth", method.mount_path(), "role", &role.name]),
                Some(&Json(&body)),
                None,
            )
            .await
            .api_context(format!("failed to write k8s auth role {}", role.name))?;
        info!(role = %role.name, "updated k8s auth role");
        Ok(())
    }

    pub async fn read_kubernetes_auth_role(
        &self,
        method: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
    ) -> Result<KubernetesAuthRole, VaultError> {
        let name = role.role_name();
        let mut response = JsonDecoder::<DataResponse<RoleBody>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1/auth", method.mount_path(), "role", name]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => {
                let body = response.into_inner().map(|r| r.data).unwrap_or_default();
                Ok(KubernetesAuthRole {
                    name: name.to_string(),
                    policies: body.policies,
                    bound_namespaces: body.bound_service_account_namespaces,
                    bound_service_accounts: body.bound_service_account_names,
                })
            }
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context(format!("failed to fetch k8s auth role {}", name)),
        }
    }

    /// Deletes the role; an absent role is not an error.
    pub async fn delete_kubernetes_auth_role(
        &self,
        method: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let name = role.role_name();
        match self
            .core
            .make_request(
                RequestMethod::Delete,
                &join_path(&["/v1/auth", method.mount_path(), "role", name]),
                None,
                None,
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_status(404) => Ok(()),
            Err(err) => Err(err).api_context(format!("failed to delete k8s auth role {}", name)),
        }
    }

    /// Logs in with a service account JWT. The session token is left untouched.
    pub async fn login(
        &self,
        method: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
        jwt: &str,
    ) -> Result<AuthResponse, VaultError> {
        login(&self.core, method.mount_path(), role.role_name(), jwt).await
    }
}

/// Authenticates a session through a Kubernetes auth method.
///
/// Role and JWT are fetched on every authentication, so a rotated projected
/// service account token is picked up on the next re-authentication.
#[derive(Debug, Clone)]
pub struct KubernetesAuthProvider {
    pub method: String,
    pub role: StringSource,
    pub jwt: StringSource,
}

impl KubernetesAuthProvider {
    pub fn new(method: impl Into<String>, role: impl Into<StringSource>, jwt: StringSource) -> Self {
        KubernetesAuthProvider {
            method: method.into(),
            role: role.into(),
            jwt,
        }
    }

    /// Uses the token the kubelet mounts into the pod.
    pub fn in_cluster(method: impl Into<String>, role: impl Into<StringSource>) -> Self {
        Self::new(
            method,
            role,
            StringSource::file(DEFAULT_SERVICE_ACCOUNT_TOKEN_PATH),
        )
    }
}

#[async_trait]
impl AuthProvider for KubernetesAuthProvider {
    async fn authenticate(&self, core: &VaultCore) -> Result<AuthToken, VaultError> {
        let role = self.role.fetch().api_context("failed to fetch k8s role name")?;
        let jwt = self.jwt.fetch().api_context("failed to fetch jwt")?;
        let response = login(core, &self.method, &role, &jwt).await?;
        Ok(AuthToken::from(response))
    }
}
