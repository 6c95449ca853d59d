//! Certificate roles of a PKI engine.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, DataResponse};
use crate::vault::entity::{MountPathEntity, RoleNameEntity};
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::pki::types::{CertificateRole, RoleSettings, SubjectSettings};
use crate::vault::pki::PkiApi;
use crate::vault::request::RequestMethod;
use crate::vault::ttl::VaultTtl;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct RoleRequest<'a> {
    #[serde(flatten)]
    settings: &'a RoleSettings,
    #[serde(flatten)]
    subject: &'a SubjectSettings,
}

#[derive(Deserialize)]
struct RoleData {
    #[serde(flatten)]
    settings: RoleSettings,
    #[serde(flatten)]
    subject: SubjectSettings,
}

fn non_zero(ttl: Option<VaultTtl>) -> Option<VaultTtl> {
    ttl.filter(|ttl| !ttl.is_zero())
}

// Vault reports unset durations as 0.
fn normalized(settings: &RoleSettings) -> RoleSettings {
    RoleSettings {
        ttl: non_zero(settings.ttl),
        max_ttl: non_zero(settings.max_ttl),
        not_before_duration: non_zero(settings.not_before_duration),
        ..settings.clone()
    }
}

fn role_matches(desired: &CertificateRole, current: &CertificateRole) -> bool {
    normalized(&desired.settings) == normalized(&current.settings) && desired.subject == current.subject
}

impl PkiApi {
    /// Writes the role unless Vault already holds the same settings.
    pub async fn update_certificate_role(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        role: &CertificateRole,
    ) -> Result<(), VaultError> {
        let path = ca.mount_path();
        match self.read_certificate_role(ca, role).await {
            Ok(current) if role_matches(role, &current) => {
                debug!(path, role = %role.name, "certificate role is up to date");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_does_not_exist() => {}
            Err(err) => return Err(err).api_context("failed to check current state of certificate role"),
        }

        let request = RoleRequest {
            settings: &role.settings,
            subject: &role.subject,
        };
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", path, "roles", &role.name]),
                Some(&Json(&request)),
                None,
            )
            .await
            .api_context("failed to update role in pki engine")?;
        info!(path, role = %role.name, "updated certificate role");
        Ok(())
    }

    pub async fn read_certificate_role(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
    ) -> Result<CertificateRole, VaultError> {
        let name = role.role_name();
        let mut response = JsonDecoder::<DataResponse<RoleData>>::new();
        match self
            .core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", ca.mount_path(), "roles", name]),
                None,
                Some(&mut response),
            )
            .await
        {
            Ok(()) => {
                let data = response
                    .into_inner()
                    .map(|r| r.data)
                    .ok_or_else(|| VaultError::api(format!("empty response for certificate role {}", name)))?;
                Ok(CertificateRole {
                    name: name.to_string(),
                    settings: data.settings,
                    subject: data.subject,
                })
            }
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context("failed to read cert role from pki engine"),
        }
    }

    pub async fn delete_certificate_role(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let name = role.role_name();
        match self
            .core
            .make_request(
                RequestMethod::Delete,
                &join_path(&["/v1", ca.mount_path(), "roles", name]),
                None,
                None,
            )
            .await
        {
            Ok(()) => {
                info!(role = name, "deleted certificate role");
                Ok(())
            }
            Err(err) if err.is_status(404) => Ok(()),
            Err(err) => Err(err).api_context("failed to delete cert role from pki engine"),
        }
    }
}
