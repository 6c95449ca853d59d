//! Issuing, signing and revoking certificates, plus CRL maintenance.

use crate::vault::codec::{Encodable, Json, JsonDecoder};
use crate::vault::common::{join_path, DataResponse};
use crate::vault::entity::{MountPathEntity, RoleNameEntity, SerialNumberEntity};
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::pki::types::{Certificate, CertificateFormat, IssueCertOptions, SignCsrOptions, TidySettings};
use crate::vault::pki::PkiApi;
use crate::vault::request::RequestMethod;
use crate::vault::ttl::VaultTtl;
use serde::{Deserialize, Serialize};
use tracing::info;

fn comma_joined(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

#[derive(Serialize)]
struct IssueRequest<'a> {
    common_name: &'a str,
    format: CertificateFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    other_sans: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_sans: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri_sans: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<VaultTtl>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    exclude_cn_from_sans: bool,
}

#[derive(Serialize)]
struct SignRequest<'a> {
    csr: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    common_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alt_names: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    other_sans: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip_sans: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri_sans: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<VaultTtl>,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    serial_number: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RotateCrlData {
    success: bool,
}

impl PkiApi {
    /// Issues a new certificate and private key from `role`.
    pub async fn issue_certificate(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
        options: &IssueCertOptions,
    ) -> Result<Certificate, VaultError> {
        let role_name = role.role_name();
        let request = IssueRequest {
            common_name: &options.common_name,
            format: CertificateFormat::Pem,
            alt_names: comma_joined(&options.alt_names),
            other_sans: comma_joined(&options.other_sans),
            ip_sans: comma_joined(&options.ip_sans),
            uri_sans: comma_joined(&options.uri_sans),
            ttl: options.ttl,
            exclude_cn_from_sans: options.exclude_cn_from_sans,
        };
        let certificate = self
            .certificate_request(&["/v1", ca.mount_path(), "issue", role_name], &Json(&request))
            .await
            .api_context("failed to issue certificate from role")?;
        info!(
            role = role_name,
            common_name = %options.common_name,
            serial_number = %certificate.serial_number,
            "issued certificate"
        );
        Ok(certificate)
    }

    /// Signs a CSR under the constraints of `role`.
    pub async fn sign_csr(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        role: &(impl RoleNameEntity + ?Sized),
        options: &SignCsrOptions,
    ) -> Result<Certificate, VaultError> {
        let request = SignRequest {
            csr: &options.csr,
            common_name: Some(options.common_name.as_str()).filter(|name| !name.is_empty()),
            alt_names: comma_joined(&options.alt_names),
            other_sans: comma_joined(&options.other_sans),
            ip_sans: comma_joined(&options.ip_sans),
            uri_sans: comma_joined(&options.uri_sans),
            ttl: options.ttl,
        };
        self.certificate_request(&["/v1", ca.mount_path(), "sign", role.role_name()], &Json(&request))
            .await
            .api_context("failed to sign csr with role")
    }

    pub async fn revoke_certificate(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        serial: &(impl SerialNumberEntity + ?Sized),
    ) -> Result<(), VaultError> {
        let serial_number = serial.serial_number();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", ca.mount_path(), "revoke"]),
                Some(&Json(&RevokeRequest { serial_number })),
                None,
            )
            .await
            .api_context("failed to revoke certificate")?;
        info!(serial_number, "revoked certificate");
        Ok(())
    }

    /// Removes expired and revoked certificates from the engine's storage.
    pub async fn tidy(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        settings: &TidySettings,
    ) -> Result<(), VaultError> {
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", ca.mount_path(), "tidy"]),
                Some(&Json(settings)),
                None,
            )
            .await
            .api_context("failed to tidy vault pki storage")
    }

    pub async fn rotate_crls(&self, ca: &(impl MountPathEntity + ?Sized)) -> Result<(), VaultError> {
        let mut response = JsonDecoder::<DataResponse<RotateCrlData>>::new();
        self.core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", ca.mount_path(), "crl", "rotate"]),
                None,
                Some(&mut response),
            )
            .await
            .api_context("failed to rotate CRLs")?;
        if !response.into_inner().map(|r| r.data.success).unwrap_or(false) {
            return Err(VaultError::api("CRL rotation was not successful"));
        }
        Ok(())
    }

    async fn certificate_request(
        &self,
        segments: &[&str],
        request: &dyn Encodable,
    ) -> Result<Certificate, VaultError> {
        let mut response = JsonDecoder::<DataResponse<Certificate>>::new();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(segments),
                Some(request),
                Some(&mut response),
            )
            .await?;
        response
            .into_inner()
            .map(|r| r.data)
            .ok_or_else(|| VaultError::api("empty certificate response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::test_utils::core_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn certificate_body() -> serde_json::Value {
        json!({
            "data": {
                "certificate": "LEAF",
                "issuing_ca": "INT",
                "ca_chain": ["INT", "ROOT"],
                "private_key": "KEY",
                "private_key_type": "rsa",
                "serial_number": "12:03"
            }
        })
    }

    #[tokio::test]
    async fn test_issue_certificate_joins_sans() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pki/issue/web"))
            .and(body_json(json!({
                "common_name": "example.com",
                "format": "pem",
                "alt_names": "a.example.com,b.example.com",
                "ip_sans": "127.0.0.1",
                "ttl": 3600
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(certificate_body()))
            .expect(1)
            .mount(&server)
            .await;

        let api = PkiApi::new(core_for(&server).await);
        let options = IssueCertOptions {
            common_name: "example.com".to_string(),
            alt_names: vec!["a.example.com".to_string(), "b.example.com".to_string()],
            ip_sans: vec!["127.0.0.1".to_string()],
            ttl: Some(VaultTtl::from_secs(3600)),
            ..Default::default()
        };
        let cert = api.issue_certificate("pki", "web", &options).await.unwrap();
        assert_eq!(cert.serial_number, "12:03");
        assert_eq!(cert.ca_chain, vec!["INT", "ROOT"]);
    }

    #[tokio::test]
    async fn test_sign_csr_and_revoke() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pki/sign/web"))
            .and(body_json(json!({"csr": "CSR"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(certificate_body()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pki/revoke"))
            .and(body_json(json!({"serial_number": "12:03"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"revocation_time": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        let api = PkiApi::new(core_for(&server).await);
        let options = SignCsrOptions {
            csr: "CSR".to_string(),
            ..Default::default()
        };
        let cert = api.sign_csr("pki", "web", &options).await.unwrap();
        api.revoke_certificate("pki", &cert).await.unwrap();
    }

    #[tokio::test]
    async fn test_rotate_crls_requires_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/good/crl/rotate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"success": true}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/bad/crl/rotate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"success": false}})))
            .mount(&server)
            .await;

        let api = PkiApi::new(core_for(&server).await);
        api.rotate_crls("good").await.unwrap();
        let err = api.rotate_crls("bad").await.unwrap_err();
        assert!(err.to_string().contains("CRL rotation was not successful"));
    }

    #[tokio::test]
    async fn test_tidy_sends_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/pki/tidy"))
            .and(body_json(json!({"tidy_cert_store": true, "tidy_revoked_certs": true, "safety_buffer": 259200})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let api = PkiApi::new(core_for(&server).await);
        let settings = TidySettings {
            tidy_cert_store: true,
            tidy_revoked_certs: true,
            safety_buffer: Some(VaultTtl::from_secs(259200)),
        };
        api.tidy("pki", &settings).await.unwrap();
    }
}
