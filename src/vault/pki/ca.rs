//! Root and intermediate certificate authorities.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, DataResponse};
use crate::vault::entity::MountPathEntity;
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::pki::serial::{certificate_serial, certificate_subject, parse_certificate, private_key_type};
use crate::vault::pki::types::{
    CaInfo, CaMode, CaSettings, CertificateAuthority, CertificateFormat, CertificateUrls, ImportedCert,
    PkiEngine, PkiKeyType, Subject,
};
use crate::vault::pki::PkiApi;
use crate::vault::request::RequestMethod;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct GenerateCaRequest<'a> {
    #[serde(flatten)]
    subject: &'a Subject,
    #[serde(flatten)]
    settings: &'a CaSettings,
}

#[derive(Serialize)]
struct SignIntermediateRequest<'a> {
    csr: &'a str,
    format: CertificateFormat,
    #[serde(flatten)]
    subject: &'a Subject,
    #[serde(flatten)]
    settings: &'a CaSettings,
}

#[derive(Serialize)]
struct ImportCaRequest {
    pem_bundle: String,
}

#[derive(Serialize)]
struct SetSignedRequest<'a> {
    certificate: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NewCaData {
    issuing_ca: String,
    serial_number: String,
    private_key: String,
    #[serde(deserialize_with = "crate::vault::common::empty_as_none")]
    private_key_type: Option<PkiKeyType>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChainData {
    certificate: String,
}

/// CSR of an intermediate CA waiting to be signed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IntermediateCsr {
    pub csr: String,
    /// Only set for [`CaMode::Exported`].
    pub private_key: String,
    #[serde(deserialize_with = "crate::vault::common::empty_as_none")]
    pub private_key_type: Option<PkiKeyType>,
}

impl std::fmt::Debug for IntermediateCsr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntermediateCsr")
            .field("csr", &self.csr)
            .field("private_key_exported", &!self.private_key.is_empty())
            .finish()
    }
}

/// Certificate returned by the issuer for an intermediate CSR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SignedIntermediate {
    pub certificate: String,
    pub issuing_ca: String,
    pub serial_number: String,
}

/// An imported bundle after its key type and serial number have been determined.
struct ParsedImport {
    private_key: String,
    private_key_type: PkiKeyType,
    serial_number: String,
}

fn parse_imported_cert(cert: &ImportedCert) -> Result<ParsedImport, VaultError> {
    let private_key_type =
        private_key_type(&cert.private_key).api_context("failed to parse private key block")?;
    let certificate = parse_certificate(&cert.certificate)?;
    Ok(ParsedImport {
        private_key: cert.private_key.trim().to_string(),
        private_key_type,
        serial_number: certificate_serial(&certificate)?,
    })
}

impl ParsedImport {
    fn into_ca_data(self, issuing_ca: String, mode: CaMode) -> NewCaData {
        let exported = mode == CaMode::Exported;
        NewCaData {
            issuing_ca,
            serial_number: self.serial_number,
            private_key: if exported { self.private_key } else { String::new() },
            private_key_type: exported.then_some(self.private_key_type),
        }
    }
}

impl PkiApi {
    /// Creates a root CA: mounts and tunes the engine, then imports or generates
    /// the CA and points the issuing and CRL URLs at the engine.
    ///
    /// Fails if the engine already holds a CA.
    pub async fn create_root_ca(&self, mode: CaMode, ca: &CertificateAuthority) -> Result<CaInfo, VaultError> {
        self.ensure_uninitialized(ca).await?;
        self.update_pki_engine(&ca.engine())
            .await
            .api_context("failed to update pki engine")?;

        let data = match &ca.imported_cert {
            Some(imported) => {
                let parsed = parse_imported_cert(imported).api_context("failed to parse imported cert")?;
                self.import_cert(ca, imported)
                    .await
                    .api_context("failed to import root ca in pki engine")?;
                parsed.into_ca_data(imported.certificate.clone(), mode)
            }
            None => self.generate_root(mode, ca).await?,
        };

        let info = self.finish_ca(ca, data).await?;
        info!(path = %ca.path, serial_number = %info.serial_number, %mode, "created new root CA");
        Ok(info)
    }

    /// Creates an intermediate CA signed by `issuer`.
    ///
    /// Without an imported bundle this generates a CSR on the new engine, has the
    /// issuer sign it and installs the signed certificate.
    pub async fn create_intermediate_ca(
        &self,
        mode: CaMode,
        issuer: &(impl MountPathEntity + ?Sized),
        ca: &CertificateAuthority,
    ) -> Result<CaInfo, VaultError> {
        self.ensure_uninitialized(ca).await?;
        self.update_pki_engine(&ca.engine())
            .await
            .api_context("failed to update pki engine")?;

        let data = match &ca.imported_cert {
            Some(imported) => {
                let parsed = parse_imported_cert(imported).api_context("failed to parse imported cert")?;
                let issuer_pem = self
                    .read_ca_certificate_pem(issuer)
                    .await
                    .api_context("failed to read issuer cert PEM")?;
                self.import_cert(ca, imported)
                    .await
                    .api_context("failed to import intermediate ca in pki engine")?;
                parsed.into_ca_data(issuer_pem, mode)
            }
            None => {
                let csr = self
                    .generate_intermediate_csr(mode, ca)
                    .await
                    .api_context("failed to generate csr for intermediate ca")?;
                debug!(path = %ca.path, "generated intermediate csr");
                let signed = self
                    .sign_intermediate_csr(issuer, ca, &csr.csr)
                    .await
                    .api_context("failed to sign csr of intermediate ca")?;
                self.set_intermediate_certificate(ca, &signed.certificate)
                    .await
                    .api_context("failed to set signed intermediate cert")?;
                NewCaData {
                    issuing_ca: signed.issuing_ca,
                    serial_number: signed.serial_number,
                    private_key: csr.private_key,
                    private_key_type: csr.private_key_type,
                }
            }
        };

        let info = self.finish_ca(ca, data).await?;
        info!(
            path = %ca.path,
            issuer = issuer.mount_path(),
            serial_number = %info.serial_number,
            %mode,
            "created new intermediate CA"
        );
        Ok(info)
    }

    /// Creates the root CA in internal mode unless it exists; an existing one is only retuned.
    pub async fn update_root_ca(&self, ca: &CertificateAuthority) -> Result<(), VaultError> {
        let initialized = self
            .is_pki_engine_initialized(ca)
            .await
            .api_context("failed to determine action for root ca")?;
        if initialized {
            return self
                .update_pki_engine(&ca.engine())
                .await
                .api_context("failed to update pki engine of root ca");
        }
        self.create_root_ca(CaMode::Internal, ca)
            .await
            .api_context("failed to create root ca")?;
        Ok(())
    }

    pub async fn update_intermediate_ca(
        &self,
        issuer: &(impl MountPathEntity + ?Sized),
        ca: &CertificateAuthority,
    ) -> Result<(), VaultError> {
        let initialized = self
            .is_pki_engine_initialized(ca)
            .await
            .api_context("failed to determine action for intermediate ca")?;
        if initialized {
            return self
                .update_pki_engine(&ca.engine())
                .await
                .api_context("failed to update pki engine of intermediate ca");
        }
        self.create_intermediate_ca(CaMode::Internal, issuer, ca)
            .await
            .api_context("failed to create intermediate ca")?;
        Ok(())
    }

    /// Reads a CA back: the subject from its certificate and the tune config of its engine.
    ///
    /// Generation settings cannot be recovered and are left at their defaults.
    pub async fn read_ca(&self, ca: &(impl MountPathEntity + ?Sized)) -> Result<CertificateAuthority, VaultError> {
        let pem = self
            .read_ca_certificate_pem(ca)
            .await
            .api_context("failed to read ca certificate")?;
        if pem.trim().is_empty() {
            return Err(VaultError::DoesNotExist);
        }
        let certificate = parse_certificate(&pem).api_context("failed to parse ca certificate")?;
        let engine: PkiEngine = self.read_pki_engine(ca).await?;
        Ok(CertificateAuthority {
            path: engine.path,
            plugin_name: engine.plugin_name,
            config: engine.config,
            subject: certificate_subject(&certificate),
            settings: CaSettings::default(),
            imported_cert: None,
        })
    }

    /// Reads the full CA chain of the engine in PEM form.
    pub async fn read_ca_certificate_chain(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
    ) -> Result<String, VaultError> {
        let mut response = JsonDecoder::<DataResponse<ChainData>>::new();
        self.core
            .make_request(
                RequestMethod::Get,
                &join_path(&["/v1", ca.mount_path(), "cert", "ca_chain"]),
                None,
                Some(&mut response),
            )
            .await
            .api_context("failed to read ca certificate chain")?;
        Ok(response.into_inner().map(|r| r.data.certificate).unwrap_or_default())
    }

    pub async fn set_certificate_urls(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        urls: &CertificateUrls,
    ) -> Result<(), VaultError> {
        let path = ca.mount_path();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", path, "config", "urls"]),
                Some(&Json(urls)),
                None,
            )
            .await
            .api_context("failed to set certificate urls")?;
        debug!(
            path,
            issuing_certificates = ?urls.issuing_certificates,
            crl_distribution_points = ?urls.crl_distribution_points,
            "set certificate urls"
        );
        Ok(())
    }

    pub async fn generate_intermediate_csr(
        &self,
        mode: CaMode,
        ca: &CertificateAuthority,
    ) -> Result<IntermediateCsr, VaultError> {
        let request = GenerateCaRequest {
            subject: &ca.subject,
            settings: &ca.settings,
        };
        let mut response = JsonDecoder::<DataResponse<IntermediateCsr>>::new();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", &ca.path, "intermediate", "generate", mode.as_str()]),
                Some(&Json(&request)),
                Some(&mut response),
            )
            .await
            .api_context("failed to generate intermediate csr in pki engine")?;
        response
            .into_inner()
            .map(|r| r.data)
            .ok_or_else(|| VaultError::api("empty response when generating intermediate csr"))
    }

    /// Has `issuer` sign the CSR of `ca`, returning the certificate as a PEM bundle.
    pub async fn sign_intermediate_csr(
        &self,
        issuer: &(impl MountPathEntity + ?Sized),
        ca: &CertificateAuthority,
        csr: &str,
    ) -> Result<SignedIntermediate, VaultError> {
        let request = SignIntermediateRequest {
            csr,
            format: CertificateFormat::PemBundle,
            subject: &ca.subject,
            settings: &ca.settings,
        };
        let mut response = JsonDecoder::<DataResponse<SignedIntermediate>>::new();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", issuer.mount_path(), "root", "sign-intermediate"]),
                Some(&Json(&request)),
                Some(&mut response),
            )
            .await
            .api_context("failed to sign intermediate csr")?;
        response
            .into_inner()
            .map(|r| r.data)
            .ok_or_else(|| VaultError::api("empty response when signing intermediate csr"))
    }

    pub async fn set_intermediate_certificate(
        &self,
        ca: &(impl MountPathEntity + ?Sized),
        certificate: &str,
    ) -> Result<(), VaultError> {
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", ca.mount_path(), "intermediate", "set-signed"]),
                Some(&Json(&SetSignedRequest { certificate })),
                None,
            )
            .await
            .api_context("failed to set signed intermediate certificate")
    }

    async fn ensure_uninitialized(&self, ca: &CertificateAuthority) -> Result<(), VaultError> {
        let initialized = self
            .is_pki_engine_initialized(ca)
            .await
            .api_context("failed to check if pki engine has been initialized")?;
        if initialized {
            return Err(VaultError::api("ca already exists, cannot create it again"));
        }
        Ok(())
    }

    async fn import_cert(&self, ca: &CertificateAuthority, cert: &ImportedCert) -> Result<(), VaultError> {
        let request = ImportCaRequest {
            pem_bundle: format!("{}\n{}", cert.private_key, cert.certificate),
        };
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", &ca.path, "config", "ca"]),
                Some(&Json(&request)),
                None,
            )
            .await
            .api_context("failed to import cert in pki engine")
    }

    async fn generate_root(&self, mode: CaMode, ca: &CertificateAuthority) -> Result<NewCaData, VaultError> {
        let request = GenerateCaRequest {
            subject: &ca.subject,
            settings: &ca.settings,
        };
        let mut response = JsonDecoder::<DataResponse<NewCaData>>::new();
        self.core
            .make_request(
                RequestMethod::Post,
                &join_path(&["/v1", &ca.path, "root", "generate", mode.as_str()]),
                Some(&Json(&request)),
                Some(&mut response),
            )
            .await
            .api_context("failed to generate root ca in pki engine")?;
        Ok(response.into_inner().map(|r| r.data).unwrap_or_default())
    }

    /// Reads back the installed CA and wires its issuing and CRL URLs.
    async fn finish_ca(&self, ca: &CertificateAuthority, data: NewCaData) -> Result<CaInfo, VaultError> {
        let certificate_chain = self.read_ca_certificate_chain(ca).await?;
        let certificate = self
            .read_ca_certificate_pem(ca)
            .await
            .api_context("failed to read ca certificate pem")?;

        let urls = CertificateUrls {
            issuing_certificates: vec![self.core.url(&["v1", &ca.path, "ca"])],
            crl_distribution_points: vec![self.core.url(&["v1", &ca.path, "crl"])],
            ocsp_servers: Vec::new(),
        };
        self.set_certificate_urls(ca, &urls).await?;

        Ok(CaInfo {
            path: ca.path.clone(),
            serial_number: data.serial_number,
            private_key: data.private_key,
            private_key_type: data.private_key_type,
            issuing_ca: data.issuing_ca,
            certificate_chain,
            certificate,
        })
    }
}
