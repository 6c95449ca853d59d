//! Wire and domain types of the PKI engine.

use crate::vault::common::{empty_as_none, null_as_default};
use crate::vault::entity::{MountPathEntity, RoleNameEntity, SerialNumberEntity};
use crate::vault::mount::TuneConfig;
use crate::vault::ttl::VaultTtl;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A list that Vault accepts as a comma separated string.
///
/// Serializes as `"a,b"`. Deserializes from either a JSON array or such a string,
/// since role reads return arrays for fields that are written as strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommaList(pub Vec<String>);

impl CommaList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CommaList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        CommaList(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<String>> for CommaList {
    fn from(values: Vec<String>) -> Self {
        CommaList(values)
    }
}

impl Serialize for CommaList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.join(","))
    }
}

impl<'de> Deserialize<'de> for CommaList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CommaListVisitor;

        impl<'de> Visitor<'de> for CommaListVisitor {
            type Value = CommaList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a list of strings or a comma separated string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CommaList, E> {
                Ok(value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .collect())
            }

            fn visit_unit<E: de::Error>(self) -> Result<CommaList, E> {
                Ok(CommaList::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<CommaList, E> {
                Ok(CommaList::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<CommaList, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(CommaList(values))
            }
        }

        deserializer.deserialize_any(CommaListVisitor)
    }
}

/// Private key algorithm of a CA or certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PkiKeyType {
    Rsa,
    Ec,
    Ed25519,
    Any,
}

/// Whether a generated CA key stays inside Vault or is returned once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaMode {
    Internal,
    Exported,
}

impl CaMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CaMode::Internal => "internal",
            CaMode::Exported => "exported",
        }
    }
}

impl fmt::Display for CaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateFormat {
    Pem,
    Der,
    PemBundle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectSettings {
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub organization: CommaList,
    #[serde(rename = "ou", skip_serializing_if = "CommaList::is_empty")]
    pub organizational_unit: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub country: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub locality: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub province: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub street_address: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub postal_code: CommaList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subject {
    pub common_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial_number: String,
    #[serde(flatten)]
    pub settings: SubjectSettings,
}

impl Subject {
    pub fn new(common_name: impl Into<String>) -> Self {
        Subject {
            common_name: common_name.into(),
            ..Default::default()
        }
    }
}

/// Generation settings for root and intermediate CAs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaSettings {
    #[serde(rename = "alt_names", skip_serializing_if = "CommaList::is_empty")]
    pub subject_alternative_names: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub ip_sans: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub uri_sans: CommaList,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub other_sans: CommaList,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<VaultTtl>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub key_type: Option<PkiKeyType>,
    #[serde(skip_serializing_if = "is_zero")]
    pub key_bits: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub exclude_cn_from_sans: bool,
    #[serde(skip_serializing_if = "CommaList::is_empty")]
    pub permitted_dns_domains: CommaList,
}

pub(crate) fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// A PEM private key and certificate to import instead of generating a CA.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ImportedCert {
    pub private_key: String,
    pub certificate: String,
}

impl fmt::Debug for ImportedCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportedCert")
            .field("private_key", &"..")
            .field("certificate", &self.certificate)
            .finish()
    }
}

/// A PKI mount without CA material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkiEngine {
    pub path: String,
    /// Mount type; empty means `pki`.
    pub plugin_name: String,
    pub config: TuneConfig,
}

impl MountPathEntity for PkiEngine {
    fn mount_path(&self) -> &str {
        &self.path
    }
}

/// Desired state of a root or intermediate CA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateAuthority {
    pub path: String,
    pub plugin_name: String,
    pub config: TuneConfig,
    pub subject: Subject,
    pub settings: CaSettings,
    pub imported_cert: Option<ImportedCert>,
}

impl CertificateAuthority {
    pub fn new(path: impl Into<String>, subject: Subject) -> Self {
        CertificateAuthority {
            path: path.into(),
            subject,
            ..Default::default()
        }
    }

    pub fn with_settings(mut self, settings: CaSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_config(mut self, config: TuneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_imported_cert(mut self, cert: ImportedCert) -> Self {
        self.imported_cert = Some(cert);
        self
    }

    pub(crate) fn engine(&self) -> PkiEngine {
        PkiEngine {
            path: self.path.clone(),
            plugin_name: self.plugin_name.clone(),
            config: self.config.clone(),
        }
    }
}

impl MountPathEntity for CertificateAuthority {
    fn mount_path(&self) -> &str {
        &self.path
    }
}

/// Result of creating a CA.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CaInfo {
    pub path: String,
    pub serial_number: String,
    /// Only set for [`CaMode::Exported`].
    pub private_key: String,
    pub private_key_type: Option<PkiKeyType>,
    pub issuing_ca: String,
    pub certificate_chain: String,
    pub certificate: String,
}

impl fmt::Debug for CaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaInfo")
            .field("path", &self.path)
            .field("serial_number", &self.serial_number)
            .field("private_key_exported", &!self.private_key.is_empty())
            .field("private_key_type", &self.private_key_type)
            .finish()
    }
}

/// Issuing certificate, CRL and OCSP URLs embedded into issued certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateUrls {
    pub issuing_certificates: Vec<String>,
    pub crl_distribution_points: Vec<String>,
    pub ocsp_servers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<VaultTtl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<VaultTtl>,
    pub allow_localhost: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub allowed_domains: Vec<String>,
    pub allowed_domains_template: bool,
    pub allow_bare_domains: bool,
    pub allow_subdomains: bool,
    pub allow_glob_domains: bool,
    pub allow_any_name: bool,
    pub enforce_hostnames: bool,
    pub allow_ip_sans: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub allowed_uri_sans: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub allowed_other_sans: Vec<String>,
    pub server_flag: bool,
    pub client_flag: bool,
    pub code_signing_flag: bool,
    pub email_protection_flag: bool,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "empty_as_none")]
    pub key_type: Option<PkiKeyType>,
    #[serde(skip_serializing_if = "is_zero")]
    pub key_bits: u32,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub key_usage: Vec<String>,
    #[serde(rename = "ext_key_usage", skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub extended_key_usage: Vec<String>,
    #[serde(rename = "ext_key_usage_oids", skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub extended_key_usage_oids: Vec<String>,
    pub use_csr_common_name: bool,
    pub use_csr_sans: bool,
    pub generate_lease: bool,
    pub no_store: bool,
    #[serde(rename = "require_cn")]
    pub require_common_name: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub policy_identifiers: Vec<String>,
    pub basic_constraints_valid_for_non_ca: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before_duration: Option<VaultTtl>,
}

/// A certificate role: what a caller may request from the CA.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateRole {
    pub name: String,
    pub settings: RoleSettings,
    pub subject: SubjectSettings,
}

impl CertificateRole {
    pub fn new(name: impl Into<String>, settings: RoleSettings) -> Self {
        CertificateRole {
            name: name.into(),
            settings,
            subject: SubjectSettings::default(),
        }
    }
}

impl RoleNameEntity for CertificateRole {
    fn role_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueCertOptions {
    pub common_name: String,
    pub alt_names: Vec<String>,
    pub other_sans: Vec<String>,
    pub ip_sans: Vec<String>,
    pub uri_sans: Vec<String>,
    pub ttl: Option<VaultTtl>,
    pub exclude_cn_from_sans: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignCsrOptions {
    pub csr: String,
    pub common_name: String,
    pub alt_names: Vec<String>,
    pub other_sans: Vec<String>,
    pub ip_sans: Vec<String>,
    pub uri_sans: Vec<String>,
    pub ttl: Option<VaultTtl>,
}

/// An issued or signed certificate.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Certificate {
    pub certificate: String,
    pub issuing_ca: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ca_chain: Vec<String>,
    pub private_key: String,
    #[serde(deserialize_with = "empty_as_none")]
    pub private_key_type: Option<PkiKeyType>,
    pub serial_number: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("serial_number", &self.serial_number)
            .field("ca_chain", &self.ca_chain.len())
            .field("private_key_type", &self.private_key_type)
            .finish()
    }
}

impl SerialNumberEntity for Certificate {
    fn serial_number(&self) -> &str {
        &self.serial_number
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TidySettings {
    pub tidy_cert_store: bool,
    pub tidy_revoked_certs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_buffer: Option<VaultTtl>,
}
