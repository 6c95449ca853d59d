//! ACL policies.
//!
//! Vault stores a policy as an HCL document of `path` blocks:
//!
//! ```hcl
//! path "secret/data/app/*" {
//!   capabilities = ["read", "list"]
//! }
//! ```
//!
//! [`marshal_rules`] and [`unmarshal_rules`] translate between that document and
//! a list of [`Rule`]s. The document is sent as a JSON string.

use crate::vault::codec::{Json, JsonDecoder};
use crate::vault::common::{join_path, DataResponse};
use crate::vault::core::VaultCore;
use crate::vault::entity::PolicyNameEntity;
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::request::RequestMethod;
use hcl::{Block, Body, Expression};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

const POLICY_BLOCK: &str = "path";
const CAPABILITIES_ATTRIBUTE: &str = "capabilities";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Create,
    Read,
    Update,
    Patch,
    Delete,
    List,
    Sudo,
    Deny,
    Other(String),
}

impl Capability {
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Create => "create",
            Capability::Read => "read",
            Capability::Update => "update",
            Capability::Patch => "patch",
            Capability::Delete => "delete",
            Capability::List => "list",
            Capability::Sudo => "sudo",
            Capability::Deny => "deny",
            Capability::Other(other) => other,
        }
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        match value {
            "create" => Capability::Create,
            "read" => Capability::Read,
            "update" => Capability::Update,
            "patch" => Capability::Patch,
            "delete" => Capability::Delete,
            "list" => Capability::List,
            "sudo" => Capability::Sudo,
            "deny" => Capability::Deny,
            other => Capability::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities granted on a path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub path: String,
    pub capabilities: Vec<Capability>,
}

impl Rule {
    pub fn new(path: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Rule {
            path: path.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub rules: Vec<Rule>,
}

impl Policy {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        Policy {
            name: name.into(),
            rules,
        }
    }
}

impl PolicyNameEntity for Policy {
    fn policy_name(&self) -> &str {
        &self.name
    }
}

/// Encodes rules as an HCL policy document.
pub fn marshal_rules(rules: &[Rule]) -> Result<String, VaultError> {
    let mut body = Body::builder();
    for rule in rules {
        let capabilities: Vec<Expression> = rule
            .capabilities
            .iter()
            .map(|capability| Expression::String(capability.to_string()))
            .collect();
        body = body.add_block(
            Block::builder(POLICY_BLOCK)
                .add_label(rule.path.as_str())
                .add_attribute((CAPABILITIES_ATTRIBUTE, Expression::Array(capabilities)))
                .build(),
        );
    }
    let document = hcl::to_string(&body.build()).coding_context("failed to encode policy hcl")?;
    Ok(document.trim().to_string())
}

/// Parses an HCL policy document. Blocks other than `path` are ignored.
pub fn unmarshal_rules(document: &str) -> Result<Vec<Rule>, VaultError> {
    let body = hcl::parse(document).coding_context("failed to decode policy hcl")?;
    let mut rules = Vec::new();
    for block in body.blocks().filter(|block| block.identifier() == POLICY_BLOCK) {
        let path = match block.labels() {
            [label] => label.as_str().to_string(),
            _ => return Err(VaultError::coding("policy path block must have exactly one label")),
        };

        let mut capabilities = Vec::new();
        for attribute in block.body().attributes() {
            if attribute.key() != CAPABILITIES_ATTRIBUTE {
                continue;
            }
            let Expression::Array(values) = attribute.expr() else {
                return Err(VaultError::coding(format!("capabilities of {} must be a list", path)));
            };
            for value in values {
                match value {
                    Expression::String(capability) => capabilities.push(Capability::from(capability.as_str())),
                    _ => {
                        return Err(VaultError::coding(format!(
                            "capabilities of {} must be strings",
                            path
                        )))
                    }
                }
            }
        }
        rules.push(Rule { path, capabilities });
    }
    Ok(rules)
}

#[derive(Deserialize)]
struct PolicyData {
    #[serde(default)]
    name: String,
    #[serde(default)]
    policy: String,
}

#[derive(Serialize)]
struct PolicyRequest {
    policy: String,
}

#[derive(Debug, Clone)]
pub struct PolicyApi {
    core: Arc<VaultCore>,
}

impl PolicyApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        PolicyApi { core }
    }

    fn policy_path(policy: &(impl PolicyNameEntity + ?Sized)) -> String {
        join_path(&["/v1/sys/policies/acl", policy.policy_name()])
    }

    /// Writes the policy unless Vault already holds the same rules.
    pub async fn update_policy(&self, policy: &Policy) -> Result<(), VaultError> {
        match self.read_policy(policy).await {
            Ok(current) if current.rules == policy.rules => {
                debug!(policy = %policy.name, "policy is up to date");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_does_not_exist() => {}
            Err(err) => return Err(err).api_context("failed to fetch policy from vault"),
        }

        let request = PolicyRequest {
            policy: marshal_rules(&policy.rules)?,
        };
        self.core
            .make_request(
                RequestMethod::Post,
                &Self::policy_path(policy),
                Some(&Json(&request)),
                None,
            )
            .await
            .api_context("failed to write policy to vault")?;
        info!(policy = %policy.name, rules = policy.rules.len(), "updated policy");
        Ok(())
    }

    /// Reads a policy; [`VaultError::DoesNotExist`] if there is none by that name.
    pub async fn read_policy(&self, policy: &(impl PolicyNameEntity + ?Sized)) -> Result<Policy, VaultError> {
        let mut response = JsonDecoder::<DataResponse<PolicyData>>::new();
        match self
            .core
            .make_request(RequestMethod::Get, &Self::policy_path(policy), None, Some(&mut response))
            .await
        {
            Ok(()) => {
                let data = response
                    .into_inner()
                    .map(|r| r.data)
                    .ok_or_else(|| VaultError::api("empty response when reading policy"))?;
                let name = if data.name.is_empty() {
                    policy.policy_name().to_string()
                } else {
                    data.name
                };
                Ok(Policy {
                    name,
                    rules: unmarshal_rules(&data.policy)?,
                })
            }
            Err(err) if err.is_status(404) => Err(VaultError::DoesNotExist),
            Err(err) => Err(err).api_context("failed to fetch policy data"),
        }
    }

    pub async fn delete_policy(&self, policy: &(impl PolicyNameEntity + ?Sized)) -> Result<(), VaultError> {
        match self
            .core
            .make_request(RequestMethod::Delete, &Self::policy_path(policy), None, None)
            .await
        {
            Ok(()) => {
                info!(policy = policy.policy_name(), "deleted policy");
                Ok(())
            }
            Err(err) if err.is_status(404) => Ok(()),
            Err(err) => Err(err).api_context("failed to delete policy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::test_utils::{core_for, request_count};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rules() -> Vec<Rule> {
        vec![
            Rule::new("test-policy", [Capability::Create, Capability::Update]),
            Rule::new(
                "test-policy-2",
                [
                    Capability::Create,
                    Capability::Read,
                    Capability::Update,
                    Capability::Delete,
                    Capability::List,
                ],
            ),
        ]
    }

    #[test]
    fn test_marshal_rules_writes_path_blocks() {
        let document = marshal_rules(&rules()).unwrap();
        assert!(document.starts_with("path \"test-policy\" {"));
        assert!(document.contains("path \"test-policy-2\" {"));
        assert_eq!(unmarshal_rules(&document).unwrap(), rules());
    }

    #[test]
    fn test_unmarshal_rules_reads_vault_document() {
        let document = "\npath \"test-policy\" {\n capabilities = [\"create\", \"update\"]\n}\npath \"test-policy-2\" {\n capabilities = [\"create\", \"read\", \"update\", \"delete\", \"list\"]\n}\n";
        assert_eq!(unmarshal_rules(document).unwrap(), rules());

        let custom = unmarshal_rules("path \"sys/*\" { capabilities = [\"sudo\", \"subscribe\"] }").unwrap();
        assert_eq!(
            custom[0].capabilities,
            vec![Capability::Sudo, Capability::Other("subscribe".to_string())]
        );
        assert!(unmarshal_rules("path \"a\" { capabilities = \"read\" }").is_err());
        assert!(unmarshal_rules("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_policy_skips_equal_rules() {
        let server = MockServer::start().await;
        let document = marshal_rules(&rules()).unwrap();
        Mock::given(method("GET"))
            .and(path("/v1/sys/policies/acl/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"name": "app", "policy": document}})))
            .mount(&server)
            .await;

        let api = PolicyApi::new(core_for(&server).await);
        api.update_policy(&Policy::new("app", rules())).await.unwrap();
        assert_eq!(request_count(&server, "POST", "/v1/sys/policies/acl/app").await, 0);

        let read = api.read_policy("app").await.unwrap();
        assert_eq!(read.name, "app");
        assert_eq!(read.rules, rules());
    }

    #[tokio::test]
    async fn test_update_policy_writes_missing_policy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/policies/acl/app"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let api = PolicyApi::new(core_for(&server).await);
        api.update_policy(&Policy::new("app", rules())).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let write = requests
            .iter()
            .find(|request| request.method.as_str() == "POST")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&write.body).unwrap();
        let sent = body["policy"].as_str().unwrap();
        assert_eq!(unmarshal_rules(sent).unwrap(), rules());
    }

    #[tokio::test]
    async fn test_read_and_delete_missing_policy() {
        let server = MockServer::start().await;
        let api = PolicyApi::new(core_for(&server).await);
        assert!(api.read_policy("absent").await.unwrap_err().is_does_not_exist());
        api.delete_policy("absent").await.unwrap();
    }
}
