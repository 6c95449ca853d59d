//! Random data from Vault's `sys/tools/random` endpoint.

use crate::vault::codec::JsonDecoder;
use crate::vault::common::DataResponse;
use crate::vault::core::VaultCore;
use crate::vault::error::{ResultExt, VaultError};
use crate::vault::request::RequestMethod;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct RandomData {
    random_bytes: String,
}

#[derive(Debug, Clone)]
pub struct RandomApi {
    core: Arc<VaultCore>,
}

impl RandomApi {
    pub fn new(core: Arc<VaultCore>) -> Self {
        RandomApi { core }
    }

    async fn fetch_random_base64(&self, length: usize) -> Result<String, VaultError> {
        if length == 0 {
            return Err(VaultError::api("tried to generate random byte slice with length 0"));
        }
        let mut response = JsonDecoder::<DataResponse<RandomData>>::new();
        self.core
            .make_request(
                RequestMethod::Post,
                &format!("/v1/sys/tools/random/{}", length),
                None,
                Some(&mut response),
            )
            .await
            .api_context("failed to fetch random byte sequence")?;
        response
            .into_inner()
            .map(|r| r.data.random_bytes)
            .ok_or_else(|| VaultError::api("empty response when fetching random bytes"))
    }

    /// Returns `length` random bytes generated by Vault.
    pub async fn generate_random_bytes(&self, length: usize) -> Result<Vec<u8>, VaultError> {
        let encoded = self.fetch_random_base64(length).await?;
        STANDARD
            .decode(encoded.as_bytes())
            .api_context("failed to decode random bytes")
    }

    /// Returns a random string of `length` base64 characters.
    pub async fn generate_random_string(&self, length: usize) -> Result<String, VaultError> {
        let encoded = self.fetch_random_base64(length).await?;
        // `length` bytes encode to more than `length` characters.
        encoded
            .get(..length)
            .map(str::to_string)
            .ok_or_else(|| VaultError::api("random response is shorter than requested"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::test_utils::{core_for, request_count};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn random_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sys/tools/random/4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"random_bytes": "AQIDBA=="}})))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_generate_random_bytes() {
        let server = random_server().await;
        let api = RandomApi::new(core_for(&server).await);
        assert_eq!(api.generate_random_bytes(4).await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_generate_random_string_truncates() {
        let server = random_server().await;
        let api = RandomApi::new(core_for(&server).await);
        assert_eq!(api.generate_random_string(4).await.unwrap(), "AQID");
    }

    #[tokio::test]
    async fn test_zero_length_sends_nothing() {
        let server = random_server().await;
        let api = RandomApi::new(core_for(&server).await);
        assert!(api.generate_random_bytes(0).await.is_err());
        assert!(api.generate_random_string(0).await.is_err());
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
        assert_eq!(request_count(&server, "POST", "/v1/sys/tools/random/0").await, 0);
    }
}
