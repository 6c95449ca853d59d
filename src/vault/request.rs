//! Request pipeline used by every domain operation.
//!
//! [`VaultCore::make_request`] attaches the token, translates `LIST` into
//! `GET ?list=true`, decodes the error envelope and recovers from two failure
//! classes:
//!
//! * `403`: the token is renewed through the auth provider and the request retried.
//! * `400` whose remote errors contain a known transient message: the request is
//!   retried after a backoff.
//!
//! Each class is retried at most `max_attempts` times and the loop checks its
//! total send budget before every attempt.

use crate::vault::client::RequestConfig;
use crate::vault::codec::{Constraint, Decodable, Encodable, JsonDecoder};
use crate::vault::core::VaultCore;
use crate::vault::error::{ErrorKind, VaultError};
use reqwest::Method;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Header carrying the vault token.
pub const TOKEN_HEADER: &str = "X-Vault-Token";

const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(16);

/// Remote error messages that mark a `400` response as transient.
pub const RETRYABLE_BAD_REQUEST_ERRORS: &[&str] =
    &["Upgrading from non-versioned to versioned data"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Post,
    Put,
    Delete,
    List,
}

impl RequestMethod {
    fn http_method(self) -> Method {
        match self {
            RequestMethod::Get | RequestMethod::List => Method::GET,
            RequestMethod::Post => Method::POST,
            RequestMethod::Put => Method::PUT,
            RequestMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
            RequestMethod::List => "LIST",
        })
    }
}

/// Error envelope returned by Vault on failed requests.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<String>,
}

/// How the pipeline reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    AuthExpired,
    RetryableBadRequest,
    Fatal,
}

pub fn classify(err: &VaultError) -> Failure {
    match err {
        VaultError::HttpStatus { status: 403, .. } => Failure::AuthExpired,
        VaultError::HttpStatus {
            status: 400,
            messages,
        } if messages.iter().any(|message| {
            RETRYABLE_BAD_REQUEST_ERRORS
                .iter()
                .any(|retryable| message.contains(retryable))
        }) =>
        {
            Failure::RetryableBadRequest
        }
        _ => Failure::Fatal,
    }
}

/// Delay before the retry that follows `attempt` sends.
///
/// Zero for attempt 0, then 1s doubling per attempt up to 16s.
pub fn retry_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32 << (attempt - 1).min(16);
    MIN_RETRY_DELAY.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

impl VaultCore {
    /// Sends a request through the retry pipeline.
    ///
    /// `response` is only filled for 2xx responses. Non-2xx responses surface as
    /// [`VaultError::HttpStatus`] carrying the remote error messages.
    pub async fn make_request(
        &self,
        method: RequestMethod,
        path: &str,
        request: Option<&dyn Encodable>,
        mut response: Option<&mut dyn Decodable>,
    ) -> Result<(), VaultError> {
        let max_sends = 1 + 2 * self.max_attempts;
        let mut attempts = 0u32;
        let mut auth_retries = 0u32;
        let mut bad_request_retries = 0u32;
        let mut last_error = None;

        loop {
            if attempts >= max_sends {
                return Err(last_error
                    .unwrap_or_else(|| VaultError::api("request retry budget exhausted")));
            }

            let (token, generation) = self.token_snapshot();
            attempts += 1;

            // Reborrow with a short trait object lifetime so the loop can send again.
            let attempt_response = response.as_mut().map(|r| &mut **r as &mut dyn Decodable);
            let err = match self
                .send(method, path, Some(token.as_str()), request, attempt_response)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            match classify(&err) {
                Failure::AuthExpired
                    if auth_retries < self.max_attempts && self.has_auth_provider() =>
                {
                    auth_retries += 1;
                    if self.token_generation() != generation {
                        debug!(%method, path, "token renewed concurrently, retrying");
                    } else {
                        let delay = retry_delay(attempts);
                        warn!(
                            %method,
                            path,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            "vault rejected token, re-authenticating"
                        );
                        sleep(delay).await;
                        self.reauthenticate(generation).await?;
                    }
                }
                Failure::RetryableBadRequest if bad_request_retries < self.max_attempts => {
                    bad_request_retries += 1;
                    let delay = retry_delay(attempts);
                    warn!(
                        %method,
                        path,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient bad request, backing off"
                    );
                    sleep(delay).await;
                }
                _ => return Err(err),
            }

            last_error = Some(err);
        }
    }

    /// Sends a single attempt without a token and without retries.
    ///
    /// Used by auth providers for login requests.
    pub async fn send_unauthenticated(
        &self,
        method: RequestMethod,
        path: &str,
        request: Option<&dyn Encodable>,
        response: Option<&mut dyn Decodable>,
    ) -> Result<(), VaultError> {
        self.send(method, path, None, request, response).await
    }

    async fn send(
        &self,
        method: RequestMethod,
        path: &str,
        token: Option<&str>,
        request: Option<&dyn Encodable>,
        response: Option<&mut dyn Decodable>,
    ) -> Result<(), VaultError> {
        let mut error_response = JsonDecoder::<ErrorResponse>::with_constraints(&[Constraint::Failed]);

        let mut config = RequestConfig::new(path)
            .with_method(method.http_method())
            .with_timeout(self.timeout);
        if method == RequestMethod::List {
            config = config.with_query("list", "true");
        }
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            config = config.with_header(TOKEN_HEADER, token);
        }
        if let Some(body) = request {
            config = config.with_body(body);
        }
        if let Some(decoder) = response {
            config = config.with_decoder(decoder);
        }
        config = config.with_decoder(&mut error_response);

        debug!(%method, path, "sending vault request");
        let status = self
            .transport()
            .perform(config)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::Request => {
                    VaultError::http(format!("{} {} failed", method, path)).with_source(err)
                }
                _ => err,
            })?;

        if (200..300).contains(&status) {
            return Ok(());
        }

        let messages = error_response
            .into_inner()
            .map(|response| response.errors)
            .unwrap_or_default();
        debug!(%method, path, status, ?messages, "vault returned error status");
        Err(VaultError::HttpStatus { status, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::auth_provider::{AuthProvider, AuthToken, StaticTokenProvider};
    use crate::vault::codec::Json;
    use crate::vault::common::ListResponse;
    use crate::vault::ttl::VaultTtl;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Hands out `token-1`, `token-2`, ... and records concurrency.
    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for CountingProvider {
        async fn authenticate(&self, _core: &VaultCore) -> Result<AuthToken, VaultError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(AuthToken {
                token: format!("token-{}", call),
                lease_duration: VaultTtl::ZERO,
            })
        }
    }

    async fn core_with(server: &MockServer, provider: Arc<dyn AuthProvider>) -> VaultCore {
        VaultCore::builder(server.uri())
            .with_auth_provider(provider)
            .build()
            .await
            .unwrap()
    }

    #[test]
    fn test_retry_delay_sequence() {
        let delays: Vec<u64> = (0..8).map(|a| retry_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 16, 16, 16]);
        assert_eq!(retry_delay(u32::MAX), Duration::from_secs(16));
        assert!((0..64).all(|a| retry_delay(a) <= retry_delay(a + 1)));
    }

    #[test]
    fn test_classify() {
        let status = |status, messages: &[&str]| VaultError::HttpStatus {
            status,
            messages: messages.iter().map(|m| m.to_string()).collect(),
        };
        assert_eq!(classify(&status(403, &[])), Failure::AuthExpired);
        assert_eq!(
            classify(&status(
                400,
                &["Upgrading from non-versioned to versioned data. This may take some time"]
            )),
            Failure::RetryableBadRequest
        );
        assert_eq!(classify(&status(400, &["invalid request"])), Failure::Fatal);
        assert_eq!(classify(&status(500, &[])), Failure::Fatal);
        assert_eq!(classify(&VaultError::http("connection reset")), Failure::Fatal);
    }

    #[tokio::test]
    async fn test_list_is_sent_as_get_with_list_parameter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/metadata/app"))
            .and(query_param("list", "true"))
            .and(header(TOKEN_HEADER, "root"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"keys": ["a", "b/"]}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let core = core_with(&server, Arc::new(StaticTokenProvider::new("root"))).await;
        let mut response = JsonDecoder::<ListResponse>::new();
        core.make_request(
            RequestMethod::List,
            "/v1/kv/metadata/app",
            None,
            Some(&mut response),
        )
        .await
        .unwrap();

        assert_eq!(response.into_inner().unwrap().data.keys, vec!["a", "b/"]);
    }

    #[tokio::test]
    async fn test_error_envelope_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"errors": ["invalid key type", "second message"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let core = core_with(&server, Arc::new(StaticTokenProvider::new("root"))).await;
        let body = json!({"type": "unknown"});
        let err = core
            .make_request(RequestMethod::Post, "/v1/transit/keys/k", Some(&Json(&body)), None)
            .await
            .unwrap_err();

        assert_eq!(err.http_status(), Some(400));
        assert_eq!(err.remote_errors(), ["invalid key type", "second message"]);
    }

    #[tokio::test]
    async fn test_forbidden_triggers_single_reauthentication() {
        let server = MockServer::start().await;
        let body = json!({"data": {"a": "1"}});
        Mock::given(method("POST"))
            .and(path("/v1/kv/data/app"))
            .and(body_json(body.clone()))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"errors": ["permission denied"]})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/kv/data/app"))
            .and(body_json(body.clone()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"version": 1}})))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(CountingProvider::default());
        let core = core_with(&server, provider.clone()).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        core.make_request(RequestMethod::Post, "/v1/kv/data/app", Some(&Json(&body)), None)
            .await
            .unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(core.token(), "token-2");
    }

    #[tokio::test]
    async fn test_persistent_forbidden_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(3)
            .mount(&server)
            .await;

        let provider = Arc::new(CountingProvider::default());
        let core = core_with(&server, provider.clone()).await;
        let err = core
            .make_request(RequestMethod::Get, "/v1/sys/mounts", None, None)
            .await
            .unwrap_err();

        assert_eq!(err.http_status(), Some(403));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_forbidden_without_provider_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let core = VaultCore::builder(server.uri()).build().await.unwrap();
        let err = core
            .make_request(RequestMethod::Get, "/v1/sys/mounts", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(403));
    }

    #[tokio::test]
    async fn test_retryable_bad_request_backs_off() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/data/app"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"errors": ["Upgrading from non-versioned to versioned data"]}),
            ))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/kv/data/app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let core = core_with(&server, Arc::new(StaticTokenProvider::new("root"))).await;
        let started = Instant::now();
        core.make_request(RequestMethod::Get, "/v1/kv/data/app", None, None)
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_non_retryable_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let core = core_with(&server, Arc::new(StaticTokenProvider::new("root"))).await;
        let err = core
            .make_request(RequestMethod::Get, "/v1/sys/health", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(503));
    }

    #[tokio::test]
    async fn test_concurrent_forbidden_callers_share_one_reauthentication() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header(TOKEN_HEADER, "token-1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header(TOKEN_HEADER, "token-2"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let provider = Arc::new(CountingProvider::default());
        let core = core_with(&server, provider.clone()).await;

        let calls = (0..5).map(|_| core.make_request(RequestMethod::Get, "/v1/sys/mounts", None, None));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
