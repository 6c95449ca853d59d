//! HTTP client used by the request pipeline.
//!
//! A request is described by a [`RequestConfig`]: a path appended to the base URL,
//! a method, an optional body, an ordered list of decoders, headers, query
//! parameters and a per-request timeout. [`HttpTransport::perform`] sends it and
//! returns the status code; only transport and coding failures are errors here.

use crate::vault::codec::{Decodable, Encodable};
use crate::vault::error::VaultError;
use async_trait::async_trait;
use reqwest::{
    header::{HeaderName, HeaderValue, CONTENT_TYPE},
    tls, Certificate, Client, Method,
};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Timeout applied to a single request attempt unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Description of a single HTTP request.
pub struct RequestConfig<'a> {
    pub path: String,
    pub method: Method,
    pub body: Option<&'a dyn Encodable>,
    pub decoders: Vec<&'a mut dyn Decodable>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
}

impl<'a> RequestConfig<'a> {
    pub fn new(path: impl Into<String>) -> Self {
        RequestConfig {
            path: path.into(),
            method: Method::GET,
            body: None,
            decoders: Vec::new(),
            headers: Vec::new(),
            query: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: &'a dyn Encodable) -> Self {
        self.body = Some(body);
        self
    }

    /// Appends a decoder; decoders are tried in insertion order.
    pub fn with_decoder(mut self, decoder: &'a mut dyn Decodable) -> Self {
        self.decoders.push(decoder);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Sends requests described by a [`RequestConfig`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends the request and returns the response status code.
    async fn perform(&self, request: RequestConfig<'_>) -> Result<u16, VaultError>;
}

/// reqwest backed [`HttpTransport`] bound to a base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base: Url,
    client: Client,
}

impl HttpClient {
    pub fn new(base: Url) -> Result<Self, VaultError> {
        let client = Client::builder()
            .build()
            .map_err(|e| VaultError::setup("failed to create HTTP client").with_source(e))?;
        Ok(HttpClient { base, client })
    }

    /// Creates a client that trusts the system roots plus every certificate in `pem_bundles`.
    ///
    /// TLS 1.2 is the minimum accepted protocol version.
    pub fn with_ca_certs(base: Url, pem_bundles: &[String]) -> Result<Self, VaultError> {
        let mut builder = Client::builder().min_tls_version(tls::Version::TLS_1_2);
        for bundle in pem_bundles {
            let certs = openssl::x509::X509::stack_from_pem(bundle.as_bytes()).map_err(|e| {
                VaultError::setup("failed to parse CA certificate bundle").with_source(e)
            })?;
            if certs.is_empty() {
                return Err(VaultError::setup(
                    "failed to add CA certificate to pool: bundle contains no certificates",
                ));
            }
            for cert in certs {
                let der = cert.to_der().map_err(|e| {
                    VaultError::setup("failed to encode CA certificate").with_source(e)
                })?;
                let cert = Certificate::from_der(&der).map_err(|e| {
                    VaultError::setup("failed to add CA certificate to pool").with_source(e)
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder
            .build()
            .map_err(|e| VaultError::setup("failed to create HTTP client").with_source(e))?;
        Ok(HttpClient { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn request_url(&self, request: &RequestConfig<'_>) -> Url {
        let mut url = self.base.clone();
        url.set_path(&request.path);
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        url
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn perform(&self, request: RequestConfig<'_>) -> Result<u16, VaultError> {
        let body = match request.body {
            Some(body) => Some((body.content_type(), body.encode()?)),
            None => None,
        };

        let url = self.request_url(&request);
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| VaultError::request(format!("invalid header name {}", name)).with_source(e))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                VaultError::request(format!("invalid value for header {}", name)).with_source(e)
            })?;
            builder = builder.header(name, value);
        }

        if let Some((content_type, bytes)) = body {
            builder = builder.header(CONTENT_TYPE, content_type).body(bytes);
        }

        let response = builder.send().await.map_err(|e| {
            VaultError::request(format!("failed to send {} {}", request.method, request.path))
                .with_source(e)
        })?;

        let status = response.status().as_u16();

        if let Some(decoder) = request
            .decoders
            .into_iter()
            .find(|decoder| decoder.should_decode(status))
        {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| VaultError::coding("failed to read response body").with_source(e))?;
            decoder.decode(&bytes)?;
        }

        Ok(status)
    }
}
