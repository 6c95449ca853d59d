//! Error model shared by every layer of the client.
//!
//! Each variant renders as `[<component>] <description>: <details>` and may carry a
//! boxed cause. Domain operations wrap lower level failures into [`VaultError::Api`],
//! so callers inspect the chain through [`VaultError::http_status`],
//! [`VaultError::remote_errors`] and [`VaultError::is_does_not_exist`] instead of
//! matching on nested variants.

use std::error::Error as StdError;

/// Boxed cause attached to an error.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Component tag for errors raised by the HTTP client.
pub const HTTP_CLIENT: &str = "HTTP Client";
/// Component tag for errors raised by the Vault API layer.
pub const VAULT_API: &str = "Vault API";

/// Kind of a [`VaultError`], used for identity comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Request,
    Coding,
    Http,
    Api,
    Setup,
    DoesNotExist,
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Local configuration prevented a request from being sent.
    #[error("[HTTP Client] failed to make request: {details}")]
    Request {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A request or response body could not be encoded or decoded.
    #[error("[HTTP Client] failed to marshal values: {details}")]
    Coding {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The transport failed before a response was received.
    #[error("[Vault API] failed to send or receive HTTP request: {details}")]
    Http {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Vault answered with a non-2xx status code.
    #[error(
        "[Vault API] failed to send or receive HTTP request: received error status code {status}{}",
        format_remote_errors(.messages)
    )]
    HttpStatus { status: u16, messages: Vec<String> },

    #[error("[Vault API] failed to interact with Vault API: {details}")]
    Api {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[Vault API] failed to set up Vault API: {details}")]
    Setup {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("[Vault API] vault object does not exist")]
    DoesNotExist,
}

fn format_remote_errors(messages: &[String]) -> String {
    messages
        .iter()
        .map(|message| format!("\n\t{}", message))
        .collect()
}

impl VaultError {
    pub fn request(details: impl Into<String>) -> Self {
        VaultError::Request {
            details: details.into(),
            source: None,
        }
    }

    pub fn coding(details: impl Into<String>) -> Self {
        VaultError::Coding {
            details: details.into(),
            source: None,
        }
    }

    pub fn http(details: impl Into<String>) -> Self {
        VaultError::Http {
            details: details.into(),
            source: None,
        }
    }

    pub fn api(details: impl Into<String>) -> Self {
        VaultError::Api {
            details: details.into(),
            source: None,
        }
    }

    pub fn setup(details: impl Into<String>) -> Self {
        VaultError::Setup {
            details: details.into(),
            source: None,
        }
    }

    /// Attaches `cause` as the source of this error.
    ///
    /// Variants without a source slot are returned unchanged.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            VaultError::Request { source, .. }
            | VaultError::Coding { source, .. }
            | VaultError::Http { source, .. }
            | VaultError::Api { source, .. }
            | VaultError::Setup { source, .. } => *source = Some(cause.into()),
            VaultError::HttpStatus { .. } | VaultError::DoesNotExist => {}
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Request { .. } => ErrorKind::Request,
            VaultError::Coding { .. } => ErrorKind::Coding,
            VaultError::Http { .. } | VaultError::HttpStatus { .. } => ErrorKind::Http,
            VaultError::Api { .. } => ErrorKind::Api,
            VaultError::Setup { .. } => ErrorKind::Setup,
            VaultError::DoesNotExist => ErrorKind::DoesNotExist,
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            VaultError::Request { .. } | VaultError::Coding { .. } => HTTP_CLIENT,
            _ => VAULT_API,
        }
    }

    /// Iterates over this error and every [`VaultError`] in its cause chain.
    pub fn chain(&self) -> impl Iterator<Item = &VaultError> {
        std::iter::successors(Some(self as &(dyn StdError + 'static)), |err| (*err).source())
            .filter_map(|err| err.downcast_ref::<VaultError>())
    }

    /// Returns true if any error in the chain has the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.chain().any(|err| err.kind() == kind)
    }

    pub fn is_does_not_exist(&self) -> bool {
        self.has_kind(ErrorKind::DoesNotExist)
    }

    /// Status code of the first HTTP status error in the chain.
    pub fn http_status(&self) -> Option<u16> {
        self.chain().find_map(|err| match err {
            VaultError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        })
    }

    /// Remote error messages of the first HTTP status error in the chain.
    pub fn remote_errors(&self) -> &[String] {
        self.chain()
            .find_map(|err| match err {
                VaultError::HttpStatus { messages, .. } => Some(messages.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    pub(crate) fn is_status(&self, status: u16) -> bool {
        self.http_status() == Some(status)
    }
}

/// Wraps foreign errors into domain error kinds.
pub trait ResultExt<T> {
    fn api_context(self, details: impl Into<String>) -> Result<T, VaultError>;
    fn setup_context(self, details: impl Into<String>) -> Result<T, VaultError>;
    fn coding_context(self, details: impl Into<String>) -> Result<T, VaultError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn api_context(self, details: impl Into<String>) -> Result<T, VaultError> {
        self.map_err(|err| VaultError::api(details).with_source(err))
    }

    fn setup_context(self, details: impl Into<String>) -> Result<T, VaultError> {
        self.map_err(|err| VaultError::setup(details).with_source(err))
    }

    fn coding_context(self, details: impl Into<String>) -> Result<T, VaultError> {
        self.map_err(|err| VaultError::coding(details).with_source(err))
    }
}
