//! Request and response body codecs.
//!
//! A decoder is only invoked when all of its [`Constraint`]s accept the response
//! status code. The HTTP client walks its decoders in order and runs the first
//! match, which lets a caller register one decoder for success bodies and another
//! for the error envelope.

use crate::vault::error::{ResultExt, VaultError};
use serde::{de::DeserializeOwned, Serialize};

/// Predicate over the response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// 200 to 299.
    Success,
    /// 400 and above.
    Failed,
    /// Any status code.
    Any,
}

impl Constraint {
    pub fn matches(self, status: u16) -> bool {
        match self {
            Constraint::Success => (200..300).contains(&status),
            Constraint::Failed => status >= 400,
            Constraint::Any => true,
        }
    }
}

fn constraint_set(constraints: &[Constraint]) -> Vec<Constraint> {
    if constraints.is_empty() {
        vec![Constraint::Success]
    } else {
        constraints.to_vec()
    }
}

/// A request body.
pub trait Encodable: Send + Sync {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self) -> Result<Vec<u8>, VaultError>;
}

/// A response body target.
pub trait Decodable: Send {
    /// Returns true if this decoder should consume a response with `status`.
    fn should_decode(&self, status: u16) -> bool;

    fn decode(&mut self, body: &[u8]) -> Result<(), VaultError>;
}

/// Encodes a borrowed value as JSON.
pub struct Json<'a, T: ?Sized>(pub &'a T);

impl<T> Encodable for Json<'_, T>
where
    T: Serialize + Sync + ?Sized,
{
    fn encode(&self) -> Result<Vec<u8>, VaultError> {
        serde_json::to_vec(self.0).coding_context("failed to encode JSON request body")
    }
}

/// Sends a raw byte buffer.
pub struct Raw<'a>(pub &'a [u8]);

impl Encodable for Raw<'_> {
    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }

    fn encode(&self) -> Result<Vec<u8>, VaultError> {
        Ok(self.0.to_vec())
    }
}

/// Decodes a JSON response body into `T`.
///
/// An empty body leaves the decoder without a value.
pub struct JsonDecoder<T> {
    value: Option<T>,
    constraints: Vec<Constraint>,
}

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self::with_constraints(&[])
    }

    /// Creates a decoder bound to `constraints`; an empty slice means [`Constraint::Success`].
    pub fn with_constraints(constraints: &[Constraint]) -> Self {
        JsonDecoder {
            value: None,
            constraints: constraint_set(constraints),
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_inner(self) -> Option<T> {
        self.value
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Decodable for JsonDecoder<T>
where
    T: DeserializeOwned + Send,
{
    fn should_decode(&self, status: u16) -> bool {
        self.constraints.iter().all(|c| c.matches(status))
    }

    fn decode(&mut self, body: &[u8]) -> Result<(), VaultError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let value = serde_json::from_slice(body).coding_context("failed to decode JSON response body")?;
        self.value = Some(value);
        Ok(())
    }
}

/// Captures the raw response body.
pub struct RawDecoder {
    buffer: Vec<u8>,
    constraints: Vec<Constraint>,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self::with_constraints(&[])
    }

    pub fn with_constraints(constraints: &[Constraint]) -> Self {
        RawDecoder {
            buffer: Vec::new(),
            constraints: constraint_set(constraints),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_string(self) -> Result<String, VaultError> {
        String::from_utf8(self.buffer).coding_context("response body is not valid UTF-8")
    }
}

impl Default for RawDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decodable for RawDecoder {
    fn should_decode(&self, status: u16) -> bool {
        self.constraints.iter().all(|c| c.matches(status))
    }

    fn decode(&mut self, body: &[u8]) -> Result<(), VaultError> {
        self.buffer.clear();
        self.buffer.extend_from_slice(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::error::ErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        name: String,
    }

    #[test]
    fn test_constraints() {
        assert!(Constraint::Success.matches(200));
        assert!(Constraint::Success.matches(204));
        assert!(!Constraint::Success.matches(300));
        assert!(!Constraint::Failed.matches(399));
        assert!(Constraint::Failed.matches(400));
        assert!(Constraint::Failed.matches(503));
        assert!(Constraint::Any.matches(302));
    }

    #[test]
    fn test_decoder_defaults_to_success() {
        let decoder = JsonDecoder::<Payload>::new();
        assert!(decoder.should_decode(200));
        assert!(!decoder.should_decode(404));

        let decoder = JsonDecoder::<Payload>::with_constraints(&[Constraint::Failed]);
        assert!(!decoder.should_decode(200));
        assert!(decoder.should_decode(403));
    }

    #[test]
    fn test_all_constraints_must_match() {
        let decoder = RawDecoder::with_constraints(&[Constraint::Any, Constraint::Failed]);
        assert!(!decoder.should_decode(201));
        assert!(decoder.should_decode(500));
    }

    #[test]
    fn test_json_decoder_reads_value() {
        let mut decoder = JsonDecoder::<Payload>::new();
        decoder.decode(br#"{"name":"key"}"#).unwrap();
        assert_eq!(
            decoder.into_inner(),
            Some(Payload {
                name: "key".to_string()
            })
        );
    }

    #[test]
    fn test_json_decoder_tolerates_empty_body() {
        let mut decoder = JsonDecoder::<Payload>::new();
        decoder.decode(b"").unwrap();
        assert!(decoder.value().is_none());
    }

    #[test]
    fn test_json_decoder_reports_coding_error() {
        let mut decoder = JsonDecoder::<Payload>::new();
        let err = decoder.decode(b"{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Coding);
    }

    #[test]
    fn test_json_encoder() {
        let body = serde_json::json!({"type": "kv-v2"});
        let encoded = Json(&body).encode().unwrap();
        assert_eq!(encoded, br#"{"type":"kv-v2"}"#.to_vec());
    }
}
