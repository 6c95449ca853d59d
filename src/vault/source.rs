//! Read-on-demand string sources for credentials and configuration values.

use crate::vault::error::{ResultExt, VaultError};
use std::fmt;
use std::path::PathBuf;

/// Where a string value comes from.
///
/// Environment variables and files are read every time [`StringSource::fetch`] is
/// called, so rotated credentials are picked up without restarting the process.
#[derive(Clone, PartialEq, Eq)]
pub enum StringSource {
    Value(String),
    EnvVar(String),
    File(PathBuf),
}

impl StringSource {
    pub fn value(value: impl Into<String>) -> Self {
        StringSource::Value(value.into())
    }

    pub fn env(name: impl Into<String>) -> Self {
        StringSource::EnvVar(name.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        StringSource::File(path.into())
    }

    /// Produces the current value.
    ///
    /// An unset or empty environment variable is an error. Trailing whitespace is
    /// stripped from file contents.
    pub fn fetch(&self) -> Result<String, VaultError> {
        match self {
            StringSource::Value(value) => Ok(value.clone()),
            StringSource::EnvVar(name) => match std::env::var(name) {
                Ok(value) if !value.is_empty() => Ok(value),
                _ => Err(VaultError::setup(format!("required env var {} is not set", name))),
            },
            StringSource::File(path) => std::fs::read_to_string(path)
                .map(|content| content.trim_end().to_string())
                .setup_context(format!("failed to read file {}", path.display())),
        }
    }
}

// Literal values are usually secrets, keep them out of logs.
impl fmt::Debug for StringSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringSource::Value(_) => f.write_str("Value(..)"),
            StringSource::EnvVar(name) => f.debug_tuple("EnvVar").field(name).finish(),
            StringSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl From<&str> for StringSource {
    fn from(value: &str) -> Self {
        StringSource::value(value)
    }
}

impl From<String> for StringSource {
    fn from(value: String) -> Self {
        StringSource::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::error::ErrorKind;
    use std::io::Write;

    #[test]
    fn test_literal_value() {
        assert_eq!(StringSource::value("abc").fetch().unwrap(), "abc");
        assert_eq!(format!("{:?}", StringSource::value("secret")), "Value(..)");
    }

    #[test]
    fn test_env_var() {
        std::env::set_var("VAULT_STEWARD_SOURCE_TEST", "from-env");
        assert_eq!(
            StringSource::env("VAULT_STEWARD_SOURCE_TEST").fetch().unwrap(),
            "from-env"
        );
        let err = StringSource::env("VAULT_STEWARD_SOURCE_TEST_UNSET")
            .fetch()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Setup);
    }

    #[test]
    fn test_file_is_read_on_every_fetch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "first-token").unwrap();
        let source = StringSource::file(file.path());
        assert_eq!(source.fetch().unwrap(), "first-token");

        std::fs::write(file.path(), "second-token").unwrap();
        assert_eq!(source.fetch().unwrap(), "second-token");
    }

    #[test]
    fn test_missing_file() {
        let err = StringSource::file("/definitely/not/here").fetch().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Setup);
    }
}
