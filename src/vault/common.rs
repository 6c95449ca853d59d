//! Helpers shared by the domain modules: path joining, list responses and serde
//! adapters for the shapes Vault returns.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;

/// Joins path segments into an absolute URL path.
///
/// Empty segments and surrounding slashes are dropped, so `join_path(&["/v1", "kv/", "data", "a//b"])`
/// yields `/v1/kv/data/a/b`.
pub fn join_path(segments: &[&str]) -> String {
    let mut path = String::new();
    for part in segments
        .iter()
        .flat_map(|segment| segment.split('/'))
        .filter(|part| !part.is_empty() && *part != ".")
    {
        path.push('/');
        path.push_str(part);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Removes leading and trailing slashes from a mount path.
pub fn trim_slashes(path: &str) -> &str {
    path.trim_matches('/')
}

/// Generic `{"data": ...}` envelope.
#[derive(Debug, Deserialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub data: ListData,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListData {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Deserializes `null`, a missing value or an empty string as `None`.
pub fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Deserializes `null` as the default value of `T`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(&["/v1", "sys/mounts", "kv/"]), "/v1/sys/mounts/kv");
        assert_eq!(join_path(&["/v1", "kv", "metadata", ""]), "/v1/kv/metadata");
        assert_eq!(join_path(&["v1", "kv", "data", "a//b/"]), "/v1/kv/data/a/b");
        assert_eq!(join_path(&[]), "/");
    }

    #[test]
    fn test_trim_slashes() {
        assert_eq!(trim_slashes("/managed/kv/"), "managed/kv");
        assert_eq!(trim_slashes("token/"), "token");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default, deserialize_with = "empty_as_none")]
        kind: Option<u32>,
        #[serde(default, deserialize_with = "null_as_default")]
        items: Vec<String>,
    }

    #[test]
    fn test_serde_adapters() {
        let sample: Sample = serde_json::from_str(r#"{"kind": "", "items": null}"#).unwrap();
        assert_eq!(
            sample,
            Sample {
                kind: None,
                items: vec![]
            }
        );
        let sample: Sample = serde_json::from_str(r#"{"kind": 3}"#).unwrap();
        assert_eq!(sample.kind, Some(3));
    }
}
