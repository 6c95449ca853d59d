//! Durations as Vault puts them on the wire.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// A duration that serializes as an integer number of seconds.
///
/// Deserialization also accepts numeric strings and duration strings such as
/// `"768h0m0s"`, which some endpoints return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaultTtl(Duration);

impl VaultTtl {
    pub const ZERO: VaultTtl = VaultTtl(Duration::ZERO);
    pub const DAY: VaultTtl = VaultTtl(Duration::from_secs(24 * 60 * 60));
    pub const WEEK: VaultTtl = VaultTtl(Duration::from_secs(7 * 24 * 60 * 60));
    pub const YEAR: VaultTtl = VaultTtl(Duration::from_secs(365 * 24 * 60 * 60));

    pub const fn from_secs(secs: u64) -> Self {
        VaultTtl(Duration::from_secs(secs))
    }

    pub const fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub const fn duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Multiplies the duration, saturating on overflow.
    pub fn times(self, factor: u32) -> Self {
        VaultTtl(self.0.saturating_mul(factor))
    }
}

impl From<Duration> for VaultTtl {
    fn from(duration: Duration) -> Self {
        VaultTtl(duration)
    }
}

impl From<VaultTtl> for Duration {
    fn from(ttl: VaultTtl) -> Self {
        ttl.0
    }
}

impl fmt::Display for VaultTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl Serialize for VaultTtl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0.as_secs())
    }
}

struct TtlVisitor;

impl<'de> Visitor<'de> for TtlVisitor {
    type Value = VaultTtl;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of seconds or a duration string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(VaultTtl::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(VaultTtl::from_secs)
            .map_err(|_| E::custom(format!("negative duration: {}", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v < 0.0 || !v.is_finite() {
            return Err(E::custom(format!("invalid duration: {}", v)));
        }
        Duration::try_from_secs_f64(v)
            .map(VaultTtl)
            .map_err(|_| E::custom(format!("duration out of range: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let v = v.trim();
        if v.is_empty() {
            return Ok(VaultTtl::ZERO);
        }
        if let Ok(secs) = v.parse::<u64>() {
            return Ok(VaultTtl::from_secs(secs));
        }
        humantime::parse_duration(v)
            .map(VaultTtl)
            .map_err(|e| E::custom(format!("invalid duration {:?}: {}", v, e)))
    }
}

impl<'de> Deserialize<'de> for VaultTtl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TtlVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_as_seconds() {
        assert_eq!(serde_json::to_string(&VaultTtl::DAY).unwrap(), "86400");
        assert_eq!(
            serde_json::to_string(&VaultTtl::YEAR.times(10)).unwrap(),
            "315360000"
        );
    }

    #[test]
    fn test_deserializes_numbers_and_strings() {
        let ttl: VaultTtl = serde_json::from_str("3600").unwrap();
        assert_eq!(ttl.as_secs(), 3600);
        let ttl: VaultTtl = serde_json::from_str("\"120\"").unwrap();
        assert_eq!(ttl.as_secs(), 120);
        let ttl: VaultTtl = serde_json::from_str("\"768h\"").unwrap();
        assert_eq!(ttl.as_secs(), 768 * 3600);
        let ttl: VaultTtl = serde_json::from_str("\"\"").unwrap();
        assert!(ttl.is_zero());
    }

    #[test]
    fn test_rejects_negative_values() {
        assert!(serde_json::from_str::<VaultTtl>("-5").is_err());
    }

    #[test]
    fn test_float_seconds() {
        let ttl: VaultTtl = serde_json::from_str("1.5").unwrap();
        assert_eq!(ttl.duration(), Duration::from_millis(1500));
        assert!(serde_json::from_str::<VaultTtl>("1e30").is_err());
    }
}
