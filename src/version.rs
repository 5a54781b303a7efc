//! Object versioning utilities
//!
//! Object versions are `MAJOR.MINOR` or `MAJOR.MINOR.PATCH`. The patch
//! component is reserved for stable-branch backports: it is preserved when a
//! version is printed, but never takes part in compatibility decisions.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{ObjectError, Result};

/// A dotted-integer object version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectVersion {
    major: u64,
    minor: u64,
    patch: Option<u64>,
}

impl ObjectVersion {
    /// Create a two-component version
    pub const fn new(major: u64, minor: u64) -> Self {
        Self {
            major,
            minor,
            patch: None,
        }
    }

    /// Create a three-component version
    pub const fn with_patch(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch: Some(patch),
        }
    }

    /// Parse from a version string
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts = version_str.split('.').count();
        let padded = match parts {
            2 => format!("{}.0", version_str),
            3 => version_str.to_string(),
            _ => return Err(ObjectError::InvalidVersion(version_str.to_string())),
        };

        let parsed = semver::Version::parse(&padded)
            .map_err(|e| ObjectError::InvalidVersion(format!("{}: {}", version_str, e)))?;
        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(ObjectError::InvalidVersion(version_str.to_string()));
        }

        Ok(Self {
            major: parsed.major,
            minor: parsed.minor,
            patch: (parts == 3).then_some(parsed.patch),
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> Option<u64> {
        self.patch
    }

    /// The same version with the patch component dropped
    pub fn without_patch(&self) -> Self {
        Self::new(self.major, self.minor)
    }

    /// `(major, minor)` pair used for compatibility and backport decisions
    pub fn release(&self) -> (u64, u64) {
        (self.major, self.minor)
    }

    /// Check whether an object at this version can serve a request for
    /// `requested`: same major, and at least the requested minor.
    pub fn is_compatible_with(&self, requested: &ObjectVersion) -> bool {
        self.major == requested.major && self.minor >= requested.minor
    }
}

impl fmt::Display for ObjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for ObjectVersion {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialOrd for ObjectVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Numeric tuple ordering: "1.2" sorts before "1.2.0".
impl Ord for ObjectVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl Serialize for ObjectVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = ObjectVersion::parse("1.2").unwrap();
        assert_eq!(v.release(), (1, 2));
        assert_eq!(v.patch(), None);
        assert_eq!(v.to_string(), "1.2");

        let v = ObjectVersion::parse("1.2.3").unwrap();
        assert_eq!(v.patch(), Some(3));
        assert_eq!(v.to_string(), "1.2.3");
        assert_eq!(v.without_patch().to_string(), "1.2");
    }

    #[test]
    fn test_invalid_versions() {
        for bad in ["1", "1.2.3.4", "a.b", "1.-2", "1.2.3-alpha", ""] {
            assert!(ObjectVersion::parse(bad).is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_numeric_ordering() {
        let v1_9 = ObjectVersion::parse("1.9").unwrap();
        let v1_10 = ObjectVersion::parse("1.10").unwrap();
        assert!(v1_10 > v1_9);
        assert!(ObjectVersion::parse("1.2.0").unwrap() > ObjectVersion::parse("1.2").unwrap());
        assert!(ObjectVersion::parse("2.0").unwrap() > v1_10);
    }

    #[test]
    fn test_compatibility_ignores_patch() {
        let current = ObjectVersion::parse("1.4").unwrap();
        assert!(current.is_compatible_with(&ObjectVersion::parse("1.2").unwrap()));
        assert!(current.is_compatible_with(&ObjectVersion::parse("1.4.7").unwrap()));
        assert!(!current.is_compatible_with(&ObjectVersion::parse("1.5").unwrap()));
        assert!(!current.is_compatible_with(&ObjectVersion::parse("2.0").unwrap()));
    }

    #[test]
    fn test_serde_as_string() {
        let v = ObjectVersion::with_patch(1, 2, 3);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"1.2.3\"");
        let back: ObjectVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
