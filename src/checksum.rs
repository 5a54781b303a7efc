//! SHA-256 digest behind schema fingerprints

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 of a schema's canonical JSON description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Hash a description. `serde_json` maps are ordered, so equal
    /// descriptions always hash the same.
    pub fn of_description(description: &serde_json::Value) -> Self {
        Self(format!("{:x}", Sha256::digest(description.to_string().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_key_order_irrelevant() {
        let a: serde_json::Value = serde_json::from_str(r#"{"fields":{"b":"Integer","a":"String"}}"#).unwrap();
        let b = json!({"fields": {"a": "String", "b": "Integer"}});
        assert_eq!(Checksum::of_description(&a), Checksum::of_description(&b));
        assert_eq!(Checksum::of_description(&a).as_str().len(), 64);
        assert_ne!(
            Checksum::of_description(&a),
            Checksum::of_description(&json!({"fields": {"a": "String"}}))
        );
    }
}
