//! Schema fingerprints and registry consistency checks
//!
//! A fingerprint is `"<version>-<sha256>"` over a canonical description of
//! the schema. Storing the expected fingerprints next to the code makes any
//! schema change without a version bump show up as a hash mismatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::checksum::Checksum;
use crate::error::{ObjectError, Result};
use crate::registry::ObjectRegistry;
use crate::schema::ObjectSchema;
use crate::version::ObjectVersion;

/// Expected vs. actual fingerprint for an object whose hash differs
pub type HashDiff = BTreeMap<String, (Option<String>, Option<String>)>;

/// Object name to the version of every object it embeds
pub type DependencyTree = BTreeMap<String, BTreeMap<String, ObjectVersion>>;

/// Consistency checks over the latest schema of every registered object
pub struct VersionChecker<'a> {
    registry: &'a ObjectRegistry,
}

impl<'a> VersionChecker<'a> {
    pub fn new(registry: &'a ObjectRegistry) -> Self {
        Self { registry }
    }

    /// Fingerprint of one schema
    pub fn fingerprint(schema: &ObjectSchema) -> String {
        let fields: Vec<_> = schema
            .fields()
            .iter()
            .map(|(name, field)| {
                json!({
                    "name": name,
                    "type": field.kind().type_name(),
                    "nullable": field.is_nullable(),
                    "read_only": field.is_read_only(),
                    "default": field.default().map(|value| field.stringify(value)),
                })
            })
            .collect();
        let child_versions: BTreeMap<String, String> = schema
            .child_versions()
            .iter()
            .map(|(list, child)| (list.to_string(), child.to_string()))
            .collect();

        let description = json!({
            "fields": fields,
            "methods": schema.remotable_methods(),
            "child_versions": child_versions,
        });
        format!("{}-{}", schema.version(), Checksum::of_description(&description))
    }

    /// Fingerprints of the latest version of every registered object
    pub fn hashes(&self) -> BTreeMap<String, String> {
        self.latest_schemas()
            .map(|schema| (schema.name().to_string(), Self::fingerprint(&schema)))
            .collect()
    }

    /// Entries where `expected` and the current fingerprints disagree
    pub fn diff_hashes(&self, expected: &BTreeMap<String, String>) -> HashDiff {
        let actual = self.hashes();
        let mut diff = HashDiff::new();
        for name in expected.keys().chain(actual.keys()) {
            let want = expected.get(name);
            let have = actual.get(name);
            if want != have {
                diff.insert(name.clone(), (want.cloned(), have.cloned()));
            }
        }
        diff
    }

    pub fn verify_hashes(&self, expected: &BTreeMap<String, String>) -> Result<()> {
        let diff = self.diff_hashes(expected);
        if diff.is_empty() {
            return Ok(());
        }
        for (name, (want, have)) in &diff {
            tracing::warn!(
                object = %name,
                expected = want.as_deref().unwrap_or("<missing>"),
                actual = have.as_deref().unwrap_or("<missing>"),
                "object fingerprint changed"
            );
        }
        Err(ObjectError::HashMismatch {
            objects: diff.into_keys().collect(),
        })
    }

    /// For every object embedding other objects, the latest registered
    /// version of each embedded object
    pub fn dependency_tree(&self) -> Result<DependencyTree> {
        let mut tree = DependencyTree::new();
        for schema in self.latest_schemas() {
            let mut deps = BTreeMap::new();
            for field in schema.fields().values() {
                let Some(child) = field.shape().object_name() else {
                    continue;
                };
                let latest = self.registry.latest(child).ok_or_else(|| {
                    ObjectError::UnsupportedObjectType {
                        objtype: child.to_string(),
                    }
                })?;
                deps.insert(child.to_string(), latest.version());
            }
            if !deps.is_empty() {
                tree.insert(schema.name().to_string(), deps);
            }
        }
        Ok(tree)
    }

    /// Serialise an empty instance of every object at each minor version of
    /// its current major, so a broken compatibility hook fails here rather
    /// than on the wire.
    pub fn check_compatibility_routines(&self) -> Result<()> {
        for schema in self.latest_schemas() {
            let obj = schema.instantiate();
            let latest = schema.version();
            for minor in 0..=latest.minor() {
                let target = ObjectVersion::new(latest.major(), minor);
                obj.to_primitive(Some(&target)).map_err(|e| {
                    tracing::error!(
                        object = %schema.name(),
                        version = %target,
                        error = %e,
                        "compatibility routine failed"
                    );
                    e
                })?;
            }
        }
        Ok(())
    }

    fn latest_schemas(&self) -> impl Iterator<Item = Arc<ObjectSchema>> + '_ {
        self.registry
            .names()
            .into_iter()
            .filter_map(|name| self.registry.latest(&name))
    }
}
