//! Object Registry
//!
//! Maps object names to every registered schema version, newest first, and
//! resolves an incoming `(name, version)` to the schema that should hydrate
//! it. One registry is created per process and shared behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::DEFAULT_NAMESPACE;
use crate::config::RegistryConfig;
use crate::error::{ObjectError, Result};
use crate::schema::ObjectSchema;
use crate::version::ObjectVersion;

/// The process-wide table of object schemas
pub struct ObjectRegistry {
    /// Namespace expected on incoming envelopes
    namespace: String,
    /// Per-name schema lists, sorted by descending version
    classes: RwLock<HashMap<String, Vec<Arc<ObjectSchema>>>>,
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::with_namespace(config.namespace.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register a schema.
    ///
    /// A schema built without an explicit namespace takes this registry's,
    /// so instances encode with the namespace the registry decodes.
    ///
    /// A schema with the same version as an existing entry replaces it in
    /// place; otherwise it is inserted before the first older entry.
    pub fn register(&self, schema: Arc<ObjectSchema>) -> Arc<ObjectSchema> {
        schema.adopt_namespace(&self.namespace);
        let mut classes = self.classes.write();
        let entries = classes.entry(schema.name().to_string()).or_default();

        let position = entries
            .iter()
            .position(|existing| schema.version() >= existing.version());
        match position {
            Some(i) if entries[i].version() == schema.version() => {
                entries[i] = Arc::clone(&schema);
            }
            Some(i) => entries.insert(i, Arc::clone(&schema)),
            None => entries.push(Arc::clone(&schema)),
        }

        tracing::debug!(
            object = %schema.name(),
            version = %schema.version(),
            "registered object schema"
        );
        schema
    }

    /// Register only when `condition` holds
    pub fn register_if(&self, condition: bool, schema: Arc<ObjectSchema>) -> Arc<ObjectSchema> {
        if condition {
            self.register(schema)
        } else {
            schema
        }
    }

    /// Find the schema for `name` at `version`.
    ///
    /// An exact version match wins. Otherwise the newest registered version
    /// with the same major and an equal or higher minor is used, which may
    /// be newer than the one requested.
    pub fn resolve(&self, name: &str, version: &ObjectVersion) -> Result<Arc<ObjectSchema>> {
        let classes = self.classes.read();
        let Some(entries) = classes.get(name).filter(|entries| !entries.is_empty()) else {
            tracing::error!(objtype = %name, "Unable to instantiate unregistered object type");
            return Err(ObjectError::UnsupportedObjectType {
                objtype: name.to_string(),
            });
        };

        let mut compatible_match = None;
        for schema in entries {
            if schema.version() == *version {
                return Ok(Arc::clone(schema));
            }
            if compatible_match.is_none() && schema.version().is_compatible_with(version) {
                compatible_match = Some(schema);
            }
        }

        match compatible_match {
            Some(schema) => Ok(Arc::clone(schema)),
            None => Err(ObjectError::IncompatibleObjectVersion {
                objname: name.to_string(),
                objver: version.to_string(),
                supported: entries[0].version(),
            }),
        }
    }

    /// Newest registered schema for `name`
    pub fn latest(&self, name: &str) -> Option<Arc<ObjectSchema>> {
        self.classes
            .read()
            .get(name)
            .and_then(|entries| entries.first().cloned())
    }

    /// Registered versions for `name`, newest first
    pub fn versions(&self, name: &str) -> Vec<ObjectVersion> {
        self.classes
            .read()
            .get(name)
            .map(|entries| entries.iter().map(|s| s.version()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    /// All registered object names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of the whole table
    pub fn classes(&self) -> BTreeMap<String, Vec<Arc<ObjectSchema>>> {
        self.classes
            .read()
            .iter()
            .map(|(name, entries)| (name.clone(), entries.clone()))
            .collect()
    }
}
