//! Versioned object instances
//!
//! A [`VersionedObject`] is bound to one schema version. It stores the
//! fields that have been set (absence is distinct from null), tracks which
//! fields changed, and optionally carries the caller context used by
//! remotable methods.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::fields::{Field, ObjectShape};
use crate::schema::{ObjectSchema, LIST_FIELD};
use crate::value::Value;
use crate::version::ObjectVersion;

/// An instance of a registered object schema
pub struct VersionedObject {
    schema: Arc<ObjectSchema>,
    version: ObjectVersion,
    values: BTreeMap<String, Value>,
    changed: BTreeSet<String>,
    context: Option<Context>,
}

impl VersionedObject {
    /// Create an empty, orphaned instance. Object-list schemas start with an
    /// empty list that is not marked as changed.
    pub fn new(schema: Arc<ObjectSchema>) -> Self {
        let version = schema.version();
        let mut values = BTreeMap::new();
        if schema.is_list() {
            values.insert(LIST_FIELD.to_string(), Value::List(Vec::new()));
        }
        Self {
            schema,
            version,
            values,
            changed: BTreeSet::new(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn schema(&self) -> &Arc<ObjectSchema> {
        &self.schema
    }

    /// Wire name of the object type
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Version this instance reports; may be older than its schema after
    /// hydration from an older sender.
    pub fn version(&self) -> ObjectVersion {
        self.version
    }

    pub(crate) fn stamp_version(&mut self, version: ObjectVersion) {
        self.version = version;
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<Context>) {
        self.context = context;
    }

    pub fn is_orphaned(&self) -> bool {
        self.context.is_none()
    }

    fn declared(&self, name: &str) -> Result<&Field> {
        self.schema
            .field(name)
            .ok_or_else(|| self.unknown(name))
    }

    fn unknown(&self, name: &str) -> ObjectError {
        ObjectError::UnknownAttribute {
            object: self.name().to_string(),
            attribute: name.to_string(),
        }
    }

    fn unset(&self, name: &str) -> ObjectError {
        ObjectError::AttributeUnset {
            object: self.name().to_string(),
            attribute: name.to_string(),
        }
    }

    // =========================================================================
    // Attribute access
    // =========================================================================

    /// Read a field, running the schema's lazy-load hook first if the field
    /// has never been set.
    pub fn get(&mut self, name: &str) -> Result<&Value> {
        self.declared(name)?;
        if !self.values.contains_key(name) {
            self.load_attr(name)?;
        }
        match self.values.get(name) {
            Some(value) => Ok(value),
            None => Err(self.unset(name)),
        }
    }

    /// Mutable access to a field, lazy loading it first.
    ///
    /// Obtaining the reference does not mark the field changed. In-place
    /// edits of a sub-object still surface through [`Self::what_changed`]
    /// because the child tracks its own changes.
    pub fn get_mut(&mut self, name: &str) -> Result<&mut Value> {
        self.declared(name)?;
        if !self.values.contains_key(name) {
            self.load_attr(name)?;
        }
        let unset = self.unset(name);
        self.values.get_mut(name).ok_or(unset)
    }

    /// Read a field that is already set, without lazy loading
    pub fn value(&self, name: &str) -> Result<&Value> {
        self.declared(name)?;
        self.values.get(name).ok_or_else(|| self.unset(name))
    }

    /// Compute an extra (virtual) field
    pub fn extra(&self, name: &str) -> Result<Value> {
        match self.schema.extra_field(name) {
            Some(compute) => compute(self),
            None => Err(self.unknown(name)),
        }
    }

    /// Load an attribute through the schema's loader hook
    pub fn load_attr(&mut self, name: &str) -> Result<()> {
        match self.schema.loader().cloned() {
            Some(loader) => loader(self, name),
            None => Err(ObjectError::LoadUnsupported {
                object: self.name().to_string(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Coerce and store a field value, marking it changed.
    ///
    /// A read-only field that is already set accepts only its current value,
    /// which is a no-op.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let field = schema.field(name).ok_or_else(|| self.unknown(name))?;

        let value = field.coerce(name, value.into()).map_err(|e| {
            tracing::error!(
                attr = %format!("{}.{}", schema.name(), name),
                error = %e,
                "Error setting attribute"
            );
            e
        })?;

        if field.is_read_only() {
            if let Some(current) = self.values.get(name) {
                if *current != value {
                    return Err(ObjectError::ReadOnlyFieldViolation {
                        field: name.to_string(),
                    });
                }
                return Ok(());
            }
        }

        self.changed.insert(name.to_string());
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Clear a field, returning the value it held
    pub fn delete(&mut self, name: &str) -> Result<Value> {
        self.declared(name)?;
        match self.values.remove(name) {
            Some(value) => Ok(value),
            None => Err(self.unset(name)),
        }
    }

    /// Whether a value is stored for `name`. Extra fields are never stored.
    pub fn is_set(&self, name: &str) -> Result<bool> {
        if !self.schema.has_attribute(name) {
            return Err(self.unknown(name));
        }
        Ok(self.values.contains_key(name))
    }

    /// Set every field from a name/value mapping
    pub fn update<I, K, V>(&mut self, updates: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (name, value) in updates {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Stored values of declared fields
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    // =========================================================================
    // Change tracking
    // =========================================================================

    /// Fields changed on this instance, plus any field holding a sub-object
    /// (or list of sub-objects) that has changes of its own.
    pub fn what_changed(&self) -> BTreeSet<String> {
        let mut changes = self.changed.clone();
        for (name, value) in &self.values {
            if changes.contains(name) {
                continue;
            }
            let nested = match value {
                Value::Object(child) => !child.what_changed().is_empty(),
                Value::List(items) => items.iter().any(|item| {
                    item.as_object()
                        .map(|child| !child.what_changed().is_empty())
                        .unwrap_or(false)
                }),
                _ => false,
            };
            if nested {
                changes.insert(name.clone());
            }
        }
        changes
    }

    /// Changed fields and their current values
    pub fn get_changes(&self) -> BTreeMap<String, Value> {
        self.what_changed()
            .into_iter()
            .filter_map(|name| self.values.get(&name).cloned().map(|v| (name, v)))
            .collect()
    }

    /// Forget tracked changes for `fields`, or for everything when `fields`
    /// is empty. This does not revert values.
    ///
    /// With `recursive`, sub-objects under the selected fields are reset
    /// completely first; the field filter only applies at this level.
    pub fn reset_changes(&mut self, fields: &[&str], recursive: bool) {
        if recursive {
            let schema = Arc::clone(&self.schema);
            for name in self.what_changed() {
                if !fields.is_empty() && !fields.contains(&name.as_str()) {
                    continue;
                }
                let Some(field) = schema.field(&name) else {
                    continue;
                };
                let Some(value) = self.values.get_mut(&name) else {
                    continue;
                };
                match (field.shape(), value) {
                    (ObjectShape::Object(_), Value::Object(child)) => {
                        child.reset_changes(&[], true);
                    }
                    (ObjectShape::ObjectList(_), Value::List(items)) => {
                        for child in items.iter_mut().filter_map(Value::as_object_mut) {
                            child.reset_changes(&[], true);
                        }
                    }
                    _ => {}
                }
            }
        }

        if fields.is_empty() {
            self.changed.clear();
        } else {
            for name in fields {
                self.changed.remove(*name);
            }
        }
    }

    /// Replace the tracked change-set, keeping only declared field names
    pub(crate) fn seed_changes<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let schema = Arc::clone(&self.schema);
        self.changed = names
            .into_iter()
            .map(|name| name.as_ref().to_string())
            .filter(|name| schema.field(name).is_some())
            .collect();
    }

    /// Assign defaults to unset fields. With no names, every field that
    /// declares a default is considered.
    pub fn set_defaults(&mut self, names: &[&str]) -> Result<()> {
        let schema = Arc::clone(&self.schema);
        let targets: Vec<&str> = if names.is_empty() {
            schema
                .fields()
                .iter()
                .filter(|(_, field)| field.default().is_some())
                .map(|(name, _)| name.as_str())
                .collect()
        } else {
            names.to_vec()
        };

        for name in targets {
            let field = schema.field(name).ok_or_else(|| self.unknown(name))?;
            let default = field.default().cloned().ok_or_else(|| {
                ObjectError::action("set_defaults", format!("No default set for field {}", name))
            })?;
            if !self.values.contains_key(name) {
                self.set(name, default)?;
            }
        }
        Ok(())
    }
}

impl VersionedObject {
    /// Deep copy that keeps the version this instance and every nested
    /// sub-object reports, unlike `clone`
    pub(crate) fn snapshot(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            version: self.version,
            values: self
                .values
                .iter()
                .map(|(name, value)| (name.clone(), value.snapshot()))
                .collect(),
            changed: self.changed.clone(),
            context: self.context.clone(),
        }
    }
}

/// A clone reports the schema's own version again; the stamp left by
/// hydrating an older primitive is not carried over.
impl Clone for VersionedObject {
    fn clone(&self) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            version: self.schema.version(),
            values: self.values.clone(),
            changed: self.changed.clone(),
            context: self.context.clone(),
        }
    }
}

impl PartialEq for VersionedObject {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name() && self.version == other.version && self.values == other.values
    }
}

impl fmt::Debug for VersionedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedObject")
            .field("name", &self.name())
            .field("version", &self.version)
            .field("values", &self.values)
            .field("changed", &self.changed)
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for VersionedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .schema
            .fields()
            .iter()
            .map(|(name, field)| match self.values.get(name) {
                Some(value) => format!("{}={}", name, field.stringify(value)),
                None => format!("{}=<?>", name),
            })
            .collect();
        write!(f, "{}({})", self.name(), rendered.join(","))
    }
}
