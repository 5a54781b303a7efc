//! Object schemas
//!
//! A schema is the static description of one version of an object type:
//! its field table, virtual (extra) fields, sub-object relationship table
//! and remotable methods. Schemas are built once with [`SchemaBuilder`] and
//! shared behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::codec::DEFAULT_NAMESPACE;
use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::fields::Field;
use crate::object::VersionedObject;
use crate::remote::CallArgs;
use crate::value::Value;
use crate::version::ObjectVersion;

/// Field name to descriptor
pub type FieldTable = BTreeMap<String, Field>;

/// Remotable method bound to an instance
pub type InstanceMethod =
    Arc<dyn Fn(&mut VersionedObject, &CallArgs) -> Result<Value> + Send + Sync>;

/// Remotable method bound to the schema itself
pub type ClassMethod =
    Arc<dyn Fn(&Arc<ObjectSchema>, &Context, &CallArgs) -> Result<Value> + Send + Sync>;

/// Lazy-load hook, invoked when an unset field is read
pub type AttributeLoader = Arc<dyn Fn(&mut VersionedObject, &str) -> Result<()> + Send + Sync>;

/// Computed, read-only virtual field
pub type ExtraField = Arc<dyn Fn(&VersionedObject) -> Result<Value> + Send + Sync>;

/// Schema-specific rewrite of a field-data primitive for an older version
pub type CompatHook = Arc<
    dyn Fn(&mut serde_json::Map<String, serde_json::Value>, &ObjectVersion) -> Result<()>
        + Send
        + Sync,
>;

/// Name of the single field carried by object-list schemas
pub const LIST_FIELD: &str = "objects";

/// One step of a sub-object relationship table: when the owner reached
/// `owner`, the embedded object was at `child`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relationship {
    pub owner: ObjectVersion,
    pub child: ObjectVersion,
}

/// A registered object type at one version
pub struct ObjectSchema {
    name: String,
    version: ObjectVersion,
    /// Set explicitly on the builder
    namespace: Option<String>,
    /// Taken from the first registry the schema joins
    registered_namespace: OnceLock<String>,
    fields: FieldTable,
    extra_fields: BTreeMap<String, ExtraField>,
    relationships: BTreeMap<String, Vec<Relationship>>,
    list_item: Option<String>,
    child_versions: BTreeMap<ObjectVersion, ObjectVersion>,
    instance_methods: BTreeMap<String, InstanceMethod>,
    class_methods: BTreeMap<String, ClassMethod>,
    loader: Option<AttributeLoader>,
    compat_hook: Option<CompatHook>,
}

impl ObjectSchema {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name, version)
    }

    /// Wire identity of the object type
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> ObjectVersion {
        self.version
    }

    /// Namespace written into envelopes: the explicit one, else the
    /// namespace of the registry the schema was first registered with.
    pub fn namespace(&self) -> &str {
        self.namespace
            .as_deref()
            .or_else(|| self.registered_namespace.get().map(String::as_str))
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Adopt a registry's namespace unless one was set on the builder or
    /// by an earlier registration.
    pub(crate) fn adopt_namespace(&self, namespace: &str) {
        if self.namespace.is_none() {
            let _ = self.registered_namespace.set(namespace.to_string());
        }
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn extra_field(&self, name: &str) -> Option<&ExtraField> {
        self.extra_fields.get(name)
    }

    pub fn extra_field_names(&self) -> impl Iterator<Item = &str> {
        self.extra_fields.keys().map(String::as_str)
    }

    /// Declared fields followed by extra fields
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .map(String::as_str)
            .chain(self.extra_field_names())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.fields.contains_key(name) || self.extra_fields.contains_key(name)
    }

    pub fn relationships(&self) -> &BTreeMap<String, Vec<Relationship>> {
        &self.relationships
    }

    pub fn relationship(&self, field: &str) -> Option<&[Relationship]> {
        self.relationships.get(field).map(Vec::as_slice)
    }

    /// Item type name when this schema is an object list
    pub fn list_item(&self) -> Option<&str> {
        self.list_item.as_deref()
    }

    pub fn is_list(&self) -> bool {
        self.list_item.is_some()
    }

    pub fn child_versions(&self) -> &BTreeMap<ObjectVersion, ObjectVersion> {
        &self.child_versions
    }

    pub fn instance_method(&self, name: &str) -> Option<&InstanceMethod> {
        self.instance_methods.get(name)
    }

    pub fn class_method(&self, name: &str) -> Option<&ClassMethod> {
        self.class_methods.get(name)
    }

    /// Names of all remotable methods, class methods prefixed with `class:`
    pub fn remotable_methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.instance_methods.keys().cloned().collect();
        methods.extend(self.class_methods.keys().map(|m| format!("class:{}", m)));
        methods.sort();
        methods
    }

    pub fn loader(&self) -> Option<&AttributeLoader> {
        self.loader.as_ref()
    }

    pub fn compat_hook(&self) -> Option<&CompatHook> {
        self.compat_hook.as_ref()
    }

    /// Create a fresh, orphaned instance of this schema
    pub fn instantiate(self: &Arc<Self>) -> VersionedObject {
        VersionedObject::new(Arc::clone(self))
    }
}

impl fmt::Debug for ObjectSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSchema")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("namespace", &self.namespace())
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("extra_fields", &self.extra_fields.keys().collect::<Vec<_>>())
            .field("relationships", &self.relationships)
            .field("list_item", &self.list_item)
            .field("methods", &self.remotable_methods())
            .finish()
    }
}

/// Builder for [`ObjectSchema`]
///
/// Version strings are parsed and relationship tables validated in
/// [`SchemaBuilder::build`].
pub struct SchemaBuilder {
    name: String,
    version: String,
    namespace: Option<String>,
    fields: FieldTable,
    extra_fields: BTreeMap<String, ExtraField>,
    relationships: Vec<(String, Vec<(String, String)>)>,
    list_item: Option<String>,
    child_versions: Vec<(String, String)>,
    instance_methods: BTreeMap<String, InstanceMethod>,
    class_methods: BTreeMap<String, ClassMethod>,
    loader: Option<AttributeLoader>,
    compat_hook: Option<CompatHook>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            namespace: None,
            fields: FieldTable::new(),
            extra_fields: BTreeMap::new(),
            relationships: Vec::new(),
            list_item: None,
            child_versions: Vec::new(),
            instance_methods: BTreeMap::new(),
            class_methods: BTreeMap::new(),
            loader: None,
            compat_hook: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Union a base field table into this schema. Fields declared directly
    /// on the schema take precedence regardless of call order.
    pub fn base_fields(mut self, base: &FieldTable) -> Self {
        for (name, field) in base {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| field.clone());
        }
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn extra_field<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&VersionedObject) -> Result<Value> + Send + Sync + 'static,
    {
        self.extra_fields.insert(name.into(), Arc::new(compute));
        self
    }

    /// Declare the `(owner version, child version)` table for a sub-object
    /// field, oldest first.
    pub fn relationship(mut self, field: impl Into<String>, versions: &[(&str, &str)]) -> Self {
        let versions = versions
            .iter()
            .map(|(owner, child)| (owner.to_string(), child.to_string()))
            .collect();
        self.relationships.push((field.into(), versions));
        self
    }

    /// Make this schema a list of `item` objects held in [`LIST_FIELD`]
    pub fn object_list(mut self, item: impl Into<String>) -> Self {
        let item = item.into();
        self.fields
            .insert(LIST_FIELD.to_string(), Field::list_of_objects(item.clone()));
        self.list_item = Some(item);
        self
    }

    /// Map a list version to the item version it carries
    pub fn child_version(mut self, list_version: &str, child_version: &str) -> Self {
        self.child_versions
            .push((list_version.to_string(), child_version.to_string()));
        self
    }

    pub fn remotable<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&mut VersionedObject, &CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.instance_methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn remotable_class<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Arc<ObjectSchema>, &Context, &CallArgs) -> Result<Value> + Send + Sync + 'static,
    {
        self.class_methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(&mut VersionedObject, &str) -> Result<()> + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn compat_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut serde_json::Map<String, serde_json::Value>, &ObjectVersion) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.compat_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Arc<ObjectSchema>> {
        let version = ObjectVersion::parse(&self.version)?;

        let mut relationships = BTreeMap::new();
        for (field, pairs) in self.relationships {
            let table = parse_relationships(&self.name, &field, &pairs)?;
            relationships.insert(field, table);
        }

        let mut child_versions = BTreeMap::new();
        for (list_version, child_version) in &self.child_versions {
            child_versions.insert(
                ObjectVersion::parse(list_version)?.without_patch(),
                ObjectVersion::parse(child_version)?,
            );
        }

        Ok(Arc::new(ObjectSchema {
            name: self.name,
            version,
            namespace: self.namespace,
            registered_namespace: OnceLock::new(),
            fields: self.fields,
            extra_fields: self.extra_fields,
            relationships,
            list_item: self.list_item,
            child_versions,
            instance_methods: self.instance_methods,
            class_methods: self.class_methods,
            loader: self.loader,
            compat_hook: self.compat_hook,
        }))
    }
}

/// Parse a relationship table, enforcing that owner versions strictly
/// increase and child versions never go backwards.
fn parse_relationships(
    object: &str,
    field: &str,
    pairs: &[(String, String)],
) -> Result<Vec<Relationship>> {
    let mut table: Vec<Relationship> = Vec::with_capacity(pairs.len());
    for (owner, child) in pairs {
        let rel = Relationship {
            owner: ObjectVersion::parse(owner)?,
            child: ObjectVersion::parse(child)?,
        };
        if let Some(last) = table.last() {
            if rel.owner <= last.owner || rel.child < last.child {
                return Err(ObjectError::RelationshipOrder {
                    object: object.to_string(),
                    field: field.to_string(),
                    owner: rel.owner,
                    child: rel.child,
                });
            }
        }
        table.push(rel);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema() {
        let schema = ObjectSchema::builder("Widget", "1.2")
            .field("id", Field::integer().read_only())
            .field("name", Field::string())
            .build()
            .unwrap();

        assert_eq!(schema.name(), "Widget");
        assert_eq!(schema.version().to_string(), "1.2");
        assert_eq!(schema.namespace(), DEFAULT_NAMESPACE);
        assert!(schema.has_attribute("id"));
        assert!(!schema.has_attribute("missing"));
    }

    #[test]
    fn test_base_fields_do_not_override() {
        let mut base = FieldTable::new();
        base.insert("id".to_string(), Field::integer());
        base.insert("created_at".to_string(), Field::datetime().nullable());

        let schema = ObjectSchema::builder("Widget", "1.0")
            .field("id", Field::string())
            .base_fields(&base)
            .build()
            .unwrap();

        assert_eq!(schema.fields().len(), 2);
        assert_eq!(schema.field("id").unwrap().kind().type_name(), "String");
        assert!(schema.field("created_at").unwrap().is_nullable());
    }

    #[test]
    fn test_relationships_out_of_order() {
        let result = ObjectSchema::builder("Parent", "1.4")
            .field("child", Field::object("Child"))
            .relationship("child", &[("1.2", "1.1"), ("1.2", "1.2")])
            .build();
        assert!(matches!(result, Err(ObjectError::RelationshipOrder { .. })));

        let result = ObjectSchema::builder("Parent", "1.4")
            .field("child", Field::object("Child"))
            .relationship("child", &[("1.2", "1.3"), ("1.4", "1.2")])
            .build();
        assert!(matches!(result, Err(ObjectError::RelationshipOrder { .. })));
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(ObjectSchema::builder("Widget", "one").build().is_err());
    }

    #[test]
    fn test_object_list_schema() {
        let schema = ObjectSchema::builder("WidgetList", "1.1")
            .object_list("Widget")
            .child_version("1.0", "1.0")
            .child_version("1.1", "1.2")
            .build()
            .unwrap();
        assert!(schema.is_list());
        assert_eq!(schema.list_item(), Some("Widget"));
        assert!(schema.field(LIST_FIELD).unwrap().shape().is_object());
        assert_eq!(
            schema.child_versions()[&ObjectVersion::new(1, 1)],
            ObjectVersion::new(1, 2)
        );
    }
}
