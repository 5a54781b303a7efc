//! Declarative schema definitions
//!
//! Schemas can be described in JSON or TOML files instead of code:
//!
//! ```toml
//! name = "Parent"
//! version = "1.4"
//!
//! [fields.id]
//! type = "integer"
//! read_only = true
//!
//! [fields.child]
//! type = "object"
//! object = "Child"
//! nullable = true
//!
//! [relationships]
//! child = [["1.2", "1.1"], ["1.4", "1.2"]]
//! ```
//!
//! Definitions carry no behaviour: remotable methods, loaders and
//! compatibility hooks still have to be attached in code.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{ObjectError, Result};
use crate::fields::{
    BooleanType, DateTimeType, Field, FieldType, FloatType, IntegerType, StringType,
};
use crate::registry::ObjectRegistry;
use crate::schema::{ObjectSchema, SchemaBuilder};
use crate::value::Value;

/// One schema version described as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDefinition>,
    /// Field name to `(owner version, child version)` pairs, oldest first
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Vec<(String, String)>>,
    /// Makes this an object list of the named item type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_of: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub child_versions: BTreeMap<String, String>,
}

/// One field of a [`SchemaDefinition`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Object name for `object` and `object_list` fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Element type for `list` and `dict` fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<FieldKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    String,
    DateTime,
    List,
    Dict,
    Object,
    ObjectList,
}

impl FieldDefinition {
    fn to_field(&self, name: &str) -> Result<Field> {
        let mut field = match self.kind {
            FieldKind::Integer => Field::integer(),
            FieldKind::Float => Field::float(),
            FieldKind::Boolean => Field::boolean(),
            FieldKind::String => Field::string(),
            FieldKind::DateTime => Field::datetime(),
            FieldKind::List => container(name, self.items, true)?,
            FieldKind::Dict => container(name, self.items, false)?,
            FieldKind::Object => Field::object(self.object_name(name)?),
            FieldKind::ObjectList => Field::list_of_objects(self.object_name(name)?),
        };
        if self.nullable {
            field = field.nullable();
        }
        if self.read_only {
            field = field.read_only();
        }
        if let Some(default) = &self.default {
            field = field.with_default(Value::from_json(default.clone()));
        }
        Ok(field)
    }

    fn object_name(&self, name: &str) -> Result<String> {
        self.object
            .clone()
            .ok_or_else(|| ObjectError::invalid(name, "object fields need an `object` name"))
    }
}

/// Build a list (or dict, when `list` is false) field over a scalar
/// element type
fn container(name: &str, items: Option<FieldKind>, list: bool) -> Result<Field> {
    fn wrap<T: FieldType + 'static>(item: T, list: bool) -> Field {
        if list {
            Field::list_of(item)
        } else {
            Field::dict_of(item)
        }
    }

    match items {
        Some(FieldKind::Integer) => Ok(wrap(IntegerType, list)),
        Some(FieldKind::Float) => Ok(wrap(FloatType, list)),
        Some(FieldKind::Boolean) => Ok(wrap(BooleanType, list)),
        Some(FieldKind::String) => Ok(wrap(StringType, list)),
        Some(FieldKind::DateTime) => Ok(wrap(DateTimeType, list)),
        Some(other) => Err(ObjectError::invalid(
            name,
            format!("{:?} is not a scalar element type", other),
        )),
        None => Err(ObjectError::invalid(name, "container fields need `items`")),
    }
}

impl SchemaDefinition {
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a `.json` or `.toml` definition file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn builder(&self) -> Result<SchemaBuilder> {
        let mut builder = ObjectSchema::builder(self.name.clone(), self.version.clone());
        if let Some(namespace) = &self.namespace {
            builder = builder.namespace(namespace.clone());
        }
        if let Some(item) = &self.list_of {
            builder = builder.object_list(item.clone());
        }
        for (name, field) in &self.fields {
            builder = builder.field(name.clone(), field.to_field(name)?);
        }
        for (field, pairs) in &self.relationships {
            let pairs: Vec<(&str, &str)> = pairs
                .iter()
                .map(|(owner, child)| (owner.as_str(), child.as_str()))
                .collect();
            builder = builder.relationship(field.clone(), &pairs);
        }
        for (list_version, child_version) in &self.child_versions {
            builder = builder.child_version(list_version, child_version);
        }
        Ok(builder)
    }

    pub fn build(&self) -> Result<Arc<ObjectSchema>> {
        self.builder()?.build()
    }
}

/// Load every `.json` and `.toml` definition under `dir`, in path order
pub fn load_definitions(dir: &Path) -> Result<Vec<SchemaDefinition>> {
    let mut definitions = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .map(|ext| ext == "json" || ext == "toml")
            .unwrap_or(false);
        if !supported {
            continue;
        }
        let definition = SchemaDefinition::from_file(path)?;
        tracing::debug!(
            object = %definition.name,
            version = %definition.version,
            path = %path.display(),
            "loaded schema definition"
        );
        definitions.push(definition);
    }
    Ok(definitions)
}

/// Build and register every definition
pub fn register_definitions(
    registry: &ObjectRegistry,
    definitions: &[SchemaDefinition],
) -> Result<Vec<Arc<ObjectSchema>>> {
    definitions
        .iter()
        .map(|definition| Ok(registry.register(definition.build()?)))
        .collect()
}
