//! Field descriptors
//!
//! The object model only depends on the [`FieldType`] contract: coerce an
//! incoming value, convert it to a primitive and back. A small set of
//! built-in types covers scalars, containers and nested objects.

use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::DecodeScope;
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::value::Value;

/// Whether a field embeds other versioned objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectShape<'a> {
    Scalar,
    /// A single sub-object of the named type
    Object(&'a str),
    /// A list of sub-objects of the named type
    ObjectList(&'a str),
}

impl<'a> ObjectShape<'a> {
    pub fn is_object(&self) -> bool {
        !matches!(self, ObjectShape::Scalar)
    }

    pub fn object_name(&self) -> Option<&'a str> {
        match *self {
            ObjectShape::Scalar => None,
            ObjectShape::Object(name) | ObjectShape::ObjectList(name) => Some(name),
        }
    }
}

/// Typed accessor contract for a single field
///
/// Null handling is done by [`Field`]; implementations only see non-null
/// values.
pub trait FieldType: Send + Sync + fmt::Debug {
    /// Stable type label, part of schema fingerprints
    fn type_name(&self) -> String;

    fn coerce(&self, attr: &str, value: Value) -> Result<Value>;

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json>;

    fn from_primitive(&self, scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value>;

    fn shape(&self) -> ObjectShape<'_> {
        ObjectShape::Scalar
    }

    fn stringify(&self, value: &Value) -> String {
        match value {
            Value::String(s) => format!("'{}'", s),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Object(obj) => obj.to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// A declared field: a type plus default, nullability and read-only flags
#[derive(Debug, Clone)]
pub struct Field {
    kind: Arc<dyn FieldType>,
    default: Option<Value>,
    nullable: bool,
    read_only: bool,
}

impl Field {
    pub fn new(kind: impl FieldType + 'static) -> Self {
        Self {
            kind: Arc::new(kind),
            default: None,
            nullable: false,
            read_only: false,
        }
    }

    pub fn integer() -> Self {
        Self::new(IntegerType)
    }

    pub fn float() -> Self {
        Self::new(FloatType)
    }

    pub fn boolean() -> Self {
        Self::new(BooleanType)
    }

    pub fn string() -> Self {
        Self::new(StringType)
    }

    pub fn datetime() -> Self {
        Self::new(DateTimeType)
    }

    pub fn list_of(item: impl FieldType + 'static) -> Self {
        Self::new(ListType::new(item))
    }

    pub fn dict_of(item: impl FieldType + 'static) -> Self {
        Self::new(DictType::new(item))
    }

    pub fn object(obj_name: impl Into<String>) -> Self {
        Self::new(ObjectType::new(obj_name))
    }

    pub fn list_of_objects(obj_name: impl Into<String>) -> Self {
        Self::new(ListOfObjectsType::new(obj_name))
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn kind(&self) -> &dyn FieldType {
        self.kind.as_ref()
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn shape(&self) -> ObjectShape<'_> {
        self.kind.shape()
    }

    pub fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(ObjectError::invalid(attr, "field cannot be None"))
            };
        }
        self.kind.coerce(attr, value)
    }

    pub fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        if value.is_null() {
            return Ok(Json::Null);
        }
        self.kind.to_primitive(attr, value)
    }

    pub fn from_primitive(&self, scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        if primitive.is_null() {
            return Ok(Value::Null);
        }
        self.kind.from_primitive(scope, attr, primitive)
    }

    pub fn stringify(&self, value: &Value) -> String {
        if value.is_null() {
            return "None".to_string();
        }
        self.kind.stringify(value)
    }
}

fn mismatch(attr: &str, expected: &str, value: &Value) -> ObjectError {
    ObjectError::invalid(attr, format!("expected {}, got {}", expected, value.kind()))
}

fn bad_primitive(attr: &str, expected: &str, primitive: &Json) -> ObjectError {
    ObjectError::invalid(attr, format!("expected {} primitive, got {}", expected, primitive))
}

// =============================================================================
// Scalars
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerType;

impl FieldType for IntegerType {
    fn type_name(&self) -> String {
        "Integer".to_string()
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Float(f) => {
                let whole = f.trunc();
                // i64::MIN is exactly representable, i64::MAX rounds up to 2^63
                if whole.is_finite() && whole >= i64::MIN as f64 && whole < i64::MAX as f64 {
                    Ok(Value::Int(whole as i64))
                } else {
                    Err(ObjectError::invalid(attr, format!("{} is out of integer range", f)))
                }
            }
            Value::String(ref s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| ObjectError::invalid(attr, e.to_string())),
            other => Err(mismatch(attr, "integer", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        value
            .as_i64()
            .map(Json::from)
            .ok_or_else(|| mismatch(attr, "integer", value))
    }

    fn from_primitive(&self, _scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        primitive
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| bad_primitive(attr, "integer", primitive))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FloatType;

/// NaN and infinities have no JSON form
fn finite(attr: &str, f: f64) -> Result<Value> {
    if f.is_finite() {
        Ok(Value::Float(f))
    } else {
        Err(ObjectError::invalid(attr, format!("{} is not a finite number", f)))
    }
}

impl FieldType for FloatType {
    fn type_name(&self) -> String {
        "Float".to_string()
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::Float(f) => finite(attr, f),
            Value::Int(i) => Ok(Value::Float(i as f64)),
            Value::String(ref s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| ObjectError::invalid(attr, e.to_string()))
                .and_then(|f| finite(attr, f)),
            other => Err(mismatch(attr, "float", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        let f = value.as_f64().ok_or_else(|| mismatch(attr, "float", value))?;
        serde_json::Number::from_f64(f)
            .map(Json::Number)
            .ok_or_else(|| ObjectError::invalid(attr, format!("{} has no JSON form", f)))
    }

    fn from_primitive(&self, _scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        primitive
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| bad_primitive(attr, "float", primitive))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanType;

impl FieldType for BooleanType {
    fn type_name(&self) -> String {
        "Boolean".to_string()
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Int(i) => Ok(Value::Bool(i != 0)),
            Value::String(ref s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(ObjectError::invalid(attr, format!("not a boolean: {}", s))),
            },
            other => Err(mismatch(attr, "boolean", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        value
            .as_bool()
            .map(Json::Bool)
            .ok_or_else(|| mismatch(attr, "boolean", value))
    }

    fn from_primitive(&self, _scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        primitive
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| bad_primitive(attr, "boolean", primitive))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringType;

impl FieldType for StringType {
    fn type_name(&self) -> String {
        "String".to_string()
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(s)),
            Value::Int(i) => Ok(Value::String(i.to_string())),
            Value::Float(f) => Ok(Value::String(f.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(mismatch(attr, "string", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        value
            .as_str()
            .map(|s| Json::String(s.to_string()))
            .ok_or_else(|| mismatch(attr, "string", value))
    }

    fn from_primitive(&self, _scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        primitive
            .as_str()
            .map(Value::from)
            .ok_or_else(|| bad_primitive(attr, "string", primitive))
    }
}

/// UTC timestamp, carried as an RFC 3339 string
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeType;

impl DateTimeType {
    fn parse(attr: &str, s: &str) -> Result<Value> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|e| ObjectError::invalid(attr, e.to_string()))
    }
}

impl FieldType for DateTimeType {
    fn type_name(&self) -> String {
        "DateTime".to_string()
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::DateTime(dt) => Ok(Value::DateTime(dt)),
            Value::String(ref s) => Self::parse(attr, s),
            other => Err(mismatch(attr, "datetime", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        match value {
            Value::DateTime(dt) => Ok(Json::String(dt.to_rfc3339())),
            other => Err(mismatch(attr, "datetime", other)),
        }
    }

    fn from_primitive(&self, _scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        match primitive.as_str() {
            Some(s) => Self::parse(attr, s),
            None => Err(bad_primitive(attr, "datetime", primitive)),
        }
    }
}

// =============================================================================
// Containers
// =============================================================================

/// Homogeneous list of a scalar type
#[derive(Debug, Clone)]
pub struct ListType {
    item: Arc<dyn FieldType>,
}

impl ListType {
    pub fn new(item: impl FieldType + 'static) -> Self {
        Self { item: Arc::new(item) }
    }
}

impl FieldType for ListType {
    fn type_name(&self) -> String {
        format!("List({})", self.item.type_name())
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::List(items) | Value::Set(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| self.item.coerce(&format!("{}[{}]", attr, i), item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Err(mismatch(attr, "list", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        let items = value.as_list().ok_or_else(|| mismatch(attr, "list", value))?;
        items
            .iter()
            .map(|item| self.item.to_primitive(attr, item))
            .collect::<Result<Vec<_>>>()
            .map(Json::Array)
    }

    fn from_primitive(&self, scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        let items = primitive
            .as_array()
            .ok_or_else(|| bad_primitive(attr, "list", primitive))?;
        items
            .iter()
            .map(|item| self.item.from_primitive(scope, attr, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::List)
    }
}

/// String-keyed mapping of a scalar type
#[derive(Debug, Clone)]
pub struct DictType {
    item: Arc<dyn FieldType>,
}

impl DictType {
    pub fn new(item: impl FieldType + 'static) -> Self {
        Self { item: Arc::new(item) }
    }
}

impl FieldType for DictType {
    fn type_name(&self) -> String {
        format!("Dict({})", self.item.type_name())
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::Map(map) => map
                .into_iter()
                .map(|(k, v)| {
                    let coerced = self.item.coerce(&format!("{}[{}]", attr, k), v)?;
                    Ok((k, coerced))
                })
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Value::Map),
            other => Err(mismatch(attr, "dict", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        let map = value.as_map().ok_or_else(|| mismatch(attr, "dict", value))?;
        let mut out = serde_json::Map::new();
        for (k, v) in map {
            out.insert(k.clone(), self.item.to_primitive(attr, v)?);
        }
        Ok(Json::Object(out))
    }

    fn from_primitive(&self, scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        let map = primitive
            .as_object()
            .ok_or_else(|| bad_primitive(attr, "dict", primitive))?;
        map.iter()
            .map(|(k, v)| Ok((k.clone(), self.item.from_primitive(scope, attr, v)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Value::Map)
    }
}

// =============================================================================
// Objects
// =============================================================================

fn check_object(attr: &str, obj_name: &str, obj: &VersionedObject) -> Result<()> {
    if obj.name() != obj_name {
        return Err(ObjectError::invalid(
            attr,
            format!("an object of type {} is required, got {}", obj_name, obj.name()),
        ));
    }
    Ok(())
}

/// A single nested versioned object
#[derive(Debug, Clone)]
pub struct ObjectType {
    obj_name: String,
}

impl ObjectType {
    pub fn new(obj_name: impl Into<String>) -> Self {
        Self {
            obj_name: obj_name.into(),
        }
    }
}

impl FieldType for ObjectType {
    fn type_name(&self) -> String {
        format!("Object({})", self.obj_name)
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        match value {
            Value::Object(obj) => {
                check_object(attr, &self.obj_name, &obj)?;
                Ok(Value::Object(obj))
            }
            other => Err(mismatch(attr, "object", &other)),
        }
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        value
            .as_object()
            .ok_or_else(|| mismatch(attr, "object", value))?
            .to_primitive(None)
    }

    fn from_primitive(&self, scope: &DecodeScope<'_>, _attr: &str, primitive: &Json) -> Result<Value> {
        scope.decode(primitive).map(Value::from)
    }

    fn shape(&self) -> ObjectShape<'_> {
        ObjectShape::Object(&self.obj_name)
    }
}

/// A list of nested versioned objects of one type
#[derive(Debug, Clone)]
pub struct ListOfObjectsType {
    obj_name: String,
}

impl ListOfObjectsType {
    pub fn new(obj_name: impl Into<String>) -> Self {
        Self {
            obj_name: obj_name.into(),
        }
    }
}

impl FieldType for ListOfObjectsType {
    fn type_name(&self) -> String {
        format!("List(Object({}))", self.obj_name)
    }

    fn coerce(&self, attr: &str, value: Value) -> Result<Value> {
        let items = match value {
            Value::List(items) => items,
            other => return Err(mismatch(attr, "list of objects", &other)),
        };
        for item in &items {
            match item {
                Value::Object(obj) => check_object(attr, &self.obj_name, obj)?,
                other => return Err(mismatch(attr, "object", other)),
            }
        }
        Ok(Value::List(items))
    }

    fn to_primitive(&self, attr: &str, value: &Value) -> Result<Json> {
        let items = value
            .as_list()
            .ok_or_else(|| mismatch(attr, "list of objects", value))?;
        items
            .iter()
            .map(|item| {
                item.as_object()
                    .ok_or_else(|| mismatch(attr, "object", item))?
                    .to_primitive(None)
            })
            .collect::<Result<Vec<_>>>()
            .map(Json::Array)
    }

    fn from_primitive(&self, scope: &DecodeScope<'_>, attr: &str, primitive: &Json) -> Result<Value> {
        let items = primitive
            .as_array()
            .ok_or_else(|| bad_primitive(attr, "list", primitive))?;
        items
            .iter()
            .map(|item| scope.decode(item).map(Value::from))
            .collect::<Result<Vec<_>>>()
            .map(Value::List)
    }

    fn shape(&self) -> ObjectShape<'_> {
        ObjectShape::ObjectList(&self.obj_name)
    }

    fn stringify(&self, value: &Value) -> String {
        match value.as_list() {
            Some(items) => {
                let inner: Vec<String> = items
                    .iter()
                    .map(|item| match item.as_object() {
                        Some(obj) => obj.to_string(),
                        None => format!("{:?}", item),
                    })
                    .collect();
                format!("[{}]", inner.join(","))
            }
            None => format!("{:?}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_coercion() {
        let field = Field::integer();
        assert_eq!(field.coerce("n", Value::from("42")).unwrap(), Value::Int(42));
        assert_eq!(field.coerce("n", Value::Float(3.9)).unwrap(), Value::Int(3));
        assert_eq!(field.coerce("n", Value::Bool(true)).unwrap(), Value::Int(1));
        assert!(field.coerce("n", Value::from("four")).is_err());
    }

    #[test]
    fn test_numbers_out_of_range_rejected() {
        let integer = Field::integer();
        assert!(integer.coerce("n", Value::Float(1e30)).is_err());
        assert!(integer.coerce("n", Value::Float(f64::NAN)).is_err());
        assert_eq!(
            integer.coerce("n", Value::Float(i64::MIN as f64)).unwrap(),
            Value::Int(i64::MIN)
        );

        let float = Field::float();
        assert!(matches!(
            float.coerce("f", Value::Float(f64::NAN)),
            Err(ObjectError::InvalidValue { .. })
        ));
        assert!(float.coerce("f", Value::from("inf")).is_err());
        assert!(float.to_primitive("f", &Value::Float(f64::INFINITY)).is_err());
        assert_eq!(float.to_primitive("f", &Value::Float(1.5)).unwrap(), serde_json::json!(1.5));
    }

    #[test]
    fn test_null_requires_nullable() {
        assert!(Field::string().coerce("s", Value::Null).is_err());
        assert_eq!(
            Field::string().nullable().coerce("s", Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_string_coercion() {
        let field = Field::string();
        assert_eq!(field.coerce("s", Value::Int(7)).unwrap(), Value::from("7"));
        assert!(field.coerce("s", Value::List(vec![])).is_err());
    }

    #[test]
    fn test_list_coerces_items() {
        let field = Field::list_of(IntegerType);
        let coerced = field
            .coerce("l", Value::Set(vec![Value::from("1"), Value::Int(2)]))
            .unwrap();
        assert_eq!(coerced, Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_datetime_primitive() {
        let field = Field::datetime();
        let value = field
            .coerce("at", Value::from("2024-01-02T03:04:05Z"))
            .unwrap();
        let primitive = field.to_primitive("at", &value).unwrap();
        assert_eq!(primitive, Json::String("2024-01-02T03:04:05+00:00".to_string()));
    }

    #[test]
    fn test_object_shapes() {
        assert_eq!(Field::integer().shape(), ObjectShape::Scalar);
        assert_eq!(Field::object("Child").shape(), ObjectShape::Object("Child"));
        assert_eq!(
            Field::list_of_objects("Child").shape(),
            ObjectShape::ObjectList("Child")
        );
        assert_eq!(Field::list_of_objects("Child").kind().type_name(), "List(Object(Child))");
    }
}
