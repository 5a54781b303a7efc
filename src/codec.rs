//! Primitive codec
//!
//! Converts instances to and from the transport-neutral envelope:
//!
//! ```text
//! {
//!   "namespace": "familiar.objects",
//!   "name": "Widget",
//!   "version": "1.2",
//!   "data": { "<field>": <primitive>, ... },
//!   "changes": ["<field>", ...]        // only when non-empty
//! }
//! ```
//!
//! `data` holds set fields only. Nested object fields hold envelopes of the
//! same shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::registry::ObjectRegistry;
use crate::version::ObjectVersion;

/// Namespace stamped on envelopes unless a schema overrides it
pub const DEFAULT_NAMESPACE: &str = "familiar.objects";

pub const NAMESPACE_KEY: &str = "namespace";
pub const NAME_KEY: &str = "name";
pub const VERSION_KEY: &str = "version";
pub const DATA_KEY: &str = "data";
pub const CHANGES_KEY: &str = "changes";

/// Typed form of the primitive envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub namespace: String,
    pub name: String,
    /// Kept as sent so patch components survive a round trip untouched
    pub version: String,
    pub data: serde_json::Map<String, Json>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<String>,
}

impl Envelope {
    pub fn from_json(primitive: &Json) -> Result<Self> {
        if !primitive.is_object() {
            return Err(ObjectError::MalformedEnvelope(format!(
                "expected an object, got {}",
                primitive
            )));
        }
        serde_json::from_value(primitive.clone())
            .map_err(|e| ObjectError::MalformedEnvelope(e.to_string()))
    }

    pub fn into_json(self) -> Result<Json> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn parsed_version(&self) -> Result<ObjectVersion> {
        ObjectVersion::parse(&self.version)
    }
}

/// Whether a primitive has the shape of an envelope
pub fn is_envelope(primitive: &Json) -> bool {
    match primitive.as_object() {
        Some(map) => {
            map.get(NAMESPACE_KEY).map_or(false, Json::is_string)
                && map.get(NAME_KEY).map_or(false, Json::is_string)
                && map.get(VERSION_KEY).map_or(false, Json::is_string)
                && map.get(DATA_KEY).map_or(false, Json::is_object)
        }
        None => false,
    }
}

/// What nested field decoding needs: where to resolve schemas, and which
/// context to bind hydrated sub-objects to.
#[derive(Clone, Copy)]
pub struct DecodeScope<'a> {
    pub registry: &'a ObjectRegistry,
    pub context: Option<&'a Context>,
}

impl<'a> DecodeScope<'a> {
    pub fn new(registry: &'a ObjectRegistry, context: Option<&'a Context>) -> Self {
        Self { registry, context }
    }

    pub fn decode(&self, primitive: &Json) -> Result<VersionedObject> {
        VersionedObject::from_primitive(self.registry, primitive, self.context.cloned())
    }
}

impl VersionedObject {
    /// Serialise set fields into an envelope, backporting to
    /// `target_version` first when one is given.
    pub fn to_primitive(&self, target_version: Option<&ObjectVersion>) -> Result<Json> {
        let mut data = serde_json::Map::new();
        for (name, field) in self.schema().fields() {
            if let Some(value) = self.values().get(name) {
                data.insert(name.clone(), field.to_primitive(name, value)?);
            }
        }

        if let Some(target) = target_version {
            self.make_compatible(&mut data, target)?;
        }

        let envelope = Envelope {
            namespace: self.schema().namespace().to_string(),
            name: self.name().to_string(),
            version: target_version.copied().unwrap_or(self.version()).to_string(),
            data,
            changes: self.what_changed().into_iter().collect(),
        };
        envelope.into_json()
    }

    /// Hydrate an instance from an envelope.
    ///
    /// Fields in `data` unknown to the resolved schema are ignored, fields
    /// missing from `data` stay unset, and `changes` is filtered to declared
    /// fields.
    pub fn from_primitive(
        registry: &ObjectRegistry,
        primitive: &Json,
        context: Option<Context>,
    ) -> Result<VersionedObject> {
        let envelope = Envelope::from_json(primitive)?;
        if envelope.namespace != registry.namespace() {
            return Err(ObjectError::UnsupportedObjectType {
                objtype: format!("{}.{}", envelope.namespace, envelope.name),
            });
        }

        let version = envelope.parsed_version()?;
        let schema = registry.resolve(&envelope.name, &version)?;

        let mut obj = VersionedObject::new(schema);
        obj.set_context(context.clone());
        obj.stamp_version(version);

        let scope = DecodeScope::new(registry, context.as_ref());
        let schema = std::sync::Arc::clone(obj.schema());
        for (name, field) in schema.fields() {
            if let Some(primitive) = envelope.data.get(name) {
                let value = field.from_primitive(&scope, name, primitive)?;
                obj.set(name, value)?;
            }
        }
        obj.seed_changes(&envelope.changes);
        Ok(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::schema::ObjectSchema;
    use crate::value::Value;
    use serde_json::json;

    fn registry() -> ObjectRegistry {
        let registry = ObjectRegistry::new();
        registry.register(
            ObjectSchema::builder("Child", "1.0")
                .field("label", Field::string())
                .build()
                .unwrap(),
        );
        registry.register(
            ObjectSchema::builder("Widget", "1.1")
                .field("id", Field::integer())
                .field("name", Field::string().with_default("unnamed"))
                .field("child", Field::object("Child").nullable())
                .relationship("child", &[("1.1", "1.0")])
                .build()
                .unwrap(),
        );
        registry
    }

    fn widget(registry: &ObjectRegistry) -> VersionedObject {
        let schema = registry.latest("Widget").unwrap();
        let mut obj = schema.instantiate();
        obj.set("id", 7).unwrap();
        obj.set("name", "bolt").unwrap();
        obj
    }

    #[test]
    fn test_envelope_shape() {
        let registry = registry();
        let mut obj = widget(&registry);
        obj.reset_changes(&[], false);

        let primitive = obj.to_primitive(None).unwrap();
        assert_eq!(
            primitive,
            json!({
                "namespace": DEFAULT_NAMESPACE,
                "name": "Widget",
                "version": "1.1",
                "data": {"id": 7, "name": "bolt"}
            })
        );
        assert!(is_envelope(&primitive));
    }

    #[test]
    fn test_changes_included_when_present() {
        let registry = registry();
        let obj = widget(&registry);
        let primitive = obj.to_primitive(None).unwrap();
        assert_eq!(primitive[CHANGES_KEY], json!(["id", "name"]));
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let mut obj = widget(&registry);
        let mut child = registry.latest("Child").unwrap().instantiate();
        child.set("label", "inner").unwrap();
        obj.set("child", child).unwrap();

        let primitive = obj.to_primitive(None).unwrap();
        let decoded = VersionedObject::from_primitive(&registry, &primitive, None).unwrap();
        assert_eq!(decoded, obj);
        assert_eq!(decoded.to_primitive(None).unwrap(), primitive);
    }

    #[test]
    fn test_unknown_fields_dropped() {
        let registry = registry();
        let primitive = json!({
            "namespace": DEFAULT_NAMESPACE,
            "name": "Widget",
            "version": "1.1",
            "data": {"id": 1, "from_the_future": "x"},
            "changes": ["id", "from_the_future"]
        });
        let obj = VersionedObject::from_primitive(&registry, &primitive, None).unwrap();
        assert_eq!(obj.value("id").unwrap(), &Value::Int(1));
        assert_eq!(obj.what_changed().into_iter().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn test_missing_fields_stay_unset() {
        let registry = registry();
        let primitive = json!({
            "namespace": DEFAULT_NAMESPACE,
            "name": "Widget",
            "version": "1.1",
            "data": {"id": 1}
        });
        let obj = VersionedObject::from_primitive(&registry, &primitive, None).unwrap();
        assert!(!obj.is_set("name").unwrap());
        assert!(obj.what_changed().is_empty());
    }

    #[test]
    fn test_version_stamped_from_envelope() {
        let registry = registry();
        let primitive = json!({
            "namespace": DEFAULT_NAMESPACE,
            "name": "Widget",
            "version": "1.0",
            "data": {"id": 1}
        });
        let obj = VersionedObject::from_primitive(&registry, &primitive, None).unwrap();
        assert_eq!(obj.version(), ObjectVersion::new(1, 0));
        assert_eq!(obj.schema().version(), ObjectVersion::new(1, 1));
    }

    #[test]
    fn test_foreign_namespace_rejected() {
        let registry = registry();
        let primitive = json!({
            "namespace": "someone.else",
            "name": "Widget",
            "version": "1.1",
            "data": {}
        });
        match VersionedObject::from_primitive(&registry, &primitive, None) {
            Err(ObjectError::UnsupportedObjectType { objtype }) => {
                assert_eq!(objtype, "someone.else.Widget");
            }
            other => panic!("Expected UnsupportedObjectType, got {:?}", other),
        }
    }

    #[test]
    fn test_context_bound_to_nested_objects() {
        let registry = registry();
        let mut obj = widget(&registry);
        let mut child = registry.latest("Child").unwrap().instantiate();
        child.set("label", "inner").unwrap();
        obj.set("child", child).unwrap();

        let context = Context::new("req-9");
        let primitive = obj.to_primitive(None).unwrap();
        let decoded =
            VersionedObject::from_primitive(&registry, &primitive, Some(context.clone())).unwrap();
        assert_eq!(decoded.context(), Some(&context));
        let child = decoded.value("child").unwrap().as_object().unwrap();
        assert_eq!(child.context(), Some(&context));
    }

    #[test]
    fn test_malformed_envelope() {
        let registry = registry();
        assert!(matches!(
            VersionedObject::from_primitive(&registry, &json!([1, 2]), None),
            Err(ObjectError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            VersionedObject::from_primitive(&registry, &json!({"name": "Widget"}), None),
            Err(ObjectError::MalformedEnvelope(_))
        ));
    }
}
