//! Entity serializer for the remote boundary
//!
//! Walks arbitrary argument/result trees, turning instances into envelopes
//! and envelopes back into instances. Decoding recovers from version skew
//! before giving up:
//!
//! 1. decode as sent
//! 2. on `IncompatibleObjectVersion` with a patch component, retry once
//!    with the patch stripped
//! 3. still incompatible and an executor is configured: ask it to backport
//!    to the `supported` version and decode that
//! 4. otherwise the error is returned

use std::sync::Arc;

use serde_json::Value as Json;

use crate::codec::{is_envelope, Envelope};
use crate::config::CompatConfig;
use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::registry::ObjectRegistry;
use crate::remote::Executor;
use crate::value::Value;

/// Converts entity trees to and from primitives
#[derive(Clone)]
pub struct ObjectSerializer {
    registry: Arc<ObjectRegistry>,
    executor: Option<Arc<dyn Executor>>,
    strip_patch: bool,
    request_backport: bool,
}

impl ObjectSerializer {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self::with_config(registry, &CompatConfig::default())
    }

    pub fn with_config(registry: Arc<ObjectRegistry>, config: &CompatConfig) -> Self {
        Self {
            registry,
            executor: None,
            strip_patch: config.strip_patch_on_mismatch,
            request_backport: config.request_backport,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    /// Serialise an entity. Sets become lists; maps keep their keys and
    /// only their values are walked.
    pub fn serialize_entity(&self, entity: &Value) -> Result<Json> {
        Ok(match entity {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .ok_or_else(|| ObjectError::invalid("entity", format!("{} is not representable", f)))?,
            Value::String(s) => Json::String(s.clone()),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339()),
            Value::List(items) | Value::Set(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.serialize_entity(item))
                    .collect::<Result<_>>()?,
            ),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| Ok((key.clone(), self.serialize_entity(value)?)))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(obj) => obj.to_primitive(None)?,
        })
    }

    /// Deserialise a primitive tree, hydrating every envelope found in it
    pub fn deserialize_entity(&self, context: Option<&Context>, entity: &Json) -> Result<Value> {
        match entity {
            Json::Object(_) if is_envelope(entity) => {
                self.process_object(context, entity).map(Value::from)
            }
            Json::Array(items) => items
                .iter()
                .map(|item| self.deserialize_entity(context, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Json::Object(map) => map
                .iter()
                .map(|(key, value)| Ok((key.clone(), self.deserialize_entity(context, value)?)))
                .collect::<Result<_>>()
                .map(Value::Map),
            scalar => Ok(Value::from_json(scalar.clone())),
        }
    }

    /// Decode one envelope, applying the version-skew recovery steps
    pub fn process_object(&self, context: Option<&Context>, primitive: &Json) -> Result<VersionedObject> {
        let err = match VersionedObject::from_primitive(&self.registry, primitive, context.cloned()) {
            Err(err @ ObjectError::IncompatibleObjectVersion { .. }) => err,
            other => return other,
        };

        let envelope = Envelope::from_json(primitive)?;
        let version = envelope.parsed_version()?;
        let err = if self.strip_patch && version.patch().is_some() {
            let stripped = version.without_patch();
            tracing::info!(
                object = %envelope.name,
                version = %version,
                "retrying decode without patch version"
            );
            let mut retry = envelope.clone();
            retry.version = stripped.to_string();
            match VersionedObject::from_primitive(&self.registry, &retry.into_json()?, context.cloned()) {
                Err(err @ ObjectError::IncompatibleObjectVersion { .. }) => err,
                other => return other,
            }
        } else {
            err
        };

        let (executor, supported) = match (&self.executor, &err) {
            (Some(executor), ObjectError::IncompatibleObjectVersion { supported, .. })
                if self.request_backport =>
            {
                (executor, *supported)
            }
            _ => return Err(err),
        };

        tracing::warn!(
            object = %envelope.name,
            version = %version,
            supported = %supported,
            "requesting backport from executor"
        );
        let backported = executor.backport(context, primitive, &supported)?;
        VersionedObject::from_primitive(&self.registry, &backported, context.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::remote::{ActionOutcome, CallArgs};
    use crate::schema::ObjectSchema;
    use crate::version::ObjectVersion;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct RecordingBackport {
        requested: Mutex<Vec<ObjectVersion>>,
    }

    impl Executor for RecordingBackport {
        fn invoke_on_instance(
            &self,
            _context: &Context,
            _object: &VersionedObject,
            _method: &str,
            _args: &CallArgs,
        ) -> Result<ActionOutcome> {
            Err(ObjectError::Executor("unused".to_string()))
        }

        fn invoke_on_class(
            &self,
            _context: &Context,
            _objname: &str,
            _method: &str,
            _version: &ObjectVersion,
            _args: &CallArgs,
        ) -> Result<Value> {
            Err(ObjectError::Executor("unused".to_string()))
        }

        fn backport(
            &self,
            _context: Option<&Context>,
            primitive: &Json,
            target_version: &ObjectVersion,
        ) -> Result<Json> {
            self.requested.lock().push(*target_version);
            let mut primitive = primitive.clone();
            primitive["version"] = json!(target_version.to_string());
            if let Some(data) = primitive["data"].as_object_mut() {
                data.remove("extra");
            }
            Ok(primitive)
        }
    }

    fn registry() -> Arc<ObjectRegistry> {
        let registry = ObjectRegistry::new();
        registry.register(
            ObjectSchema::builder("Widget", "1.2")
                .field("id", Field::integer())
                .build()
                .unwrap(),
        );
        Arc::new(registry)
    }

    fn envelope(version: &str) -> Json {
        json!({
            "namespace": "familiar.objects",
            "name": "Widget",
            "version": version,
            "data": {"id": 3, "extra": true}
        })
    }

    #[test]
    fn test_serialize_containers() {
        let registry = registry();
        let serializer = ObjectSerializer::new(registry.clone());
        let mut widget = registry.latest("Widget").unwrap().instantiate();
        widget.set("id", 1).unwrap();

        let mut map = BTreeMap::new();
        map.insert("w".to_string(), Value::from(widget));
        let entity = Value::List(vec![
            Value::Set(vec![Value::Int(1), Value::Int(2)]),
            Value::Map(map),
            Value::from("plain"),
        ]);

        let primitive = serializer.serialize_entity(&entity).unwrap();
        assert_eq!(primitive[0], json!([1, 2]));
        assert!(is_envelope(&primitive[1]["w"]));
        assert_eq!(primitive[2], json!("plain"));

        let back = serializer.deserialize_entity(None, &primitive).unwrap();
        let items = back.as_list().unwrap();
        let w = items[1].as_map().unwrap()["w"].as_object().unwrap();
        assert_eq!(w.value("id").unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_non_envelope_maps_stay_maps() {
        let serializer = ObjectSerializer::new(registry());
        let primitive = json!({"name": "Widget", "version": "1.0", "data": "nope"});
        let value = serializer.deserialize_entity(None, &primitive).unwrap();
        assert_eq!(value.as_map().unwrap()["name"], Value::from("Widget"));
    }

    #[test]
    fn test_patch_is_compatibility_transparent() {
        let serializer = ObjectSerializer::new(registry());
        let obj = serializer.process_object(None, &envelope("1.2.5")).unwrap();
        assert_eq!(obj.version(), ObjectVersion::with_patch(1, 2, 5));
        assert_eq!(obj.value("id").unwrap(), &Value::Int(3));

        // a newer patch of an unknown minor still needs the executor
        assert!(serializer.process_object(None, &envelope("1.3.1")).is_err());
    }

    #[test]
    fn test_backport_requested_from_executor() {
        let executor = Arc::new(RecordingBackport {
            requested: Mutex::new(Vec::new()),
        });
        let serializer = ObjectSerializer::new(registry()).with_executor(executor.clone());
        let obj = serializer.process_object(None, &envelope("1.7")).unwrap();

        assert_eq!(executor.requested.lock().as_slice(), [ObjectVersion::new(1, 2)]);
        assert_eq!(obj.version(), ObjectVersion::new(1, 2));
    }

    #[test]
    fn test_incompatible_without_executor_is_fatal() {
        let serializer = ObjectSerializer::new(registry());
        match serializer.process_object(None, &envelope("1.7")) {
            Err(ObjectError::IncompatibleObjectVersion { supported, .. }) => {
                assert_eq!(supported, ObjectVersion::new(1, 2));
            }
            other => panic!("Expected IncompatibleObjectVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_backport_disabled_by_config() {
        let executor = Arc::new(RecordingBackport {
            requested: Mutex::new(Vec::new()),
        });
        let config = CompatConfig {
            strip_patch_on_mismatch: false,
            request_backport: false,
        };
        let serializer = ObjectSerializer::with_config(registry(), &config).with_executor(executor.clone());
        assert!(serializer.process_object(None, &envelope("1.7.2")).is_err());
        assert!(executor.requested.lock().is_empty());
    }
}
