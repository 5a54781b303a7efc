//! In-process executor
//!
//! Behaves like a remote executor without a transport: instances and
//! arguments are pushed through the primitive codec so the method sees a
//! detached copy, and the differences are reported back as field updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;

use super::{ActionOutcome, CallArgs, CallMode, Executor, FieldUpdate, Remoting};
use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::registry::ObjectRegistry;
use crate::serializer::ObjectSerializer;
use crate::value::Value;
use crate::version::ObjectVersion;

/// Executor that runs remotable methods in this process
pub struct LoopbackExecutor {
    remoting: Remoting,
    serializer: ObjectSerializer,
    /// Registry holding newer schemas, used to serve backport requests
    backport_registry: Option<Arc<ObjectRegistry>>,
}

impl LoopbackExecutor {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self {
            remoting: Remoting::local(Arc::clone(&registry)),
            serializer: ObjectSerializer::new(registry),
            backport_registry: None,
        }
    }

    pub fn with_backport_registry(mut self, registry: Arc<ObjectRegistry>) -> Self {
        self.backport_registry = Some(registry);
        self
    }

    /// Round-trip an entity so the callee never shares state with the caller
    fn canonicalize(&self, context: &Context, value: &Value) -> Result<Value> {
        let primitive = self.serializer.serialize_entity(value)?;
        self.serializer.deserialize_entity(Some(context), &primitive)
    }

    fn canonicalize_args(&self, context: &Context, args: &CallArgs) -> Result<CallArgs> {
        Ok(CallArgs {
            args: args
                .args
                .iter()
                .map(|arg| self.canonicalize(context, arg))
                .collect::<Result<_>>()?,
            kwargs: args
                .kwargs
                .iter()
                .map(|(name, arg)| Ok((name.clone(), self.canonicalize(context, arg)?)))
                .collect::<Result<_>>()?,
        })
    }
}

impl Executor for LoopbackExecutor {
    fn invoke_on_instance(
        &self,
        context: &Context,
        object: &VersionedObject,
        method: &str,
        args: &CallArgs,
    ) -> Result<ActionOutcome> {
        let primitive = object.to_primitive(None)?;
        let mut remote = self.serializer.process_object(Some(context), &primitive)?;
        let before = remote.clone();
        let args = self.canonicalize_args(context, args)?;

        let result = self
            .remoting
            .call_with(&mut remote, method, &args, CallMode::Local)?;

        let mut updates = BTreeMap::new();
        for (name, field) in remote.schema().fields() {
            let Some(value) = remote.values().get(name) else {
                continue;
            };
            if before.values().get(name) == Some(value) {
                continue;
            }
            let update = match value {
                Value::Object(obj) => FieldUpdate::Object(Box::new(obj.snapshot())),
                other => FieldUpdate::Primitive(field.to_primitive(name, other)?),
            };
            updates.insert(name.clone(), update);
        }

        Ok(ActionOutcome {
            updates,
            what_changed: remote.what_changed().into_iter().collect(),
            result: self.canonicalize(context, &result)?,
        })
    }

    fn invoke_on_class(
        &self,
        context: &Context,
        objname: &str,
        method: &str,
        version: &ObjectVersion,
        args: &CallArgs,
    ) -> Result<Value> {
        let schema = self.remoting.registry().resolve(objname, version)?;
        let args = self.canonicalize_args(context, args)?;
        let result = self
            .remoting
            .call_class_with(&schema, context, method, &args, CallMode::Local)?;

        match result {
            // hand the caller an instance at the version it asked for
            Value::Object(obj) if obj.name() == objname => {
                let primitive = obj.to_primitive(Some(version))?;
                self.serializer
                    .process_object(Some(context), &primitive)
                    .map(Value::from)
            }
            other => self.canonicalize(context, &other),
        }
    }

    fn backport(
        &self,
        context: Option<&Context>,
        primitive: &Json,
        target_version: &ObjectVersion,
    ) -> Result<Json> {
        let registry = self.backport_registry.as_ref().ok_or_else(|| {
            ObjectError::Executor("no registry configured to serve backports".to_string())
        })?;
        let obj = VersionedObject::from_primitive(registry, primitive, context.cloned())?;
        obj.to_primitive(Some(target_version))
    }
}
