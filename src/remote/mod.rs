//! Remote indirection protocol
//!
//! Remotable methods run either in-process or through a configured
//! [`Executor`]. On the instance path the executor's field updates are
//! reconciled back into the caller's instance:
//!
//! ```text
//! call(obj, method)
//!   ├─ no context          -> OrphanedObjectError
//!   ├─ no executor / Local -> method(obj, args)
//!   └─ executor            -> invoke_on_instance
//!                             apply updates, reset changes,
//!                             reseed from what_changed, return result
//! ```

mod loopback;

pub use loopback::LoopbackExecutor;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::codec::DecodeScope;
use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::registry::ObjectRegistry;
use crate::schema::ObjectSchema;
use crate::value::Value;
use crate::version::ObjectVersion;

/// Positional and keyword arguments of a remotable call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// New value for one field, as returned by an executor
#[derive(Debug, Clone)]
pub enum FieldUpdate {
    /// Raw primitive, decoded through the field's `from_primitive`
    Primitive(Json),
    /// Already an instance, assigned as is
    Object(Box<VersionedObject>),
}

/// Result of an instance-level call made through an executor
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub updates: BTreeMap<String, FieldUpdate>,
    pub what_changed: Vec<String>,
    pub result: Value,
}

/// Delegate that runs remotable methods somewhere else
pub trait Executor: Send + Sync {
    fn invoke_on_instance(
        &self,
        context: &Context,
        object: &VersionedObject,
        method: &str,
        args: &CallArgs,
    ) -> Result<ActionOutcome>;

    fn invoke_on_class(
        &self,
        context: &Context,
        objname: &str,
        method: &str,
        version: &ObjectVersion,
        args: &CallArgs,
    ) -> Result<Value>;

    /// Backport `primitive` to `target_version`
    fn backport(
        &self,
        context: Option<&Context>,
        primitive: &Json,
        target_version: &ObjectVersion,
    ) -> Result<Json>;
}

/// Whether a call may go through the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallMode {
    /// Use the executor when one is configured
    #[default]
    Auto,
    /// Run in-process regardless of the executor
    Local,
}

/// Dispatcher for remotable methods
#[derive(Clone)]
pub struct Remoting {
    registry: Arc<ObjectRegistry>,
    executor: Option<Arc<dyn Executor>>,
}

impl Remoting {
    /// Dispatcher without indirection
    pub fn local(registry: Arc<ObjectRegistry>) -> Self {
        Self {
            registry,
            executor: None,
        }
    }

    pub fn with_executor(registry: Arc<ObjectRegistry>, executor: Arc<dyn Executor>) -> Self {
        Self {
            registry,
            executor: Some(executor),
        }
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.as_ref()
    }

    /// Call an instance method
    pub fn call(&self, object: &mut VersionedObject, method: &str, args: &CallArgs) -> Result<Value> {
        self.call_with(object, method, args, CallMode::Auto)
    }

    pub fn call_with(
        &self,
        object: &mut VersionedObject,
        method: &str,
        args: &CallArgs,
        mode: CallMode,
    ) -> Result<Value> {
        let Some(context) = object.context().cloned() else {
            return Err(ObjectError::OrphanedObjectError {
                method: method.to_string(),
                objtype: object.name().to_string(),
            });
        };

        let schema = Arc::clone(object.schema());
        let local = schema
            .instance_method(method)
            .ok_or_else(|| not_remotable(&schema, method))?;

        match (&self.executor, mode) {
            (Some(executor), CallMode::Auto) => {
                tracing::debug!(
                    object = %object.name(),
                    method = %method,
                    version = %object.version(),
                    "dispatching remotable call to executor"
                );
                let outcome = executor.invoke_on_instance(&context, object, method, args)?;
                self.reconcile(object, outcome)
            }
            _ => local(object, args),
        }
    }

    /// Call a class method
    pub fn call_class(
        &self,
        schema: &Arc<ObjectSchema>,
        context: &Context,
        method: &str,
        args: &CallArgs,
    ) -> Result<Value> {
        self.call_class_with(schema, context, method, args, CallMode::Auto)
    }

    /// An instance returned by a local class method is bound to `context`;
    /// executor results are returned untouched.
    pub fn call_class_with(
        &self,
        schema: &Arc<ObjectSchema>,
        context: &Context,
        method: &str,
        args: &CallArgs,
        mode: CallMode,
    ) -> Result<Value> {
        let local = schema
            .class_method(method)
            .ok_or_else(|| not_remotable(schema, method))?;

        match (&self.executor, mode) {
            (Some(executor), CallMode::Auto) => {
                tracing::debug!(
                    object = %schema.name(),
                    method = %method,
                    version = %schema.version(),
                    "dispatching remotable class call to executor"
                );
                executor.invoke_on_class(context, schema.name(), method, &schema.version(), args)
            }
            _ => {
                let mut result = local(schema, context, args)?;
                if let Value::Object(obj) = &mut result {
                    obj.set_context(Some(context.clone()));
                }
                Ok(result)
            }
        }
    }

    /// Apply an executor outcome to the caller's instance.
    ///
    /// Updates are staged on a copy and swapped in only once every one of
    /// them succeeded, so a failure leaves `object` untouched. Updates for
    /// fields this schema does not declare (a newer executor) are skipped.
    fn reconcile(&self, object: &mut VersionedObject, outcome: ActionOutcome) -> Result<Value> {
        let mut staged = object.snapshot();
        let schema = Arc::clone(staged.schema());
        let context = staged.context().cloned();
        let scope = DecodeScope::new(&self.registry, context.as_ref());

        for (name, update) in outcome.updates {
            let Some(field) = schema.field(&name) else {
                tracing::debug!(
                    object = %schema.name(),
                    attr = %name,
                    "skipping update for undeclared field"
                );
                continue;
            };
            let value = match update {
                FieldUpdate::Object(obj) => Value::Object(obj),
                FieldUpdate::Primitive(primitive) => field.from_primitive(&scope, &name, &primitive)?,
            };
            staged.set(&name, value)?;
        }

        staged.reset_changes(&[], false);
        staged.seed_changes(&outcome.what_changed);
        *object = staged;
        Ok(outcome.result)
    }
}

fn not_remotable(schema: &ObjectSchema, method: &str) -> ObjectError {
    ObjectError::action(
        method,
        format!("{} has no remotable method {}", schema.name(), method),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Executor that records calls and answers with a canned outcome
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<String>>,
        outcome: Mutex<Option<ActionOutcome>>,
    }

    impl Executor for ScriptedExecutor {
        fn invoke_on_instance(
            &self,
            _context: &Context,
            object: &VersionedObject,
            method: &str,
            _args: &CallArgs,
        ) -> Result<ActionOutcome> {
            self.calls.lock().push(format!("{}.{}", object.name(), method));
            self.outcome
                .lock()
                .take()
                .ok_or_else(|| ObjectError::Executor("no outcome scripted".to_string()))
        }

        fn invoke_on_class(
            &self,
            _context: &Context,
            objname: &str,
            method: &str,
            version: &ObjectVersion,
            _args: &CallArgs,
        ) -> Result<Value> {
            self.calls
                .lock()
                .push(format!("{}@{}.{}", objname, version, method));
            Ok(Value::from("remote"))
        }

        fn backport(
            &self,
            _context: Option<&Context>,
            _primitive: &Json,
            _target_version: &ObjectVersion,
        ) -> Result<Json> {
            Err(ObjectError::Executor("unused".to_string()))
        }
    }

    fn schema() -> Arc<ObjectSchema> {
        ObjectSchema::builder("Counter", "1.0")
            .field("count", Field::integer())
            .field("label", Field::string().nullable())
            .field("frozen", Field::boolean().read_only())
            .remotable("bump", |obj, args| {
                let step = args.positional(0).and_then(Value::as_i64).unwrap_or(1);
                let count = obj.value("count")?.as_i64().unwrap_or(0);
                obj.set("count", count + step)?;
                Ok(Value::from(count + step))
            })
            .remotable_class("make", |schema, _context, _args| {
                let mut obj = schema.instantiate();
                obj.set("count", 0)?;
                Ok(Value::from(obj))
            })
            .build()
            .unwrap()
    }

    fn counter(context: Option<Context>) -> VersionedObject {
        let mut obj = schema().instantiate();
        obj.set_context(context);
        obj.set("count", 1).unwrap();
        obj.set("frozen", false).unwrap();
        obj
    }

    fn remoting(executor: Arc<ScriptedExecutor>) -> Remoting {
        Remoting::with_executor(Arc::new(ObjectRegistry::new()), executor)
    }

    #[test]
    fn test_orphan_never_reaches_executor() {
        let executor = Arc::new(ScriptedExecutor::default());
        let remoting = remoting(executor.clone());
        let mut obj = counter(None);

        match remoting.call(&mut obj, "bump", &CallArgs::new()) {
            Err(ObjectError::OrphanedObjectError { method, objtype }) => {
                assert_eq!(method, "bump");
                assert_eq!(objtype, "Counter");
            }
            other => panic!("Expected OrphanedObjectError, got {:?}", other),
        }
        assert!(executor.calls.lock().is_empty());
    }

    #[test]
    fn test_local_call_without_executor() {
        let remoting = Remoting::local(Arc::new(ObjectRegistry::new()));
        let mut obj = counter(Some(Context::new("req")));
        let result = remoting
            .call(&mut obj, "bump", &CallArgs::new().arg(4))
            .unwrap();
        assert_eq!(result, Value::Int(5));
        assert_eq!(obj.value("count").unwrap(), &Value::Int(5));
    }

    #[test]
    fn test_local_mode_bypasses_executor() {
        let executor = Arc::new(ScriptedExecutor::default());
        let remoting = remoting(executor.clone());
        let mut obj = counter(Some(Context::new("req")));
        remoting
            .call_with(&mut obj, "bump", &CallArgs::new(), CallMode::Local)
            .unwrap();
        assert_eq!(obj.value("count").unwrap(), &Value::Int(2));
        assert!(executor.calls.lock().is_empty());
    }

    #[test]
    fn test_executor_outcome_reconciled() {
        let executor = Arc::new(ScriptedExecutor::default());
        let mut updates = BTreeMap::new();
        updates.insert("count".to_string(), FieldUpdate::Primitive(json!(10)));
        updates.insert("label".to_string(), FieldUpdate::Primitive(Json::Null));
        *executor.outcome.lock() = Some(ActionOutcome {
            updates,
            what_changed: vec!["count".to_string(), "ghost".to_string()],
            result: Value::from("done"),
        });

        let remoting = remoting(executor.clone());
        let mut obj = counter(Some(Context::new("req")));
        let result = remoting.call(&mut obj, "bump", &CallArgs::new()).unwrap();

        assert_eq!(result, Value::from("done"));
        assert_eq!(obj.value("count").unwrap(), &Value::Int(10));
        assert_eq!(obj.value("label").unwrap(), &Value::Null);
        assert_eq!(
            obj.what_changed().into_iter().collect::<Vec<_>>(),
            vec!["count"]
        );
        assert_eq!(executor.calls.lock().as_slice(), ["Counter.bump"]);
    }

    #[test]
    fn test_updates_for_undeclared_fields_skipped() {
        let executor = Arc::new(ScriptedExecutor::default());
        let mut updates = BTreeMap::new();
        updates.insert("count".to_string(), FieldUpdate::Primitive(json!(10)));
        updates.insert("added_in_1_1".to_string(), FieldUpdate::Primitive(json!("x")));
        *executor.outcome.lock() = Some(ActionOutcome {
            updates,
            what_changed: vec!["count".to_string(), "added_in_1_1".to_string()],
            result: Value::Null,
        });

        let remoting = remoting(executor);
        let mut obj = counter(Some(Context::new("req")));
        obj.stamp_version(ObjectVersion::new(0, 9));
        remoting.call(&mut obj, "bump", &CallArgs::new()).unwrap();

        assert_eq!(obj.value("count").unwrap(), &Value::Int(10));
        assert_eq!(obj.version(), ObjectVersion::new(0, 9));
        assert_eq!(
            obj.what_changed().into_iter().collect::<Vec<_>>(),
            vec!["count"]
        );
    }

    #[test]
    fn test_failed_reconciliation_leaves_caller_untouched() {
        let executor = Arc::new(ScriptedExecutor::default());
        let mut updates = BTreeMap::new();
        updates.insert("count".to_string(), FieldUpdate::Primitive(json!(10)));
        updates.insert("frozen".to_string(), FieldUpdate::Primitive(json!(true)));
        *executor.outcome.lock() = Some(ActionOutcome {
            updates,
            what_changed: vec![],
            result: Value::Null,
        });

        let remoting = remoting(executor);
        let mut obj = counter(Some(Context::new("req")));
        let before = obj.clone();
        assert!(matches!(
            remoting.call(&mut obj, "bump", &CallArgs::new()),
            Err(ObjectError::ReadOnlyFieldViolation { .. })
        ));
        assert_eq!(obj, before);
        assert_eq!(obj.what_changed(), before.what_changed());
    }

    #[test]
    fn test_unknown_method() {
        let remoting = Remoting::local(Arc::new(ObjectRegistry::new()));
        let mut obj = counter(Some(Context::new("req")));
        assert!(matches!(
            remoting.call(&mut obj, "explode", &CallArgs::new()),
            Err(ObjectError::ActionError { .. })
        ));
    }

    #[test]
    fn test_class_call_local_binds_context() {
        let remoting = Remoting::local(Arc::new(ObjectRegistry::new()));
        let context = Context::new("req-1");
        let result = remoting
            .call_class(&schema(), &context, "make", &CallArgs::new())
            .unwrap();
        let obj = result.as_object().unwrap();
        assert_eq!(obj.context(), Some(&context));
        assert_eq!(obj.value("count").unwrap(), &Value::Int(0));
    }

    #[test]
    fn test_class_call_through_executor() {
        let executor = Arc::new(ScriptedExecutor::default());
        let remoting = remoting(executor.clone());
        let result = remoting
            .call_class(&schema(), &Context::new("req"), "make", &CallArgs::new())
            .unwrap();
        assert_eq!(result, Value::from("remote"));
        assert_eq!(executor.calls.lock().as_slice(), ["Counter@1.0.make"]);
    }
}
