//! Compatibility / backport engine
//!
//! Rewrites a field-data primitive so that a receiver that only knows an
//! older version of the object can consume it. Sub-object fields are
//! backported through the schema's relationship table: each entry says
//! which child version the field carried when the owner reached a given
//! version.
//!
//! ```text
//! relationships["child"] = [("1.2", "1.1"), ("1.4", "1.2")]
//!
//! target 1.1 -> "child" removed (added in 1.2)
//! target 1.3 -> child backported to 1.1
//! target 1.4 -> child backported to 1.2
//! target 1.5 -> child left as is
//! ```

use serde_json::{Map, Value as Json};

use crate::codec::{DATA_KEY, VERSION_KEY};
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::schema::{Relationship, LIST_FIELD};
use crate::value::Value;
use crate::version::ObjectVersion;

/// Item version used for object lists without a `child_versions` entry
const DEFAULT_CHILD_VERSION: ObjectVersion = ObjectVersion::new(1, 0);

impl VersionedObject {
    /// Make `primitive` (the `data` map of this object's envelope) suitable
    /// for `target_version`.
    ///
    /// Every set sub-object field must have a relationship rule; a missing
    /// rule fails the whole call and leaves `primitive` partially rewritten.
    pub fn make_compatible(
        &self,
        primitive: &mut Map<String, Json>,
        target_version: &ObjectVersion,
    ) -> Result<()> {
        if self.schema().is_list() {
            self.make_list_compatible(primitive, target_version)?;
        } else {
            for (name, field) in self.schema().fields() {
                if !field.shape().is_object() || !self.values().contains_key(name) {
                    continue;
                }
                let rules = self.schema().relationship(name).ok_or_else(|| {
                    ObjectError::action("make_compatible", format!("No rule for {}", name))
                })?;
                self.backport_field(primitive, target_version, name, rules)?;
            }
        }

        if let Some(hook) = self.schema().compat_hook() {
            hook(primitive, target_version)?;
        }
        Ok(())
    }

    /// Apply the first matching relationship rule for one sub-object field
    fn backport_field(
        &self,
        primitive: &mut Map<String, Json>,
        target_version: &ObjectVersion,
        field: &str,
        rules: &[Relationship],
    ) -> Result<()> {
        let target = target_version.release();
        for (index, rule) in rules.iter().enumerate() {
            let owner = rule.owner.release();
            if target < owner {
                if index == 0 {
                    // The field did not exist yet at the target version
                    primitive.remove(field);
                } else {
                    self.backport_child(primitive, field, &rules[index - 1].child)?;
                }
                return Ok(());
            }
            if target == owner {
                self.backport_child(primitive, field, &rule.child)?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Backport the sub-object(s) held in `field` to `to_version`
    fn backport_child(
        &self,
        primitive: &mut Map<String, Json>,
        field: &str,
        to_version: &ObjectVersion,
    ) -> Result<()> {
        let Some(value) = self.values().get(field) else {
            return Ok(());
        };
        let Some(slot) = primitive.get_mut(field) else {
            return Ok(());
        };

        match (value, slot) {
            (Value::Object(child), Json::Object(envelope)) => {
                child.backport_envelope(envelope, to_version)
            }
            (Value::List(items), Json::Array(envelopes)) => {
                backport_each(items, envelopes, to_version)
            }
            (Value::Null, _) | (_, Json::Null) => Ok(()),
            _ => Err(ObjectError::MalformedEnvelope(format!(
                "field {} of {} does not hold an object primitive",
                field,
                self.name()
            ))),
        }
    }

    /// Backport an envelope of this object in place and retag its version
    pub(crate) fn backport_envelope(
        &self,
        envelope: &mut Map<String, Json>,
        to_version: &ObjectVersion,
    ) -> Result<()> {
        match envelope.get_mut(DATA_KEY) {
            Some(Json::Object(data)) => self.make_compatible(data, to_version)?,
            _ => {
                return Err(ObjectError::MalformedEnvelope(format!(
                    "envelope for {} has no data",
                    self.name()
                )))
            }
        }
        envelope.insert(VERSION_KEY.to_string(), Json::String(to_version.to_string()));
        Ok(())
    }

    /// Object lists backport every item to the child version mapped from
    /// the requested list version.
    fn make_list_compatible(
        &self,
        primitive: &mut Map<String, Json>,
        target_version: &ObjectVersion,
    ) -> Result<()> {
        let child_version = self
            .schema()
            .child_versions()
            .get(&target_version.without_patch())
            .copied()
            .unwrap_or(DEFAULT_CHILD_VERSION);

        let items = match self.values().get(LIST_FIELD) {
            Some(Value::List(items)) => items,
            _ => return Ok(()),
        };
        match primitive.get_mut(LIST_FIELD) {
            Some(Json::Array(envelopes)) => backport_each(items, envelopes, &child_version),
            _ => Ok(()),
        }
    }
}

fn backport_each(items: &[Value], envelopes: &mut [Json], to_version: &ObjectVersion) -> Result<()> {
    for (item, envelope) in items.iter().zip(envelopes.iter_mut()) {
        match (item, envelope) {
            (Value::Object(child), Json::Object(envelope)) => {
                child.backport_envelope(envelope, to_version)?;
            }
            _ => {
                return Err(ObjectError::MalformedEnvelope(
                    "list item does not hold an object primitive".to_string(),
                ))
            }
        }
    }
    Ok(())
}
