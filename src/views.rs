//! Adapters for consumers that expect mapping or sequence access
//!
//! [`KeyedView`] exposes an instance as a read-only mapping of its set
//! fields plus extra fields. [`SequenceView`] exposes an object-list
//! instance as a sequence of its items. Neither adapter lazy-loads.

use std::ops::Range;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{ObjectError, Result};
use crate::object::VersionedObject;
use crate::schema::{ObjectSchema, LIST_FIELD};
use crate::value::Value;

/// Mapping-style access to an instance
pub struct KeyedView<'a> {
    object: &'a VersionedObject,
}

impl<'a> KeyedView<'a> {
    /// Extra field names followed by set field names
    pub fn keys(&self) -> Vec<&'a str> {
        let schema: &'a ObjectSchema = self.object.schema();
        schema
            .extra_field_names()
            .chain(
                self.object
                    .values()
                    .keys()
                    .map(String::as_str),
            )
            .collect()
    }

    pub fn items(&self) -> Result<Vec<(&'a str, Value)>> {
        self.keys()
            .into_iter()
            .map(|name| Ok((name, self.lookup(name)?)))
            .collect()
    }

    /// Value of `name`, or `default` when the field is declared but unset
    pub fn get_or(&self, name: &str, default: Value) -> Result<Value> {
        if self.object.schema().extra_field(name).is_some() {
            return self.object.extra(name);
        }
        if !self.object.is_set(name)? {
            return Ok(default);
        }
        self.lookup(name)
    }

    /// Whether `name` is an extra field or a set field
    pub fn contains(&self, name: &str) -> bool {
        self.object.schema().extra_field(name).is_some() || self.object.values().contains_key(name)
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        match self.object.schema().extra_field(name) {
            Some(_) => self.object.extra(name),
            None => self.object.value(name).cloned(),
        }
    }
}

/// Sequence-style access to an object-list instance
pub struct SequenceView<'a> {
    items: &'a [Value],
}

impl<'a> SequenceView<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a VersionedObject> + 'a {
        self.items.iter().filter_map(Value::as_object)
    }

    pub fn get(&self, index: usize) -> Option<&'a VersionedObject> {
        self.items.get(index).and_then(Value::as_object)
    }

    pub fn contains(&self, item: &VersionedObject) -> bool {
        self.iter().any(|candidate| candidate == item)
    }

    pub fn count(&self, item: &VersionedObject) -> usize {
        self.iter().filter(|candidate| *candidate == item).count()
    }

    /// Index of the first item equal to `item`
    pub fn position(&self, item: &VersionedObject) -> Option<usize> {
        self.iter().position(|candidate| candidate == item)
    }
}

impl VersionedObject {
    pub fn as_keyed(&self) -> KeyedView<'_> {
        KeyedView { object: self }
    }

    /// Sequence view of an object-list instance
    pub fn as_sequence(&self) -> Result<SequenceView<'_>> {
        if !self.schema().is_list() {
            return Err(ObjectError::action(
                "as_sequence",
                format!("{} is not an object list", self.name()),
            ));
        }
        let items = match self.values().get(LIST_FIELD) {
            Some(Value::List(items)) => items.as_slice(),
            _ => &[],
        };
        Ok(SequenceView { items })
    }

    /// New list instance holding `range` of this list's items, with the
    /// same context and no tracked changes
    pub fn slice(&self, range: Range<usize>) -> Result<VersionedObject> {
        let view = self.as_sequence()?;
        let end = range.end.min(view.len());
        let start = range.start.min(end);
        let items = view.items[start..end].iter().map(Value::snapshot).collect();

        let mut list = VersionedObject::new(Arc::clone(self.schema()));
        list.set_context(self.context().cloned());
        list.set(LIST_FIELD, Value::List(items))?;
        list.reset_changes(&[], false);
        Ok(list)
    }
}

/// Build a list instance of `schema` from `items`, with changes reset
pub fn make_list(
    schema: &Arc<ObjectSchema>,
    context: Option<Context>,
    items: Vec<VersionedObject>,
) -> Result<VersionedObject> {
    if !schema.is_list() {
        return Err(ObjectError::action(
            "make_list",
            format!("{} is not an object list", schema.name()),
        ));
    }
    let mut list = schema.instantiate();
    list.set_context(context);
    list.set(LIST_FIELD, items)?;
    list.reset_changes(&[], false);
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;

    fn item_schema() -> Arc<ObjectSchema> {
        ObjectSchema::builder("Item", "1.0")
            .field("id", Field::integer())
            .field("note", Field::string().nullable())
            .extra_field("double", |obj| {
                Ok(Value::Int(obj.value("id")?.as_i64().unwrap_or(0) * 2))
            })
            .build()
            .unwrap()
    }

    fn list_schema() -> Arc<ObjectSchema> {
        ObjectSchema::builder("ItemList", "1.0")
            .object_list("Item")
            .build()
            .unwrap()
    }

    fn item(id: i64) -> VersionedObject {
        let mut obj = item_schema().instantiate();
        obj.set("id", id).unwrap();
        obj.reset_changes(&[], false);
        obj
    }

    #[test]
    fn test_keyed_view() {
        let obj = item(4);
        let view = obj.as_keyed();
        assert_eq!(view.keys(), vec!["double", "id"]);
        assert!(view.contains("id"));
        assert!(!view.contains("note"));
        assert_eq!(view.get_or("note", Value::from("n/a")).unwrap(), Value::from("n/a"));
        assert_eq!(view.get_or("double", Value::Null).unwrap(), Value::Int(8));
        assert!(matches!(
            view.get_or("missing", Value::Null),
            Err(ObjectError::UnknownAttribute { .. })
        ));

        let items = view.items().unwrap();
        assert_eq!(items, vec![("double", Value::Int(8)), ("id", Value::Int(4))]);
    }

    #[test]
    fn test_new_list_is_empty_and_unchanged() {
        let list = list_schema().instantiate();
        assert!(list.as_sequence().unwrap().is_empty());
        assert!(list.what_changed().is_empty());
    }

    #[test]
    fn test_make_list_and_sequence_view() {
        let context = Context::new("req");
        let list = make_list(
            &list_schema(),
            Some(context.clone()),
            vec![item(1), item(2), item(1)],
        )
        .unwrap();
        assert!(list.what_changed().is_empty());
        assert_eq!(list.context(), Some(&context));

        let seq = list.as_sequence().unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.get(1).unwrap().value("id").unwrap(), &Value::Int(2));
        assert!(seq.contains(&item(2)));
        assert!(!seq.contains(&item(9)));
        assert_eq!(seq.count(&item(1)), 2);
        assert_eq!(seq.position(&item(2)), Some(1));
        assert_eq!(seq.iter().count(), 3);
    }

    #[test]
    fn test_slice_keeps_context_and_resets_changes() {
        let context = Context::new("req");
        let mut list = list_schema().instantiate().with_context(context.clone());
        list.set("objects", vec![item(1), item(2), item(3)]).unwrap();

        let sliced = list.slice(1..10).unwrap();
        assert_eq!(sliced.as_sequence().unwrap().len(), 2);
        assert_eq!(sliced.context(), Some(&context));
        assert!(sliced.what_changed().is_empty());
        assert!(list.what_changed().contains("objects"));
    }

    #[test]
    fn test_sequence_on_plain_object_fails() {
        assert!(matches!(
            item(1).as_sequence(),
            Err(ObjectError::ActionError { .. })
        ));
        assert!(make_list(&item_schema(), None, vec![]).is_err());
    }
}
