//! List and mapping fields

use bson::{doc, Bson};
use docmapper_common::Result;
use docmapper_validation::{FieldError, FieldResult};

use super::Field;
use crate::value::Value;

pub(crate) mod list {
    use super::*;

    pub(crate) fn coerce(value: Value, inner: &Field) -> Value {
        match value {
            Value::List(items) => Value::List(items.into_iter().map(|v| inner.coerce(v)).collect()),
            other => other,
        }
    }

    pub(crate) fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Element-wise validation. "required" on the inner field applies to
    /// each element, not to the list itself.
    pub(crate) fn validate(value: &Value, inner: &Field) -> FieldResult {
        let items = match value {
            Value::List(items) => items,
            _ => return Err(FieldError::type_error("List field only accepts list values")),
        };

        let mut failures = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if inner.is_empty(item) {
                if inner.is_required() {
                    failures.push((
                        index,
                        FieldError::missing(format!("Base field {} is required", inner.kind().label())),
                    ));
                }
                continue;
            }
            if let Err(e) = inner.validate(item) {
                failures.push((index, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FieldError::Items {
                message: format!("Invalid items in list of {}", inner.kind().label()),
                items: failures,
            })
        }
    }

    pub(crate) fn to_storage(value: &Value, inner: &Field) -> Result<Bson> {
        match value {
            Value::List(items) => Ok(Bson::Array(
                items
                    .iter()
                    .map(|item| inner.to_storage(item))
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => Ok(other.to_bson()),
        }
    }

    pub(crate) fn from_storage(raw: Bson, inner: &Field) -> Value {
        match raw {
            Bson::Array(items) => Value::List(items.into_iter().map(|b| inner.from_storage(b)).collect()),
            other => Value::from_bson(other),
        }
    }

    /// A list filter value means "contains all of these"; a scalar is a
    /// membership test against the stored elements.
    pub(crate) fn to_query(value: &Value, inner: &Field) -> Result<Bson> {
        match value {
            Value::List(_) => Ok(Bson::Document(doc! { "$all": to_storage(value, inner)? })),
            scalar => inner.to_query(scalar),
        }
    }
}

pub(crate) mod map {
    use super::*;

    pub(crate) fn is_empty(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Object(pairs) => pairs.is_empty(),
            _ => false,
        }
    }

    pub(crate) fn validate(value: &Value) -> FieldResult {
        match value {
            Value::Object(_) => Ok(()),
            _ => Err(FieldError::type_error("Map field only accepts mapping values")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_validation_keyed_by_index() {
        let inner = Field::int().min_value(0);
        let value = Value::from(vec![Value::Int(1), Value::Int(-1), Value::from("x")]);
        let Err(FieldError::Items { items, .. }) = list::validate(&value, &inner) else {
            panic!("expected item errors");
        };
        let indices: Vec<usize> = items.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_required_applies_to_elements() {
        let inner = Field::text().required();
        assert!(list::validate(&Value::List(vec![]), &inner).is_ok());

        let value = Value::from(vec!["a", ""]);
        let Err(FieldError::Items { items, .. }) = list::validate(&value, &inner) else {
            panic!("expected item errors");
        };
        assert_eq!(items[0].0, 1);
        assert_eq!(items[0].1.message(), "Base field Text is required");
    }

    #[test]
    fn test_list_query_forms() {
        let inner = Field::text();
        assert_eq!(
            list::to_query(&Value::from(vec!["a", "b"]), &inner).unwrap(),
            Bson::Document(doc! { "$all": ["a", "b"] })
        );
        assert_eq!(
            list::to_query(&Value::from("a"), &inner).unwrap(),
            Bson::String("a".into())
        );
    }

    #[test]
    fn test_map_emptiness() {
        assert!(map::is_empty(&Value::Object(vec![])));
        assert!(!map::is_empty(&Value::object([("a", 1)])));
        assert!(map::validate(&Value::Int(1)).is_err());
    }
}
