//! Text fields

use bson::Bson;
use docmapper_validation::{check_string, FieldError, FieldResult, StringConstraints};

use crate::value::Value;

pub(crate) fn coerce(value: Value) -> Value {
    match value {
        Value::Int(_)
        | Value::Float(_)
        | Value::Decimal(_)
        | Value::Bool(_)
        | Value::ObjectId(_)
        | Value::Uuid(_) => Value::String(value.to_string()),
        other => other,
    }
}

pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

pub(crate) fn validate(value: &Value, constraints: &StringConstraints) -> FieldResult {
    match value {
        Value::String(s) => check_string(s, constraints),
        _ => Err(FieldError::type_error("Text field only accepts string values")),
    }
}

pub(crate) fn to_storage(value: &Value) -> Bson {
    match value {
        Value::String(s) => Bson::String(s.clone()),
        other => other.to_bson(),
    }
}

pub(crate) fn from_storage(raw: Bson) -> Value {
    match raw {
        Bson::String(s) => Value::String(s),
        other => Value::from_bson(other),
    }
}
