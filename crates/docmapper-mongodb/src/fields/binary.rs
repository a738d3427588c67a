//! Binary fields

use bson::spec::BinarySubtype;
use bson::{Binary, Bson};
use docmapper_validation::{check_max_bytes, FieldError, FieldResult};

use crate::value::Value;

pub(crate) fn coerce(value: Value) -> Value {
    match value {
        Value::String(s) => Value::Bytes(s.into_bytes()),
        other => other,
    }
}

pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bytes(b) => b.is_empty(),
        _ => false,
    }
}

pub(crate) fn validate(value: &Value, max_bytes: Option<usize>) -> FieldResult {
    match value {
        Value::Bytes(b) => check_max_bytes(b.len(), max_bytes),
        _ => Err(FieldError::type_error("Binary field only accepts byte values")),
    }
}

pub(crate) fn to_storage(value: &Value) -> Bson {
    match coerce(value.clone()) {
        Value::Bytes(bytes) => Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes,
        }),
        other => other.to_bson(),
    }
}

pub(crate) fn from_storage(raw: Bson) -> Value {
    match raw {
        Bson::Binary(bin) => Value::Bytes(bin.bytes),
        other => Value::from_bson(other),
    }
}
