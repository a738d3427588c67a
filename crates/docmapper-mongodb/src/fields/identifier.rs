//! ObjectId and UUID fields

use bson::oid::ObjectId;
use bson::Bson;
use docmapper_validation::{FieldError, FieldResult};
use uuid::Uuid;

use crate::value::{binary_to_uuid, uuid_to_binary, Value};

pub(crate) mod object_id {
    use super::*;

    pub(crate) fn coerce(value: Value) -> Value {
        match value {
            Value::String(s) => match ObjectId::parse_str(s.trim()) {
                Ok(oid) => Value::ObjectId(oid),
                Err(_) => Value::String(s),
            },
            other => other,
        }
    }

    pub(crate) fn validate(value: &Value) -> FieldResult {
        match value {
            Value::ObjectId(_) => Ok(()),
            _ => Err(FieldError::format_error("Could not convert to ObjectId")),
        }
    }

    pub(crate) fn to_storage(value: &Value) -> Bson {
        match value {
            Value::ObjectId(oid) => Bson::ObjectId(*oid),
            other => match coerce(other.clone()) {
                Value::ObjectId(oid) => Bson::ObjectId(oid),
                _ => other.to_bson(),
            },
        }
    }

    pub(crate) fn from_storage(raw: Bson) -> Value {
        coerce(Value::from_bson(raw))
    }
}

pub(crate) mod uuid_kind {
    use super::*;

    pub(crate) fn coerce(value: Value) -> Value {
        match value {
            Value::String(s) => match Uuid::parse_str(s.trim()) {
                Ok(u) => Value::Uuid(u),
                Err(_) => Value::String(s),
            },
            Value::Bytes(b) if b.len() == 16 => match Uuid::from_slice(&b) {
                Ok(u) => Value::Uuid(u),
                Err(_) => Value::Bytes(b),
            },
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

    pub(crate) fn validate(value: &Value) -> FieldResult {
        match value {
            Value::Uuid(_) => Ok(()),
            _ => Err(FieldError::format_error("Could not convert to UUID")),
        }
    }

    pub(crate) fn to_storage(value: &Value, binary: bool) -> Bson {
        match coerce(value.clone()) {
            Value::Uuid(u) if binary => uuid_to_binary(&u),
            Value::Uuid(u) => Bson::String(u.hyphenated().to_string()),
            _ => value.to_bson(),
        }
    }

    pub(crate) fn from_storage(raw: Bson) -> Value {
        match raw {
            Bson::Binary(bin) => match binary_to_uuid(&bin).or_else(|| Uuid::from_slice(&bin.bytes).ok()) {
                Some(u) => Value::Uuid(u),
                None => Value::Bytes(bin.bytes),
            },
            other => coerce(Value::from_bson(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_from_hex() {
        let oid = ObjectId::new();
        assert_eq!(object_id::coerce(Value::from(oid.to_hex())), Value::ObjectId(oid));
        assert_eq!(
            object_id::validate(&Value::from("nope")).unwrap_err().message(),
            "Could not convert to ObjectId"
        );
        assert_eq!(object_id::to_storage(&Value::from(oid.to_hex())), Bson::ObjectId(oid));
    }

    #[test]
    fn test_uuid_binary_and_string_modes() {
        let u = Uuid::new_v4();
        let value = Value::Uuid(u);

        let binary = uuid_kind::to_storage(&value, true);
        assert!(matches!(binary, Bson::Binary(_)));
        assert_eq!(uuid_kind::from_storage(binary), value);

        let text = uuid_kind::to_storage(&value, false);
        assert_eq!(text, Bson::String(u.hyphenated().to_string()));
        assert_eq!(uuid_kind::from_storage(text), value);
    }

    #[test]
    fn test_uuid_validation() {
        assert!(uuid_kind::validate(&uuid_kind::coerce(Value::from(Uuid::new_v4().to_string()))).is_ok());
        assert_eq!(
            uuid_kind::validate(&Value::from("xyz")).unwrap_err().message(),
            "Could not convert to UUID"
        );
        assert!(uuid_kind::is_empty(&Value::from("")));
    }
}
