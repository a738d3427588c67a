//! Embedded documents and references to other documents

use std::sync::Arc;

use bson::Bson;
use docmapper_common::{DocMapperError, Result};
use docmapper_validation::{FieldError, FieldResult};

use crate::document::Document;
use crate::schema::Schema;
use crate::value::Value;

pub(crate) mod embedded {
    use super::*;

    /// Mappings assigned to an embedded field are turned into documents
    pub(crate) fn coerce(value: Value, schema: &Arc<Schema>) -> Value {
        match value {
            Value::Object(pairs) => match Document::from_pairs(schema, pairs.clone()) {
                Ok(doc) => Value::Document(Box::new(doc)),
                Err(_) => Value::Object(pairs),
            },
            other => other,
        }
    }

    pub(crate) fn validate(value: &Value, schema: &Arc<Schema>) -> FieldResult {
        match value {
            Value::Document(doc) if doc.schema().is_a(schema.name()) => {
                let errors = doc.validation_errors();
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(FieldError::Nested(errors))
                }
            }
            _ => Err(FieldError::type_error(format!(
                "Value must be an instance of {}",
                schema.name()
            ))),
        }
    }

    pub(crate) fn to_storage(value: &Value) -> Result<Bson> {
        match value {
            Value::Document(doc) => Ok(Bson::Document(doc.to_storage()?)),
            other => Ok(other.to_bson()),
        }
    }

    pub(crate) fn from_storage(raw: Bson, schema: &Arc<Schema>) -> Value {
        match raw {
            Bson::Document(son) => Value::Document(Box::new(Document::from_storage(schema, son))),
            other => Value::from_bson(other),
        }
    }
}

pub(crate) mod reference {
    use super::*;
    use crate::fields::Field;

    const UNSAVED: &str = "You can only reference documents once they have been saved to the database";

    pub(crate) fn coerce(value: Value, identity: &Field) -> Value {
        match value {
            Value::Document(doc) => Value::Document(doc),
            other => identity.coerce(other),
        }
    }

    pub(crate) fn validate(value: &Value, target: &str, identity: &Field) -> FieldResult {
        let mismatch = || {
            FieldError::type_error(format!(
                "Reference field only accepts an identity or a {} document",
                target
            ))
        };
        match value {
            Value::Document(doc) if doc.schema().is_a(target) => {
                if doc.id().is_some() && doc.is_persisted() {
                    Ok(())
                } else {
                    Err(FieldError::value_error(UNSAVED))
                }
            }
            Value::Document(_) | Value::Object(_) | Value::List(_) => Err(mismatch()),
            bare => identity.validate(bare).map_err(|_| mismatch()),
        }
    }

    /// Only the identity of a referenced document is stored
    pub(crate) fn to_storage(value: &Value, identity: &Field) -> Result<Bson> {
        match value {
            Value::Document(doc) => {
                let id = doc
                    .id()
                    .ok_or_else(|| DocMapperError::InvalidOperation(UNSAVED.to_string()))?;
                match doc.schema().id_field() {
                    Some(field) => field.to_storage(&id),
                    None => Ok(id.to_bson()),
                }
            }
            bare => identity.to_storage(bare),
        }
    }

    pub(crate) fn from_storage(raw: Bson, identity: &Field) -> Value {
        identity.from_storage(raw)
    }
}
