//! Atomic update builder
//!
//! Paths use the same attribute syntax as filters and are resolved to
//! storage keys; values are converted through the target field.

use bson::{Bson, Document as BsonDocument};
use docmapper_common::DocMapperError;
use docmapper_validation::ValidationErrors;

use super::transform::{resolve_segments, split_key};
use crate::fields::Field;
use crate::schema::Schema;
use crate::value::Value;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOp {
    Set,
    Unset,
    Inc,
    AddToSet,
    Push,
}

impl UpdateOp {
    fn operator(self) -> &'static str {
        match self {
            UpdateOp::Set => "$set",
            UpdateOp::Unset => "$unset",
            UpdateOp::Inc => "$inc",
            UpdateOp::AddToSet => "$addToSet",
            UpdateOp::Push => "$push",
        }
    }
}

/// A set of field modifications applied atomically to matched documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    operations: Vec<(UpdateOp, String, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.push((UpdateOp::Set, path.into(), value.into()));
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.operations.push((UpdateOp::Unset, path.into(), Value::Null));
        self
    }

    pub fn inc(mut self, path: impl Into<String>, by: impl Into<Value>) -> Self {
        self.operations.push((UpdateOp::Inc, path.into(), by.into()));
        self
    }

    /// Append to a list unless already present
    pub fn add_to_set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.push((UpdateOp::AddToSet, path.into(), value.into()));
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operations.push((UpdateOp::Push, path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Lower to an update document such as `{"$set": {...}, "$inc": {...}}`
    pub fn to_document(&self, schema: &Schema) -> Result<BsonDocument> {
        if self.is_empty() {
            return Err(DocMapperError::InvalidOperation(
                "No update operations were given".to_string(),
            ));
        }

        let mut errors = ValidationErrors::new();
        let mut update = BsonDocument::new();
        for (op, path, value) in &self.operations {
            let segments = split_key(path)?;
            let (storage_path, field) = resolve_segments(schema, &segments, path)?;
            let converted = match op {
                UpdateOp::Set => match field {
                    Some(field) => {
                        let coerced = field.coerce(value.clone());
                        if let Err(e) = field.validate(&coerced) {
                            errors.add(path.clone(), e);
                            continue;
                        }
                        field.to_storage(&coerced)?
                    }
                    None => value.to_bson(),
                },
                UpdateOp::Unset => Bson::String(String::new()),
                UpdateOp::Inc => match value {
                    Value::Int(_) | Value::Float(_) | Value::Decimal(_) => convert(field, value)?,
                    _ => {
                        return Err(DocMapperError::InvalidOperation(format!(
                            "Cannot increment '{}' by a non-numeric value",
                            path
                        )))
                    }
                },
                UpdateOp::AddToSet | UpdateOp::Push => element(field, value)?,
            };

            match update.get_mut(op.operator()) {
                Some(Bson::Document(section)) => {
                    section.insert(storage_path, converted);
                }
                _ => {
                    let mut section = BsonDocument::new();
                    section.insert(storage_path, converted);
                    update.insert(op.operator(), section);
                }
            }
        }

        if !errors.is_empty() {
            return Err(DocMapperError::Validation(errors));
        }
        Ok(update)
    }
}

fn convert(field: Option<&Field>, value: &Value) -> Result<Bson> {
    match field {
        Some(field) => field.to_storage(&field.coerce(value.clone())),
        None => Ok(value.to_bson()),
    }
}

/// Element conversion for `$push` / `$addToSet` on a list field
fn element(field: Option<&Field>, value: &Value) -> Result<Bson> {
    match field.and_then(Field::inner) {
        Some(inner) => convert(Some(inner), value),
        None => convert(field, value),
    }
}
