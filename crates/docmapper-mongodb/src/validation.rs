//! Name and raw-query checks
//!
//! Collection names and attribute names are checked when a schema is
//! assembled; raw filters and aggregation pipelines are checked before they
//! reach the storage layer.

use bson::Bson;
use docmapper_common::DocMapperError;
use tracing::warn;

use crate::Result;

/// MongoDB's limit is 255; keep well below it
const MAX_COLLECTION_NAME_LENGTH: usize = 120;

const MAX_ATTRIBUTE_NAME_LENGTH: usize = 1024;

/// Collection name accepted by [`crate::Schema`] assembly
///
/// - Not empty, at most 120 characters
/// - No null bytes or `$`
/// - No `system.` prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(DocMapperError::SchemaDefinition(
                "Collection name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(DocMapperError::SchemaDefinition(format!(
                "Collection name exceeds maximum length of {} characters: '{}'",
                MAX_COLLECTION_NAME_LENGTH, name
            )));
        }

        if name.contains('\0') {
            return Err(DocMapperError::SchemaDefinition(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(DocMapperError::SchemaDefinition(format!(
                "Collection name cannot start with 'system.' (reserved): '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(DocMapperError::SchemaDefinition(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") {
            warn!(collection = name, "collection name contains '..'");
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Attribute or storage key name declared on a schema
///
/// Attribute names cannot contain `.` or `__` since both separate path
/// segments in filter keys; neither may start with `$`.
pub fn validate_attribute_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name cannot be empty")
    } else if name.len() > MAX_ATTRIBUTE_NAME_LENGTH {
        Some("name is too long")
    } else if name.contains('\0') {
        Some("name cannot contain null bytes")
    } else if name.starts_with('$') {
        Some("name cannot start with '$'")
    } else if name.contains('.') || name.contains("__") {
        Some("name cannot contain '.' or '__'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DocMapperError::SchemaDefinition(format!(
            "Invalid field name '{}': {}",
            name, reason
        ))),
        None => Ok(()),
    }
}

/// Server-side JavaScript operators refused in raw filters and pipelines
const DANGEROUS_OPERATORS: &[&str] = &["$where", "$function", "$accumulator"];

/// Reject raw filters and pipelines that carry server-side JavaScript
pub fn validate_query(query: &Bson) -> Result<()> {
    match query {
        Bson::Document(doc) => {
            for (key, value) in doc.iter() {
                if DANGEROUS_OPERATORS.contains(&key.as_str()) {
                    return Err(DocMapperError::Query(format!(
                        "Dangerous operator '{}' is not allowed",
                        key
                    )));
                }
                validate_query(value)?;
            }
            Ok(())
        }
        Bson::Array(items) => items.iter().try_for_each(validate_query),
        _ => Ok(()),
    }
}
