//! Error types for docmapper

use docmapper_validation::ValidationErrors;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Result type alias for docmapper operations
pub type Result<T> = std::result::Result<T, DocMapperError>;

/// Matches the server's duplicate key message, in both the current
/// `collection: <ns> index: <name>` form and the older `index: <ns>.$<name>` form.
static DUPLICATE_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?P<code>E\d+)\s+(?P<kind>duplicate key error)\s+(?:collection:\s*\S+\s+)?index:\s*(?P<index>[^\s]+)",
    )
    .expect("duplicate key pattern is valid")
});

/// Unified error type for all docmapper operations
#[derive(Error, Debug, Clone)]
pub enum DocMapperError {
    /// Duplicate storage keys or an invalid field declaration
    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),

    /// One or more fields failed validation
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    /// A document in a bulk insert failed validation; nothing was written
    #[error("Validation for document {index} in the documents you are saving failed with: {errors}")]
    InvalidBatch {
        index: usize,
        errors: ValidationErrors,
    },

    /// Unresolvable field path or operator misuse in a filter
    #[error("Invalid filter '{key}': {reason}")]
    InvalidFilter { key: String, reason: String },

    #[error("{0} matching query does not exist")]
    DoesNotExist(String),

    #[error("Multiple {0} objects returned for query")]
    MultipleObjectsReturned(String),

    #[error(
        "Partly loaded document {0} can't be saved. Document should be loaded without 'only', 'exclude' or 'fields' QuerySet's modifiers"
    )]
    PartlyLoaded(String),

    /// Duplicate key reported by the storage engine
    #[error("The index \"{index_name}\" was violated when trying to save this \"{document}\" (error code: {error_code}).")]
    UniqueKeyViolation {
        error_code: String,
        error_type: String,
        index_name: String,
        document: String,
        message: String,
    },

    /// Operation not allowed for this document or queryset state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocMapperError {
    /// Build an invalid-filter error for a query key
    pub fn invalid_filter(key: impl Into<String>, reason: impl Into<String>) -> Self {
        DocMapperError::InvalidFilter {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for the lookup failures raised by `get()`
    pub fn is_not_found(&self) -> bool {
        matches!(self, DocMapperError::DoesNotExist(_))
    }

    /// Returns true if this is a unique index violation
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DocMapperError::UniqueKeyViolation { .. })
    }

    /// Returns true if the caller can fix its input and retry
    pub fn is_caller_recoverable(&self) -> bool {
        matches!(
            self,
            DocMapperError::Validation(_)
                | DocMapperError::InvalidBatch { .. }
                | DocMapperError::InvalidFilter { .. }
                | DocMapperError::DoesNotExist(_)
                | DocMapperError::MultipleObjectsReturned(_)
        )
    }

    /// Re-classify a storage failure as a unique key violation when its
    /// message carries a duplicate key report. Other errors pass through.
    pub fn classify_write_error(self, document: &str) -> Self {
        let message = match &self {
            DocMapperError::MongoDB(message) => message,
            _ => return self,
        };

        match DUPLICATE_KEY_PATTERN.captures(message) {
            Some(caps) => DocMapperError::UniqueKeyViolation {
                error_code: caps["code"].to_string(),
                error_type: caps["kind"].to_string(),
                index_name: caps["index"].trim_end_matches(',').to_string(),
                document: document.to_string(),
                message: message.clone(),
            },
            None => self,
        }
    }
}

impl From<ValidationErrors> for DocMapperError {
    fn from(errors: ValidationErrors) -> Self {
        DocMapperError::Validation(errors)
    }
}

impl From<serde_json::Error> for DocMapperError {
    fn from(err: serde_json::Error) -> Self {
        DocMapperError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for DocMapperError {
    fn from(err: mongodb::error::Error) -> Self {
        DocMapperError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for DocMapperError {
    fn from(err: bson::ser::Error) -> Self {
        DocMapperError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for DocMapperError {
    fn from(err: bson::de::Error) -> Self {
        DocMapperError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::oid::Error> for DocMapperError {
    fn from(err: bson::oid::Error) -> Self {
        DocMapperError::Deserialization(format!("Invalid ObjectId: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmapper_validation::FieldError;

    #[test]
    fn test_error_display_mongodb() {
        let err = DocMapperError::MongoDB("connection refused".to_string());
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_error_display_connection() {
        let err = DocMapperError::Connection("timeout".to_string());
        assert_eq!(err.to_string(), "Connection error: timeout");
    }

    #[test]
    fn test_error_display_validation() {
        let mut errors = ValidationErrors::new();
        errors.add("name", FieldError::missing("Field is required"));
        let err = DocMapperError::Validation(errors);
        assert_eq!(err.to_string(), "Validation error: name: Field is required");
    }

    #[test]
    fn test_error_display_invalid_batch() {
        let mut errors = ValidationErrors::new();
        errors.add("age", FieldError::value_error("Integer value is too small"));
        let err = DocMapperError::InvalidBatch { index: 3, errors };
        assert_eq!(
            err.to_string(),
            "Validation for document 3 in the documents you are saving failed with: age: Integer value is too small"
        );
    }

    #[test]
    fn test_error_display_invalid_filter() {
        let err = DocMapperError::invalid_filter("name__foo", "Invalid operator");
        assert_eq!(err.to_string(), "Invalid filter 'name__foo': Invalid operator");
    }

    #[test]
    fn test_error_display_partly_loaded() {
        let err = DocMapperError::PartlyLoaded("User".to_string());
        assert!(err.to_string().starts_with("Partly loaded document User can't be saved"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: DocMapperError = json_err.into();
        assert!(matches!(err, DocMapperError::Serialization(_)));
    }

    #[test]
    fn test_from_validation_errors() {
        let err: DocMapperError = ValidationErrors::new().into();
        assert!(matches!(err, DocMapperError::Validation(_)));
    }

    #[test]
    fn test_classify_duplicate_key_current_format() {
        let err = DocMapperError::MongoDB(
            "Kind: E11000 duplicate key error collection: test.users index: name_1 dup key: { name: \"Lisa\" }"
                .to_string(),
        );
        match err.classify_write_error("User") {
            DocMapperError::UniqueKeyViolation {
                error_code,
                error_type,
                index_name,
                document,
                ..
            } => {
                assert_eq!(error_code, "E11000");
                assert_eq!(error_type, "duplicate key error");
                assert_eq!(index_name, "name_1");
                assert_eq!(document, "User");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_duplicate_key_legacy_format() {
        let err = DocMapperError::MongoDB(
            "E11000 duplicate key error index: test.users.$email_1  dup key: { : \"a@b.c\" }"
                .to_string(),
        );
        let classified = err.classify_write_error("User");
        assert!(classified.is_constraint_violation());
        assert_eq!(
            classified.to_string(),
            "The index \"test.users.$email_1\" was violated when trying to save this \"User\" (error code: E11000)."
        );
    }

    #[test]
    fn test_classify_leaves_other_errors() {
        let err = DocMapperError::MongoDB("network timeout".to_string());
        assert!(matches!(
            err.classify_write_error("User"),
            DocMapperError::MongoDB(_)
        ));

        let err = DocMapperError::Query("E11000 duplicate key error index: x".to_string());
        assert!(matches!(err.classify_write_error("User"), DocMapperError::Query(_)));
    }

    #[test]
    fn test_is_caller_recoverable() {
        assert!(DocMapperError::DoesNotExist("User".to_string()).is_caller_recoverable());
        assert!(DocMapperError::invalid_filter("x", "y").is_caller_recoverable());
        assert!(!DocMapperError::PartlyLoaded("User".to_string()).is_caller_recoverable());
        assert!(!DocMapperError::SchemaDefinition("dup".to_string()).is_caller_recoverable());
    }

    #[test]
    fn test_is_not_found() {
        assert!(DocMapperError::DoesNotExist("User".to_string()).is_not_found());
        assert!(!DocMapperError::MultipleObjectsReturned("User".to_string()).is_not_found());
    }
}
