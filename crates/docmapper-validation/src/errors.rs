//! Validation error types
//!
//! A document is validated field by field and every failure is collected
//! into one [`ValidationErrors`] value, keyed by attribute name. Embedded
//! documents contribute a nested collection and list fields contribute
//! per-index errors, so the whole tree of failures is reported in one pass.

use std::fmt;

// ============================================================================
// Validation Result
// ============================================================================

/// Validation result type
pub type ValidationResult<T> = Result<T, ValidationErrors>;

/// Result of validating a single field value
pub type FieldResult = Result<(), FieldError>;

// ============================================================================
// Error Type Classification
// ============================================================================

/// Classification of validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Type mismatch error (e.g., expected string, got integer)
    TypeError,

    /// Value constraint violation (e.g., string too long, number out of range)
    ValueError,

    /// Required field empty or missing
    Missing,

    /// Invalid format (e.g., malformed UUID or ObjectId)
    FormatError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError => write!(f, "type_error"),
            Self::ValueError => write!(f, "value_error"),
            Self::Missing => write!(f, "missing"),
            Self::FormatError => write!(f, "format_error"),
        }
    }
}

// ============================================================================
// Single Field Error
// ============================================================================

/// Failure of one field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    /// A plain failure with a human-readable reason
    Invalid {
        message: String,
        error_type: ErrorType,
    },

    /// An embedded document failed its own validation
    Nested(ValidationErrors),

    /// One or more list elements failed, keyed by element index
    Items {
        message: String,
        items: Vec<(usize, FieldError)>,
    },
}

impl FieldError {
    /// Create a type error
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            error_type: ErrorType::TypeError,
        }
    }

    /// Create a value error
    pub fn value_error(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            error_type: ErrorType::ValueError,
        }
    }

    /// Create a format error
    pub fn format_error(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            error_type: ErrorType::FormatError,
        }
    }

    /// Create a missing (required) error
    pub fn missing(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            error_type: ErrorType::Missing,
        }
    }

    /// Top-level message of this error
    pub fn message(&self) -> String {
        match self {
            Self::Invalid { message, .. } => message.clone(),
            Self::Nested(errors) => format!("Invalid embedded document ({})", errors),
            Self::Items { message, .. } => message.clone(),
        }
    }

    /// Error type classification; nested and item errors count as value errors
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Invalid { error_type, .. } => *error_type,
            _ => ErrorType::ValueError,
        }
    }

    fn flatten_into(&self, path: &str, out: &mut Vec<(String, String)>) {
        match self {
            Self::Invalid { message, .. } => out.push((path.to_string(), message.clone())),
            Self::Nested(errors) => {
                for (field, error) in &errors.errors {
                    error.flatten_into(&format!("{}.{}", path, field), out);
                }
            }
            Self::Items { items, .. } => {
                for (index, error) in items {
                    error.flatten_into(&format!("{}[{}]", path, index), out);
                }
            }
        }
    }

    #[cfg(feature = "serde")]
    fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Invalid { message, .. } => serde_json::Value::String(message.clone()),
            Self::Nested(errors) => errors.to_json(),
            Self::Items { items, .. } => {
                let map = items
                    .iter()
                    .map(|(index, error)| (index.to_string(), error.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

// ============================================================================
// Validation Errors Collection
// ============================================================================

/// Collection of field errors, in the order the fields were validated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    /// (attribute name, error) pairs
    pub errors: Vec<(String, FieldError)>,
}

impl ValidationErrors {
    /// Create a new empty validation errors collection
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Check if there are any errors
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of failing fields
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Record an error for a field
    pub fn add(&mut self, field: impl Into<String>, error: FieldError) {
        self.errors.push((field.into(), error));
    }

    /// Look up the error recorded for a field
    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.errors
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, error)| error)
    }

    /// Whether a field has an error recorded
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Names of the failing fields
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|(name, _)| name.as_str())
    }

    /// Merge another collection into this one
    pub fn merge(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    /// Convert to Result - Ok if no errors, Err if there are errors
    pub fn into_result(self) -> ValidationResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Flatten the tree into (path, message) pairs.
    ///
    /// Embedded paths are dotted (`address.city`), list elements are indexed
    /// (`tags[2]`).
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (field, error) in &self.errors {
            error.flatten_into(field, &mut out);
        }
        out
    }

    /// Mapping from field name to message, nested for embedded documents
    /// and list elements
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .errors
            .iter()
            .map(|(field, error)| (field.clone(), error.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .flatten()
            .into_iter()
            .map(|(path, message)| format!("{}: {}", path, message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_empty() {
        let errors = ValidationErrors::new();
        assert!(errors.is_empty());
        assert_eq!(errors.len(), 0);
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn test_validation_errors_add() {
        let mut errors = ValidationErrors::new();
        errors.add("name", FieldError::missing("Field is required"));

        assert!(!errors.is_empty());
        assert!(errors.contains("name"));
        assert!(!errors.contains("age"));
        assert_eq!(errors.get("name").unwrap().error_type(), ErrorType::Missing);
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_flatten_nested_and_items() {
        let mut inner = ValidationErrors::new();
        inner.add("city", FieldError::value_error("String value is too long"));

        let mut errors = ValidationErrors::new();
        errors.add("address", FieldError::Nested(inner));
        errors.add(
            "tags",
            FieldError::Items {
                message: "Invalid list".to_string(),
                items: vec![(2, FieldError::type_error("Expected string"))],
            },
        );

        let flat = errors.flatten();
        assert_eq!(
            flat,
            vec![
                ("address.city".to_string(), "String value is too long".to_string()),
                ("tags[2]".to_string(), "Expected string".to_string()),
            ]
        );
    }

    #[test]
    fn test_display_joins_paths() {
        let mut errors = ValidationErrors::new();
        errors.add("name", FieldError::missing("Field is required"));
        errors.add("age", FieldError::value_error("Integer value is too small"));

        assert_eq!(
            errors.to_string(),
            "name: Field is required; age: Integer value is too small"
        );
    }

    #[test]
    fn test_error_type_display() {
        assert_eq!(ErrorType::TypeError.to_string(), "type_error");
        assert_eq!(ErrorType::ValueError.to_string(), "value_error");
        assert_eq!(ErrorType::Missing.to_string(), "missing");
        assert_eq!(ErrorType::FormatError.to_string(), "format_error");
    }

    #[test]
    fn test_merge() {
        let mut a = ValidationErrors::new();
        a.add("name", FieldError::missing("Field is required"));
        let mut b = ValidationErrors::new();
        b.add("age", FieldError::type_error("Expected integer"));

        a.merge(b);
        assert_eq!(a.fields().collect::<Vec<_>>(), vec!["name", "age"]);
    }
}
