//! Constraint checkers
//!
//! Each checker returns the first failing constraint for one value. Type
//! membership is decided by the caller (the field kind); these functions
//! only look at values that already have the right shape.

use crate::constraints::{NumericConstraints, StringConstraints};
use crate::errors::{FieldError, FieldResult};

// ============================================================================
// String Validation
// ============================================================================

/// Check a string against length, pattern and choice constraints
pub fn check_string(value: &str, constraints: &StringConstraints) -> FieldResult {
    // Length is counted in characters, not bytes
    let char_count = value.chars().count();

    if let Some(max) = constraints.max_length {
        if char_count > max {
            return Err(FieldError::value_error("String value is too long"));
        }
    }

    if let Some(min) = constraints.min_length {
        if char_count < min {
            return Err(FieldError::value_error("String value is too short"));
        }
    }

    if let Some(pattern) = &constraints.pattern {
        if !pattern.is_match(value) {
            return Err(FieldError::value_error(
                "String value did not match validation regex",
            ));
        }
    }

    if let Some(choices) = &constraints.choices {
        if !choices.iter().any(|choice| choice == value) {
            return Err(FieldError::value_error(format!(
                "Value must be one of: {}",
                choices.join(", ")
            )));
        }
    }

    Ok(())
}

// ============================================================================
// Numeric Validation
// ============================================================================

/// Check a number against inclusive bounds.
///
/// `kind` names the value in the message, e.g. "Integer value is too small".
pub fn check_range<T>(value: &T, constraints: &NumericConstraints<T>, kind: &str) -> FieldResult
where
    T: PartialOrd,
{
    if let Some(min) = &constraints.minimum {
        if value < min {
            return Err(FieldError::value_error(format!("{} value is too small", kind)));
        }
    }

    if let Some(max) = &constraints.maximum {
        if value > max {
            return Err(FieldError::value_error(format!("{} value is too large", kind)));
        }
    }

    Ok(())
}

// ============================================================================
// Binary Validation
// ============================================================================

/// Check a byte length against an optional maximum
pub fn check_max_bytes(len: usize, max_bytes: Option<usize>) -> FieldResult {
    match max_bytes {
        Some(max) if len > max => Err(FieldError::value_error("Binary value is too long")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::Pattern;

    #[test]
    fn test_check_string_lengths() {
        let c = StringConstraints::new().min_length(2).max_length(4);
        assert!(check_string("abc", &c).is_ok());
        assert_eq!(
            check_string("a", &c).unwrap_err().message(),
            "String value is too short"
        );
        assert_eq!(
            check_string("abcde", &c).unwrap_err().message(),
            "String value is too long"
        );
    }

    #[test]
    fn test_check_string_counts_chars() {
        let c = StringConstraints::new().max_length(2);
        assert!(check_string("éé", &c).is_ok());
    }

    #[test]
    fn test_check_string_pattern() {
        let c = StringConstraints::new().pattern(Pattern::new("[a-z]+").unwrap());
        assert!(check_string("abc1", &c).is_ok());
        assert!(check_string("1abc", &c)
            .unwrap_err()
            .message()
            .contains("regex"));
    }

    #[test]
    fn test_check_string_choices() {
        let c = StringConstraints::new().choices(["red", "green"]);
        assert!(check_string("red", &c).is_ok());
        assert_eq!(
            check_string("blue", &c).unwrap_err().message(),
            "Value must be one of: red, green"
        );
    }

    #[test]
    fn test_check_range() {
        let c = NumericConstraints::new().minimum(1i64).maximum(10);
        assert!(check_range(&5, &c, "Integer").is_ok());
        assert!(check_range(&1, &c, "Integer").is_ok());
        assert_eq!(
            check_range(&0, &c, "Integer").unwrap_err().message(),
            "Integer value is too small"
        );
        assert_eq!(
            check_range(&11, &c, "Integer").unwrap_err().message(),
            "Integer value is too large"
        );
    }

    #[test]
    fn test_check_range_float() {
        let c = NumericConstraints::new().maximum(1.5f64);
        assert!(check_range(&1.5, &c, "Float").is_ok());
        assert!(check_range(&1.6, &c, "Float").is_err());
    }

    #[test]
    fn test_check_max_bytes() {
        assert!(check_max_bytes(10, None).is_ok());
        assert!(check_max_bytes(4, Some(4)).is_ok());
        assert_eq!(
            check_max_bytes(5, Some(4)).unwrap_err().message(),
            "Binary value is too long"
        );
    }
}
