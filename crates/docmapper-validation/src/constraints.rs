//! Validation constraints for different types
//!
//! This module defines the constraints a field declaration can attach to
//! text, numeric and binary values.

use regex::Regex;

// ============================================================================
// Pattern
// ============================================================================

/// Regular expression constraint, matched from the start of the value
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern. The match is anchored at the start of the input
    /// but not at the end.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!(r"\A(?:{})", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as declared
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the value matches from its first character
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

// ============================================================================
// String Constraints
// ============================================================================

/// Constraints for string validation
#[derive(Debug, Clone, Default)]
pub struct StringConstraints {
    /// Minimum length (in characters, not bytes)
    pub min_length: Option<usize>,
    /// Maximum length (in characters, not bytes)
    pub max_length: Option<usize>,
    /// Regex pattern
    pub pattern: Option<Pattern>,
    /// Allowed values
    pub choices: Option<Vec<String>>,
}

impl StringConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Check if any constraints are set
    pub fn is_empty(&self) -> bool {
        self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
            && self.choices.is_none()
    }
}

// ============================================================================
// Numeric Constraints
// ============================================================================

/// Inclusive bounds for numeric validation (generic over i64, f64 and decimals)
#[derive(Debug, Clone)]
pub struct NumericConstraints<T> {
    /// Minimum value (inclusive)
    pub minimum: Option<T>,
    /// Maximum value (inclusive)
    pub maximum: Option<T>,
}

impl<T> Default for NumericConstraints<T> {
    fn default() -> Self {
        Self {
            minimum: None,
            maximum: None,
        }
    }
}

impl<T> NumericConstraints<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn minimum(mut self, min: T) -> Self {
        self.minimum = Some(min);
        self
    }

    pub fn maximum(mut self, max: T) -> Self {
        self.maximum = Some(max);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.minimum.is_none() && self.maximum.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_anchored_at_start() {
        let pattern = Pattern::new(r"\d{3}").unwrap();
        assert!(pattern.is_match("123"));
        assert!(pattern.is_match("123abc"));
        assert!(!pattern.is_match("abc123"));
        assert_eq!(pattern.as_str(), r"\d{3}");
    }

    #[test]
    fn test_pattern_alternation_stays_anchored() {
        let pattern = Pattern::new("a|b").unwrap();
        assert!(pattern.is_match("b"));
        assert!(!pattern.is_match("cb"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Pattern::new("(unclosed").is_err());
    }

    #[test]
    fn test_string_constraints_builder() {
        let c = StringConstraints::new()
            .min_length(1)
            .max_length(10)
            .choices(["a", "b"]);
        assert_eq!(c.min_length, Some(1));
        assert_eq!(c.max_length, Some(10));
        assert_eq!(c.choices, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!c.is_empty());
        assert!(StringConstraints::default().is_empty());
    }

    #[test]
    fn test_numeric_constraints_default() {
        let c: NumericConstraints<i64> = NumericConstraints::default();
        assert!(c.is_empty());
        let c = c.minimum(0).maximum(10);
        assert_eq!(c.minimum, Some(0));
        assert_eq!(c.maximum, Some(10));
    }
}
