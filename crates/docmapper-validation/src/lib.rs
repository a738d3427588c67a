//! docmapper validation
//!
//! Constraint types and the aggregated error tree used when validating
//! document fields.
//!
//! # Features
//!
//! - **Default**: constraints, checkers and error collection
//! - **serde**: `ValidationErrors::to_json` export
//!
//! # Example
//!
//! ```rust
//! use docmapper_validation::{check_string, StringConstraints, ValidationErrors};
//!
//! let constraints = StringConstraints::new().max_length(3);
//! let mut errors = ValidationErrors::new();
//! if let Err(e) = check_string("too long", &constraints) {
//!     errors.add("name", e);
//! }
//! assert!(errors.contains("name"));
//! ```

pub mod constraints;
pub mod errors;
pub mod validators;

pub use constraints::{NumericConstraints, Pattern, StringConstraints};
pub use errors::{ErrorType, FieldError, FieldResult, ValidationErrors, ValidationResult};
pub use validators::{check_max_bytes, check_range, check_string};
