//! Integer, floating-point and fixed-point decimal fields

use std::str::FromStr;

use bson::Bson;
use docmapper_validation::{check_range, FieldError, FieldResult, NumericConstraints};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::value::{int_to_bson, Value};

// ============================================================================
// Integer
// ============================================================================

pub(crate) mod integer {
    use super::*;

    pub(crate) fn coerce(value: Value) -> Value {
        match value {
            Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
            Value::Decimal(d) => d.trunc().to_i64().map(Value::Int).unwrap_or(Value::Decimal(d)),
            Value::Bool(b) => Value::Int(b as i64),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::String(s),
            },
            other => other,
        }
    }

    pub(crate) fn validate(value: &Value, constraints: &NumericConstraints<i64>) -> FieldResult {
        match value {
            Value::Int(i) => check_range(i, constraints, "Integer"),
            other => Err(FieldError::type_error(format!(
                "`{}` could not be converted to int",
                other
            ))),
        }
    }

    pub(crate) fn to_storage(value: &Value) -> Bson {
        match value {
            Value::Int(i) => int_to_bson(*i),
            other => other.to_bson(),
        }
    }

    pub(crate) fn from_storage(raw: Bson) -> Value {
        match raw {
            Bson::Int32(i) => Value::Int(i as i64),
            Bson::Int64(i) => Value::Int(i),
            Bson::Double(f) if f.fract() == 0.0 && f.is_finite() => Value::Int(f as i64),
            other => Value::from_bson(other),
        }
    }
}

// ============================================================================
// Float
// ============================================================================

pub(crate) mod float {
    use super::*;

    pub(crate) fn coerce(value: Value) -> Value {
        match value {
            Value::Int(i) => Value::Float(i as f64),
            Value::Decimal(d) => d.to_f64().map(Value::Float).unwrap_or(Value::Decimal(d)),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => Value::String(s),
            },
            other => other,
        }
    }

    pub(crate) fn validate(value: &Value, constraints: &NumericConstraints<f64>) -> FieldResult {
        match value {
            Value::Float(f) => check_range(f, constraints, "Float"),
            _ => Err(FieldError::type_error(
                "Float field only accepts float and integer values",
            )),
        }
    }

    pub(crate) fn to_storage(value: &Value) -> Bson {
        match value {
            Value::Float(f) => Bson::Double(*f),
            Value::Int(i) => Bson::Double(*i as f64),
            other => other.to_bson(),
        }
    }

    pub(crate) fn from_storage(raw: Bson) -> Value {
        match raw {
            Bson::Double(f) => Value::Float(f),
            Bson::Int32(i) => Value::Float(i as f64),
            Bson::Int64(i) => Value::Float(i as f64),
            other => Value::from_bson(other),
        }
    }
}

// ============================================================================
// Decimal
// ============================================================================

/// Rounding rule applied when a decimal is reduced to its declared precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    #[default]
    HalfUp,
    HalfDown,
    HalfEven,
    Up,
    Down,
    Ceiling,
    Floor,
}

impl Rounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Rounding::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Rounding::HalfDown => RoundingStrategy::MidpointTowardZero,
            Rounding::HalfEven => RoundingStrategy::MidpointNearestEven,
            Rounding::Up => RoundingStrategy::AwayFromZero,
            Rounding::Down => RoundingStrategy::ToZero,
            Rounding::Ceiling => RoundingStrategy::ToPositiveInfinity,
            Rounding::Floor => RoundingStrategy::ToNegativeInfinity,
        }
    }
}

/// Options of a decimal field
#[derive(Debug, Clone)]
pub struct DecimalOptions {
    pub constraints: NumericConstraints<Decimal>,
    pub precision: u32,
    pub rounding: Rounding,
    /// Store as a string instead of a double
    pub force_string: bool,
}

impl Default for DecimalOptions {
    fn default() -> Self {
        Self {
            constraints: NumericConstraints::default(),
            precision: 2,
            rounding: Rounding::HalfUp,
            force_string: false,
        }
    }
}

impl DecimalOptions {
    pub(crate) fn round(&self, d: Decimal) -> Decimal {
        let mut rounded = d.round_dp_with_strategy(self.precision, self.rounding.strategy());
        rounded.rescale(self.precision);
        rounded
    }
}

/// Parse anything numeric-looking into a decimal
pub(crate) fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        Value::Int(i) => Some(Decimal::from(*i)),
        // Go through the shortest decimal rendering so 1.005 stays 1.005
        Value::Float(f) => Decimal::from_str(&f.to_string())
            .ok()
            .or_else(|| Decimal::from_f64(*f)),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

pub(crate) mod decimal {
    use super::*;

    pub(crate) fn coerce(value: Value, options: &DecimalOptions) -> Value {
        match to_decimal(&value) {
            Some(d) => Value::Decimal(options.round(d)),
            None => value,
        }
    }

    pub(crate) fn validate(value: &Value, options: &DecimalOptions) -> FieldResult {
        match value {
            Value::Decimal(d) => check_range(&options.round(*d), &options.constraints, "Decimal"),
            _ => Err(FieldError::type_error("Could not convert value to decimal")),
        }
    }

    pub(crate) fn to_storage(value: &Value, options: &DecimalOptions) -> Bson {
        match to_decimal(value) {
            Some(d) => {
                let rounded = options.round(d);
                if options.force_string {
                    Bson::String(rounded.to_string())
                } else {
                    Bson::Double(rounded.to_f64().unwrap_or(f64::NAN))
                }
            }
            None => value.to_bson(),
        }
    }

    pub(crate) fn from_storage(raw: Bson, options: &DecimalOptions) -> Value {
        let value = match raw {
            Bson::Decimal128(d) => Value::String(d.to_string()),
            other => Value::from_bson(other),
        };
        coerce(value, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_coercion() {
        assert_eq!(integer::coerce(Value::from("12")), Value::Int(12));
        assert_eq!(integer::coerce(Value::Float(3.7)), Value::Int(3));
        assert_eq!(integer::coerce(Value::from("abc")), Value::from("abc"));
    }

    #[test]
    fn test_integer_validation_messages() {
        let c = NumericConstraints::new().minimum(0).maximum(150);
        assert_eq!(
            integer::validate(&Value::from("abc"), &c).unwrap_err().message(),
            "`abc` could not be converted to int"
        );
        assert_eq!(
            integer::validate(&Value::Int(-1), &c).unwrap_err().message(),
            "Integer value is too small"
        );
        assert!(integer::validate(&Value::Int(150), &c).is_ok());
    }

    #[test]
    fn test_float_accepts_ints() {
        assert_eq!(float::coerce(Value::Int(2)), Value::Float(2.0));
        let c = NumericConstraints::new().maximum(1.5);
        assert_eq!(
            float::validate(&Value::Float(2.0), &c).unwrap_err().message(),
            "Float value is too large"
        );
        assert!(float::validate(&Value::Bool(true), &c).is_err());
    }

    #[test]
    fn test_decimal_rounds_half_up() {
        let options = DecimalOptions::default();
        assert_eq!(
            decimal::coerce(Value::Float(1.005), &options),
            Value::Decimal(Decimal::from_str("1.01").unwrap())
        );
        assert_eq!(
            decimal::coerce(Value::Float(-2.345), &options),
            Value::Decimal(Decimal::from_str("-2.35").unwrap())
        );
    }

    #[test]
    fn test_decimal_rounding_strategies() {
        let options = DecimalOptions {
            rounding: Rounding::HalfEven,
            ..Default::default()
        };
        assert_eq!(
            decimal::coerce(Value::from("2.125"), &options),
            Value::Decimal(Decimal::from_str("2.12").unwrap())
        );

        let options = DecimalOptions {
            rounding: Rounding::Floor,
            precision: 0,
            ..Default::default()
        };
        assert_eq!(
            decimal::coerce(Value::from("-1.2"), &options),
            Value::Decimal(Decimal::from(-2))
        );
    }

    #[test]
    fn test_decimal_storage_modes() {
        let options = DecimalOptions::default();
        let value = decimal::coerce(Value::from("3.1"), &options);
        assert_eq!(decimal::to_storage(&value, &options), Bson::Double(3.1));

        let options = DecimalOptions {
            force_string: true,
            ..Default::default()
        };
        assert_eq!(
            decimal::to_storage(&value, &options),
            Bson::String("3.10".to_string())
        );
        assert_eq!(
            decimal::from_storage(Bson::String("3.10".into()), &options),
            value
        );
    }

    #[test]
    fn test_decimal_rounding_is_a_fixed_point() {
        let options = DecimalOptions::default();
        let once = decimal::to_storage(&Value::Float(10.4449), &options);
        let loaded = decimal::from_storage(once.clone(), &options);
        assert_eq!(decimal::to_storage(&loaded, &options), once);
    }

    #[test]
    fn test_decimal_range_after_rounding() {
        let options = DecimalOptions {
            constraints: NumericConstraints::new().maximum(Decimal::from_str("1.00").unwrap()),
            ..Default::default()
        };
        assert!(decimal::validate(&decimal::coerce(Value::Float(1.004), &options), &options).is_ok());
        assert_eq!(
            decimal::validate(&Value::Decimal(Decimal::from_str("1.006").unwrap()), &options)
                .unwrap_err()
                .message(),
            "Decimal value is too large"
        );
        assert_eq!(
            decimal::validate(&Value::from("x"), &options).unwrap_err().message(),
            "Could not convert value to decimal"
        );
    }
}
