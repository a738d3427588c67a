//! Date/time fields
//!
//! Timestamps are stored with millisecond precision, so values are truncated
//! to milliseconds (and moved to the field's timezone) when assigned.

use bson::Bson;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Timelike, Utc};
use docmapper_validation::{FieldError, FieldResult};

use crate::value::Value;

/// Options of a date/time field
#[derive(Debug, Clone, Default)]
pub struct DateTimeOptions {
    /// Set to now when a new document is saved and the field is empty
    pub auto_now_on_insert: bool,
    /// Set to now on every save
    pub auto_now_on_update: bool,
    /// Offset loaded and assigned values are normalized to (UTC when unset)
    pub tz: Option<FixedOffset>,
}

impl DateTimeOptions {
    fn zone(&self) -> FixedOffset {
        self.tz.unwrap_or_else(|| Utc.fix())
    }

    pub(crate) fn normalize(&self, dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let millis = dt.nanosecond() / 1_000_000 * 1_000_000;
        let truncated = dt.with_nanosecond(millis).unwrap_or(dt);
        truncated.with_timezone(&self.zone())
    }

    pub(crate) fn now(&self) -> Value {
        Value::DateTime(self.normalize(Utc::now().fixed_offset()))
    }
}

fn parse(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

pub(crate) fn coerce(value: Value, options: &DateTimeOptions) -> Value {
    match value {
        Value::DateTime(dt) => Value::DateTime(options.normalize(dt)),
        Value::String(s) => match parse(&s) {
            Some(dt) => Value::DateTime(options.normalize(dt)),
            None => Value::String(s),
        },
        // Seconds since the epoch
        Value::Int(secs) => match DateTime::from_timestamp(secs, 0) {
            Some(dt) => Value::DateTime(options.normalize(dt.fixed_offset())),
            None => Value::Int(secs),
        },
        other => other,
    }
}

pub(crate) fn validate(value: &Value) -> FieldResult {
    match value {
        Value::DateTime(_) => Ok(()),
        _ => Err(FieldError::type_error("DateTime field only accepts datetime values")),
    }
}

pub(crate) fn to_storage(value: &Value) -> Bson {
    match value {
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(dt.with_timezone(&Utc))),
        other => other.to_bson(),
    }
}

pub(crate) fn from_storage(raw: Bson, options: &DateTimeOptions) -> Value {
    match raw {
        Bson::DateTime(dt) => Value::DateTime(options.normalize(dt.to_chrono().fixed_offset())),
        Bson::String(s) => coerce(Value::String(s), options),
        other => Value::from_bson(other),
    }
}
