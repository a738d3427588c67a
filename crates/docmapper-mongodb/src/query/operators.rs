//! Filter operators
//!
//! An operator is selected by the last segment of a filter key
//! (`age__gt`, `name__istartswith`) and turns the caller's value into the
//! predicate stored under the resolved path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use docmapper_common::DocMapperError;
use once_cell::sync::Lazy;

use crate::fields::Field;
use crate::value::Value;
use crate::Result;

/// Translation of one filter suffix into a storage-native predicate
pub trait QueryOperator: Send + Sync + fmt::Debug {
    /// Suffix selecting this operator
    fn name(&self) -> &str;

    /// Predicate placed under the storage path. `field` is `None` for
    /// schema-less paths; `key` is the caller's filter key, for errors.
    fn lower(&self, field: Option<&Field>, key: &str, value: &Value) -> Result<Bson>;
}

/// Convert a filter value through the field, or generically without one
pub fn convert(field: Option<&Field>, value: &Value) -> Result<Bson> {
    match field {
        Some(field) => field.to_query(value),
        None => Ok(value.to_bson()),
    }
}

// ============================================================================
// Built-in operators
// ============================================================================

/// `ne`, `gt`, `gte`, `lt`, `lte`
#[derive(Debug)]
pub struct Comparison {
    name: &'static str,
    op: &'static str,
}

impl QueryOperator for Comparison {
    fn name(&self) -> &str {
        self.name
    }

    fn lower(&self, field: Option<&Field>, _key: &str, value: &Value) -> Result<Bson> {
        let mut predicate = BsonDocument::new();
        predicate.insert(self.op, convert(field, value)?);
        Ok(Bson::Document(predicate))
    }
}

/// `in`: each element converts like a single value of the field
#[derive(Debug)]
pub struct In;

impl QueryOperator for In {
    fn name(&self) -> &str {
        "in"
    }

    fn lower(&self, field: Option<&Field>, key: &str, value: &Value) -> Result<Bson> {
        let items = value
            .as_list()
            .ok_or_else(|| DocMapperError::invalid_filter(key, "'in' expects a list of values"))?;
        let converted = items
            .iter()
            .map(|item| match field {
                Some(f) => f.element_to_query(item),
                None => Ok(item.to_bson()),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Bson::Document(doc! { "$in": converted }))
    }
}

/// `exists`: uses the raw flag, never the field conversion
#[derive(Debug)]
pub struct Exists;

impl QueryOperator for Exists {
    fn name(&self) -> &str {
        "exists"
    }

    fn lower(&self, _field: Option<&Field>, key: &str, value: &Value) -> Result<Bson> {
        let flag = flag(key, value)?;
        Ok(Bson::Document(doc! { "$exists": flag }))
    }
}

/// `is_null=true` matches null or missing; `is_null=false` requires a
/// present, non-null value
#[derive(Debug)]
pub struct IsNull;

impl QueryOperator for IsNull {
    fn name(&self) -> &str {
        "is_null"
    }

    fn lower(&self, _field: Option<&Field>, key: &str, value: &Value) -> Result<Bson> {
        if flag(key, value)? {
            Ok(Bson::Null)
        } else {
            Ok(Bson::Document(doc! { "$exists": true, "$ne": Bson::Null }))
        }
    }
}

fn flag(key: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        _ => Err(DocMapperError::invalid_filter(key, "expects a boolean")),
    }
}

/// How a literal string is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    Contains,
    StartsWith,
    EndsWith,
}

/// `exact`, `contains`, `startswith`, `endswith` and their `i` variants.
/// The value is matched literally.
#[derive(Debug)]
pub struct TextMatch {
    name: &'static str,
    mode: MatchMode,
    insensitive: bool,
}

impl QueryOperator for TextMatch {
    fn name(&self) -> &str {
        self.name
    }

    fn lower(&self, _field: Option<&Field>, key: &str, value: &Value) -> Result<Bson> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) => value.to_string(),
            _ => return Err(DocMapperError::invalid_filter(key, "expects a string")),
        };
        let literal = regex::escape(&text);
        let pattern = match self.mode {
            MatchMode::Exact => format!("^{}$", literal),
            MatchMode::Contains => literal,
            MatchMode::StartsWith => format!("^{}", literal),
            MatchMode::EndsWith => format!("{}$", literal),
        };
        Ok(regex_predicate(pattern, self.insensitive))
    }
}

/// `regex` / `iregex`: the value is a pattern
#[derive(Debug)]
pub struct RegexMatch {
    name: &'static str,
    insensitive: bool,
}

impl QueryOperator for RegexMatch {
    fn name(&self) -> &str {
        self.name
    }

    fn lower(&self, _field: Option<&Field>, key: &str, value: &Value) -> Result<Bson> {
        let pattern = value
            .as_str()
            .ok_or_else(|| DocMapperError::invalid_filter(key, "expects a regular expression string"))?;
        if let Err(e) = regex::Regex::new(pattern) {
            return Err(DocMapperError::invalid_filter(key, format!("invalid regex: {}", e)));
        }
        Ok(regex_predicate(pattern.to_string(), self.insensitive))
    }
}

fn regex_predicate(pattern: String, insensitive: bool) -> Bson {
    if insensitive {
        Bson::Document(doc! { "$regex": pattern, "$options": "i" })
    } else {
        Bson::Document(doc! { "$regex": pattern })
    }
}

/// `not` on its own negates equality; `x__not__<op>` negates another
/// operator's predicate (see [`negate_predicate`])
#[derive(Debug)]
pub struct Not;

impl QueryOperator for Not {
    fn name(&self) -> &str {
        "not"
    }

    fn lower(&self, field: Option<&Field>, _key: &str, value: &Value) -> Result<Bson> {
        Ok(negate_predicate(convert(field, value)?))
    }
}

/// Negate the predicate stored under one key: an operator document is
/// wrapped in `$not` (an existence check flips its flag), a list becomes
/// `$nin` and a scalar `$ne`.
pub fn negate_predicate(predicate: Bson) -> Bson {
    match predicate {
        Bson::Document(d) => {
            if d.len() == 1 {
                if let Ok(flag) = d.get_bool("$exists") {
                    return Bson::Document(doc! { "$exists": !flag });
                }
            }
            Bson::Document(doc! { "$not": d })
        }
        Bson::Array(items) => Bson::Document(doc! { "$nin": items }),
        scalar => Bson::Document(doc! { "$ne": scalar }),
    }
}

// ============================================================================
// Registry
// ============================================================================

static BUILTIN: Lazy<OperatorRegistry> = Lazy::new(|| {
    let mut registry = OperatorRegistry::empty();
    let operators: Vec<Arc<dyn QueryOperator>> = vec![
        Arc::new(Comparison { name: "ne", op: "$ne" }),
        Arc::new(Comparison { name: "gt", op: "$gt" }),
        Arc::new(Comparison { name: "gte", op: "$gte" }),
        Arc::new(Comparison { name: "lt", op: "$lt" }),
        Arc::new(Comparison { name: "lte", op: "$lte" }),
        Arc::new(In),
        Arc::new(Exists),
        Arc::new(IsNull),
        Arc::new(TextMatch { name: "exact", mode: MatchMode::Exact, insensitive: false }),
        Arc::new(TextMatch { name: "iexact", mode: MatchMode::Exact, insensitive: true }),
        Arc::new(TextMatch { name: "contains", mode: MatchMode::Contains, insensitive: false }),
        Arc::new(TextMatch { name: "icontains", mode: MatchMode::Contains, insensitive: true }),
        Arc::new(TextMatch { name: "startswith", mode: MatchMode::StartsWith, insensitive: false }),
        Arc::new(TextMatch { name: "istartswith", mode: MatchMode::StartsWith, insensitive: true }),
        Arc::new(TextMatch { name: "endswith", mode: MatchMode::EndsWith, insensitive: false }),
        Arc::new(TextMatch { name: "iendswith", mode: MatchMode::EndsWith, insensitive: true }),
        Arc::new(RegexMatch { name: "regex", insensitive: false }),
        Arc::new(RegexMatch { name: "iregex", insensitive: true }),
        Arc::new(Not),
    ];
    for op in operators {
        registry.register(op);
    }
    registry
});

/// Suffix -> operator table
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<dyn QueryOperator>>,
}

impl OperatorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A copy of the built-in table
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Add an operator. The first registration of a name wins; returns
    /// false when the name was already taken.
    pub fn register(&mut self, operator: Arc<dyn QueryOperator>) -> bool {
        let name = operator.name().to_string();
        if self.operators.contains_key(&name) {
            return false;
        }
        self.operators.insert(name, operator);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn QueryOperator>> {
        self.operators.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
