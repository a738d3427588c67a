//! Composable filter trees
//!
//! ```ignore
//! let adults = q!(age__gte = 18);
//! let named = q!(name__istartswith = "l") | q!(name__iendswith = "n");
//! let filter = adults & !named;
//! ```

use std::ops::{BitAnd, BitOr, Not};

use bson::{Bson, Document as BsonDocument};

use super::operators::{negate_predicate, OperatorRegistry};
use super::transform::transform_query;
use crate::schema::Schema;
use crate::validation::validate_query;
use crate::value::Value;
use crate::Result;

/// A filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// Keyword predicates, implicitly AND-ed
    Leaf(Vec<(String, Value)>),
    /// Storage-native filter passed through untouched (after safety checks)
    Raw(BsonDocument),
    And(Vec<Q>),
    Or(Vec<Q>),
    Not(Box<Q>),
}

impl Default for Q {
    fn default() -> Self {
        Q::Leaf(Vec::new())
    }
}

impl Q {
    /// The empty filter, matching everything
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Q::Leaf(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Add a predicate to a leaf; on a compound node, AND it in
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        match self {
            Q::Leaf(mut pairs) => {
                pairs.push((key.into(), value.into()));
                Q::Leaf(pairs)
            }
            other => other.and(Q::Leaf(vec![(key.into(), value.into())])),
        }
    }

    pub fn raw(filter: BsonDocument) -> Self {
        Q::Raw(filter)
    }

    /// True when the node constrains nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Q::Leaf(pairs) => pairs.is_empty(),
            Q::Raw(filter) => filter.is_empty(),
            Q::And(children) | Q::Or(children) => children.iter().all(Q::is_empty),
            Q::Not(inner) => inner.is_empty(),
        }
    }

    /// Conjunction. An empty side is dropped; nested ANDs stay flat.
    pub fn and(self, other: Q) -> Q {
        combine(self, other, Connective::And)
    }

    /// Disjunction. An empty side is dropped; nested ORs stay flat.
    pub fn or(self, other: Q) -> Q {
        combine(self, other, Connective::Or)
    }

    pub fn negate(self) -> Q {
        Q::Not(Box::new(self))
    }

    /// Lower to a storage-native filter. Leaves are resolved against
    /// `schema`; raw filters are checked for server-side JavaScript.
    pub fn to_query(&self, schema: &Schema, operators: &OperatorRegistry) -> Result<BsonDocument> {
        match self {
            Q::Leaf(pairs) => transform_query(schema, operators, pairs),
            Q::Raw(filter) => {
                validate_query(&Bson::Document(filter.clone()))?;
                Ok(filter.clone())
            }
            Q::And(children) => lower_children(children, "$and", schema, operators),
            Q::Or(children) => lower_children(children, "$or", schema, operators),
            Q::Not(inner) => Ok(negate_query(inner.to_query(schema, operators)?)),
        }
    }

    /// Check that the filter lowers against `schema`
    pub fn validate(&self, schema: &Schema, operators: &OperatorRegistry) -> Result<()> {
        self.to_query(schema, operators).map(|_| ())
    }
}

#[derive(Clone, Copy)]
enum Connective {
    And,
    Or,
}

fn combine(left: Q, right: Q, connective: Connective) -> Q {
    if right.is_empty() {
        return left;
    }
    if left.is_empty() {
        return right;
    }
    match (connective, left) {
        (Connective::And, Q::And(mut children)) => {
            children.push(right);
            Q::And(children)
        }
        (Connective::Or, Q::Or(mut children)) => {
            children.push(right);
            Q::Or(children)
        }
        (Connective::And, left) => Q::And(vec![left, right]),
        (Connective::Or, left) => Q::Or(vec![left, right]),
    }
}

fn lower_children(
    children: &[Q],
    connective: &str,
    schema: &Schema,
    operators: &OperatorRegistry,
) -> Result<BsonDocument> {
    let mut lowered: Vec<BsonDocument> = Vec::with_capacity(children.len());
    for child in children.iter().filter(|c| !c.is_empty()) {
        lowered.push(child.to_query(schema, operators)?);
    }
    match lowered.len() {
        0 => Ok(BsonDocument::new()),
        1 => Ok(lowered.remove(0)),
        _ => {
            let mut query = BsonDocument::new();
            query.insert(connective, lowered);
            Ok(query)
        }
    }
}

/// Negate a lowered filter key by key. Logical keys cannot take `$not`
/// and are wrapped in `$nor` instead.
fn negate_query(query: BsonDocument) -> BsonDocument {
    let mut negated = BsonDocument::new();
    let mut nor: Vec<Bson> = Vec::new();
    for (key, predicate) in query {
        if matches!(key.as_str(), "$and" | "$or" | "$nor") {
            let mut clause = BsonDocument::new();
            clause.insert(key, predicate);
            nor.push(Bson::Document(clause));
        } else {
            negated.insert(key, negate_predicate(predicate));
        }
    }
    if !nor.is_empty() {
        negated.insert("$nor", nor);
    }
    negated
}

impl BitAnd for Q {
    type Output = Q;

    fn bitand(self, rhs: Q) -> Q {
        self.and(rhs)
    }
}

impl BitOr for Q {
    type Output = Q;

    fn bitor(self, rhs: Q) -> Q {
        self.or(rhs)
    }
}

impl Not for Q {
    type Output = Q;

    fn not(self) -> Q {
        self.negate()
    }
}

impl From<BsonDocument> for Q {
    fn from(filter: BsonDocument) -> Self {
        Q::Raw(filter)
    }
}

/// Build a leaf filter from keyword predicates
///
/// ```ignore
/// let filter = q!(name__icontains = "lisa", age__gt = 30);
/// ```
#[macro_export]
macro_rules! q {
    () => {
        $crate::Q::new()
    };
    ($($key:ident = $value:expr),+ $(,)?) => {
        $crate::Q::from_pairs(vec![
            $((stringify!($key), $crate::Value::from($value))),+
        ])
    };
}
