//! Evaluation of storage-native filters, projections, sorts, updates and
//! aggregation pipelines against raw documents
//!
//! Covers the operator subset this crate emits: comparison, membership,
//! existence, regex, `$not` and the logical connectives, with MongoDB's
//! array semantics (a predicate on an array path holds when it holds for
//! any element).

use std::cmp::Ordering;

use bson::{Bson, Document as BsonDocument};
use docmapper_common::DocMapperError;
use regex::RegexBuilder;

use crate::Result;

fn unsupported(what: &str, name: &str) -> DocMapperError {
    DocMapperError::Query(format!("Unsupported {} '{}'", what, name))
}

// ============================================================================
// Paths
// ============================================================================

/// Every value reachable under a dotted path. Arrays along the way are
/// traversed element-wise; numeric segments index into them.
pub fn lookup<'a>(doc: &'a BsonDocument, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(segments[0]) {
        collect(first, &segments[1..], &mut out);
    }
    out
}

fn collect<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(d) => {
            if let Some(next) = d.get(*segment) {
                collect(next, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect(item, rest, out);
                }
                return;
            }
            for item in items {
                if let Bson::Document(_) = item {
                    collect(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// Single value at a dotted path, without array traversal
pub fn get_path<'a>(doc: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut current: &Bson = doc.get(path.split('.').next()?)?;
    for segment in path.split('.').skip(1) {
        current = match current {
            Bson::Document(d) => d.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Assign at a dotted path, creating intermediate documents
pub fn set_path(doc: &mut BsonDocument, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, BsonDocument::new());
            }
            if let Some(Bson::Document(child)) = doc.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

pub fn remove_path(doc: &mut BsonDocument, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

// ============================================================================
// Comparison
// ============================================================================

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

/// Canonical type order used when sorting mixed values
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        _ => 11,
    }
}

/// Ordering between two values of the same type class
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Total order for sorting
pub fn sort_compare(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let null = Bson::Null;
    let a = a.unwrap_or(&null);
    let b = b.unwrap_or(&null);
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare(a, b).unwrap_or(Ordering::Equal))
}

/// Equality with numeric types compared by value
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => match (a, b) {
            (Bson::Array(x), Bson::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
            }
            (Bson::Document(x), Bson::Document(y)) => {
                x.len() == y.len()
                    && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| values_equal(v, w)))
            }
            _ => a == b,
        },
    }
}

// ============================================================================
// Filters
// ============================================================================

/// True when `doc` satisfies `filter`
pub fn matches(doc: &BsonDocument, filter: &BsonDocument) -> Result<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(condition)? {
                    if matches(doc, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            other if other.starts_with('$') => return Err(unsupported("query operator", other)),
            path => {
                let values = lookup(doc, path);
                match condition {
                    Bson::Document(ops) if is_operator_document(ops) => evaluate_operators(&values, ops)?,
                    expected => equals_any(&values, expected),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Bson) -> Result<Vec<&BsonDocument>> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| match item {
                Bson::Document(d) => Ok(d),
                _ => Err(DocMapperError::Query("Logical clauses must be documents".to_string())),
            })
            .collect(),
        _ => Err(DocMapperError::Query("Logical operators expect an array".to_string())),
    }
}

fn is_operator_document(doc: &BsonDocument) -> bool {
    doc.keys().next().map_or(false, |k| k.starts_with('$'))
}

/// Equality against any value found under the path, or any element of an
/// array found there. A null expectation also matches a missing path.
fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }
    values.iter().any(|v| {
        values_equal(v, expected)
            || matches!(v, Bson::Array(items) if items.iter().any(|i| values_equal(i, expected)))
    })
}

/// Values and, for arrays, their elements
fn candidates<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::new();
    for value in values {
        out.push(*value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

fn evaluate_operators(values: &[&Bson], ops: &BsonDocument) -> Result<bool> {
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" | "$gte" | "$lt" | "$lte" => candidates(values).iter().any(|v| {
                match compare(v, operand) {
                    Some(ordering) => match op.as_str() {
                        "$gt" => ordering == Ordering::Greater,
                        "$gte" => ordering != Ordering::Less,
                        "$lt" => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }),
            "$in" => array_operand(op, operand)?.iter().any(|x| equals_any(values, x)),
            "$nin" => !array_operand(op, operand)?.iter().any(|x| equals_any(values, x)),
            "$all" => array_operand(op, operand)?.iter().all(|x| equals_any(values, x)),
            "$exists" => {
                let wanted = match operand {
                    Bson::Boolean(b) => *b,
                    other => as_number(other).map_or(true, |n| n != 0.0),
                };
                values.is_empty() != wanted
            }
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| DocMapperError::Query("$regex expects a string".to_string()))?;
                let options = ops.get_str("$options").unwrap_or("");
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(options.contains('i'))
                    .multi_line(options.contains('m'))
                    .dot_matches_new_line(options.contains('s'))
                    .ignore_whitespace(options.contains('x'))
                    .build()
                    .map_err(|e| DocMapperError::Query(format!("Invalid regex: {}", e)))?;
                candidates(values)
                    .iter()
                    .any(|v| matches!(v, Bson::String(s) if re.is_match(s)))
            }
            "$options" => true,
            "$size" => {
                let size = as_number(operand).unwrap_or(-1.0);
                values
                    .iter()
                    .any(|v| matches!(v, Bson::Array(items) if items.len() as f64 == size))
            }
            "$not" => match operand {
                Bson::Document(inner) => !evaluate_operators(values, inner)?,
                _ => return Err(DocMapperError::Query("$not expects an operator document".to_string())),
            },
            other => return Err(unsupported("query operator", other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn array_operand<'a>(op: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(DocMapperError::Query(format!("{} expects an array", op))),
    }
}

// ============================================================================
// Projection and sort
// ============================================================================

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        other => as_number(other).map_or(false, |n| n != 0.0),
    }
}

fn apply_slice(value: &Bson, spec: &Bson) -> Bson {
    let items = match value {
        Bson::Array(items) => items,
        other => return other.clone(),
    };
    let len = items.len() as i64;
    let (start, count) = match spec {
        Bson::Array(pair) if pair.len() == 2 => {
            let skip = as_number(&pair[0]).unwrap_or(0.0) as i64;
            let count = as_number(&pair[1]).unwrap_or(0.0) as i64;
            let start = if skip < 0 { (len + skip).max(0) } else { skip.min(len) };
            (start, count.max(0))
        }
        other => {
            let n = as_number(other).unwrap_or(0.0) as i64;
            if n >= 0 {
                (0, n)
            } else {
                ((len + n).max(0), n.saturating_neg())
            }
        }
    };
    let end = start.saturating_add(count).min(len);
    Bson::Array(items[start as usize..end as usize].to_vec())
}

/// Apply an inclusion or exclusion projection with optional `$slice`s
pub fn project(doc: &BsonDocument, projection: &BsonDocument) -> BsonDocument {
    // A lone `_id: 1` is an inclusion too
    let inclusion = projection
        .iter()
        .any(|(_, v)| !matches!(v, Bson::Document(_)) && is_truthy(v));

    if inclusion {
        let mut out = BsonDocument::new();
        let keep_id = projection.get("_id").map_or(true, is_truthy);
        if keep_id {
            if let Some(id) = doc.get("_id") {
                out.insert("_id", id.clone());
            }
        }
        for (path, spec) in projection {
            if path == "_id" {
                continue;
            }
            let Some(value) = get_path(doc, path) else { continue };
            match spec {
                Bson::Document(ops) => match ops.get("$slice") {
                    Some(slice) => set_path(&mut out, path, apply_slice(value, slice)),
                    None => set_path(&mut out, path, value.clone()),
                },
                flag if is_truthy(flag) => set_path(&mut out, path, value.clone()),
                _ => {}
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for (path, spec) in projection {
            match spec {
                Bson::Document(ops) => {
                    if let (Some(slice), Some(value)) = (ops.get("$slice"), get_path(doc, path)) {
                        set_path(&mut out, path, apply_slice(value, slice));
                    }
                }
                flag if !is_truthy(flag) => {
                    remove_path(&mut out, path);
                }
                _ => {}
            }
        }
        out
    }
}

/// Order two documents by a sort specification (`{path: 1 | -1}`)
pub fn compare_documents(a: &BsonDocument, b: &BsonDocument, sort: &BsonDocument) -> Ordering {
    for (path, direction) in sort {
        let ordering = sort_compare(get_path(a, path), get_path(b, path));
        let ordering = if as_number(direction).unwrap_or(1.0) < 0.0 {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

// ============================================================================
// Updates
// ============================================================================

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

fn add_numbers(current: Option<&Bson>, by: &Bson) -> Result<Bson> {
    let current = current.cloned().unwrap_or(Bson::Int32(0));
    Ok(match (&current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let sum = as_i64(&current)
                .zip(as_i64(by))
                .and_then(|(a, b)| a.checked_add(b))
                .ok_or_else(|| DocMapperError::Query("$inc overflows a 64-bit integer".to_string()))?;
            Bson::Int64(sum)
        }
        _ => match (as_number(&current), as_number(by)) {
            (Some(a), Some(b)) => Bson::Double(a + b),
            _ => {
                return Err(DocMapperError::Query(
                    "Cannot apply $inc to a non-numeric value".to_string(),
                ))
            }
        },
    })
}

/// Apply an update document in place. A document without operators
/// replaces every field except `_id`.
pub fn apply_update(doc: &mut BsonDocument, update: &BsonDocument, inserting: bool) -> Result<()> {
    if !is_operator_document(update) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert("_id", id);
        }
        return Ok(());
    }

    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(f) => f,
            _ => return Err(DocMapperError::Query(format!("{} expects a document", op))),
        };
        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(doc, path, value.clone()),
                "$setOnInsert" => {
                    if inserting {
                        set_path(doc, path, value.clone())
                    }
                }
                "$unset" => {
                    remove_path(doc, path);
                }
                "$inc" => {
                    let sum = add_numbers(get_path(doc, path), value)?;
                    set_path(doc, path, sum);
                }
                "$push" | "$addToSet" => {
                    let mut items = match get_path(doc, path) {
                        Some(Bson::Array(items)) => items.clone(),
                        None | Some(Bson::Null) => Vec::new(),
                        Some(_) => {
                            return Err(DocMapperError::Query(format!(
                                "Cannot apply {} to non-array field '{}'",
                                op, path
                            )))
                        }
                    };
                    let unique = op == "$addToSet";
                    if !unique || !items.iter().any(|i| values_equal(i, value)) {
                        items.push(value.clone());
                    }
                    set_path(doc, path, Bson::Array(items));
                }
                other => return Err(unsupported("update operator", other)),
            }
        }
    }
    Ok(())
}

/// Seed document for an upsert: the equality predicates of the filter
pub fn upsert_seed(filter: &BsonDocument) -> BsonDocument {
    let mut seed = BsonDocument::new();
    for (key, value) in filter {
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(ops) if is_operator_document(ops) => {
                if let Some(eq) = ops.get("$eq") {
                    set_path(&mut seed, key, eq.clone());
                }
            }
            other => set_path(&mut seed, key, other.clone()),
        }
    }
    seed
}

// ============================================================================
// Aggregation
// ============================================================================

/// `"$path"` reads a field, anything else is a literal
fn expression(doc: &BsonDocument, expr: &Bson) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with('$') => get_path(doc, &s[1..]).cloned().unwrap_or(Bson::Null),
        Bson::Document(fields) if !is_operator_document(fields) => {
            let mut out = BsonDocument::new();
            for (k, v) in fields {
                out.insert(k, expression(doc, v));
            }
            Bson::Document(out)
        }
        other => other.clone(),
    }
}

#[derive(Debug)]
enum Accumulator {
    Sum { total: f64, integral: bool },
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn new(op: &str) -> Result<Self> {
        Ok(match op {
            "$sum" => Accumulator::Sum { total: 0.0, integral: true },
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => return Err(unsupported("accumulator", other)),
        })
    }

    fn feed(&mut self, value: Bson) {
        match self {
            Accumulator::Sum { total, integral } => {
                if let Some(n) = as_number(&value) {
                    *total += n;
                    *integral &= matches!(value, Bson::Int32(_) | Bson::Int64(_));
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(n) = as_number(&value) {
                    *total += n;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map_or(true, |c| sort_compare(Some(&value), Some(c)) == Ordering::Less)
                {
                    *current = Some(value);
                }
            }
            Accumulator::Max(current) => {
                if !matches!(value, Bson::Null)
                    && current.as_ref().map_or(true, |c| sort_compare(Some(&value), Some(c)) == Ordering::Greater)
                {
                    *current = Some(value);
                }
            }
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value);
                }
            }
            Accumulator::Last(current) => *current = value,
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|i| values_equal(i, &value)) {
                    items.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum { total, integral: true } => {
                let total = total as i64;
                i32::try_from(total).map(Bson::Int32).unwrap_or(Bson::Int64(total))
            }
            Accumulator::Sum { total, .. } => Bson::Double(total),
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(v) | Accumulator::Max(v) | Accumulator::First(v) => v.unwrap_or(Bson::Null),
            Accumulator::Last(v) => v,
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
        }
    }
}

fn group(docs: Vec<BsonDocument>, spec: &BsonDocument) -> Result<Vec<BsonDocument>> {
    let key_expr = spec.get("_id").cloned().unwrap_or(Bson::Null);
    let mut outputs: Vec<(&str, &str, &Bson)> = Vec::new();
    for (name, acc) in spec {
        if name == "_id" {
            continue;
        }
        let (op, expr) = match acc {
            Bson::Document(d) if d.len() == 1 => d.iter().next().map(|(op, e)| (op.as_str(), e)),
            _ => None,
        }
        .ok_or_else(|| DocMapperError::Query(format!("Invalid accumulator for '{}'", name)))?;
        outputs.push((name.as_str(), op, expr));
    }

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for doc in &docs {
        let key = expression(doc, &key_expr);
        let position = groups.iter().position(|(k, _)| values_equal(k, &key));
        let index = match position {
            Some(i) => i,
            None => {
                let accumulators = outputs
                    .iter()
                    .map(|(_, op, _)| Accumulator::new(op))
                    .collect::<Result<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };
        for (acc, (_, _, expr)) in groups[index].1.iter_mut().zip(&outputs) {
            acc.feed(expression(doc, expr));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = BsonDocument::new();
            out.insert("_id", key);
            for (acc, (name, _, _)) in accumulators.into_iter().zip(&outputs) {
                out.insert(*name, acc.finish());
            }
            out
        })
        .collect())
}

fn unwind(docs: Vec<BsonDocument>, spec: &Bson) -> Result<Vec<BsonDocument>> {
    let path = match spec {
        Bson::String(s) => s.as_str(),
        Bson::Document(d) => d.get_str("path").map_err(|_| DocMapperError::Query("$unwind expects a path".to_string()))?,
        _ => return Err(DocMapperError::Query("$unwind expects a path".to_string())),
    };
    let path = path.strip_prefix('$').unwrap_or(path);

    let mut out = Vec::new();
    for doc in docs {
        let items = match get_path(&doc, path) {
            Some(Bson::Array(items)) => items.clone(),
            Some(Bson::Null) | None => continue,
            Some(_) => {
                out.push(doc);
                continue;
            }
        };
        for item in items {
            let mut copy = doc.clone();
            set_path(&mut copy, path, item);
            out.push(copy);
        }
    }
    Ok(out)
}

fn count_operand(stage: &str, value: &Bson) -> Result<usize> {
    as_number(value)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
        .ok_or_else(|| DocMapperError::Query(format!("{} expects a non-negative number", stage)))
}

/// Run a pipeline over a collection snapshot
pub fn run_pipeline(mut docs: Vec<BsonDocument>, pipeline: &[BsonDocument]) -> Result<Vec<BsonDocument>> {
    for stage in pipeline {
        let (name, spec) = stage
            .iter()
            .next()
            .ok_or_else(|| DocMapperError::Query("Empty pipeline stage".to_string()))?;
        docs = match (name.as_str(), spec) {
            ("$match", Bson::Document(filter)) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            ("$sort", Bson::Document(sort)) => {
                docs.sort_by(|a, b| compare_documents(a, b, sort));
                docs
            }
            ("$skip", n) => docs.into_iter().skip(count_operand("$skip", n)?).collect(),
            ("$limit", n) => docs.into_iter().take(count_operand("$limit", n)?).collect(),
            ("$project", Bson::Document(projection)) => {
                let computed = projection
                    .iter()
                    .any(|(_, v)| matches!(v, Bson::String(s) if s.starts_with('$')));
                if computed {
                    docs.iter()
                        .map(|doc| {
                            let mut out = BsonDocument::new();
                            if projection.get("_id").map_or(true, is_truthy) {
                                if let Some(id) = doc.get("_id") {
                                    out.insert("_id", id.clone());
                                }
                            }
                            for (k, v) in projection {
                                if k == "_id" {
                                    continue;
                                }
                                match v {
                                    Bson::String(_) => set_path(&mut out, k, expression(doc, v)),
                                    flag if is_truthy(flag) => {
                                        if let Some(value) = get_path(doc, k) {
                                            set_path(&mut out, k, value.clone());
                                        }
                                    }
                                    _ => {}
                                }
                            }
                            out
                        })
                        .collect()
                } else {
                    docs.iter().map(|doc| project(doc, projection)).collect()
                }
            }
            ("$group", Bson::Document(spec)) => group(docs, spec)?,
            ("$unwind", spec) => unwind(docs, spec)?,
            ("$count", Bson::String(field)) => {
                let mut out = BsonDocument::new();
                out.insert(field.clone(), Bson::Int32(docs.len() as i32));
                vec![out]
            }
            (other, _) => return Err(unsupported("pipeline stage", other)),
        };
    }
    Ok(docs)
}
