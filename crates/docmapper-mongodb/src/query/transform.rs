//! Field-path resolution and filter lowering
//!
//! A filter key is a chain of segments separated by `__` or `.`:
//! `attr`, `attr__op`, `attr__nested__op`, `attr.nested`. Segments are
//! resolved through the schema (descending into embedded documents and
//! lists of them) and joined with each field's storage key. A trailing
//! segment naming a registered operator selects that operator;
//! `attr__not__op` negates it.

use bson::{Bson, Document as BsonDocument};
use docmapper_common::DocMapperError;

use super::operators::{convert, negate_predicate, OperatorRegistry, QueryOperator};
use crate::fields::{Field, FieldKind};
use crate::schema::Schema;
use crate::value::Value;
use crate::Result;

const INVALID_PATH: &str =
    "Invalid operator (if this is a sub-property, then it must be used in embedded document fields)";

/// A filter key resolved against a schema
#[derive(Debug)]
pub struct ResolvedKey<'s> {
    /// Dotted storage path
    pub path: String,
    /// Field governing the value, `None` below a mapping or dynamic field
    pub field: Option<&'s Field>,
    pub operator: Option<&'s dyn QueryOperator>,
    /// `attr__not__op`
    pub negated: bool,
}

/// What the next segment may address
enum Context<'s> {
    Schema(&'s Schema),
    /// Elements of a list field
    Elements(&'s Field),
    /// Literal sub-keys of a mapping or dynamic value
    Free,
    /// Scalar field, nothing below it
    Leaf,
}

fn context_below(field: &Field) -> Context<'_> {
    match field.kind() {
        FieldKind::Embedded(schema) => Context::Schema(schema),
        FieldKind::List(inner) => Context::Elements(inner),
        FieldKind::Map | FieldKind::Dynamic => Context::Free,
        _ => Context::Leaf,
    }
}

/// Split a key into path segments
pub fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split("__").flat_map(|part| part.split('.')).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DocMapperError::invalid_filter(key, "empty path segment"));
    }
    Ok(segments)
}

/// Resolve attribute segments to a storage path and the governing field
pub fn resolve_segments<'s>(
    schema: &'s Schema,
    segments: &[&str],
    key: &str,
) -> Result<(String, Option<&'s Field>)> {
    let invalid = || DocMapperError::invalid_filter(key, INVALID_PATH);

    let mut parts: Vec<&str> = Vec::with_capacity(segments.len());
    let mut field: Option<&'s Field> = None;
    let mut context = Context::Schema(schema);

    for segment in segments {
        context = match context {
            Context::Schema(s) => {
                let found = s.lookup(segment).ok_or_else(invalid)?;
                parts.push(found.db_key());
                field = Some(found);
                context_below(found)
            }
            Context::Elements(inner) => {
                if segment.chars().all(|c| c.is_ascii_digit()) {
                    // Positional element
                    parts.push(segment);
                    field = Some(inner);
                    context_below(inner)
                } else if let FieldKind::Embedded(s) = inner.kind() {
                    // Implicit traversal into every element
                    let found = s.lookup(segment).ok_or_else(invalid)?;
                    parts.push(found.db_key());
                    field = Some(found);
                    context_below(found)
                } else {
                    return Err(invalid());
                }
            }
            Context::Free => {
                parts.push(segment);
                field = None;
                Context::Free
            }
            Context::Leaf => return Err(invalid()),
        };
    }

    Ok((parts.join("."), field))
}

/// Resolve a full filter key, splitting off a trailing operator
pub fn resolve_key<'s>(
    schema: &'s Schema,
    operators: &'s OperatorRegistry,
    key: &str,
) -> Result<ResolvedKey<'s>> {
    let segments = split_key(key)?;
    let n = segments.len();

    let (path_len, operator, negated) = match segments.last() {
        Some(last) if n > 1 && operators.contains(last) => {
            if *last != "not" && n > 2 && segments[n - 2] == "not" {
                (n - 2, operators.get(last), true)
            } else {
                (n - 1, operators.get(last), false)
            }
        }
        _ => (n, None, false),
    };

    let (path, field) = resolve_segments(schema, &segments[..path_len], key)?;
    Ok(ResolvedKey {
        path,
        field,
        operator: operator.map(|op| op.as_ref()),
        negated,
    })
}

/// Storage path of an attribute path without operators (sorting, projections)
pub fn resolve_path(schema: &Schema, path: &str) -> Result<String> {
    let segments = split_key(path)?;
    resolve_segments(schema, &segments, path).map(|(p, _)| p)
}

/// Lower a leaf predicate mapping. Keys are processed in sorted order and
/// predicates on the same path are merged.
pub fn transform_query(
    schema: &Schema,
    operators: &OperatorRegistry,
    pairs: &[(String, Value)],
) -> Result<BsonDocument> {
    let mut sorted: Vec<&(String, Value)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut query = BsonDocument::new();
    for (key, value) in sorted {
        let resolved = resolve_key(schema, operators, key)?;
        let predicate = match resolved.operator {
            Some(op) => op.lower(resolved.field, key, value)?,
            None => convert(resolved.field, value)?,
        };
        let predicate = if resolved.negated {
            negate_predicate(predicate)
        } else {
            predicate
        };
        merge_predicate(&mut query, resolved.path, predicate);
    }
    Ok(query)
}

/// Insert a predicate, merging operator documents on the same path. An
/// equality already present becomes `$eq` so both constraints survive.
/// Predicates that cannot share one operator document (the same operator
/// twice, two equalities) move under `$and`.
pub fn merge_predicate(query: &mut BsonDocument, path: String, predicate: Bson) {
    let existing = match query.remove(&path) {
        Some(existing) => existing,
        None => {
            query.insert(path, predicate);
            return;
        }
    };

    match merge_operators(existing, predicate) {
        Ok(merged) => {
            query.insert(path, merged);
        }
        Err((existing, predicate)) => {
            let mut clauses = match query.remove("$and") {
                Some(Bson::Array(clauses)) => clauses,
                Some(other) => vec![other],
                None => Vec::new(),
            };
            for clause in [existing, predicate] {
                let mut single = BsonDocument::new();
                single.insert(path.clone(), clause);
                clauses.push(Bson::Document(single));
            }
            query.insert("$and", clauses);
        }
    }
}

/// Fold two predicates into one operator document, or hand both back when
/// an operator would be overwritten
fn merge_operators(existing: Bson, predicate: Bson) -> std::result::Result<Bson, (Bson, Bson)> {
    match (existing, predicate) {
        (Bson::Document(mut left), Bson::Document(right))
            if is_operator_doc(&left)
                && is_operator_doc(&right)
                && !right.keys().any(|k| left.contains_key(k)) =>
        {
            for (k, v) in right {
                left.insert(k, v);
            }
            Ok(Bson::Document(left))
        }
        (Bson::Document(mut ops), scalar)
            if is_operator_doc(&ops) && !ops.contains_key("$eq") && !matches!(scalar, Bson::Document(_)) =>
        {
            ops.insert("$eq", scalar);
            Ok(Bson::Document(ops))
        }
        (scalar, Bson::Document(mut ops))
            if is_operator_doc(&ops) && !ops.contains_key("$eq") && !matches!(scalar, Bson::Document(_)) =>
        {
            ops.insert("$eq", scalar);
            Ok(Bson::Document(ops))
        }
        (existing, predicate) => Err((existing, predicate)),
    }
}

fn is_operator_doc(doc: &BsonDocument) -> bool {
    !doc.is_empty() && doc.keys().all(|k| k.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentMeta;
    use bson::doc;

    fn schema() -> std::sync::Arc<Schema> {
        let address = Schema::builder("Address")
            .field("city", Field::text().storage_key("c"))
            .field("zip", Field::int())
            .meta(DocumentMeta::new().as_embedded())
            .build()
            .unwrap();
        Schema::builder("Person")
            .field("name", Field::text().storage_key("n"))
            .field("age", Field::int())
            .field("like", Field::list(Field::text()))
            .field("address", Field::embedded(&address).storage_key("addr"))
            .field("history", Field::list(Field::embedded(&address)))
            .field("extra", Field::dict())
            .build()
            .unwrap()
    }

    fn lower(pairs: &[(&str, Value)]) -> Result<BsonDocument> {
        let pairs: Vec<(String, Value)> = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        transform_query(&schema(), &OperatorRegistry::builtin(), &pairs)
    }

    #[test]
    fn test_equality_uses_storage_keys() {
        assert_eq!(lower(&[("name", "Lisa".into())]).unwrap(), doc! { "n": "Lisa" });
        assert_eq!(lower(&[("id", Value::Null)]).unwrap(), doc! { "_id": null });
    }

    #[test]
    fn test_operator_suffix() {
        assert_eq!(lower(&[("age__gt", 30.into())]).unwrap(), doc! { "age": { "$gt": 30 } });
    }

    #[test]
    fn test_nested_paths_resolve_alike() {
        let dunder = lower(&[("address__city__startswith", "Ber".into())]).unwrap();
        let dotted = lower(&[("address.city__startswith", "Ber".into())]).unwrap();
        assert_eq!(dunder, dotted);
        assert_eq!(dunder, doc! { "addr.c": { "$regex": "^Ber" } });
    }

    #[test]
    fn test_list_of_embedded_paths() {
        assert_eq!(
            lower(&[("history__zip__lt", 100.into())]).unwrap(),
            doc! { "history.zip": { "$lt": 100 } }
        );
        assert_eq!(
            lower(&[("history__0__city", "Rome".into())]).unwrap(),
            doc! { "history.0.c": "Rome" }
        );
    }

    #[test]
    fn test_mapping_paths_are_literal() {
        assert_eq!(
            lower(&[("extra__color__ne", "red".into())]).unwrap(),
            doc! { "extra.color": { "$ne": "red" } }
        );
    }

    #[test]
    fn test_list_equality_and_membership() {
        assert_eq!(lower(&[("like", "swim".into())]).unwrap(), doc! { "like": "swim" });
        assert_eq!(
            lower(&[("like", vec!["a", "b"].into())]).unwrap(),
            doc! { "like": { "$all": ["a", "b"] } }
        );
        assert_eq!(
            lower(&[("like__in", vec!["a"].into())]).unwrap(),
            doc! { "like": { "$in": ["a"] } }
        );
    }

    #[test]
    fn test_same_path_predicates_merge() {
        assert_eq!(
            lower(&[("age__gt", 10.into()), ("age__lt", 20.into())]).unwrap(),
            doc! { "age": { "$gt": 10, "$lt": 20 } }
        );
        assert_eq!(
            lower(&[("age", 15.into()), ("age__gt", 10.into())]).unwrap(),
            doc! { "age": { "$gt": 10, "$eq": 15 } }
        );
    }

    #[test]
    fn test_repeated_operator_on_one_path_conjoins() {
        assert_eq!(
            lower(&[("name__startswith", "A".into()), ("name__endswith", "b".into())]).unwrap(),
            doc! { "$and": [ { "n": { "$regex": "b$" } }, { "n": { "$regex": "^A" } } ] }
        );
        assert_eq!(
            lower(&[("age__ne", 1.into()), ("age__not", 2.into())]).unwrap(),
            doc! { "$and": [ { "age": { "$ne": 1 } }, { "age": { "$ne": 2 } } ] }
        );
        assert_eq!(
            lower(&[("address.city", "Rome".into()), ("address__city", "Oslo".into())]).unwrap(),
            doc! { "$and": [ { "addr.c": "Rome" }, { "addr.c": "Oslo" } ] }
        );
    }

    #[test]
    fn test_conjoined_paths_keep_earlier_clauses() {
        let mut query = doc! { "$and": [ { "x": 1 } ], "age": { "$gt": 1 } };
        merge_predicate(&mut query, "age".into(), Bson::Document(doc! { "$gt": 5 }));
        assert_eq!(
            query,
            doc! { "$and": [ { "x": 1 }, { "age": { "$gt": 1 } }, { "age": { "$gt": 5 } } ] }
        );
    }

    #[test]
    fn test_negated_operator() {
        assert_eq!(
            lower(&[("age__not__gt", 5.into())]).unwrap(),
            doc! { "age": { "$not": { "$gt": 5 } } }
        );
        assert_eq!(lower(&[("age__not", 5.into())]).unwrap(), doc! { "age": { "$ne": 5 } });
    }

    #[test]
    fn test_invalid_paths() {
        for key in ["nope", "age__foo", "name__city", "address__nope", "like__foo", "age__"] {
            let err = lower(&[(key, 1.into())]).unwrap_err();
            assert!(matches!(err, DocMapperError::InvalidFilter { .. }), "{}", key);
        }
        let err = lower(&[("age__bogus", 1.into())]).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Invalid filter 'age__bogus': {}", INVALID_PATH)
        );
    }

    #[test]
    fn test_resolve_path_for_sorting() {
        let schema = schema();
        assert_eq!(resolve_path(&schema, "address.city").unwrap(), "addr.c");
        assert_eq!(resolve_path(&schema, "id").unwrap(), "_id");
        assert!(resolve_path(&schema, "missing").is_err());
    }

    #[test]
    fn test_lowering_is_deterministic() {
        let pairs = [("name__icontains", Value::from("li")), ("age__gte", Value::from(3))];
        assert_eq!(lower(&pairs).unwrap(), lower(&pairs).unwrap());
        let reversed = [pairs[1].clone(), pairs[0].clone()];
        assert_eq!(lower(&pairs).unwrap(), lower(&reversed).unwrap());
    }
}
