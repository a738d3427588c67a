//! Field selection for loaded documents
//!
//! `only` and `exclude` compose with "last call wins" semantics: a field
//! excluded after it was included is dropped again, and a field included
//! after it was excluded comes back. The identity is always returned
//! unless it is explicitly excluded.

use std::collections::HashMap;

use bson::{Bson, Document as BsonDocument};

use super::transform::{resolve_segments, split_key};
use crate::fields::FieldKind;
use crate::schema::{Schema, ID_KEY};
use crate::Result;

/// Array slice applied to a list field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    /// First `n` elements, or the last `-n`
    First(i64),
    /// `count` elements starting at `skip`
    Range(i64, i64),
}

impl Slice {
    fn to_bson(self) -> Bson {
        match self {
            Slice::First(n) => Bson::Int64(n),
            Slice::Range(skip, count) => Bson::Array(vec![Bson::Int64(skip), Bson::Int64(count)]),
        }
    }
}

/// One entry of a `fields()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSpec {
    Include,
    Exclude,
    Slice(Slice),
}

/// Lowered projection plus the sub-fields requested on reference fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoweredProjection {
    pub document: Option<BsonDocument>,
    /// Reference attribute -> sub-fields to load when it is dereferenced
    pub references: HashMap<String, Vec<String>>,
}

/// Accumulated `only` / `exclude` / `fields` state of a query set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    only: Option<Vec<String>>,
    exclude: Vec<String>,
    slices: Vec<(String, Slice)>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when documents loaded through this projection are complete
    pub fn is_full(&self) -> bool {
        self.only.is_none() && self.exclude.is_empty() && self.slices.is_empty()
    }

    pub fn only<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let included = self.only.get_or_insert_with(Vec::new);
        for field in fields {
            let field = field.into();
            self.exclude.retain(|f| f != &field);
            if !included.contains(&field) {
                included.push(field);
            }
        }
    }

    pub fn exclude<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field = field.into();
            match &mut self.only {
                Some(included) => {
                    included.retain(|f| f != &field);
                    // The identity is implicit in an inclusion projection
                    if is_identity(&field) && !self.exclude.contains(&field) {
                        self.exclude.push(field);
                    }
                }
                None => {
                    if !self.exclude.contains(&field) {
                        self.exclude.push(field);
                    }
                }
            }
        }
    }

    /// Mixed selection: each entry includes, excludes or slices a field
    pub fn fields<I, S>(&mut self, specs: I)
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        for (field, spec) in specs {
            let field = field.into();
            match spec {
                FieldSpec::Include => self.only([field]),
                FieldSpec::Exclude => self.exclude([field]),
                FieldSpec::Slice(slice) => {
                    self.slices.retain(|(f, _)| f != &field);
                    self.slices.push((field, slice));
                }
            }
        }
    }

    /// Drop every selection
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Lower to a storage-native projection document
    pub fn lower(&self, schema: &Schema) -> Result<LoweredProjection> {
        let mut lowered = LoweredProjection::default();
        if self.is_full() {
            return Ok(lowered);
        }

        let mut document = BsonDocument::new();
        if let Some(included) = &self.only {
            for field in included {
                let path = self.resolve(schema, field, &mut lowered.references)?;
                document.insert(path, 1);
            }
        }
        for field in &self.exclude {
            let path = self.resolve(schema, field, &mut lowered.references)?;
            document.insert(path, 0);
        }
        for (field, slice) in &self.slices {
            let path = self.resolve(schema, field, &mut lowered.references)?;
            let mut spec = BsonDocument::new();
            spec.insert("$slice", slice.to_bson());
            document.insert(path, spec);
        }

        // An inclusion projection whose fields were all excluded again
        // still returns the identity only
        if self.only.is_some() && document.is_empty() {
            document.insert(ID_KEY, 1);
        }

        lowered.document = Some(document);
        Ok(lowered)
    }

    /// Resolve an attribute path. A path continuing below a reference field
    /// selects the reference itself and records the sub-path for
    /// dereferencing.
    fn resolve(
        &self,
        schema: &Schema,
        field: &str,
        references: &mut HashMap<String, Vec<String>>,
    ) -> Result<String> {
        let segments = split_key(field)?;
        if segments.len() > 1 {
            if let Some(head) = schema.lookup(segments[0]) {
                if matches!(head.kind(), FieldKind::Reference { .. }) {
                    references
                        .entry(head.name().to_string())
                        .or_default()
                        .push(segments[1..].join("."));
                    return Ok(head.db_key().to_string());
                }
            }
        }
        resolve_segments(schema, &segments, field).map(|(path, _)| path)
    }
}

fn is_identity(field: &str) -> bool {
    field == "id" || field == ID_KEY
}
