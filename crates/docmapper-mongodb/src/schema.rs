//! Schema assembly
//!
//! A document type is declared with [`Schema::builder`]: a list of named
//! fields, an optional parent schema and [`DocumentMeta`] options. `build()`
//! flattens the inheritance chain, assigns storage keys, detects storage key
//! collisions, resolves (or synthesizes) the identity field and derives the
//! collection name and index list. The result is immutable.
//!
//! ```
//! use docmapper_mongodb::{DocumentMeta, Field, Schema};
//!
//! let user = Schema::builder("BlogUser")
//!     .field("name", Field::text().required())
//!     .field("age", Field::int())
//!     .meta(DocumentMeta::new().index("-age"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(user.collection(), "blog_user");
//! assert_eq!(user.id_field().unwrap().db_key(), "_id");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use docmapper_common::DocMapperError;
use tracing::debug;

use crate::fields::{Field, FieldKind};
use crate::index::{IndexDirection, IndexSpec};
use crate::validation::{validate_attribute_name, ValidatedCollectionName};
use crate::Result;

/// Storage key reserved for the identity
pub const ID_KEY: &str = "_id";

// ============================================================================
// Meta options
// ============================================================================

/// Per-document options
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    /// Abstract documents only exist to be extended
    pub is_abstract: bool,
    /// Embedded documents have no collection and no identity
    pub embedded: bool,
    pub collection: Option<String>,
    /// Connection alias used when a query does not pick one
    pub alias: Option<String>,
    pub indexes: Vec<IndexSpec>,
    /// Default sort keys, e.g. `["-created"]`
    pub ordering: Vec<String>,
    /// Attribute playing the identity role
    pub id_field: Option<String>,
    pub allow_inheritance: bool,
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self {
            is_abstract: false,
            embedded: false,
            collection: None,
            alias: None,
            indexes: Vec::new(),
            ordering: Vec::new(),
            id_field: None,
            allow_inheritance: true,
        }
    }
}

impl DocumentMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn as_embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn index(mut self, index: impl Into<IndexSpec>) -> Self {
        self.indexes.push(index.into());
        self
    }

    pub fn ordering<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = Some(name.into());
        self
    }

    pub fn allow_inheritance(mut self, allow: bool) -> Self {
        self.allow_inheritance = allow;
        self
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Assembled, immutable field table of one document type
#[derive(Debug)]
pub struct Schema {
    name: String,
    collection: String,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    by_storage_key: HashMap<String, usize>,
    id_index: Option<usize>,
    meta: DocumentMeta,
    indexes: Vec<IndexSpec>,
    ancestors: Vec<String>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            parent: None,
            fields: Vec::new(),
            meta: DocumentMeta::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Fields in declaration order (identity first when synthesized)
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn field_by_storage_key(&self, key: &str) -> Option<&Field> {
        self.by_storage_key.get(key).map(|&i| &self.fields[i])
    }

    /// Field by attribute name, falling back to its storage key
    pub fn lookup(&self, segment: &str) -> Option<&Field> {
        self.field(segment)
            .or_else(|| self.field_by_storage_key(segment))
    }

    pub fn storage_key(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.db_key())
    }

    pub fn attribute_for_storage_key(&self, key: &str) -> Option<&str> {
        self.field_by_storage_key(key).map(|f| f.name())
    }

    pub fn id_field(&self) -> Option<&Field> {
        self.id_index.map(|i| &self.fields[i])
    }

    pub fn meta(&self) -> &DocumentMeta {
        &self.meta
    }

    /// Declared indexes plus the implicit ones from unique/sparse fields,
    /// with storage keys
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn is_abstract(&self) -> bool {
        self.meta.is_abstract
    }

    pub fn is_embedded(&self) -> bool {
        self.meta.embedded
    }

    pub fn ordering(&self) -> &[String] {
        &self.meta.ordering
    }

    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// True for this document and for documents it extends
    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.ancestors.iter().any(|a| a == name)
    }

    /// Storage path of a dotted attribute path. Embedded and list-of-embedded
    /// fields are descended; mappings and dynamic fields take the rest
    /// literally.
    pub fn storage_path(&self, path: &str) -> Option<String> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let field = self.lookup(first)?;
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Some(field.db_key().to_string());
        }

        let tail = match embedded_schema(field) {
            Some(schema) => schema.storage_path(&rest.join("."))?,
            None if matches!(field.kind(), FieldKind::Map | FieldKind::Dynamic) => rest.join("."),
            None => return None,
        };
        Some(format!("{}.{}", field.db_key(), tail))
    }
}

/// Sub-schema of an embedded field or a list of embedded documents
pub(crate) fn embedded_schema(field: &Field) -> Option<&Arc<Schema>> {
    match field.kind() {
        FieldKind::Embedded(schema) => Some(schema),
        FieldKind::List(inner) => match inner.kind() {
            FieldKind::Embedded(schema) => Some(schema),
            _ => None,
        },
        _ => None,
    }
}

/// `BlogPost` -> `blog_post`, `HTTPRequest` -> `http_request`
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = if i > 0 { chars.get(i - 1) } else { None };
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// Builder
// ============================================================================

/// Declaration of a document type, see [`Schema::builder`]
pub struct SchemaBuilder {
    name: String,
    parent: Option<Arc<Schema>>,
    fields: Vec<(String, Field)>,
    meta: DocumentMeta,
}

impl SchemaBuilder {
    pub fn extends(mut self, parent: &Arc<Schema>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn meta(mut self, meta: DocumentMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn build(self) -> Result<Arc<Schema>> {
        let SchemaBuilder {
            name,
            parent,
            fields: declared,
            mut meta,
        } = self;

        if name.is_empty() {
            return Err(DocMapperError::SchemaDefinition(
                "Document name cannot be empty".to_string(),
            ));
        }

        // Inherited fields and options
        let mut fields: Vec<Field> = Vec::new();
        let mut ancestors = Vec::new();
        if let Some(parent) = &parent {
            if !parent.is_abstract() && !parent.meta.allow_inheritance {
                return Err(DocMapperError::SchemaDefinition(format!(
                    "Document {} may not be subclassed",
                    parent.name()
                )));
            }
            fields.extend(parent.fields.iter().filter(|f| !f.synthesized).cloned());
            ancestors.extend(parent.ancestors.iter().cloned());
            ancestors.push(parent.name().to_string());

            meta.embedded |= parent.meta.embedded;
            if meta.alias.is_none() {
                meta.alias = parent.meta.alias.clone();
            }
            if meta.id_field.is_none() {
                meta.id_field = parent.meta.id_field.clone();
            }
            if meta.ordering.is_empty() {
                meta.ordering = parent.meta.ordering.clone();
            }
            let own = std::mem::take(&mut meta.indexes);
            meta.indexes = parent.meta.indexes.clone();
            for index in own {
                if !meta.indexes.iter().any(|i| i.same_keys(&index)) {
                    meta.indexes.push(index);
                }
            }
        }

        // Declared fields override inherited ones by name
        for (attr, mut field) in declared {
            validate_attribute_name(&attr)?;
            finalize_field(&name, &attr, &mut field)?;
            match fields.iter_mut().find(|f| f.name == attr) {
                Some(existing) => *existing = field,
                None => fields.push(field),
            }
        }

        // Identity
        if let Some(id_attr) = meta.id_field.clone() {
            let field = fields.iter_mut().find(|f| f.name == id_attr).ok_or_else(|| {
                DocMapperError::SchemaDefinition(format!(
                    "id_field '{}' is not a field of {}",
                    id_attr, name
                ))
            })?;
            if field.explicit_storage_key && field.storage_key != ID_KEY {
                return Err(DocMapperError::SchemaDefinition(format!(
                    "id_field '{}' cannot use storage key '{}'",
                    id_attr, field.storage_key
                )));
            }
            field.storage_key = ID_KEY.to_string();
            field.explicit_storage_key = true;
        } else if !meta.embedded && !fields.iter().any(|f| f.storage_key == ID_KEY) {
            if fields.iter().any(|f| f.name == "id") {
                return Err(DocMapperError::SchemaDefinition(format!(
                    "Field 'id' of {} clashes with the implicit identity; store it under '_id' or set id_field",
                    name
                )));
            }
            fields.push(Field::identity());
        }

        fields.sort_by_key(|f| f.creation_order);

        // Storage key collisions
        let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for field in &fields {
            owners.entry(field.storage_key.as_str()).or_default().push(field.name.as_str());
        }
        let duplicates: Vec<&str> = owners
            .iter()
            .filter(|(_, names)| names.len() > 1)
            .map(|(key, _)| *key)
            .collect();
        if !duplicates.is_empty() {
            return Err(DocMapperError::SchemaDefinition(format!(
                "Multiple storage keys defined for: {}",
                duplicates.join(", ")
            )));
        }

        let collection = match &meta.collection {
            Some(c) => c.clone(),
            None => camel_to_snake(&name),
        };
        if !meta.embedded && !meta.is_abstract {
            ValidatedCollectionName::new(&collection)?;
        }

        let by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let by_storage_key: HashMap<String, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.storage_key.clone(), i))
            .collect();
        let id_index = by_storage_key.get(ID_KEY).copied();

        let mut schema = Schema {
            name,
            collection,
            fields,
            by_name,
            by_storage_key,
            id_index,
            meta,
            indexes: Vec::new(),
            ancestors,
        };
        schema.indexes = resolve_indexes(&schema)?;

        debug!(
            document = %schema.name,
            collection = %schema.collection,
            fields = schema.fields.len(),
            "assembled schema"
        );
        Ok(Arc::new(schema))
    }
}

/// Assign the attribute name and storage key, and surface declaration errors
fn finalize_field(document: &str, attr: &str, field: &mut Field) -> Result<()> {
    if let Some(error) = field.declaration_errors.first() {
        return Err(DocMapperError::SchemaDefinition(format!(
            "Invalid declaration of field '{}': {}",
            attr, error
        )));
    }

    field.name = attr.to_string();
    if !field.explicit_storage_key {
        field.storage_key = attr.to_string();
    } else if field.storage_key != ID_KEY {
        validate_attribute_name(&field.storage_key)?;
    }

    match &mut field.kind {
        FieldKind::Reference { document: target, .. } if target == "self" => *target = document.to_string(),
        FieldKind::List(inner) => finalize_field(document, attr, inner)?,
        _ => {}
    }
    Ok(())
}

fn resolve_indexes(schema: &Schema) -> Result<Vec<IndexSpec>> {
    let resolve = |path: &str| {
        schema.storage_path(path).ok_or_else(|| {
            DocMapperError::SchemaDefinition(format!(
                "Index of {} refers to unknown field '{}'",
                schema.name, path
            ))
        })
    };

    let mut indexes = Vec::new();
    for declared in &schema.meta.indexes {
        if declared.keys.is_empty() || declared.keys.iter().any(|(k, _)| k.is_empty()) {
            return Err(DocMapperError::SchemaDefinition(format!(
                "Empty index key declared on {}",
                schema.name
            )));
        }
        let mut index = declared.clone();
        for (path, _) in index.keys.iter_mut() {
            *path = resolve(path)?;
        }
        indexes.push(index);
    }

    for field in &schema.fields {
        if !(field.unique || field.sparse) || field.storage_key == ID_KEY {
            continue;
        }
        let mut keys = vec![(field.storage_key.clone(), IndexDirection::Ascending)];
        for other in &field.unique_with {
            keys.push((resolve(other)?, IndexDirection::Ascending));
        }
        let index = IndexSpec {
            keys,
            unique: field.unique,
            sparse: field.sparse,
            name: None,
            expire_after: None,
        };
        if !indexes.iter().any(|i| i.same_keys(&index)) {
            indexes.push(index);
        }
    }
    Ok(indexes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_to_snake() {
        assert_eq!(camel_to_snake("TestDoc"), "test_doc");
        assert_eq!(camel_to_snake("User"), "user");
        assert_eq!(camel_to_snake("HTTPRequest"), "http_request");
        assert_eq!(camel_to_snake("Order2Item"), "order2_item");
        assert_eq!(camel_to_snake("already_snake"), "already_snake");
    }

    #[test]
    fn test_identity_synthesized() {
        let schema = Schema::builder("User")
            .field("name", Field::text())
            .build()
            .unwrap();
        let id = schema.id_field().unwrap();
        assert_eq!(id.name(), "id");
        assert_eq!(id.db_key(), "_id");
        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["id", "name"]);
    }

    #[test]
    fn test_custom_id_field() {
        let schema = Schema::builder("Account")
            .field("email", Field::text())
            .meta(DocumentMeta::new().id_field("email"))
            .build()
            .unwrap();
        assert_eq!(schema.id_field().unwrap().name(), "email");
        assert_eq!(schema.storage_key("email"), Some("_id"));
        assert!(schema.field("id").is_none());
    }

    #[test]
    fn test_storage_key_collision_names_all_keys() {
        let err = Schema::builder("Clash")
            .field("a", Field::text().storage_key("x"))
            .field("b", Field::text().storage_key("x"))
            .field("c", Field::int().storage_key("y"))
            .field("y", Field::int())
            .build()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Schema definition error: Multiple storage keys defined for: x, y"
        );
    }

    #[test]
    fn test_override_by_name_keeps_one_field() {
        let base = Schema::builder("Base")
            .field("name", Field::text())
            .field("age", Field::int())
            .meta(DocumentMeta::new().as_abstract())
            .build()
            .unwrap();
        let child = Schema::builder("Child")
            .extends(&base)
            .field("name", Field::text().required())
            .build()
            .unwrap();
        assert_eq!(child.fields().len(), 3);
        assert!(child.field("name").unwrap().is_required());
        assert!(child.is_a("Base"));
        assert!(!base.is_a("Child"));
    }

    #[test]
    fn test_fields_ordered_by_declaration() {
        let age = Field::int();
        let name = Field::text();
        let schema = Schema::builder("Ordered")
            .field("name", name)
            .field("age", age)
            .build()
            .unwrap();
        assert_eq!(
            schema.field_names().collect::<Vec<_>>(),
            vec!["id", "age", "name"]
        );
    }

    #[test]
    fn test_final_document_cannot_be_extended() {
        let base = Schema::builder("Sealed")
            .field("name", Field::text())
            .meta(DocumentMeta::new().allow_inheritance(false))
            .build()
            .unwrap();
        let err = Schema::builder("More").extends(&base).build().unwrap_err();
        assert!(err.to_string().contains("may not be subclassed"));
    }

    #[test]
    fn test_implicit_indexes() {
        let schema = Schema::builder("Person")
            .field("email", Field::text().unique())
            .field("nick", Field::text().sparse().storage_key("n"))
            .field("first", Field::text())
            .field("last", Field::text().unique_with(["first"]))
            .meta(DocumentMeta::new().index("-last"))
            .build()
            .unwrap();
        let indexes = schema.indexes();
        assert_eq!(indexes.len(), 4);
        assert_eq!(indexes[0].keys, vec![("last".to_string(), IndexDirection::Descending)]);
        assert!(indexes.iter().any(|i| i.unique && i.keys[0].0 == "email"));
        assert!(indexes.iter().any(|i| i.sparse && !i.unique && i.keys[0].0 == "n"));
        assert!(indexes.iter().any(|i| i.keys.len() == 2 && i.keys[1].0 == "first"));
    }

    #[test]
    fn test_index_on_unknown_field() {
        let err = Schema::builder("Broken")
            .meta(DocumentMeta::new().index("missing"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown field 'missing'"));
    }

    #[test]
    fn test_self_reference() {
        let schema = Schema::builder("Node")
            .field("parent", Field::reference("self"))
            .build()
            .unwrap();
        assert!(matches!(schema.field("parent").unwrap().kind(), FieldKind::Reference { document, .. } if document == "Node"));
    }

    #[test]
    fn test_invalid_declaration_is_schema_error() {
        let err = Schema::builder("Bad")
            .field("name", Field::text().regex("("))
            .build()
            .unwrap_err();
        assert!(matches!(err, DocMapperError::SchemaDefinition(_)));

        let err = Schema::builder("Bad")
            .field("a__b", Field::text())
            .build()
            .unwrap_err();
        assert!(matches!(err, DocMapperError::SchemaDefinition(_)));
    }

    #[test]
    fn test_embedded_schema_has_no_identity() {
        let address = Schema::builder("Address")
            .field("city", Field::text().storage_key("c"))
            .meta(DocumentMeta::new().as_embedded())
            .build()
            .unwrap();
        assert!(address.id_field().is_none());

        let person = Schema::builder("Resident")
            .field("address", Field::embedded(&address).storage_key("addr"))
            .field("extra", Field::dict())
            .build()
            .unwrap();
        assert_eq!(person.storage_path("address.city").as_deref(), Some("addr.c"));
        assert_eq!(person.storage_path("extra.any.depth").as_deref(), Some("extra.any.depth"));
        assert_eq!(person.storage_path("address.zip"), None);
    }

    #[test]
    fn test_collection_override_and_validation() {
        let schema = Schema::builder("Thing")
            .meta(DocumentMeta::new().collection("things"))
            .build()
            .unwrap();
        assert_eq!(schema.collection(), "things");

        let err = Schema::builder("Thing")
            .meta(DocumentMeta::new().collection("system.things"))
            .build()
            .unwrap_err();
        assert!(matches!(err, DocMapperError::SchemaDefinition(_)));
    }
}
