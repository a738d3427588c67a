//! Document instances
//!
//! A [`Document`] is one record of a schema: a map from attribute name to
//! logical value plus two load flags. Every write to a declared attribute goes
//! through the field's conversion; undeclared attributes are kept as dynamic
//! values and stored under their own name.
//!
//! Persistence methods take the [`Odm`] context that owns the connections:
//!
//! ```ignore
//! let mut user = users.document();
//! user.set("name", "Lisa")?;
//! user.save(&odm, SaveOptions::default()).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use docmapper_common::DocMapperError;
use docmapper_validation::ValidationErrors;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::fields::FieldKind;
use crate::odm::Odm;
use crate::query::Update;
use crate::schema::{Schema, ID_KEY};
use crate::storage::FindSpec;
use crate::value::Value;
use crate::Result;

/// Options of [`Document::save`]
#[derive(Debug, Clone)]
pub struct SaveOptions {
    pub validate: bool,
    /// Connection alias; falls back to the schema's, then the default one
    pub alias: Option<String>,
    /// Insert when no stored record carries the identity
    pub upsert: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            validate: true,
            alias: None,
            upsert: false,
        }
    }
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }
}

/// One record of a schema
#[derive(Clone)]
pub struct Document {
    schema: Arc<Schema>,
    values: HashMap<String, Value>,
    /// Undeclared attributes, in assignment order
    dynamic: Vec<(String, Value)>,
    partly_loaded: bool,
    persisted: bool,
    /// Reference attribute -> sub-fields to load when dereferencing
    reference_projections: HashMap<String, Vec<String>>,
}

impl Document {
    /// Blank instance with defaults materialized
    pub fn new(schema: &Arc<Schema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| (f.name().to_string(), f.default_value()))
            .collect();
        Self {
            schema: Arc::clone(schema),
            values,
            dynamic: Vec::new(),
            partly_loaded: false,
            persisted: false,
            reference_projections: HashMap::new(),
        }
    }

    /// Instance with the given attributes assigned in order
    pub fn from_pairs(schema: &Arc<Schema>, pairs: Vec<(String, Value)>) -> Result<Self> {
        let mut document = Self::new(schema);
        for (name, value) in pairs {
            document.set(&name, value)?;
        }
        Ok(document)
    }

    /// Instance from a mapping value (`Value::Object`)
    pub fn from_dict(schema: &Arc<Schema>, mapping: Value) -> Result<Self> {
        match mapping {
            Value::Object(pairs) => Self::from_pairs(schema, pairs),
            other => Err(DocMapperError::InvalidOperation(format!(
                "{} can only be built from a mapping, got {}",
                schema.name(),
                other.type_name()
            ))),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // =====================
    // Attribute access
    // =====================

    /// Logical value of an attribute
    pub fn get(&self, name: &str) -> Result<Value> {
        if let Some(field) = self.schema.field(name) {
            return Ok(field.get_value(self.values.get(name)));
        }
        self.dynamic
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                DocMapperError::InvalidOperation(format!(
                    "Field {} not found in instance of {}.",
                    name,
                    self.schema.name()
                ))
            })
    }

    /// Assign an attribute. Declared attributes are converted by their field;
    /// anything else becomes a dynamic attribute.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let Some(field) = self.schema.field(name) else {
            match self.dynamic.iter_mut().find(|(k, _)| k == name) {
                Some((_, slot)) => *slot = value,
                None => self.dynamic.push((name.to_string(), value)),
            }
            return Ok(());
        };

        let value = field.coerce(value);
        if field.db_key() == ID_KEY && self.persisted {
            if let Some(current) = self.id() {
                if current != value {
                    return Err(DocMapperError::InvalidOperation(format!(
                        "The identity of a saved {} cannot be changed",
                        self.schema.name()
                    )));
                }
            }
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Identity value; `None` until the document has one
    pub fn id(&self) -> Option<Value> {
        let field = self.schema.id_field()?;
        match field.get_value(self.values.get(field.name())) {
            Value::Null => None,
            id => Some(id),
        }
    }

    /// Names of the undeclared attributes
    pub fn dynamic_names(&self) -> impl Iterator<Item = &str> {
        self.dynamic.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_partly_loaded(&self) -> bool {
        self.partly_loaded
    }

    /// True once saved, or when loaded from storage
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Sub-fields recorded for a reference attribute by a projecting query
    pub fn reference_projection(&self, name: &str) -> Option<&[String]> {
        self.reference_projections.get(name).map(Vec::as_slice)
    }

    pub(crate) fn set_partly_loaded(&mut self, partly_loaded: bool) {
        self.partly_loaded = partly_loaded;
    }

    pub(crate) fn set_reference_projections(&mut self, hints: HashMap<String, Vec<String>>) {
        self.reference_projections = hints;
    }

    // =====================
    // Validation
    // =====================

    /// Errors of every declared attribute, keyed by attribute name
    pub fn validation_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for field in self.schema.fields() {
            let value = field.get_value(self.values.get(field.name()));
            if let Err(error) = field.validate(&value) {
                errors.add(field.name(), error);
            }
        }
        errors
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DocMapperError::Validation(errors))
        }
    }

    // =====================
    // Conversion
    // =====================

    /// Storage-native record. Sparse attributes without a value and an
    /// unset identity are left out.
    pub fn to_storage(&self) -> Result<BsonDocument> {
        let mut son = BsonDocument::new();
        for field in self.schema.fields() {
            let value = field.get_value(self.values.get(field.name()));
            if value.is_null() && (field.is_sparse() || field.db_key() == ID_KEY) {
                continue;
            }
            son.insert(field.db_key(), field.to_storage(&value)?);
        }
        for (name, value) in &self.dynamic {
            son.insert(name.clone(), value.to_bson());
        }
        Ok(son)
    }

    /// Instance from a storage-native record. Unknown keys become dynamic
    /// attributes; attributes missing from the record take their default.
    pub fn from_storage(schema: &Arc<Schema>, son: BsonDocument) -> Self {
        let mut document = Self::new(schema);
        for (key, raw) in son {
            match schema.field_by_storage_key(&key) {
                Some(field) => {
                    document.values.insert(field.name().to_string(), field.from_storage(raw));
                }
                None => document.dynamic.push((key, Value::from_bson(raw))),
            }
        }
        document.persisted = !schema.is_embedded() && document.id().is_some();
        document
    }

    /// Attribute name -> logical value, declared attributes first
    pub fn to_dict(&self) -> Value {
        let mut pairs: Vec<(String, Value)> = self
            .schema
            .fields()
            .iter()
            .map(|f| (f.name().to_string(), f.get_value(self.values.get(f.name()))))
            .collect();
        pairs.extend(self.dynamic.iter().cloned());
        Value::Object(pairs)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_dict().to_json()
    }

    // =====================
    // Persistence
    // =====================

    fn ensure_collection_backed(&self, action: &str) -> Result<()> {
        if self.schema.is_abstract() || self.schema.is_embedded() {
            return Err(DocMapperError::InvalidOperation(format!(
                "Cannot {} {}: it has no collection",
                action,
                self.schema.name()
            )));
        }
        Ok(())
    }

    fn identity_filter(&self, action: &str) -> Result<BsonDocument> {
        let id = self.id().ok_or_else(|| {
            DocMapperError::InvalidOperation(format!(
                "Cannot {} a {} that has not been saved",
                action,
                self.schema.name()
            ))
        })?;
        let stored = match self.schema.id_field() {
            Some(field) => field.to_storage(&id)?,
            None => id.to_bson(),
        };
        Ok(doc! { ID_KEY: stored })
    }

    /// Apply on-save hooks and automatic timestamps
    pub(crate) fn apply_save_hooks(&mut self, creating: bool) {
        let schema = Arc::clone(&self.schema);
        for field in schema.fields() {
            if let Some(hook) = field.on_save_hook() {
                let value = hook(self, creating);
                self.values.insert(field.name().to_string(), field.coerce(value));
                continue;
            }
            if let FieldKind::DateTime(options) = field.kind() {
                let empty = field.get_value(self.values.get(field.name())).is_null();
                if options.auto_now_on_update || (options.auto_now_on_insert && creating && empty) {
                    self.values.insert(field.name().to_string(), options.now());
                }
            }
        }
    }

    fn replace_with(&mut self, son: BsonDocument) {
        let loaded = Self::from_storage(&self.schema, son);
        self.values = loaded.values;
        self.dynamic = loaded.dynamic;
        self.partly_loaded = false;
        self.reference_projections.clear();
        self.persisted = true;
    }

    /// Insert the document, or update the stored record with its identity.
    ///
    /// A document without identity is inserted and receives the identity the
    /// storage assigned. A document with one is written with a single
    /// find-and-update keyed by it, upserting when it was never saved.
    pub async fn save(&mut self, odm: &Odm, options: SaveOptions) -> Result<()> {
        if self.partly_loaded {
            return Err(DocMapperError::PartlyLoaded(self.schema.name().to_string()));
        }
        self.ensure_collection_backed("save")?;

        let creating = !self.persisted;
        self.apply_save_hooks(creating);
        if options.validate {
            self.validate()?;
        }

        let mut son = self.to_storage()?;
        let id = son.remove(ID_KEY);
        let collection = odm.collection(&self.schema, options.alias.as_deref()).await?;
        let name = self.schema.name().to_string();

        match id {
            Some(id) => {
                let filter = doc! { ID_KEY: id.clone() };
                let update = if son.is_empty() {
                    doc! { "$set": { ID_KEY: id } }
                } else {
                    doc! { "$set": son }
                };
                debug!(collection = collection.name(), creating, "save by identity");
                let stored = collection
                    .find_one_and_update(filter, update, options.upsert || creating)
                    .await
                    .map_err(|e| e.classify_write_error(&name))?;
                if stored.is_none() {
                    warn!(collection = collection.name(), "saved document no longer exists");
                    return Err(DocMapperError::DoesNotExist(name));
                }
            }
            None => {
                debug!(collection = collection.name(), "insert");
                let inserted = collection
                    .insert_one(son)
                    .await
                    .map_err(|e| e.classify_write_error(&name))?;
                self.mark_inserted(inserted);
            }
        }

        self.persisted = true;
        Ok(())
    }

    /// Record the identity assigned by an insert
    pub(crate) fn mark_inserted(&mut self, id: Bson) {
        if let Some(field) = self.schema.id_field() {
            let id = field.from_storage(id);
            self.values.insert(field.name().to_string(), id);
        }
        self.persisted = true;
    }

    /// Apply an atomic update to the stored record and refresh this instance
    /// from the result. Returns false when nothing matched.
    pub async fn update(&mut self, odm: &Odm, update: Update, alias: Option<&str>) -> Result<bool> {
        self.ensure_collection_backed("update")?;
        let filter = self.identity_filter("update")?;
        let update = update.to_document(&self.schema)?;
        let collection = odm.collection(&self.schema, alias).await?;
        let stored = collection
            .find_one_and_update(filter, update, false)
            .await
            .map_err(|e| e.classify_write_error(self.schema.name()))?;
        match stored {
            Some(son) => {
                self.replace_with(son);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete the stored record; returns the number of records removed
    pub async fn delete(&self, odm: &Odm, alias: Option<&str>) -> Result<u64> {
        self.ensure_collection_backed("delete")?;
        let filter = self.identity_filter("delete")?;
        let collection = odm.collection(&self.schema, alias).await?;
        debug!(collection = collection.name(), filter = %filter, "delete");
        collection.delete_one(filter).await
    }

    /// Reload every attribute from storage. Clears the partly-loaded flag.
    pub async fn reload(&mut self, odm: &Odm, alias: Option<&str>) -> Result<()> {
        self.ensure_collection_backed("reload")?;
        let filter = self.identity_filter("reload")?;
        let collection = odm.collection(&self.schema, alias).await?;
        let mut found = collection
            .find(filter, FindSpec::new().limit(Some(1)))
            .await?;
        if found.is_empty() {
            return Err(DocMapperError::DoesNotExist(self.schema.name().to_string()));
        }
        self.replace_with(found.swap_remove(0));
        Ok(())
    }
}

impl PartialEq for Document {
    /// Saved documents compare by identity, others by value
    fn eq(&self, other: &Self) -> bool {
        if self.schema.name() != other.schema.name() {
            return false;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => self.to_dict() == other.to_dict(),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_dict().serialize(serializer)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct(self.schema.name());
        for field in self.schema.fields() {
            out.field(field.name(), &field.get_value(self.values.get(field.name())));
        }
        for (name, value) in &self.dynamic {
            out.field(name, value);
        }
        out.finish()
    }
}
