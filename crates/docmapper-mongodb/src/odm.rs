//! Application context
//!
//! An [`Odm`] owns the schema, connection and operator registries. It is
//! cheap to clone and every clone shares the same registries, so tests can
//! build isolated contexts while applications keep one at their root.

use std::sync::Arc;

use docmapper_common::DocMapperError;
use tracing::debug;

use crate::connection::{ConnectionRegistry, DEFAULT_CONNECTION_NAME};
use crate::document::Document;
use crate::fields::FieldKind;
use crate::query::OperatorRegistry;
use crate::queryset::{QuerySet, QuerySettings};
use crate::registry::SchemaRegistry;
use crate::schema::{Schema, SchemaBuilder};
use crate::storage::{CollectionHandle, MemoryConnector};
use crate::value::Value;
use crate::Result;

/// Registries shared by every model, query and document of an application
#[derive(Debug, Clone)]
pub struct Odm {
    schemas: Arc<SchemaRegistry>,
    connections: Arc<ConnectionRegistry>,
    operators: Arc<OperatorRegistry>,
    settings: QuerySettings,
}

impl Default for Odm {
    fn default() -> Self {
        Self::new()
    }
}

impl Odm {
    /// Empty context with the built-in query operators
    pub fn new() -> Self {
        Self {
            schemas: Arc::new(SchemaRegistry::new()),
            connections: Arc::new(ConnectionRegistry::new()),
            operators: Arc::new(OperatorRegistry::builtin()),
            settings: QuerySettings::default(),
        }
    }

    /// Context whose default connection is an in-process store
    pub fn in_memory() -> Self {
        let odm = Self::new();
        odm.connections
            .register(DEFAULT_CONNECTION_NAME, Arc::new(MemoryConnector::default()));
        odm
    }

    /// Replace the operator table, e.g. with builtins plus custom operators
    pub fn with_operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = Arc::new(operators);
        self
    }

    pub fn with_settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    // =====================
    // Models
    // =====================

    /// Assemble a schema and register it
    pub fn register(&self, builder: SchemaBuilder) -> Result<Model> {
        Ok(self.register_schema(builder.build()?))
    }

    pub fn register_schema(&self, schema: Arc<Schema>) -> Model {
        self.schemas.register(Arc::clone(&schema));
        Model {
            schema,
            odm: self.clone(),
        }
    }

    /// Registered model by document name or collection name
    pub fn model(&self, name: &str) -> Result<Model> {
        let schema = self
            .schemas
            .get(name)
            .or_else(|| self.schemas.by_collection(name))
            .ok_or_else(|| {
                DocMapperError::InvalidOperation(format!("Document '{}' is not registered", name))
            })?;
        Ok(Model {
            schema,
            odm: self.clone(),
        })
    }

    /// Every registered document that owns a collection
    pub fn models(&self) -> Vec<Model> {
        self.schemas
            .concrete()
            .into_iter()
            .map(|schema| Model {
                schema,
                odm: self.clone(),
            })
            .collect()
    }

    // =====================
    // Storage
    // =====================

    /// Collection handle of a document type. The alias falls back to the
    /// schema's, then to the default connection.
    pub async fn collection(&self, schema: &Schema, alias: Option<&str>) -> Result<Arc<dyn CollectionHandle>> {
        if schema.is_abstract() || schema.is_embedded() {
            return Err(DocMapperError::InvalidOperation(format!(
                "{} has no collection",
                schema.name()
            )));
        }
        let alias = alias
            .or(schema.meta().alias.as_deref())
            .unwrap_or(DEFAULT_CONNECTION_NAME);
        self.connections.get_collection(alias, schema.collection()).await
    }

    /// Load the document a reference attribute points to, applying the
    /// sub-field selection recorded by the query that loaded `document`
    pub async fn dereference(&self, document: &Document, name: &str) -> Result<Option<Document>> {
        let schema = document.schema();
        let target = match schema.field(name).map(|f| f.kind()) {
            Some(FieldKind::Reference { document, .. }) => document.clone(),
            _ => {
                return Err(DocMapperError::InvalidOperation(format!(
                    "'{}' is not a reference field of {}",
                    name,
                    schema.name()
                )))
            }
        };

        let id = match document.get(name)? {
            Value::Null => return Ok(None),
            Value::Document(loaded) => return Ok(Some(*loaded)),
            id => id,
        };
        let target = self.model(&target)?;
        let mut objects = target.objects();
        if let Some(fields) = document.reference_projection(name) {
            objects = objects.only(fields.iter().cloned());
        }
        debug!(document = schema.name(), field = name, target = target.name(), "dereference");
        objects.with_id(id).await
    }
}

/// A registered document type bound to its context
#[derive(Debug, Clone)]
pub struct Model {
    schema: Arc<Schema>,
    odm: Odm,
}

impl Model {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Query over every document of this type
    pub fn objects(&self) -> QuerySet {
        QuerySet::new(Arc::clone(&self.schema), self.odm.clone())
    }

    /// Blank document
    pub fn document(&self) -> Document {
        Document::new(&self.schema)
    }

    pub fn document_from<I, K, V>(&self, pairs: I) -> Result<Document>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Document::from_pairs(&self.schema, pairs)
    }

    /// Document from a storage-native record
    pub fn from_storage(&self, son: bson::Document) -> Document {
        Document::from_storage(&self.schema, son)
    }

    pub async fn create<I, K, V>(&self, pairs: I) -> Result<Document>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.objects().create(pairs).await
    }

    /// Create the declared indexes; returns their names
    pub async fn ensure_index(&self, alias: Option<&str>) -> Result<Vec<String>> {
        let collection = self.odm.collection(&self.schema, alias).await?;
        let names = collection.create_indexes(self.schema.indexes().to_vec()).await?;
        debug!(collection = collection.name(), indexes = ?names, "ensured indexes");
        Ok(names)
    }

    pub async fn drop_collection(&self, alias: Option<&str>) -> Result<()> {
        let collection = self.odm.collection(&self.schema, alias).await?;
        debug!(collection = collection.name(), "drop collection");
        collection.drop_collection().await
    }
}
