//! Registry of assembled schemas, keyed by document name

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::schema::Schema;

/// Name -> schema table owned by an [`crate::Odm`] context
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Registering a name again replaces the entry and
    /// returns the previous schema, which stays valid for its holders.
    pub fn register(&self, schema: Arc<Schema>) -> Option<Arc<Schema>> {
        let name = schema.name().to_string();
        let previous = self.schemas.write().insert(name.clone(), schema);
        match &previous {
            Some(_) => warn!(document = %name, "schema registration replaced an existing entry"),
            None => info!(document = %name, "registered schema"),
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(name).cloned()
    }

    /// Concrete document stored in `collection`
    pub fn by_collection(&self, collection: &str) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .values()
            .find(|s| !s.is_abstract() && !s.is_embedded() && s.collection() == collection)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Documents that own a collection (neither abstract nor embedded), sorted by name
    pub fn concrete(&self) -> Vec<Arc<Schema>> {
        let mut schemas: Vec<Arc<Schema>> = self
            .schemas
            .read()
            .values()
            .filter(|s| !s.is_abstract() && !s.is_embedded())
            .cloned()
            .collect();
        schemas.sort_by(|a, b| a.name().cmp(b.name()));
        schemas
    }

    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}
