//! Storage seam
//!
//! Everything above this module talks to collections through
//! [`CollectionHandle`]; [`mongo`] implements it over the MongoDB driver and
//! [`memory`] over an in-process store used by tests and embedding
//! applications.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};

use crate::index::IndexSpec;
use crate::Result;

pub mod matcher;
pub mod memory;
pub mod mongo;

pub use memory::MemoryConnector;
pub use mongo::MongoCollection;

/// Options of a find call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub projection: Option<BsonDocument>,
    pub sort: Option<BsonDocument>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

impl FindSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Option<BsonDocument>) -> Self {
        self.projection = projection;
        self
    }

    pub fn sort(mut self, sort: BsonDocument) -> Self {
        if !sort.is_empty() {
            self.sort = Some(sort);
        }
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        if skip > 0 {
            self.skip = Some(skip);
        }
        self
    }

    pub fn limit(mut self, limit: Option<i64>) -> Self {
        self.limit = limit;
        self
    }
}

/// Result of a multi-document update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

/// Operations on one collection
#[async_trait]
pub trait CollectionHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn find(&self, filter: BsonDocument, spec: FindSpec) -> Result<Vec<BsonDocument>>;

    async fn count_documents(&self, filter: BsonDocument, limit: Option<u64>) -> Result<u64>;

    /// Insert one document; returns its identity
    async fn insert_one(&self, document: BsonDocument) -> Result<Bson>;

    /// Insert in order; returns the identities
    async fn insert_many(&self, documents: Vec<BsonDocument>) -> Result<Vec<Bson>>;

    /// Apply `update` to the first match and return the updated document
    async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<Option<BsonDocument>>;

    async fn update_many(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<UpdateOutcome>;

    async fn delete_one(&self, filter: BsonDocument) -> Result<u64>;

    async fn delete_many(&self, filter: BsonDocument) -> Result<u64>;

    async fn distinct(&self, key: &str, filter: BsonDocument) -> Result<Vec<Bson>>;

    async fn aggregate(&self, pipeline: Vec<BsonDocument>) -> Result<Vec<BsonDocument>>;

    /// Create indexes; returns their names
    async fn create_indexes(&self, indexes: Vec<IndexSpec>) -> Result<Vec<String>>;

    async fn drop_collection(&self) -> Result<()>;
}

/// A database reachable under a connection alias
#[async_trait]
pub trait Connector: Send + Sync {
    fn database_name(&self) -> &str;

    async fn collection(&self, name: &str) -> Result<Arc<dyn CollectionHandle>>;
}
