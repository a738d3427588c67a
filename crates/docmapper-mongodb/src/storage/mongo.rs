//! MongoDB driver backend

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::options::{
    CountOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument, UpdateOptions,
};
use mongodb::{Collection, IndexModel};
use tracing::debug;

use super::{CollectionHandle, FindSpec, UpdateOutcome};
use crate::index::IndexSpec;
use crate::Result;

/// A driver collection of raw documents
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: Collection<BsonDocument>,
}

impl MongoCollection {
    pub fn new(inner: Collection<BsonDocument>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Collection<BsonDocument> {
        &self.inner
    }
}

fn index_model(spec: &IndexSpec) -> IndexModel {
    let mut options = IndexOptions::default();
    options.name = Some(spec.resolved_name());
    if spec.unique {
        options.unique = Some(true);
    }
    if spec.sparse {
        options.sparse = Some(true);
    }
    options.expire_after = spec.expire_after;

    IndexModel::builder()
        .keys(spec.keys_document())
        .options(Some(options))
        .build()
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find(&self, filter: BsonDocument, spec: FindSpec) -> Result<Vec<BsonDocument>> {
        debug!(collection = self.name(), filter = %filter, "find");
        let mut options = FindOptions::default();
        options.projection = spec.projection;
        options.sort = spec.sort;
        options.skip = spec.skip;
        options.limit = spec.limit;

        let cursor = self.inner.find(filter).with_options(options).await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn count_documents(&self, filter: BsonDocument, limit: Option<u64>) -> Result<u64> {
        let mut options = CountOptions::default();
        options.limit = limit;
        Ok(self.inner.count_documents(filter).with_options(options).await?)
    }

    async fn insert_one(&self, document: BsonDocument) -> Result<Bson> {
        let result = self.inner.insert_one(document).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(&self, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        let result = self.inner.insert_many(documents).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<Option<BsonDocument>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.upsert = Some(upsert);
        options.return_document = Some(ReturnDocument::After);
        Ok(self
            .inner
            .find_one_and_update(filter, update)
            .with_options(options)
            .await?)
    }

    async fn update_many(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let mut options = UpdateOptions::default();
        options.upsert = Some(upsert);
        let result = self
            .inner
            .update_many(filter, update)
            .with_options(options)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, filter: BsonDocument) -> Result<u64> {
        Ok(self.inner.delete_one(filter).await?.deleted_count)
    }

    async fn delete_many(&self, filter: BsonDocument) -> Result<u64> {
        Ok(self.inner.delete_many(filter).await?.deleted_count)
    }

    async fn distinct(&self, key: &str, filter: BsonDocument) -> Result<Vec<Bson>> {
        Ok(self.inner.distinct(key, filter).await?)
    }

    async fn aggregate(&self, pipeline: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
        debug!(collection = self.name(), stages = pipeline.len(), "aggregate");
        let cursor = self.inner.aggregate(pipeline).await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn create_indexes(&self, indexes: Vec<IndexSpec>) -> Result<Vec<String>> {
        if indexes.is_empty() {
            return Ok(Vec::new());
        }
        let models: Vec<IndexModel> = indexes.iter().map(index_model).collect();
        let result = self.inner.create_indexes(models).await?;
        Ok(result.index_names)
    }

    async fn drop_collection(&self) -> Result<()> {
        self.inner.drop().await?;
        Ok(())
    }
}
