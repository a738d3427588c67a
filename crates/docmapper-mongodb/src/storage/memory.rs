//! In-process backend
//!
//! Keeps collections in memory and evaluates filters, updates and
//! pipelines with [`super::matcher`]. Unique indexes are enforced and
//! violations are reported with the server's duplicate key message, so
//! error classification behaves the same as against a live server.

use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document as BsonDocument};
use dashmap::DashMap;
use docmapper_common::DocMapperError;
use parking_lot::RwLock;
use tracing::debug;

use super::matcher::{self, get_path, lookup, values_equal};
use super::{CollectionHandle, Connector, FindSpec, UpdateOutcome};
use crate::index::IndexSpec;
use crate::Result;

/// An in-memory database
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    database: String,
    collections: Arc<DashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryConnector {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Arc::new(DashMap::new()),
        }
    }

    /// Collection names, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn open(&self, name: &str) -> Arc<MemoryCollection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCollection::new(&self.database, name)))
            .clone()
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn database_name(&self) -> &str {
        &self.database
    }

    async fn collection(&self, name: &str) -> Result<Arc<dyn CollectionHandle>> {
        let handle: Arc<dyn CollectionHandle> = self.open(name);
        Ok(handle)
    }
}

#[derive(Debug, Default)]
struct State {
    documents: Vec<BsonDocument>,
    indexes: Vec<IndexSpec>,
}

impl State {
    fn position(&self, filter: &BsonDocument) -> Result<Option<usize>> {
        for (i, doc) in self.documents.iter().enumerate() {
            if matcher::matches(doc, filter)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn positions(&self, filter: &BsonDocument) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if matcher::matches(doc, filter)? {
                out.push(i);
            }
        }
        Ok(out)
    }
}

/// One in-memory collection
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    namespace: String,
    state: RwLock<State>,
}

impl MemoryCollection {
    fn new(database: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{}.{}", database, name),
            state: RwLock::new(State::default()),
        }
    }

    /// Key tuple of `doc` under `index`; `None` when a sparse index skips it
    fn index_key(index: &IndexSpec, doc: &BsonDocument) -> Option<Vec<Bson>> {
        let values: Vec<Option<&Bson>> = index.keys.iter().map(|(path, _)| get_path(doc, path)).collect();
        if index.sparse && values.iter().all(Option::is_none) {
            return None;
        }
        Some(values.into_iter().map(|v| v.cloned().unwrap_or(Bson::Null)).collect())
    }

    fn duplicate_error(&self, index_name: &str, keys: &[(String, Bson)]) -> DocMapperError {
        let rendered: Vec<String> = keys.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        DocMapperError::MongoDB(format!(
            "E11000 duplicate key error collection: {} index: {} dup key: {{ {} }}",
            self.namespace,
            index_name,
            rendered.join(", ")
        ))
    }

    /// Check `candidate` against every other stored document
    fn check_unique(&self, state: &State, candidate: &BsonDocument, skip: Option<usize>) -> Result<()> {
        let others = || {
            state
                .documents
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != skip)
                .map(|(_, d)| d)
        };

        if let Some(id) = candidate.get("_id") {
            if others().any(|d| d.get("_id").map_or(false, |other| values_equal(other, id))) {
                return Err(self.duplicate_error("_id_", &[("_id".to_string(), id.clone())]));
            }
        }

        for index in state.indexes.iter().filter(|i| i.unique) {
            let Some(key) = Self::index_key(index, candidate) else { continue };
            let clash = others().any(|d| {
                Self::index_key(index, d).map_or(false, |other| {
                    other.len() == key.len() && other.iter().zip(&key).all(|(a, b)| values_equal(a, b))
                })
            });
            if clash {
                let pairs: Vec<(String, Bson)> = index
                    .keys
                    .iter()
                    .map(|(path, _)| path.clone())
                    .zip(key)
                    .collect();
                return Err(self.duplicate_error(&index.resolved_name(), &pairs));
            }
        }
        Ok(())
    }

    /// Put `_id` first, generating one when missing
    fn with_identity(document: BsonDocument) -> BsonDocument {
        let id = document.get("_id").cloned().unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
        let mut out = BsonDocument::new();
        out.insert("_id", id);
        for (k, v) in document {
            if k != "_id" {
                out.insert(k, v);
            }
        }
        out
    }

    fn insert_locked(&self, state: &mut State, document: BsonDocument) -> Result<Bson> {
        let document = Self::with_identity(document);
        self.check_unique(state, &document, None)?;
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);
        state.documents.push(document);
        Ok(id)
    }

    /// Apply `update` to the stored document at `index`
    fn update_at(&self, state: &mut State, index: usize, update: &BsonDocument) -> Result<bool> {
        let original = &state.documents[index];
        let mut updated = original.clone();
        matcher::apply_update(&mut updated, update, false)?;
        if let (Some(before), Some(after)) = (original.get("_id"), updated.get("_id")) {
            if !values_equal(before, after) {
                return Err(DocMapperError::MongoDB(
                    "Performing an update on the path '_id' would modify the immutable field '_id'"
                        .to_string(),
                ));
            }
        }
        self.check_unique(state, &updated, Some(index))?;
        let changed = updated != state.documents[index];
        state.documents[index] = updated;
        Ok(changed)
    }

    fn upsert_locked(&self, state: &mut State, filter: &BsonDocument, update: &BsonDocument) -> Result<BsonDocument> {
        let mut seed = matcher::upsert_seed(filter);
        matcher::apply_update(&mut seed, update, true)?;
        let document = Self::with_identity(seed);
        self.check_unique(state, &document, None)?;
        state.documents.push(document.clone());
        Ok(document)
    }
}

#[async_trait]
impl CollectionHandle for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: BsonDocument, spec: FindSpec) -> Result<Vec<BsonDocument>> {
        let state = self.state.read();
        let mut found: Vec<BsonDocument> = Vec::new();
        for doc in &state.documents {
            if matcher::matches(doc, &filter)? {
                found.push(doc.clone());
            }
        }
        drop(state);

        if let Some(sort) = &spec.sort {
            found.sort_by(|a, b| matcher::compare_documents(a, b, sort));
        }
        let skip = spec.skip.unwrap_or(0) as usize;
        let limit = match spec.limit {
            Some(0) | None => usize::MAX,
            Some(n) => n.unsigned_abs() as usize,
        };
        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match &spec.projection {
                Some(projection) => matcher::project(&doc, projection),
                None => doc,
            })
            .collect())
    }

    async fn count_documents(&self, filter: BsonDocument, limit: Option<u64>) -> Result<u64> {
        let state = self.state.read();
        let mut count = 0u64;
        for doc in &state.documents {
            if limit.map_or(false, |l| l > 0 && count >= l) {
                break;
            }
            if matcher::matches(doc, &filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_one(&self, document: BsonDocument) -> Result<Bson> {
        let mut state = self.state.write();
        self.insert_locked(&mut state, document)
    }

    async fn insert_many(&self, documents: Vec<BsonDocument>) -> Result<Vec<Bson>> {
        let mut state = self.state.write();
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(self.insert_locked(&mut state, document)?);
        }
        debug!(collection = %self.name, inserted = ids.len(), "insert_many");
        Ok(ids)
    }

    async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<Option<BsonDocument>> {
        let mut state = self.state.write();
        match state.position(&filter)? {
            Some(index) => {
                self.update_at(&mut state, index, &update)?;
                Ok(Some(state.documents[index].clone()))
            }
            None if upsert => Ok(Some(self.upsert_locked(&mut state, &filter, &update)?)),
            None => Ok(None),
        }
    }

    async fn update_many(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        let mut state = self.state.write();
        let positions = state.positions(&filter)?;
        let mut outcome = UpdateOutcome {
            matched: positions.len() as u64,
            ..UpdateOutcome::default()
        };
        for index in positions {
            if self.update_at(&mut state, index, &update)? {
                outcome.modified += 1;
            }
        }
        if outcome.matched == 0 && upsert {
            let document = self.upsert_locked(&mut state, &filter, &update)?;
            outcome.upserted_id = document.get("_id").cloned();
        }
        Ok(outcome)
    }

    async fn delete_one(&self, filter: BsonDocument) -> Result<u64> {
        let mut state = self.state.write();
        match state.position(&filter)? {
            Some(index) => {
                state.documents.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, filter: BsonDocument) -> Result<u64> {
        let mut state = self.state.write();
        let positions = state.positions(&filter)?;
        for index in positions.iter().rev() {
            state.documents.remove(*index);
        }
        Ok(positions.len() as u64)
    }

    async fn distinct(&self, key: &str, filter: BsonDocument) -> Result<Vec<Bson>> {
        let state = self.state.read();
        let mut values: Vec<Bson> = Vec::new();
        for doc in &state.documents {
            if !matcher::matches(doc, &filter)? {
                continue;
            }
            for value in lookup(doc, key) {
                let items = match value {
                    Bson::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                for item in items {
                    if !values.iter().any(|v| values_equal(v, &item)) {
                        values.push(item);
                    }
                }
            }
        }
        Ok(values)
    }

    async fn aggregate(&self, pipeline: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
        let snapshot = self.state.read().documents.clone();
        matcher::run_pipeline(snapshot, &pipeline)
    }

    async fn create_indexes(&self, indexes: Vec<IndexSpec>) -> Result<Vec<String>> {
        let mut state = self.state.write();
        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            let name = index.resolved_name();
            if index.unique {
                let mut seen: Vec<Vec<Bson>> = Vec::new();
                for doc in &state.documents {
                    let Some(key) = Self::index_key(&index, doc) else { continue };
                    if seen.iter().any(|k| k.iter().zip(&key).all(|(a, b)| values_equal(a, b))) {
                        let pairs: Vec<(String, Bson)> =
                            index.keys.iter().map(|(p, _)| p.clone()).zip(key).collect();
                        return Err(self.duplicate_error(&name, &pairs));
                    }
                    seen.push(key);
                }
            }
            if !state.indexes.iter().any(|existing| existing.resolved_name() == name) {
                state.indexes.push(index);
            }
            names.push(name);
        }
        Ok(names)
    }

    async fn drop_collection(&self) -> Result<()> {
        let mut state = self.state.write();
        state.documents.clear();
        state.indexes.clear();
        Ok(())
    }
}
