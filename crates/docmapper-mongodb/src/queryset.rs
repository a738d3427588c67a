//! Lazy, chainable queries over one document type
//!
//! Builder methods take `&self` and return a new [`QuerySet`], so a base
//! query can be shared and refined independently. Nothing touches storage
//! until a terminal method (`first`, `all`, `count`, `update`, ...) is
//! awaited; filter keys are resolved and checked when they are added.
//!
//! ```ignore
//! let adults = users.objects().filter(q!(age__gte = 18))?;
//! let page = adults.order_by(["-age"]).pagination(10, 0).await?;
//! let named = adults.filter(q!(name__istartswith = "l"))?.count().await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bson::{doc, Bson, Document as BsonDocument};
use docmapper_common::DocMapperError;
use tracing::debug;

use crate::document::{Document, SaveOptions};
use crate::fields::FieldKind;
use crate::odm::Odm;
use crate::query::{resolve_key, resolve_path, FieldSpec, LoweredProjection, Projection, Update, Q};
use crate::schema::{Schema, ID_KEY};
use crate::storage::{CollectionHandle, FindSpec, UpdateOutcome};
use crate::validation::validate_query;
use crate::value::Value;
use crate::Result;

/// Result cap of `all()` when no limit was set
pub const DEFAULT_LIMIT: i64 = 1000;

/// Query defaults carried by an [`Odm`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    pub default_limit: i64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
        }
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    /// Matches across all pages
    pub count: u64,
    pub objects: Vec<Document>,
    pub limit: i64,
    pub offset: u64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// A lazily evaluated query
#[derive(Clone)]
pub struct QuerySet {
    schema: Arc<Schema>,
    odm: Odm,
    filter: Q,
    projection: Projection,
    order: Vec<(String, i32)>,
    skip: u64,
    limit: Option<i64>,
    alias: Option<String>,
}

impl fmt::Debug for QuerySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("document", &self.schema.name())
            .field("filter", &self.filter)
            .field("projection", &self.projection)
            .field("order", &self.order)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("alias", &self.alias)
            .finish()
    }
}

fn parse_order_key(key: &str) -> (String, i32) {
    match key.strip_prefix('-') {
        Some(name) => (name.to_string(), -1),
        None => (key.trim_start_matches('+').to_string(), 1),
    }
}

fn leaf_keys(pairs: &[(String, Value)]) -> impl Iterator<Item = &str> {
    pairs.iter().map(|(k, _)| k.as_str())
}

fn as_number(value: Option<&Bson>) -> Option<f64> {
    match value? {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

impl QuerySet {
    pub(crate) fn new(schema: Arc<Schema>, odm: Odm) -> Self {
        Self {
            schema,
            odm,
            filter: Q::new(),
            projection: Projection::new(),
            order: Vec::new(),
            skip: 0,
            limit: None,
            alias: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Accumulated filter tree
    pub fn filter_tree(&self) -> &Q {
        &self.filter
    }

    // ========================================================================
    // Builders
    // ========================================================================

    /// AND a filter into the query. Keys are resolved against the schema
    /// now, so a bad key fails here rather than at execution.
    pub fn filter(&self, q: impl Into<Q>) -> Result<QuerySet> {
        let q = q.into();
        q.validate(&self.schema, self.odm.operators())?;

        let mut next = self.clone();
        next.filter = match (std::mem::take(&mut next.filter), q) {
            // Leaves with distinct keys lower to the same shape as one call
            (Q::Leaf(mut current), Q::Leaf(added))
                if !leaf_keys(&added).any(|k| leaf_keys(&current).any(|c| c == k)) =>
            {
                current.extend(added);
                Q::Leaf(current)
            }
            (current, added) => current.and(added),
        };
        Ok(next)
    }

    /// AND the negation of a filter into the query
    pub fn filter_not(&self, q: impl Into<Q>) -> Result<QuerySet> {
        self.filter(q.into().negate())
    }

    /// AND a storage-native filter, after checking it for server-side
    /// JavaScript operators
    pub fn filter_raw(&self, filter: BsonDocument) -> Result<QuerySet> {
        self.filter(Q::raw(filter))
    }

    /// Load only these attributes (dotted paths allowed)
    pub fn only<I, S>(&self, fields: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.projection.only(fields);
        next
    }

    /// Load every attribute except these
    pub fn exclude<I, S>(&self, fields: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.projection.exclude(fields);
        next
    }

    pub fn fields<I, S>(&self, specs: I) -> QuerySet
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.projection.fields(specs);
        next
    }

    /// Drop any `only` / `exclude` / `fields` selection
    pub fn all_fields(&self) -> QuerySet {
        let mut next = self.clone();
        next.projection.reset();
        next
    }

    /// Append sort keys; `-name` sorts descending
    pub fn order_by<I, S>(&self, keys: I) -> QuerySet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = self.clone();
        next.order.extend(keys.into_iter().map(|k| parse_order_key(k.as_ref())));
        next
    }

    pub fn limit(&self, limit: i64) -> QuerySet {
        let mut next = self.clone();
        next.limit = Some(limit);
        next
    }

    pub fn skip(&self, skip: u64) -> QuerySet {
        let mut next = self.clone();
        next.skip = skip;
        next
    }

    /// Run every terminal operation of the chain against this alias
    pub fn using(&self, alias: impl Into<String>) -> QuerySet {
        let mut next = self.clone();
        next.alias = Some(alias.into());
        next
    }

    // ========================================================================
    // Lowering
    // ========================================================================

    /// Storage-native filter of the query
    pub fn query(&self) -> Result<BsonDocument> {
        self.filter.to_query(&self.schema, self.odm.operators())
    }

    /// Sort document: explicit keys, else the schema's default ordering
    pub fn sort_document(&self) -> Result<BsonDocument> {
        let keys: Vec<(String, i32)> = if self.order.is_empty() {
            self.schema.ordering().iter().map(|k| parse_order_key(k)).collect()
        } else {
            self.order.clone()
        };
        let mut sort = BsonDocument::new();
        for (key, direction) in keys {
            sort.insert(resolve_path(&self.schema, &key)?, direction);
        }
        Ok(sort)
    }

    fn find_spec(&self, projection: &LoweredProjection, limit: Option<i64>) -> Result<FindSpec> {
        Ok(FindSpec::new()
            .projection(projection.document.clone())
            .sort(self.sort_document()?)
            .skip(self.skip)
            .limit(limit))
    }

    async fn collection(&self) -> Result<Arc<dyn CollectionHandle>> {
        self.odm.collection(&self.schema, self.alias.as_deref()).await
    }

    fn load(&self, son: BsonDocument, projection: &LoweredProjection) -> Document {
        let mut document = Document::from_storage(&self.schema, son);
        document.set_partly_loaded(!self.projection.is_full());
        if !projection.references.is_empty() {
            document.set_reference_projections(projection.references.clone());
        }
        document
    }

    async fn fetch(&self, limit: Option<i64>) -> Result<Vec<BsonDocument>> {
        let filter = self.query()?;
        let projection = self.projection.lower(&self.schema)?;
        let spec = self.find_spec(&projection, limit)?;
        let collection = self.collection().await?;
        debug!(collection = collection.name(), filter = %filter, "find");
        collection.find(filter, spec).await
    }

    async fn fetch_documents(&self, limit: Option<i64>) -> Result<Vec<Document>> {
        let projection = self.projection.lower(&self.schema)?;
        let records = self.fetch(limit).await?;
        Ok(records.into_iter().map(|son| self.load(son, &projection)).collect())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The single document matching `q` within this query. Fails with
    /// `DoesNotExist` or `MultipleObjectsReturned`, decided by a count
    /// bounded at two.
    pub async fn get(&self, q: impl Into<Q>) -> Result<Document> {
        let q = q.into();
        if q.is_empty() {
            return Err(DocMapperError::InvalidOperation(
                "Either an id or a filter must be provided to get".to_string(),
            ));
        }
        let narrowed = self.filter(q)?;
        let filter = narrowed.query()?;
        let collection = narrowed.collection().await?;
        let name = self.schema.name().to_string();

        match collection.count_documents(filter, Some(2)).await? {
            0 => Err(DocMapperError::DoesNotExist(name)),
            1 => narrowed
                .first()
                .await?
                .ok_or(DocMapperError::DoesNotExist(name)),
            _ => Err(DocMapperError::MultipleObjectsReturned(name)),
        }
    }

    /// First match, or `None`
    pub async fn first(&self) -> Result<Option<Document>> {
        Ok(self.fetch_documents(Some(1)).await?.into_iter().next())
    }

    /// Every match, capped by the limit or the default limit
    pub async fn all(&self) -> Result<Vec<Document>> {
        self.find_all().await
    }

    pub async fn find_all(&self) -> Result<Vec<Document>> {
        self.fetch_documents(Some(self.capped_limit())).await
    }

    /// Like `all()`, without converting the stored records
    pub async fn all_raw(&self) -> Result<Vec<BsonDocument>> {
        self.fetch(Some(self.capped_limit())).await
    }

    /// `limit(0)` means "no limit" to the storage, so it falls back to the cap
    fn capped_limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit != 0 => limit,
            _ => self.odm.settings().default_limit,
        }
    }

    pub async fn first_raw(&self) -> Result<Option<BsonDocument>> {
        Ok(self.fetch(Some(1)).await?.into_iter().next())
    }

    /// Number of matches; skip and limit are ignored
    pub async fn count(&self) -> Result<u64> {
        let filter = self.query()?;
        let collection = self.collection().await?;
        debug!(collection = collection.name(), filter = %filter, "count");
        collection.count_documents(filter, None).await
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    pub async fn pagination(&self, limit: i64, offset: u64) -> Result<Pagination> {
        let count = self.count().await?;
        let objects = self.skip(offset).limit(limit).all().await?;
        let window = u64::try_from(limit).unwrap_or(0).saturating_add(offset);
        Ok(Pagination {
            count,
            objects,
            limit,
            offset,
            has_next: count > window,
            has_previous: offset > 0,
        })
    }

    /// The document with identity `id`. Only valid on an unfiltered query.
    pub async fn with_id(&self, id: impl Into<Value>) -> Result<Option<Document>> {
        if !self.filter.is_empty() {
            return Err(DocMapperError::InvalidOperation(
                "Cannot use a filter whilst using `with_id`".to_string(),
            ));
        }
        let id_name = self.identity_attribute()?;
        self.filter(Q::new().with(id_name, id))?.first().await
    }

    /// Documents with the given identities, keyed by their rendered identity
    pub async fn in_bulk<I, V>(&self, ids: I) -> Result<HashMap<String, Document>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let key = format!("{}__in", self.identity_attribute()?);
        let documents = self
            .filter(Q::new().with(key, Value::List(ids)))?
            .fetch_documents(None)
            .await?;
        Ok(documents
            .into_iter()
            .filter_map(|d| d.id().map(|id| (id.to_string(), d)))
            .collect())
    }

    fn identity_attribute(&self) -> Result<String> {
        self.schema
            .id_field()
            .map(|f| f.name().to_string())
            .ok_or_else(|| {
                DocMapperError::InvalidOperation(format!("{} has no identity", self.schema.name()))
            })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Build a document from attribute pairs and save it
    pub async fn create<I, K, V>(&self, pairs: I) -> Result<Document>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let mut document = Document::from_pairs(&self.schema, pairs)?;
        let mut options = SaveOptions::new();
        options.alias = self.alias.clone();
        document.save(&self.odm, options).await?;
        Ok(document)
    }

    /// Insert documents in one call. Every document is validated first; a
    /// single failure rejects the whole batch before any write.
    pub async fn insert(&self, documents: Vec<Document>) -> Result<Vec<Document>> {
        let mut documents = documents;
        let mut records = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter_mut().enumerate() {
            if !document.schema().is_a(self.schema.name()) {
                return Err(DocMapperError::InvalidOperation(format!(
                    "This queryset for class '{}' can't save an instance of type '{}'.",
                    self.schema.name(),
                    document.schema().name()
                )));
            }
            document.apply_save_hooks(true);
            let errors = document.validation_errors();
            if !errors.is_empty() {
                return Err(DocMapperError::InvalidBatch { index, errors });
            }
            records.push(document.to_storage()?);
        }
        if records.is_empty() {
            return Ok(documents);
        }

        let collection = self.collection().await?;
        debug!(collection = collection.name(), count = records.len(), "insert_many");
        let ids = collection
            .insert_many(records)
            .await
            .map_err(|e| e.classify_write_error(self.schema.name()))?;
        for (document, id) in documents.iter_mut().zip(ids) {
            document.mark_inserted(id);
        }
        Ok(documents)
    }

    /// Apply an update to every match
    pub async fn update(&self, update: Update, upsert: bool) -> Result<UpdateOutcome> {
        let filter = self.query()?;
        let update = update.to_document(&self.schema)?;
        let collection = self.collection().await?;
        debug!(collection = collection.name(), filter = %filter, upsert, "update_many");
        collection
            .update_many(filter, update, upsert)
            .await
            .map_err(|e| e.classify_write_error(self.schema.name()))
    }

    pub async fn update_or_create(&self, update: Update) -> Result<UpdateOutcome> {
        self.update(update, true).await
    }

    /// Delete every match; returns the number deleted
    pub async fn delete(&self) -> Result<u64> {
        let filter = self.query()?;
        let collection = self.collection().await?;
        debug!(collection = collection.name(), filter = %filter, "delete_many");
        collection.delete_many(filter).await
    }

    /// Delete one document, or every match when none is given
    pub async fn remove(&self, document: Option<&Document>) -> Result<u64> {
        match document {
            Some(document) => document.delete(&self.odm, self.alias.as_deref()).await,
            None => self.delete().await,
        }
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    /// Distinct values of an attribute among the matches
    pub async fn distinct(&self, path: &str) -> Result<Vec<Value>> {
        let resolved = resolve_key(&self.schema, self.odm.operators(), path)?;
        if resolved.operator.is_some() {
            return Err(DocMapperError::invalid_filter(path, "distinct takes an attribute path"));
        }
        // Arrays are flattened, so values convert through the element field
        let field = resolved.field.map(|f| f.inner().unwrap_or(f));
        let filter = self.query()?;
        let collection = self.collection().await?;
        let raw = collection.distinct(&resolved.path, filter).await?;
        Ok(raw
            .into_iter()
            .map(|b| match field {
                Some(field) => field.from_storage(b),
                None => Value::from_bson(b),
            })
            .collect())
    }

    /// Run an aggregation pipeline over the matches
    pub async fn aggregate(&self, pipeline: Vec<BsonDocument>) -> Result<Vec<BsonDocument>> {
        for stage in &pipeline {
            validate_query(&Bson::Document(stage.clone()))?;
        }
        let filter = self.query()?;
        let mut stages = Vec::with_capacity(pipeline.len() + 1);
        if !filter.is_empty() {
            stages.push(doc! { "$match": filter });
        }
        stages.extend(pipeline);
        let collection = self.collection().await?;
        collection.aggregate(stages).await
    }

    fn numeric_path(&self, path: &str) -> Result<(String, bool)> {
        let resolved = resolve_key(&self.schema, self.odm.operators(), path)?;
        if resolved.operator.is_some() {
            return Err(DocMapperError::invalid_filter(path, "aggregation takes an attribute path"));
        }
        let is_list = matches!(resolved.field.map(|f| f.kind()), Some(FieldKind::List(_)));
        Ok((resolved.path, is_list))
    }

    async fn accumulate(&self, path: &str, accumulator: &str) -> Result<Option<f64>> {
        let (storage_path, is_list) = self.numeric_path(path)?;
        let reference = format!("${}", storage_path);
        let mut pipeline = Vec::new();
        if is_list {
            pipeline.push(doc! { "$unwind": reference.clone() });
        }
        pipeline.push(doc! { "$group": { ID_KEY: Bson::Null, "result": { accumulator: reference } } });
        let result = self.aggregate(pipeline).await?;
        Ok(result.first().and_then(|d| as_number(d.get("result"))))
    }

    /// Sum of a numeric attribute over the matches (elements for lists)
    pub async fn sum(&self, path: &str) -> Result<f64> {
        Ok(self.accumulate(path, "$sum").await?.unwrap_or(0.0))
    }

    /// Mean of a numeric attribute; `None` when nothing matches
    pub async fn average(&self, path: &str) -> Result<Option<f64>> {
        self.accumulate(path, "$avg").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::Field;
    use crate::q;
    use crate::schema::DocumentMeta;

    fn odm() -> Odm {
        let odm = Odm::in_memory();
        odm.register(
            Schema::builder("Person")
                .field("name", Field::text().required())
                .field("age", Field::int())
                .field("scores", Field::list(Field::int()))
                .meta(DocumentMeta::new().ordering(["age"])),
        )
        .unwrap();
        odm
    }

    fn people(odm: &Odm) -> QuerySet {
        odm.model("Person").unwrap().objects()
    }

    async fn seed(odm: &Odm) {
        let objects = people(odm);
        for (name, age, scores) in [("Ann", 30, vec![1, 2]), ("Bob", 20, vec![3]), ("Cid", 40, vec![])] {
            objects
                .create([
                    ("name", Value::from(name)),
                    ("age", Value::Int(age)),
                    ("scores", Value::from(scores)),
                ])
                .await
                .unwrap();
        }
    }

    #[test]
    fn test_filters_with_disjoint_keys_merge() {
        let odm = odm();
        let chained = people(&odm)
            .filter(q!(name = "Ann"))
            .unwrap()
            .filter(q!(age__gt = 3))
            .unwrap();
        let single = people(&odm).filter(q!(name = "Ann", age__gt = 3)).unwrap();
        assert_eq!(chained.query().unwrap(), single.query().unwrap());
        assert!(matches!(chained.filter_tree(), Q::Leaf(_)));
    }

    #[test]
    fn test_filters_on_same_key_are_anded() {
        let odm = odm();
        let qs = people(&odm)
            .filter(q!(age = 3))
            .unwrap()
            .filter(q!(age = 4))
            .unwrap();
        assert_eq!(
            qs.query().unwrap(),
            doc! { "$and": [{ "age": 3 }, { "age": 4 }] }
        );
    }

    #[test]
    fn test_bad_key_fails_when_added() {
        let odm = odm();
        let err = people(&odm).filter(q!(nickname = "x")).unwrap_err();
        assert!(matches!(err, DocMapperError::InvalidFilter { .. }));
    }

    #[test]
    fn test_raw_filter_rejects_javascript() {
        let odm = odm();
        assert!(people(&odm).filter_raw(doc! { "$where": "true" }).is_err());
        assert!(people(&odm).filter_raw(doc! { "age": { "$gt": 1 } }).is_ok());
    }

    #[test]
    fn test_builders_do_not_touch_the_base() {
        let odm = odm();
        let base = people(&odm);
        let _ = base.filter(q!(age = 1)).unwrap().limit(3);
        assert!(base.filter_tree().is_empty());
        assert_eq!(base.limit, None);
    }

    #[test]
    fn test_sort_falls_back_to_meta_ordering() {
        let odm = odm();
        assert_eq!(people(&odm).sort_document().unwrap(), doc! { "age": 1 });
        assert_eq!(
            people(&odm).order_by(["-name", "id"]).sort_document().unwrap(),
            doc! { "name": -1, "_id": 1 }
        );
    }

    #[tokio::test]
    async fn test_get_first_and_count() {
        let odm = odm();
        seed(&odm).await;
        let objects = people(&odm);

        assert_eq!(objects.count().await.unwrap(), 3);
        let bob = objects.get(q!(name = "Bob")).await.unwrap();
        assert_eq!(bob.get("age").unwrap(), Value::Int(20));

        assert!(objects.get(q!(name = "Zed")).await.unwrap_err().is_not_found());
        assert!(matches!(
            objects.get(q!(age__gt = 1)).await,
            Err(DocMapperError::MultipleObjectsReturned(_))
        ));
        assert!(objects.get(Q::new()).await.is_err());

        let youngest = objects.first().await.unwrap().unwrap();
        assert_eq!(youngest.get("name").unwrap(), Value::from("Bob"));
        assert!(objects.filter(q!(age__gt = 100)).unwrap().first().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_default_limit_caps_all() {
        let odm = odm().with_settings(QuerySettings { default_limit: 2 });
        seed(&odm).await;
        assert_eq!(people(&odm).all().await.unwrap().len(), 2);
        assert_eq!(people(&odm).limit(3).all().await.unwrap().len(), 3);
        assert_eq!(people(&odm).limit(0).all().await.unwrap().len(), 2);
        assert_eq!(people(&odm).limit(0).all_raw().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pagination() {
        let odm = odm();
        seed(&odm).await;
        let page = people(&odm).pagination(2, 0).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.objects.len(), 2);
        assert!(page.has_next);
        assert!(!page.has_previous);

        let last = people(&odm).pagination(2, 2).await.unwrap();
        assert_eq!(last.objects.len(), 1);
        assert!(!last.has_next);
        assert!(last.has_previous);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let odm = odm();
        seed(&odm).await;
        let objects = people(&odm);

        let outcome = objects
            .filter(q!(age__lt = 35))
            .unwrap()
            .update(Update::new().inc("age", 1), false)
            .await
            .unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(objects.get(q!(name = "Ann")).await.unwrap().get("age").unwrap(), Value::Int(31));

        assert_eq!(objects.filter(q!(name = "Cid")).unwrap().delete().await.unwrap(), 1);
        assert_eq!(objects.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_rejects_whole_batch() {
        let odm = odm();
        let model = odm.model("Person").unwrap();
        let ok = model.document_from([("name", Value::from("Ann"))]).unwrap();
        let bad = model.document_from([("age", Value::Int(3))]).unwrap();

        let err = people(&odm).insert(vec![ok.clone(), bad]).await.unwrap_err();
        assert!(matches!(err, DocMapperError::InvalidBatch { index: 1, .. }));
        assert_eq!(people(&odm).count().await.unwrap(), 0);

        let inserted = people(&odm).insert(vec![ok]).await.unwrap();
        assert!(inserted[0].id().is_some());
        assert!(inserted[0].is_persisted());
    }

    #[tokio::test]
    async fn test_distinct_sum_and_average() {
        let odm = odm();
        seed(&odm).await;
        let objects = people(&odm);

        let mut ages = objects.distinct("age").await.unwrap();
        ages.sort_by_key(|v| v.as_i64());
        assert_eq!(ages, vec![Value::Int(20), Value::Int(30), Value::Int(40)]);

        assert_eq!(objects.sum("age").await.unwrap(), 90.0);
        assert_eq!(objects.sum("scores").await.unwrap(), 6.0);
        assert_eq!(objects.average("age").await.unwrap(), Some(30.0));
        assert_eq!(
            objects.filter(q!(age__gt = 100)).unwrap().average("age").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_with_id_and_in_bulk() {
        let odm = odm();
        seed(&odm).await;
        let objects = people(&odm);
        let ann = objects.get(q!(name = "Ann")).await.unwrap();
        let id = ann.id().unwrap();

        assert_eq!(objects.with_id(id.clone()).await.unwrap(), Some(ann.clone()));
        assert!(objects.filter(q!(age = 1)).unwrap().with_id(id.clone()).await.is_err());

        let bulk = objects.in_bulk(vec![id.clone()]).await.unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[&id.to_string()], ann);
    }

    #[tokio::test]
    async fn test_only_marks_documents_partly_loaded() {
        let odm = odm();
        seed(&odm).await;
        let mut doc = people(&odm).only(["name"]).first().await.unwrap().unwrap();
        assert!(doc.is_partly_loaded());
        assert_eq!(doc.get("age").unwrap(), Value::Null);
        assert!(matches!(
            doc.save(&odm, SaveOptions::default()).await,
            Err(DocMapperError::PartlyLoaded(_))
        ));

        let full = people(&odm).only(["name"]).all_fields().first().await.unwrap().unwrap();
        assert!(!full.is_partly_loaded());
    }

    #[tokio::test]
    async fn test_using_unknown_alias_fails() {
        let odm = odm();
        let err = people(&odm).using("reports").count().await.unwrap_err();
        assert!(matches!(err, DocMapperError::Connection(_)));
    }
}
