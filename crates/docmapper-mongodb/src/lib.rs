//! Asynchronous document mapper for MongoDB
//!
//! Document types are declared at runtime as schemas of typed fields and
//! registered with an [`Odm`] context. Documents convert between logical
//! values and BSON through their fields; queries are built as [`Q`] trees
//! with Django-style `path__operator` keys and run through a lazy
//! [`QuerySet`].
//!
//! # Features
//! - Field kinds with conversion, defaults and validation
//! - Schema inheritance, storage key mapping and index declarations
//! - Composable filters with pluggable operators
//! - Projections, atomic updates, aggregation helpers
//! - MongoDB and in-memory storage backends behind one async seam
//!
//! ```ignore
//! use docmapper_mongodb::{q, Field, Odm, Schema, SaveOptions};
//!
//! let odm = Odm::in_memory();
//! let users = odm.register(
//!     Schema::builder("User")
//!         .field("name", Field::text().required())
//!         .field("age", Field::int()),
//! )?;
//! users.create([("name", "Lisa".into()), ("age", 34.into())]).await?;
//! let older = users.objects().filter(q!(age__gt = 30))?.count().await?;
//! ```

pub mod connection;
pub mod document;
pub mod fields;
pub mod index;
pub mod odm;
pub mod query;
pub mod queryset;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod validation;
pub mod value;

pub use connection::{Connection, ConnectionConfig, ConnectionRegistry, PoolConfig, DEFAULT_CONNECTION_NAME};
pub use docmapper_common::{DocMapperError, Result};
pub use docmapper_validation::{ErrorType, FieldError, ValidationErrors};
pub use document::{Document, SaveOptions};
pub use fields::{DateTimeOptions, DecimalOptions, Field, FieldKind, Rounding};
pub use index::{IndexDirection, IndexSpec};
pub use odm::{Model, Odm};
pub use query::{FieldSpec, MatchMode, OperatorRegistry, Projection, QueryOperator, Slice, Update, Q};
pub use queryset::{Pagination, QuerySet, QuerySettings, DEFAULT_LIMIT};
pub use registry::SchemaRegistry;
pub use schema::{DocumentMeta, Schema, SchemaBuilder, ID_KEY};
pub use storage::{CollectionHandle, Connector, FindSpec, MemoryConnector, MongoCollection, UpdateOutcome};
pub use validation::{validate_query, ValidatedCollectionName};
pub use value::Value;
