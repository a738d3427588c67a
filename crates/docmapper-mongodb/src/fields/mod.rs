//! Field descriptors
//!
//! A [`Field`] owns conversion, validation and default handling for one
//! document attribute. The attributes common to every field live on the
//! struct; kind-specific behaviour is dispatched over the closed
//! [`FieldKind`] enum to one module per kind family.
//!
//! ```
//! use docmapper_mongodb::Field;
//!
//! let name = Field::text().required().max_length(50);
//! let age = Field::int().min_value(0);
//! let tags = Field::list(Field::text());
//! # let _ = (name, age, tags);
//! ```

mod binary;
mod collection;
mod datetime;
mod embedded;
mod identifier;
mod numeric;
mod text;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bson::Bson;
use docmapper_common::Result;
use docmapper_validation::{FieldError, FieldResult, NumericConstraints, Pattern, StringConstraints};

use crate::document::Document;
use crate::schema::Schema;
use crate::value::Value;

pub use datetime::DateTimeOptions;
pub use numeric::{DecimalOptions, Rounding};

/// Declaration order across all fields; the schema sorts by it
static CREATION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Zero-argument default producer
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// Hook run when a document is saved; receives the document and whether
/// this save creates it
pub type OnSaveFn = Arc<dyn Fn(&Document, bool) -> Value + Send + Sync>;

/// Default value of a field
#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Producer(DefaultFn),
}

impl DefaultValue {
    pub fn produce(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::Producer(f) => f(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(v) => f.debug_tuple("Static").field(v).finish(),
            DefaultValue::Producer(_) => f.write_str("Producer(..)"),
        }
    }
}

/// The kind of a field, with its kind-specific options
#[derive(Debug, Clone)]
pub enum FieldKind {
    Text(StringConstraints),
    Integer(NumericConstraints<i64>),
    Float(NumericConstraints<f64>),
    Decimal(DecimalOptions),
    Boolean,
    DateTime(DateTimeOptions),
    ObjectId,
    Uuid { binary: bool },
    Binary { max_bytes: Option<usize> },
    List(Box<Field>),
    Map,
    Embedded(Arc<Schema>),
    /// Target document name (`"self"` until the schema is assembled) and
    /// the kind of its identity
    Reference { document: String, identity: Box<Field> },
    Dynamic,
}

impl FieldKind {
    /// Name used in messages
    pub fn label(&self) -> &'static str {
        match self {
            FieldKind::Text(_) => "Text",
            FieldKind::Integer(_) => "Integer",
            FieldKind::Float(_) => "Float",
            FieldKind::Decimal(_) => "Decimal",
            FieldKind::Boolean => "Boolean",
            FieldKind::DateTime(_) => "DateTime",
            FieldKind::ObjectId => "ObjectId",
            FieldKind::Uuid { .. } => "UUID",
            FieldKind::Binary { .. } => "Binary",
            FieldKind::List(_) => "List",
            FieldKind::Map => "Map",
            FieldKind::Embedded(_) => "EmbeddedDocument",
            FieldKind::Reference { .. } => "Reference",
            FieldKind::Dynamic => "Dynamic",
        }
    }
}

/// A typed attribute descriptor
#[derive(Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) storage_key: String,
    pub(crate) explicit_storage_key: bool,
    pub(crate) kind: FieldKind,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) required: bool,
    pub(crate) nullable: bool,
    pub(crate) unique: bool,
    pub(crate) unique_with: Vec<String>,
    pub(crate) sparse: bool,
    pub(crate) on_save: Option<OnSaveFn>,
    pub(crate) creation_order: u64,
    pub(crate) synthesized: bool,
    pub(crate) declaration_errors: Vec<String>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("storage_key", &self.storage_key)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("required", &self.required)
            .field("nullable", &self.nullable)
            .field("unique", &self.unique)
            .field("sparse", &self.sparse)
            .finish_non_exhaustive()
    }
}

impl Field {
    fn new(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            storage_key: String::new(),
            explicit_storage_key: false,
            kind,
            default: None,
            required: false,
            nullable: false,
            unique: false,
            unique_with: Vec::new(),
            sparse: false,
            on_save: None,
            creation_order: CREATION_COUNTER.fetch_add(1, Ordering::Relaxed),
            synthesized: false,
            declaration_errors: Vec::new(),
        }
    }

    // =====================
    // Kind constructors
    // =====================

    pub fn text() -> Self {
        Self::new(FieldKind::Text(StringConstraints::default()))
    }

    pub fn int() -> Self {
        Self::new(FieldKind::Integer(NumericConstraints::default()))
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float(NumericConstraints::default()))
    }

    /// Fixed-point decimal, two places with half-up rounding by default
    pub fn decimal() -> Self {
        Self::new(FieldKind::Decimal(DecimalOptions::default()))
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(FieldKind::DateTime(DateTimeOptions::default()))
    }

    pub fn object_id() -> Self {
        Self::new(FieldKind::ObjectId)
    }

    /// UUID stored as BSON binary; see [`Field::uuid_as_string`]
    pub fn uuid() -> Self {
        Self::new(FieldKind::Uuid { binary: true })
    }

    pub fn binary() -> Self {
        Self::new(FieldKind::Binary { max_bytes: None })
    }

    /// List of `inner` values; defaults to an empty list
    pub fn list(inner: Field) -> Self {
        Self::new(FieldKind::List(Box::new(inner))).default(Value::List(Vec::new()))
    }

    /// Schema-less mapping
    pub fn dict() -> Self {
        Self::new(FieldKind::Map)
    }

    pub fn embedded(schema: &Arc<Schema>) -> Self {
        Self::new(FieldKind::Embedded(Arc::clone(schema)))
    }

    /// Reference to a document by name; `"self"` refers to the declaring document
    pub fn reference(document: impl Into<String>) -> Self {
        Self::reference_with_identity(document, Field::object_id())
    }

    /// Reference to a document whose identity is not an ObjectId
    pub fn reference_with_identity(document: impl Into<String>, identity: Field) -> Self {
        Self::new(FieldKind::Reference {
            document: document.into(),
            identity: Box::new(identity),
        })
    }

    pub fn dynamic() -> Self {
        Self::new(FieldKind::Dynamic)
    }

    pub(crate) fn identity() -> Self {
        let mut field = Self::object_id();
        field.name = "id".to_string();
        field.storage_key = "_id".to_string();
        field.explicit_storage_key = true;
        field.creation_order = 0;
        field.synthesized = true;
        field
    }

    // =====================
    // Common modifiers
    // =====================

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Key used in storage instead of the attribute name
    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self.explicit_storage_key = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_with<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Producer(Arc::new(producer)));
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Unique together with the given attributes
    pub fn unique_with<I, S>(mut self, others: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique = true;
        self.unique_with = others.into_iter().map(Into::into).collect();
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    pub fn on_save<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Document, bool) -> Value + Send + Sync + 'static,
    {
        self.on_save = Some(Arc::new(hook));
        self
    }

    // =====================
    // Kind-specific modifiers
    // =====================

    fn reject(mut self, option: &str) -> Self {
        self.declaration_errors.push(format!(
            "option '{}' does not apply to {} fields",
            option,
            self.kind.label()
        ));
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        if let FieldKind::Text(c) = &mut self.kind {
            c.min_length = Some(n);
            return self;
        }
        self.reject("min_length")
    }

    pub fn max_length(mut self, n: usize) -> Self {
        if let FieldKind::Text(c) = &mut self.kind {
            c.max_length = Some(n);
            return self;
        }
        self.reject("max_length")
    }

    /// Pattern the value must match from its start
    pub fn regex(mut self, pattern: &str) -> Self {
        let compiled = match Pattern::new(pattern) {
            Ok(p) => p,
            Err(e) => {
                self.declaration_errors
                    .push(format!("invalid regex '{}': {}", pattern, e));
                return self;
            }
        };
        if let FieldKind::Text(c) = &mut self.kind {
            c.pattern = Some(compiled);
            return self;
        }
        self.reject("regex")
    }

    pub fn choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let FieldKind::Text(c) = &mut self.kind {
            c.choices = Some(choices.into_iter().map(Into::into).collect());
            return self;
        }
        self.reject("choices")
    }

    pub fn min_value(self, min: impl Into<Value>) -> Self {
        self.bound("min_value", min.into(), true)
    }

    pub fn max_value(self, max: impl Into<Value>) -> Self {
        self.bound("max_value", max.into(), false)
    }

    fn bound(mut self, option: &str, bound: Value, is_min: bool) -> Self {
        if !matches!(
            self.kind,
            FieldKind::Integer(_) | FieldKind::Float(_) | FieldKind::Decimal(_)
        ) {
            return self.reject(option);
        }
        let applied = match &mut self.kind {
            FieldKind::Integer(c) => match numeric::integer::coerce(bound) {
                Value::Int(i) => {
                    if is_min {
                        c.minimum = Some(i);
                    } else {
                        c.maximum = Some(i);
                    }
                    true
                }
                _ => false,
            },
            FieldKind::Float(c) => match bound.as_f64() {
                Some(f) => {
                    if is_min {
                        c.minimum = Some(f);
                    } else {
                        c.maximum = Some(f);
                    }
                    true
                }
                None => false,
            },
            FieldKind::Decimal(options) => match numeric::to_decimal(&bound) {
                Some(d) => {
                    if is_min {
                        options.constraints.minimum = Some(d);
                    } else {
                        options.constraints.maximum = Some(d);
                    }
                    true
                }
                None => false,
            },
            _ => false,
        };
        if !applied {
            self.declaration_errors
                .push(format!("{} is not a number", option));
        }
        self
    }

    /// Decimal places kept by a decimal field
    pub fn precision(mut self, places: u32) -> Self {
        if let FieldKind::Decimal(options) = &mut self.kind {
            options.precision = places;
            return self;
        }
        self.reject("precision")
    }

    pub fn rounding(mut self, rounding: Rounding) -> Self {
        if let FieldKind::Decimal(options) = &mut self.kind {
            options.rounding = rounding;
            return self;
        }
        self.reject("rounding")
    }

    /// Store a decimal as a string rather than a double
    pub fn force_string(mut self) -> Self {
        if let FieldKind::Decimal(options) = &mut self.kind {
            options.force_string = true;
            return self;
        }
        self.reject("force_string")
    }

    pub fn auto_now_on_insert(mut self) -> Self {
        if let FieldKind::DateTime(options) = &mut self.kind {
            options.auto_now_on_insert = true;
            return self;
        }
        self.reject("auto_now_on_insert")
    }

    pub fn auto_now_on_update(mut self) -> Self {
        if let FieldKind::DateTime(options) = &mut self.kind {
            options.auto_now_on_update = true;
            return self;
        }
        self.reject("auto_now_on_update")
    }

    /// Normalize timestamps to a fixed offset
    pub fn tz(mut self, offset: chrono::FixedOffset) -> Self {
        if let FieldKind::DateTime(options) = &mut self.kind {
            options.tz = Some(offset);
            return self;
        }
        self.reject("tz")
    }

    /// Store a UUID as its hyphenated string
    pub fn uuid_as_string(mut self) -> Self {
        if let FieldKind::Uuid { binary } = &mut self.kind {
            *binary = false;
            return self;
        }
        self.reject("uuid_as_string")
    }

    pub fn max_bytes(mut self, n: usize) -> Self {
        if let FieldKind::Binary { max_bytes } = &mut self.kind {
            *max_bytes = Some(n);
            return self;
        }
        self.reject("max_bytes")
    }

    // =====================
    // Accessors
    // =====================

    /// Attribute name (set when the schema is assembled)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_key(&self) -> &str {
        &self.storage_key
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn unique_with_fields(&self) -> &[String] {
        &self.unique_with
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub fn creation_order(&self) -> u64 {
        self.creation_order
    }

    pub(crate) fn on_save_hook(&self) -> Option<&OnSaveFn> {
        self.on_save.as_ref()
    }

    /// Inner field of a list, if this is one
    pub fn inner(&self) -> Option<&Field> {
        match &self.kind {
            FieldKind::List(inner) => Some(inner),
            _ => None,
        }
    }

    // =====================
    // Values
    // =====================

    /// The static default, a freshly produced one, or null
    pub fn default_value(&self) -> Value {
        self.default
            .as_ref()
            .map(DefaultValue::produce)
            .unwrap_or(Value::Null)
    }

    /// Logical value for a raw stored value; absent values fall back to
    /// the default unless the field is nullable
    pub fn get_value(&self, raw: Option<&Value>) -> Value {
        match raw {
            Some(v) if !v.is_null() => v.clone(),
            _ if self.nullable => Value::Null,
            _ => self.default_value(),
        }
    }

    /// Write-path conversion applied on every assignment
    pub fn coerce(&self, value: Value) -> Value {
        if value.is_null() {
            return value;
        }
        match &self.kind {
            FieldKind::Text(_) => text::coerce(value),
            FieldKind::Integer(_) => numeric::integer::coerce(value),
            FieldKind::Float(_) => numeric::float::coerce(value),
            FieldKind::Decimal(options) => numeric::decimal::coerce(value, options),
            FieldKind::DateTime(options) => datetime::coerce(value, options),
            FieldKind::ObjectId => identifier::object_id::coerce(value),
            FieldKind::Uuid { .. } => identifier::uuid_kind::coerce(value),
            FieldKind::Binary { .. } => binary::coerce(value),
            FieldKind::List(inner) => collection::list::coerce(value, inner),
            FieldKind::Embedded(schema) => embedded::embedded::coerce(value, schema),
            FieldKind::Reference { identity, .. } => embedded::reference::coerce(value, identity),
            FieldKind::Boolean | FieldKind::Map | FieldKind::Dynamic => value,
        }
    }

    pub fn is_empty(&self, value: &Value) -> bool {
        match &self.kind {
            FieldKind::Text(_) => text::is_empty(value),
            FieldKind::Uuid { .. } => identifier::uuid_kind::is_empty(value),
            FieldKind::Binary { .. } => binary::is_empty(value),
            FieldKind::List(_) => collection::list::is_empty(value),
            FieldKind::Map => collection::map::is_empty(value),
            _ => value.is_null(),
        }
    }

    /// Check one value. Empty values only fail when the field is required.
    pub fn validate(&self, value: &Value) -> FieldResult {
        if self.is_empty(value) {
            return if self.required {
                Err(FieldError::missing("Field is required"))
            } else {
                Ok(())
            };
        }

        match &self.kind {
            FieldKind::Text(c) => text::validate(value, c),
            FieldKind::Integer(c) => numeric::integer::validate(value, c),
            FieldKind::Float(c) => numeric::float::validate(value, c),
            FieldKind::Decimal(options) => numeric::decimal::validate(value, options),
            FieldKind::Boolean => match value {
                Value::Bool(_) => Ok(()),
                _ => Err(FieldError::type_error("Boolean field only accepts boolean values")),
            },
            FieldKind::DateTime(_) => datetime::validate(value),
            FieldKind::ObjectId => identifier::object_id::validate(value),
            FieldKind::Uuid { .. } => identifier::uuid_kind::validate(value),
            FieldKind::Binary { max_bytes } => binary::validate(value, *max_bytes),
            FieldKind::List(inner) => collection::list::validate(value, inner),
            FieldKind::Map => collection::map::validate(value),
            FieldKind::Embedded(schema) => embedded::embedded::validate(value, schema),
            FieldKind::Reference { document, identity } => {
                embedded::reference::validate(value, document, identity)
            }
            FieldKind::Dynamic => Ok(()),
        }
    }

    /// Storage-native form of a logical value
    pub fn to_storage(&self, value: &Value) -> Result<Bson> {
        if value.is_null() {
            return Ok(Bson::Null);
        }
        Ok(match &self.kind {
            FieldKind::Text(_) => text::to_storage(value),
            FieldKind::Integer(_) => numeric::integer::to_storage(value),
            FieldKind::Float(_) => numeric::float::to_storage(value),
            FieldKind::Decimal(options) => numeric::decimal::to_storage(value, options),
            FieldKind::DateTime(_) => datetime::to_storage(value),
            FieldKind::ObjectId => identifier::object_id::to_storage(value),
            FieldKind::Uuid { binary } => identifier::uuid_kind::to_storage(value, *binary),
            FieldKind::Binary { .. } => binary::to_storage(value),
            FieldKind::List(inner) => collection::list::to_storage(value, inner)?,
            FieldKind::Embedded(_) => embedded::embedded::to_storage(value)?,
            FieldKind::Reference { identity, .. } => embedded::reference::to_storage(value, identity)?,
            FieldKind::Boolean | FieldKind::Map | FieldKind::Dynamic => value.to_bson(),
        })
    }

    /// Logical form of a storage-native value
    pub fn from_storage(&self, raw: Bson) -> Value {
        if matches!(raw, Bson::Null | Bson::Undefined) {
            return Value::Null;
        }
        match &self.kind {
            FieldKind::Text(_) => text::from_storage(raw),
            FieldKind::Integer(_) => numeric::integer::from_storage(raw),
            FieldKind::Float(_) => numeric::float::from_storage(raw),
            FieldKind::Decimal(options) => numeric::decimal::from_storage(raw, options),
            FieldKind::DateTime(options) => datetime::from_storage(raw, options),
            FieldKind::ObjectId => identifier::object_id::from_storage(raw),
            FieldKind::Uuid { .. } => identifier::uuid_kind::from_storage(raw),
            FieldKind::Binary { .. } => binary::from_storage(raw),
            FieldKind::List(inner) => collection::list::from_storage(raw, inner),
            FieldKind::Embedded(schema) => embedded::embedded::from_storage(raw, schema),
            FieldKind::Reference { identity, .. } => embedded::reference::from_storage(raw, identity),
            FieldKind::Boolean | FieldKind::Map | FieldKind::Dynamic => Value::from_bson(raw),
        }
    }

    /// Filter-value conversion. Same as `to_storage` except for lists,
    /// where a scalar is a membership test.
    pub fn to_query(&self, value: &Value) -> Result<Bson> {
        match &self.kind {
            FieldKind::List(inner) => collection::list::to_query(&self.coerce(value.clone()), inner),
            _ => self.to_storage(&self.coerce(value.clone())),
        }
    }

    /// Conversion of one element of a membership list (`in` operator)
    pub fn element_to_query(&self, value: &Value) -> Result<Bson> {
        match &self.kind {
            FieldKind::List(inner) => inner.to_query(value),
            _ => self.to_query(value),
        }
    }
}
