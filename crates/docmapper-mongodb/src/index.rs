//! Index declarations
//!
//! A key is written as a field path with an optional direction prefix:
//! `-` descending, `+` or nothing ascending, `$` text and `#` hashed.

use std::time::Duration;

use bson::{Bson, Document as BsonDocument};

/// Direction (or special type) of one index key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Ascending,
    Descending,
    Text,
    Hashed,
}

impl IndexDirection {
    pub fn to_bson(self) -> Bson {
        match self {
            IndexDirection::Ascending => Bson::Int32(1),
            IndexDirection::Descending => Bson::Int32(-1),
            IndexDirection::Text => Bson::String("text".to_string()),
            IndexDirection::Hashed => Bson::String("hashed".to_string()),
        }
    }

    fn name_suffix(self) -> &'static str {
        match self {
            IndexDirection::Ascending => "1",
            IndexDirection::Descending => "-1",
            IndexDirection::Text => "text",
            IndexDirection::Hashed => "hashed",
        }
    }
}

/// Split a declared key into its path and direction
pub fn parse_index_key(spec: &str) -> (String, IndexDirection) {
    let spec = spec.trim();
    if let Some(rest) = spec.strip_prefix('$') {
        (rest.to_string(), IndexDirection::Text)
    } else if let Some(rest) = spec.strip_prefix('#') {
        (rest.to_string(), IndexDirection::Hashed)
    } else if let Some(rest) = spec.strip_prefix('-') {
        (rest.to_string(), IndexDirection::Descending)
    } else if let Some(rest) = spec.strip_prefix('+') {
        (rest.to_string(), IndexDirection::Ascending)
    } else {
        (spec.to_string(), IndexDirection::Ascending)
    }
}

/// An index over one or more keys
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: Vec<(String, IndexDirection)>,
    pub unique: bool,
    pub sparse: bool,
    pub name: Option<String>,
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    /// Single-key index, e.g. `IndexSpec::parse("-created")`
    pub fn parse(spec: &str) -> Self {
        Self::compound([spec])
    }

    /// Compound index, keys in declaration order
    pub fn compound<I, S>(specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keys: specs
                .into_iter()
                .map(|s| parse_index_key(s.as_ref()))
                .collect(),
            unique: false,
            sparse: false,
            name: None,
            expire_after: None,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Key document in the storage engine's format
    pub fn keys_document(&self) -> BsonDocument {
        let mut doc = BsonDocument::new();
        for (path, direction) in &self.keys {
            doc.insert(path.clone(), direction.to_bson());
        }
        doc
    }

    /// Explicit name, or the server's default naming (`name_1_age_-1`)
    pub fn resolved_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(path, direction)| format!("{}_{}", path, direction.name_suffix()))
            .collect::<Vec<_>>()
            .join("_")
    }

    pub(crate) fn same_keys(&self, other: &IndexSpec) -> bool {
        self.keys == other.keys
    }
}

impl From<&str> for IndexSpec {
    fn from(spec: &str) -> Self {
        IndexSpec::parse(spec)
    }
}
