use std::{cmp::Ordering, collections::BTreeMap, fmt};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Default for [`StoreConfig::default_index`](crate::StoreConfig).
pub const DEFAULT_INDEX: &str = "document";

/// Field names that filters resolve against the document itself rather than
/// its metadata. Metadata may not use them as keys.
pub const RESERVED_FIELDS: [&str; 2] = ["id", "index"];

pub type Metadata = BTreeMap<String, MetaValue>;

/// A single scalar metadata value.
///
/// Serialized as a bare JSON scalar, so `{"year": 2021, "tag": "news"}`
/// deserializes into an `Integer` and a `String`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetaValue {
    /// Ordering used by filter comparisons.
    ///
    /// Integers and floats compare numerically with each other. Values of
    /// any other differing tags are incomparable and yield `None`.
    pub fn compare(&self, other: &MetaValue) -> Option<Ordering> {
        use MetaValue::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Integer(a), Float(b)) => (*a as f64).partial_cmp(b),
            (Float(a), Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (String(a), String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn loosely_eq(&self, other: &MetaValue) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::String(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Integer(value)
    }
}

impl From<i32> for MetaValue {
    fn from(value: i32) -> Self {
        MetaValue::Integer(value.into())
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Null => write!(f, "null"),
            MetaValue::Bool(v) => write!(f, "{v}"),
            MetaValue::Integer(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::String(v) => write!(f, "{v}"),
        }
    }
}

/// BLAKE3 digest of a document's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(content: &str) -> Self {
        Self(*blake3::hash(content.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        blake3::Hash::from_hex(hex.as_str())
            .map(|hash| Self(*hash.as_bytes()))
            .map_err(serde::de::Error::custom)
    }
}

/// A stored document.
///
/// `content_hash` always reflects `content`; every constructor and
/// [`Document::set_content`] keep the two in sync. An empty `index` means
/// unset: the store assigns its configured default index on write.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub index: String,
    content: String,
    pub metadata: Metadata,
    content_hash: ContentHash,
}

impl Document {
    /// Build a document whose id is derived from its content.
    ///
    /// # Examples
    ///
    /// ```
    /// use docstore::Document;
    ///
    /// let a = Document::new("the cat sat");
    /// let b = Document::new("the cat sat");
    /// assert_eq!(a.id, b.id);
    /// // Filled with the store's default index when added.
    /// assert!(a.index.is_empty());
    /// ```
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = ContentHash::of(&content);
        Self {
            id: content_hash.to_hex(),
            index: String::new(),
            content,
            metadata: Metadata::new(),
            content_hash,
        }
    }

    pub fn with_id(id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut doc = Self::new(content);
        doc.id = id.into();
        doc
    }

    pub fn in_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_meta(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetaValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = ContentHash::of(&self.content);
    }

    /// Look up a filterable field: `id`, `index`, or a metadata key.
    pub fn field(&self, name: &str) -> Option<MetaValue> {
        match name {
            "id" => Some(MetaValue::String(self.id.clone())),
            "index" => Some(MetaValue::String(self.index.clone())),
            key => self.metadata.get(key).cloned(),
        }
    }

    /// Check that the document can be stored.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidDocument("empty document id".into()));
        }
        if self.index.is_empty() {
            return Err(Error::InvalidDocument(format!(
                "document {} has an empty index name",
                self.id
            )));
        }
        for (key, value) in &self.metadata {
            if key.is_empty() {
                return Err(Error::InvalidDocument(format!(
                    "document {} has an empty metadata key",
                    self.id
                )));
            }
            if RESERVED_FIELDS.contains(&key.as_str()) {
                return Err(Error::InvalidDocument(format!(
                    "document {} uses reserved metadata key '{key}'",
                    self.id
                )));
            }
            if let MetaValue::Float(f) = value
                && !f.is_finite()
            {
                return Err(Error::InvalidDocument(format!(
                    "document {} has non-finite value for '{key}'",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// On-disk form of a document, keyed by id in the record table.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub index: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub content_hash: ContentHash,
}

impl StoredRecord {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            index: doc.index.clone(),
            content: doc.content.clone(),
            metadata: doc.metadata.clone(),
            content_hash: doc.content_hash,
        }
    }

    pub fn into_document(self, id: &str) -> Document {
        Document {
            id: id.to_string(),
            index: self.index,
            content: self.content,
            metadata: self.metadata,
            content_hash: self.content_hash,
        }
    }
}

/// Wire form accepted from external producers (JSON lines, config files).
///
/// `id` and `index` are optional; missing ids are derived from content and
/// missing indexes fall back to the store default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    pub content: String,
    #[serde(default, alias = "meta")]
    pub metadata: Metadata,
}

impl DocumentInput {
    pub fn into_document(self, default_index: &str) -> Document {
        let mut doc = match self.id {
            Some(id) => Document::with_id(id, self.content),
            None => Document::new(self.content),
        };
        doc.index = self.index.unwrap_or_else(|| default_index.to_string());
        doc.metadata = self.metadata;
        doc
    }
}

/// JSON-friendly view of a document, used for CLI output.
#[derive(Debug, Serialize)]
pub struct DocumentView<'a> {
    pub id: &'a str,
    pub index: &'a str,
    pub content: &'a str,
    pub metadata: &'a Metadata,
    pub content_hash: String,
}

impl<'a> From<&'a Document> for DocumentView<'a> {
    fn from(doc: &'a Document) -> Self {
        Self {
            id: &doc.id,
            index: &doc.index,
            content: &doc.content,
            metadata: &doc.metadata,
            content_hash: doc.content_hash.to_hex(),
        }
    }
}
