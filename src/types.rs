//! Core types for documents, paths, and change events.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Field name -> value mapping of a document. Insertion order is kept.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Wildcard name -> matched segment.
pub type PathParams = BTreeMap<String, String>;

/// Hierarchical document path, e.g. `area/north/cities/boston`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(Vec<String>);

impl DocPath {
    /// Parse a slash-separated path. A single leading or trailing slash is
    /// accepted; empty inner segments are not.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }

        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }

        Ok(DocPath(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment: the document's own key.
    pub fn key(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<DocPath> {
        self.ancestor(1)
    }

    /// Path `levels` segments up. `ancestor(0)` is the path itself; walking
    /// past the root yields `None`.
    pub fn ancestor(&self, levels: usize) -> Option<DocPath> {
        if levels >= self.0.len() {
            return None;
        }
        Some(DocPath(self.0[..self.0.len() - levels].to_vec()))
    }

    /// Append one segment.
    pub fn child(&self, segment: &str) -> Result<DocPath> {
        if segment.is_empty() || segment.contains('/') {
            return Err(StoreError::InvalidPath(format!("{}/{}", self, segment)));
        }
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Ok(DocPath(segments))
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn starts_with(&self, other: &DocPath) -> bool {
        self.0.starts_with(&other.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl fmt::Debug for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocPath({})", self)
    }
}

impl FromStr for DocPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        DocPath::parse(s)
    }
}

impl TryFrom<String> for DocPath {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        DocPath::parse(&s)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.to_string()
    }
}

/// A single field of a document, addressed as `<doc path>/<field>`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub doc: DocPath,
    pub field: String,
}

impl FieldRef {
    pub fn new(doc: DocPath, field: impl Into<String>) -> Self {
        Self {
            doc,
            field: field.into(),
        }
    }

    /// Treat the last segment of `path` as the field name. Needs at least
    /// two segments.
    pub fn from_path(path: &DocPath) -> Result<Self> {
        let doc = path
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(format!("{} has no owning document", path)))?;
        Ok(Self::new(doc, path.key()))
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doc, self.field)
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldRef({})", self)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Snapshot of a stored document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: DocPath,

    pub fields: Fields,

    /// Bumped on every write; used by conditional writes.
    pub version: u64,

    /// When the document was last written.
    pub update_time: Timestamp,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Fields plus an `id` entry carrying the document key.
    pub fn to_json_with_id(&self) -> serde_json::Value {
        let mut fields = Fields::new();
        fields.insert("id".to_string(), self.path.key().into());
        for (k, v) in &self.fields {
            fields.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(fields)
    }
}

/// How a write combines with the existing document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Overwrite only the given fields.
    #[default]
    Merge,
    /// Replace the whole document.
    Replace,
}

/// Kind of mutation a change event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete];
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One mutation of one document.
///
/// Create carries only `after`, Delete only `before`, Update both. The
/// constructors are the only way to build one, so that rule always holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Stable across redeliveries of the same mutation.
    pub id: String,
    pub kind: ChangeKind,
    pub path: DocPath,
    before: Option<Document>,
    after: Option<Document>,
    /// Wildcards bound by the trigger pattern that matched this event.
    #[serde(default)]
    pub params: PathParams,
}

impl ChangeEvent {
    pub fn create(after: Document) -> Self {
        Self::build(ChangeKind::Create, after.path.clone(), None, Some(after))
    }

    pub fn update(before: Document, after: Document) -> Self {
        Self::build(ChangeKind::Update, after.path.clone(), Some(before), Some(after))
    }

    pub fn delete(before: Document) -> Self {
        Self::build(ChangeKind::Delete, before.path.clone(), Some(before), None)
    }

    fn build(
        kind: ChangeKind,
        path: DocPath,
        before: Option<Document>,
        after: Option<Document>,
    ) -> Self {
        let id = event_id(
            kind,
            &path,
            before.as_ref().map(|d| d.version),
            after.as_ref().map(|d| d.version),
        );
        Self {
            id,
            kind,
            path,
            before,
            after,
            params: PathParams::new(),
        }
    }

    pub fn with_params(mut self, params: PathParams) -> Self {
        self.params = params;
        self
    }

    pub fn before(&self) -> Option<&Document> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&Document> {
        self.after.as_ref()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

fn event_id(kind: ChangeKind, path: &DocPath, before: Option<u64>, after: Option<u64>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(path.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(before.unwrap_or(0).to_le_bytes());
    hasher.update(after.unwrap_or(0).to_le_bytes());
    hex::encode(&hasher.finalize()[..16])
}
