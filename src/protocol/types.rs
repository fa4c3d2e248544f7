use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bson::{oid::ObjectId, Bson, Document};
use chrono::{DateTime, Utc};
use futures::io::AsyncRead;
use serde::Serialize;

/// Result of `update_one` / `update_many`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCount {
    pub matched: u64,
    pub modified: u64,
}

impl UpdateCount {
    pub fn new(matched: u64, modified: u64) -> Self {
        Self { matched, modified }
    }
}

/// Description of a stored file, as returned by `upload` and `download`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: ObjectId,
    pub md5: Option<String>,
    pub length: u64,
    pub chunk_size: u32,
    pub upload_date: DateTime<Utc>,
    pub content_type: String,
    pub filename: String,
    pub metadata: Document,
}

/// File contents streamed out of a bucket.
pub type FileStream = Pin<Box<dyn AsyncRead + Send>>;

/// A found file together with a reader over its contents.
pub struct Download {
    pub info: FileInfo,
    pub stream: FileStream,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Index to use for a query, by key pattern or by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    Keys(Document),
    Name(String),
}

/// Which version of the document `find_one_and_update` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Options forwarded to the driver for a single collection operation.
///
/// Each operation reads the fields that apply to it and ignores the rest:
/// `projection`/`sort`/`skip`/`limit` for reads, `upsert` and
/// `return_document` for updates, `hint` everywhere the server accepts one.
pub struct OperationOptions<'a, S> {
    pub session: Option<&'a mut S>,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub hint: Option<Hint>,
    pub upsert: Option<bool>,
    pub return_document: Option<ReturnDocument>,
}

impl<S> Default for OperationOptions<'_, S> {
    fn default() -> Self {
        Self {
            session: None,
            projection: None,
            sort: None,
            skip: None,
            limit: None,
            hint: None,
            upsert: None,
            return_document: None,
        }
    }
}

impl<'a, S> OperationOptions<'a, S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the operation inside `session`, e.g. within a transaction.
    pub fn session(mut self, session: &'a mut S) -> Self {
        self.session = Some(session);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn hint(mut self, hint: Hint) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    pub fn return_document(mut self, which: ReturnDocument) -> Self {
        self.return_document = Some(which);
        self
    }
}

impl<S> fmt::Debug for OperationOptions<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationOptions")
            .field("session", &self.session.is_some())
            .field("projection", &self.projection)
            .field("sort", &self.sort)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("hint", &self.hint)
            .field("upsert", &self.upsert)
            .field("return_document", &self.return_document)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    pub expire_after: Option<Duration>,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self {
            unique: Some(true),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOptions {
    /// Identifier for the stored file; generated when absent.
    pub id: Option<ObjectId>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub metadata: Option<Document>,
    pub chunk_size_bytes: Option<u32>,
}

impl UploadOptions {
    pub fn filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Document) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Update outcome as reported by a driver, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawUpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Delete outcome as reported by a driver, before normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawDeleteResult {
    pub deleted_count: u64,
}
