//! Reshaping of driver responses into the stable result shapes the façades
//! return, plus the inbound "absent value" scrub.
//!
//! `Bson::Undefined` marks an absent value. Keys holding it are removed from
//! every document sent to the server; keys holding `Bson::Null` are kept.

use bson::{oid::ObjectId, Bson, Document};

use super::types::{FileInfo, RawDeleteResult, RawUpdateResult, UpdateCount};
use crate::error::{AlbatrossError, AlbatrossResult};

/// Drop `Undefined`-valued keys, recursing into sub-documents and arrays.
pub fn strip_undefined(doc: Document) -> Document {
    doc.into_iter()
        .filter(|(_, value)| !matches!(value, Bson::Undefined))
        .map(|(key, value)| (key, strip_value(value)))
        .collect()
}

fn strip_value(value: Bson) -> Bson {
    match value {
        Bson::Document(doc) => Bson::Document(strip_undefined(doc)),
        // Arrays keep their positions; an absent element is stored as null.
        Bson::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Bson::Undefined => Bson::Null,
                    other => strip_value(other),
                })
                .collect(),
        ),
        other => other,
    }
}

pub fn strip_all(docs: Vec<Document>) -> Vec<Document> {
    docs.into_iter().map(strip_undefined).collect()
}

/// Build the document that will be stored for `doc`: a scrubbed copy with an
/// `_id` in first position, generated when the caller supplied none.
pub fn prepare_insert(doc: &Document) -> Document {
    let mut cleaned = strip_undefined(doc.clone());
    let id = cleaned
        .remove("_id")
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

    let mut prepared = Document::new();
    prepared.insert("_id", id);
    prepared.extend(cleaned);
    prepared
}

pub fn update_count(raw: RawUpdateResult) -> UpdateCount {
    UpdateCount::new(raw.matched_count, raw.modified_count)
}

pub fn delete_count(raw: RawDeleteResult) -> u64 {
    raw.deleted_count
}

/// Turn a "file not found" failure into `None`; other errors pass through.
pub fn found_or_none<T>(result: AlbatrossResult<T>) -> AlbatrossResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_file_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Read a GridFS files-collection document, filling the optional fields with
/// their defaults.
pub fn file_info(file: &Document) -> AlbatrossResult<FileInfo> {
    let id = file
        .get_object_id("_id")
        .map_err(|_| AlbatrossError::InvalidId(format!("{:?}", file.get("_id"))))?;

    let upload_date = file
        .get_datetime("uploadDate")
        .map(|date| date.to_chrono())
        .map_err(|e| AlbatrossError::Operation(format!("File {} has no upload date: {}", id, e)))?;

    Ok(FileInfo {
        id,
        md5: file.get_str("md5").ok().map(str::to_string),
        length: integer(file.get("length")),
        chunk_size: integer(file.get("chunkSize")) as u32,
        upload_date,
        content_type: file.get_str("contentType").unwrap_or_default().to_string(),
        filename: file.get_str("filename").unwrap_or_default().to_string(),
        metadata: file.get_document("metadata").cloned().unwrap_or_default(),
    })
}

fn integer(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        Some(Bson::Double(n)) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}
