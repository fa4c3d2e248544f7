//! In-process driver.
//!
//! Data lives in a [`MemoryStore`] per URI, shared by every handle connected
//! to that URI, so a reconnect sees what earlier handles wrote. Closing a
//! handle only marks it dead; the store outlives it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, DateTime, Document};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::io::{AsyncRead, AsyncReadExt, Cursor};
use parking_lot::RwLock;
use tracing::debug;

use super::{Driver, DriverHandle, DriverSession, RawBucket, RawCollection};
use crate::error::{AlbatrossError, AlbatrossResult};
use crate::protocol::{
    FileStream, Hint, IndexOptions, OperationOptions, RawDeleteResult, RawUpdateResult,
    ReturnDocument, UploadOptions,
};

pub mod query;

use query::{
    apply_update, compare_by, get_path, matches, project, run_pipeline, upsert_seed, values_equal,
};

const DEFAULT_CHUNK_SIZE: u32 = 255 * 1024;

/// Driver whose deployments live in this process.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    deployments: Arc<DashMap<String, Arc<MemoryStore>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind `uri`, created empty on first use.
    pub fn store(&self, uri: &str) -> Arc<MemoryStore> {
        self.deployments
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::default()))
            .clone()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    type Handle = MemoryHandle;

    async fn connect(&self, uri: &str) -> AlbatrossResult<MemoryHandle> {
        if uri.trim().is_empty() {
            return Err(AlbatrossError::Config("connection string is empty".to_string()));
        }
        debug!(uri, "Opening in-memory deployment");
        Ok(MemoryHandle::new(self.store(uri)))
    }
}

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    keys: Document,
    unique: bool,
    sparse: bool,
}

impl IndexSpec {
    fn primary() -> Self {
        let mut keys = Document::new();
        keys.insert("_id", 1);
        Self {
            name: "_id_".to_string(),
            keys,
            unique: true,
            sparse: false,
        }
    }
}

/// `{a: 1, b: -1}` is named `a_1_b_-1`.
fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| match direction {
            Bson::String(kind) => format!("{}_{}", field, kind),
            Bson::Double(n) => format!("{}_{}", field, n),
            other => format!("{}_{}", field, other),
        })
        .collect::<Vec<_>>()
        .join("_")
}

struct StoredFile {
    info: Document,
    data: Vec<u8>,
}

/// Committed state of one in-memory deployment.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    indexes: RwLock<HashMap<String, Vec<IndexSpec>>>,
    buckets: RwLock<HashMap<String, HashMap<ObjectId, StoredFile>>>,
    sessions: AtomicUsize,
}

impl MemoryStore {
    /// Sessions started and not yet ended.
    pub fn open_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Committed documents of `collection`, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of files stored in `bucket`.
    pub fn file_count(&self, bucket: &str) -> usize {
        self.buckets.read().get(bucket).map_or(0, HashMap::len)
    }

    fn indexes_for(&self, collection: &str) -> Vec<IndexSpec> {
        let mut specs = vec![IndexSpec::primary()];
        if let Some(defined) = self.indexes.read().get(collection) {
            specs.extend(defined.iter().cloned());
        }
        specs
    }
}

/// Key of `doc` under `index`, or `None` when a sparse index skips it.
fn index_key(doc: &Document, index: &IndexSpec) -> Option<Vec<Bson>> {
    let values: Vec<Option<&Bson>> = index.keys.keys().map(|path| get_path(doc, path)).collect();
    if index.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    Some(
        values
            .into_iter()
            .map(|value| value.cloned().unwrap_or(Bson::Null))
            .collect(),
    )
}

fn same_key(a: &[Bson], b: &[Bson]) -> bool {
    a.iter().zip(b).all(|(a, b)| values_equal(a, b))
}

fn duplicate_key(collection: &str, index: &IndexSpec, key: &[Bson]) -> AlbatrossError {
    AlbatrossError::Operation(format!(
        "E11000 duplicate key error collection: {} index: {} dup key: {:?}",
        collection, index.name, key
    ))
}

/// Fails when any of `candidates`, already stored in `docs`, shares a unique
/// key with another document of `docs`.
fn check_unique(
    collection: &str,
    docs: &[Document],
    candidates: &[Document],
    indexes: &[IndexSpec],
) -> AlbatrossResult<()> {
    for index in indexes.iter().filter(|index| index.unique) {
        let mut holders: Vec<(Vec<Bson>, usize)> = candidates
            .iter()
            .filter_map(|candidate| index_key(candidate, index))
            .map(|key| (key, 0))
            .collect();
        if holders.is_empty() {
            continue;
        }

        for key in docs.iter().filter_map(|doc| index_key(doc, index)) {
            for (candidate, count) in holders.iter_mut() {
                if same_key(candidate, &key) {
                    *count += 1;
                }
            }
        }
        if let Some((key, _)) = holders.iter().find(|(_, count)| *count > 1) {
            return Err(duplicate_key(collection, index, key));
        }
    }

    Ok(())
}

/// Keys held under each unique index, so a batch can be admitted one
/// document at a time.
struct UniqueKeys<'a> {
    collection: &'a str,
    held: Vec<(&'a IndexSpec, Vec<Vec<Bson>>)>,
}

impl<'a> UniqueKeys<'a> {
    fn new(collection: &'a str, docs: &[Document], indexes: &'a [IndexSpec]) -> Self {
        let held = indexes
            .iter()
            .filter(|index| index.unique)
            .map(|index| (index, docs.iter().filter_map(|doc| index_key(doc, index)).collect()))
            .collect();
        Self { collection, held }
    }

    /// Record the keys of `doc`, or fail without recording any when one is
    /// already held.
    fn admit(&mut self, doc: &Document) -> AlbatrossResult<()> {
        let mut keys = Vec::with_capacity(self.held.len());
        for (index, held) in &self.held {
            let key = index_key(doc, index);
            if let Some(key) = &key {
                if held.iter().any(|other| same_key(other, key)) {
                    return Err(duplicate_key(self.collection, index, key));
                }
            }
            keys.push(key);
        }

        for ((_, held), key) in self.held.iter_mut().zip(keys) {
            held.extend(key);
        }
        Ok(())
    }
}

/// What one write did to a collection, keyed by `_id`.
#[derive(Debug, Default)]
struct Changes {
    inserted: Vec<Document>,
    updated: Vec<Document>,
    removed: Vec<Bson>,
}

impl Changes {
    fn between(before: &[Document], after: &[Document]) -> Self {
        let mut untouched: HashMap<String, &Document> = before
            .iter()
            .filter_map(|doc| doc.get("_id").map(|id| (id.to_string(), doc)))
            .collect();

        let mut changes = Changes::default();
        for doc in after {
            match doc.get("_id").and_then(|id| untouched.remove(&id.to_string())) {
                Some(previous) if previous == doc => {}
                Some(_) => changes.updated.push(doc.clone()),
                None => changes.inserted.push(doc.clone()),
            }
        }
        changes.removed = untouched
            .into_values()
            .filter_map(|doc| doc.get("_id").cloned())
            .collect();
        changes
    }

    fn written(&self) -> impl Iterator<Item = &Document> {
        self.inserted.iter().chain(&self.updated)
    }

    /// Apply onto `docs`. An update to a document that is no longer there is
    /// dropped; inserts are appended and left to the unique check.
    fn replay(&self, docs: &mut Vec<Document>) {
        let removed: HashSet<String> = self.removed.iter().map(Bson::to_string).collect();
        docs.retain(|doc| {
            doc.get("_id")
                .map_or(true, |id| !removed.contains(&id.to_string()))
        });

        let positions: HashMap<String, usize> = docs
            .iter()
            .enumerate()
            .filter_map(|(p, doc)| doc.get("_id").map(|id| (id.to_string(), p)))
            .collect();
        for doc in &self.updated {
            let position = doc.get("_id").and_then(|id| positions.get(&id.to_string()));
            if let Some(&p) = position {
                docs[p] = doc.clone();
            }
        }

        docs.extend(self.inserted.iter().cloned());
    }
}

/// Run `f` on a working copy of `docs`, keeping the result only when `f`
/// succeeds and every unique index still holds.
fn apply<T>(
    collection: &str,
    docs: &mut Vec<Document>,
    indexes: &[IndexSpec],
    f: impl FnOnce(&mut Vec<Document>) -> AlbatrossResult<T>,
) -> AlbatrossResult<(T, Changes)> {
    let mut working = docs.clone();
    let outcome = f(&mut working)?;
    let changes = Changes::between(docs, &working);
    let written: Vec<Document> = changes.written().cloned().collect();
    check_unique(collection, &working, &written, indexes)?;
    *docs = working;
    Ok((outcome, changes))
}

/// Handle onto a [`MemoryStore`].
pub struct MemoryHandle {
    store: Arc<MemoryStore>,
    live: Arc<AtomicBool>,
}

impl MemoryHandle {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Drop the connection without closing the handle, as a network failure
    /// would. Every later operation on it fails with `NotLive`.
    pub fn sever(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

fn ensure_live(live: &AtomicBool) -> AlbatrossResult<()> {
    if live.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(AlbatrossError::NotLive)
    }
}

#[async_trait]
impl DriverHandle for MemoryHandle {
    type Session = MemorySession;
    type Collection = MemoryCollection;
    type Bucket = MemoryBucket;

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> AlbatrossResult<()> {
        ensure_live(&self.live)
    }

    fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            store: self.store.clone(),
            live: self.live.clone(),
            name: name.to_string(),
        }
    }

    fn bucket(&self, name: &str) -> MemoryBucket {
        MemoryBucket {
            store: self.store.clone(),
            live: self.live.clone(),
            name: name.to_string(),
        }
    }

    async fn start_session(&self) -> AlbatrossResult<MemorySession> {
        ensure_live(&self.live)?;
        self.store.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            store: self.store.clone(),
            transaction: None,
        })
    }

    async fn close(&self, _force: bool) -> AlbatrossResult<()> {
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Private copy of the data a transaction works on, and the writes made to
/// it in order.
struct Snapshot {
    collections: HashMap<String, Vec<Document>>,
    log: HashMap<String, Vec<Changes>>,
}

pub struct MemorySession {
    store: Arc<MemoryStore>,
    transaction: Option<Snapshot>,
}

impl MemorySession {
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn active(&mut self) -> Option<&mut Snapshot> {
        self.transaction.as_mut()
    }

    fn begin(&mut self) -> AlbatrossResult<()> {
        if self.transaction.is_some() {
            return Err(AlbatrossError::Operation("Transaction already in progress".to_string()));
        }
        self.transaction = Some(Snapshot {
            collections: self.store.collections.read().clone(),
            log: HashMap::new(),
        });
        Ok(())
    }

    /// Replays the transaction's writes onto the committed state. Writes made
    /// outside the transaction meanwhile are kept; nothing is stored when the
    /// merged result breaks a unique index.
    fn commit(&mut self) -> AlbatrossResult<()> {
        let Some(snapshot) = self.transaction.take() else {
            return Ok(());
        };

        let mut collections = self.store.collections.write();
        let mut merged = Vec::with_capacity(snapshot.log.len());
        for (name, log) in snapshot.log {
            let mut docs = collections.get(&name).cloned().unwrap_or_default();
            for changes in &log {
                changes.replay(&mut docs);
            }
            let written: Vec<Document> = log.iter().flat_map(Changes::written).cloned().collect();
            check_unique(&name, &docs, &written, &self.store.indexes_for(&name))?;
            merged.push((name, docs));
        }

        collections.extend(merged);
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.store.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DriverSession for MemorySession {
    async fn with_transaction<T, F>(&mut self, mut body: F) -> AlbatrossResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnMut(&'s mut Self) -> BoxFuture<'s, AlbatrossResult<T>> + Send,
    {
        self.begin()?;
        match body(self).await {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.transaction = None;
                Err(err)
            }
        }
    }

    fn end(self) {}
}

pub struct MemoryCollection {
    store: Arc<MemoryStore>,
    live: Arc<AtomicBool>,
    name: String,
}

impl MemoryCollection {
    fn read<T>(
        &self,
        session: Option<&mut MemorySession>,
        f: impl FnOnce(&[Document]) -> AlbatrossResult<T>,
    ) -> AlbatrossResult<T> {
        ensure_live(&self.live)?;

        if let Some(snapshot) = session.and_then(MemorySession::active) {
            let docs = snapshot.collections.get(&self.name).map(Vec::as_slice);
            return f(docs.unwrap_or_default());
        }

        let collections = self.store.collections.read();
        f(collections.get(&self.name).map(Vec::as_slice).unwrap_or_default())
    }

    fn write<T>(
        &self,
        session: Option<&mut MemorySession>,
        f: impl FnOnce(&mut Vec<Document>) -> AlbatrossResult<T>,
    ) -> AlbatrossResult<T> {
        ensure_live(&self.live)?;

        if let Some(snapshot) = session.and_then(MemorySession::active) {
            let indexes = self.store.indexes_for(&self.name);
            let docs = snapshot.collections.entry(self.name.clone()).or_default();
            let (outcome, changes) = apply(&self.name, docs, &indexes, f)?;
            snapshot.log.entry(self.name.clone()).or_default().push(changes);
            return Ok(outcome);
        }

        // Indexes are read under the collection lock so `create_index` cannot
        // slip in between.
        let mut collections = self.store.collections.write();
        let indexes = self.store.indexes_for(&self.name);
        let docs = collections.entry(self.name.clone()).or_default();
        apply(&self.name, docs, &indexes, f).map(|(outcome, _)| outcome)
    }

    fn check_hint(&self, hint: Option<&Hint>) -> AlbatrossResult<()> {
        let Some(hint) = hint else {
            return Ok(());
        };

        let known = self.store.indexes_for(&self.name).iter().any(|index| match hint {
            Hint::Name(name) => &index.name == name,
            Hint::Keys(keys) => &index.keys == keys,
        });
        if known {
            Ok(())
        } else {
            Err(AlbatrossError::Operation(
                "hint provided does not correspond to an existing index".to_string(),
            ))
        }
    }
}

/// Indices of the documents matching `filter`, in `sort` order when given.
fn select(docs: &[Document], filter: &Document, sort: Option<&Document>) -> AlbatrossResult<Vec<usize>> {
    let mut positions = Vec::new();
    for (position, doc) in docs.iter().enumerate() {
        if matches(doc, filter)? {
            positions.push(position);
        }
    }

    if let Some(sort) = sort {
        positions.sort_by(|&a, &b| compare_by(&docs[a], &docs[b], sort));
    }

    Ok(positions)
}

fn window(positions: Vec<usize>, skip: Option<u64>, limit: Option<i64>) -> Vec<usize> {
    let skipped = positions.into_iter().skip(skip.unwrap_or(0) as usize);
    match limit.map(i64::unsigned_abs) {
        Some(0) | None => skipped.collect(),
        Some(n) => skipped.take(n as usize).collect(),
    }
}

fn shape(doc: &Document, projection: Option<&Document>) -> AlbatrossResult<Document> {
    match projection {
        Some(projection) => project(doc, projection),
        None => Ok(doc.clone()),
    }
}

fn with_id(doc: Document) -> Document {
    if doc.contains_key("_id") {
        return doc;
    }
    let mut prepared = Document::new();
    prepared.insert("_id", ObjectId::new());
    prepared.extend(doc);
    prepared
}

fn upsert_document(filter: &Document, update: &Document) -> AlbatrossResult<Document> {
    let mut seed = upsert_seed(filter)?;
    apply_update(&mut seed, update, true)?;
    Ok(with_id(seed))
}

#[async_trait]
impl RawCollection for MemoryCollection {
    type Session = MemorySession;

    async fn find_one(
        &self,
        filter: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<Option<Document>> {
        self.check_hint(options.hint.as_ref())?;
        self.read(options.session, |docs| {
            let positions = select(docs, &filter, options.sort.as_ref())?;
            window(positions, options.skip, Some(1))
                .first()
                .map(|&p| shape(&docs[p], options.projection.as_ref()))
                .transpose()
        })
    }

    async fn find(
        &self,
        filter: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<Vec<Document>> {
        self.check_hint(options.hint.as_ref())?;
        self.read(options.session, |docs| {
            let positions = select(docs, &filter, options.sort.as_ref())?;
            window(positions, options.skip, options.limit)
                .into_iter()
                .map(|p| shape(&docs[p], options.projection.as_ref()))
                .collect()
        })
    }

    async fn count(
        &self,
        filter: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<u64> {
        self.check_hint(options.hint.as_ref())?;
        self.read(options.session, |docs| {
            let positions = select(docs, &filter, None)?;
            Ok(window(positions, options.skip, options.limit).len() as u64)
        })
    }

    async fn distinct(
        &self,
        field: &str,
        filter: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<Vec<Bson>> {
        self.read(options.session, |docs| {
            let mut values: Vec<Bson> = Vec::new();
            for p in select(docs, &filter, None)? {
                let found = match get_path(&docs[p], field) {
                    Some(Bson::Array(items)) => items.clone(),
                    Some(value) => vec![value.clone()],
                    None => continue,
                };
                for value in found {
                    if !values.iter().any(|seen| values_equal(seen, &value)) {
                        values.push(value);
                    }
                }
            }
            Ok(values)
        })
    }

    async fn insert_one(
        &self,
        doc: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<()> {
        self.write(options.session, |docs| {
            docs.push(with_id(doc));
            Ok(())
        })
    }

    async fn insert_many(
        &self,
        docs: Vec<Document>,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<()> {
        let indexes = self.store.indexes_for(&self.name);

        // Documents before the first failure stay inserted.
        self.write(options.session, |stored| {
            let mut keys = UniqueKeys::new(&self.name, stored, &indexes);
            for doc in docs {
                let doc = with_id(doc);
                if let Err(err) = keys.admit(&doc) {
                    return Ok(Err(err));
                }
                stored.push(doc);
            }
            Ok(Ok(()))
        })?
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<Option<Document>> {
        self.check_hint(options.hint.as_ref())?;
        let after = options.return_document == Some(ReturnDocument::After);
        let projection = options.projection.as_ref();

        self.write(options.session, |docs| {
            let positions = select(docs, &filter, options.sort.as_ref())?;

            if let Some(&p) = positions.first() {
                let before = docs[p].clone();
                apply_update(&mut docs[p], &update, false)?;
                let returned = if after { &docs[p] } else { &before };
                return shape(returned, projection).map(Some);
            }

            if options.upsert == Some(true) {
                let inserted = upsert_document(&filter, &update)?;
                docs.push(inserted.clone());
                if after {
                    return shape(&inserted, projection).map(Some);
                }
            }

            Ok(None)
        })
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<RawUpdateResult> {
        self.check_hint(options.hint.as_ref())?;
        let upsert = options.upsert == Some(true);
        self.write(options.session, |docs| update_matching(docs, &filter, &update, upsert, false))
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<RawUpdateResult> {
        self.check_hint(options.hint.as_ref())?;
        let upsert = options.upsert == Some(true);
        self.write(options.session, |docs| update_matching(docs, &filter, &update, upsert, true))
    }

    async fn delete_one(
        &self,
        filter: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<RawDeleteResult> {
        self.check_hint(options.hint.as_ref())?;
        self.write(options.session, |docs| {
            let deleted = match select(docs, &filter, None)?.first() {
                Some(&p) => {
                    docs.remove(p);
                    1
                }
                None => 0,
            };
            Ok(RawDeleteResult { deleted_count: deleted })
        })
    }

    async fn delete_many(
        &self,
        filter: Document,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<RawDeleteResult> {
        self.check_hint(options.hint.as_ref())?;
        self.write(options.session, |docs| {
            let before = docs.len();
            let mut failure = None;
            docs.retain(|doc| match matches(doc, &filter) {
                Ok(matched) => !matched,
                Err(err) => {
                    failure.get_or_insert(err);
                    true
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
            Ok(RawDeleteResult {
                deleted_count: (before - docs.len()) as u64,
            })
        })
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions<'_, MemorySession>,
    ) -> AlbatrossResult<Vec<Document>> {
        self.check_hint(options.hint.as_ref())?;
        let docs = self.read(options.session, |docs| Ok(docs.to_vec()))?;
        run_pipeline(docs, &pipeline)
    }

    async fn create_index(&self, keys: Document, options: IndexOptions) -> AlbatrossResult<String> {
        ensure_live(&self.live)?;
        if keys.is_empty() {
            return Err(AlbatrossError::Operation("Index keys cannot be empty".to_string()));
        }

        let spec = IndexSpec {
            name: options.name.unwrap_or_else(|| default_index_name(&keys)),
            keys,
            unique: options.unique.unwrap_or(false),
            sparse: options.sparse.unwrap_or(false),
        };

        // Held until the index is stored so no write lands between the check
        // and the push.
        let collections = self.store.collections.write();

        if let Some(existing) = self.store.indexes_for(&self.name).iter().find(|i| i.name == spec.name) {
            if existing.keys == spec.keys {
                return Ok(spec.name);
            }
            return Err(AlbatrossError::Operation(format!(
                "An existing index has the same name as the requested index: {}",
                spec.name
            )));
        }

        let docs = collections.get(&self.name).map(Vec::as_slice).unwrap_or_default();
        check_unique(&self.name, docs, docs, std::slice::from_ref(&spec))?;

        let name = spec.name.clone();
        self.store
            .indexes
            .write()
            .entry(self.name.clone())
            .or_default()
            .push(spec);
        Ok(name)
    }
}

fn update_matching(
    docs: &mut Vec<Document>,
    filter: &Document,
    update: &Document,
    upsert: bool,
    multi: bool,
) -> AlbatrossResult<RawUpdateResult> {
    let mut positions = select(docs, filter, None)?;
    if !multi {
        positions.truncate(1);
    }

    let mut result = RawUpdateResult {
        matched_count: positions.len() as u64,
        ..RawUpdateResult::default()
    };

    for p in positions {
        let before = docs[p].clone();
        apply_update(&mut docs[p], update, false)?;
        if docs[p] != before {
            result.modified_count += 1;
        }
    }

    if result.matched_count == 0 && upsert {
        let inserted = upsert_document(filter, update)?;
        result.upserted_id = inserted.get("_id").cloned();
        docs.push(inserted);
    }

    Ok(result)
}

pub struct MemoryBucket {
    store: Arc<MemoryStore>,
    live: Arc<AtomicBool>,
    name: String,
}

fn not_found(id: &ObjectId) -> AlbatrossError {
    AlbatrossError::FileNotFound(id.to_hex())
}

#[async_trait]
impl RawBucket for MemoryBucket {
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        options: UploadOptions,
    ) -> AlbatrossResult<Document> {
        ensure_live(&self.live)?;

        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;

        let id = options.id.unwrap_or_else(ObjectId::new);
        let mut info = Document::new();
        info.insert("_id", id);
        info.insert("length", data.len() as i64);
        info.insert("chunkSize", options.chunk_size_bytes.unwrap_or(DEFAULT_CHUNK_SIZE) as i32);
        info.insert("uploadDate", DateTime::now());
        info.insert("md5", format!("{:x}", md5::compute(&data)));
        if let Some(filename) = options.filename {
            info.insert("filename", filename);
        }
        if let Some(content_type) = options.content_type {
            info.insert("contentType", content_type);
        }
        if let Some(metadata) = options.metadata {
            info.insert("metadata", metadata);
        }

        let mut buckets = self.store.buckets.write();
        let files = buckets.entry(self.name.clone()).or_default();
        if files.contains_key(&id) {
            return Err(AlbatrossError::Operation(format!(
                "E11000 duplicate key error collection: {}.files index: _id_",
                self.name
            )));
        }
        files.insert(
            id,
            StoredFile {
                info: info.clone(),
                data,
            },
        );
        Ok(info)
    }

    async fn download(&self, id: ObjectId) -> AlbatrossResult<(Document, FileStream)> {
        ensure_live(&self.live)?;

        let buckets = self.store.buckets.read();
        let file = buckets
            .get(&self.name)
            .and_then(|files| files.get(&id))
            .ok_or_else(|| not_found(&id))?;
        let stream: FileStream = Box::pin(Cursor::new(file.data.clone()));
        Ok((file.info.clone(), stream))
    }

    async fn delete(&self, id: ObjectId) -> AlbatrossResult<()> {
        ensure_live(&self.live)?;

        self.store
            .buckets
            .write()
            .get_mut(&self.name)
            .and_then(|files| files.remove(&id))
            .map(|_| ())
            .ok_or_else(|| not_found(&id))
    }
}
