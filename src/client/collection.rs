use std::future::Future;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document};

use super::connection::ConnectionManager;
use super::tracer::OperationTracer;
use super::SessionOptions;
use crate::driver::{CollectionOf, Driver, DriverHandle, RawCollection};
use crate::error::AlbatrossResult;
use crate::protocol::normalize::{
    delete_count, prepare_insert, strip_all, strip_undefined, update_count,
};
use crate::protocol::{IndexOptions, UpdateCount};

/// Operations on one named collection.
///
/// The façade never holds a driver collection: each call acquires the
/// current handle and resolves the collection on it, so calls made after a
/// reconnect go to the new connection.
pub struct Collection<D: Driver> {
    name: String,
    manager: Arc<ConnectionManager<D>>,
    tracer: OperationTracer,
}

impl<D: Driver> Collection<D> {
    pub(crate) fn new(name: &str, manager: Arc<ConnectionManager<D>>) -> Self {
        Self {
            name: name.to_string(),
            manager,
            tracer: OperationTracer::new(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse `hex` into an identifier, or generate a new one.
    pub fn id(&self, hex: Option<&str>) -> AlbatrossResult<ObjectId> {
        super::object_id(hex)
    }

    async fn dispatch<T, F, Fut>(&self, op: &str, call: F) -> AlbatrossResult<T>
    where
        F: FnOnce(CollectionOf<D>) -> Fut,
        Fut: Future<Output = AlbatrossResult<T>>,
    {
        let outcome = match self.manager.acquire().await {
            Ok(handle) => call(handle.collection(&self.name)).await,
            Err(err) => Err(err),
        };
        self.tracer.after(op, &outcome);
        outcome
    }

    pub async fn find_one<'s>(
        &self,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Option<Document>> {
        let filter = strip_undefined(filter);
        let options = options.into().unwrap_or_default();
        self.tracer.before("find_one", &(&filter, &options));

        self.dispatch("find_one", |raw| async move { raw.find_one(filter, options).await })
            .await
    }

    pub async fn find_by_id<'s>(
        &self,
        id: impl Into<Bson>,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Option<Document>> {
        self.find_one(doc! { "_id": id.into() }, options).await
    }

    pub async fn find<'s>(
        &self,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Vec<Document>> {
        let filter = strip_undefined(filter);
        let options = options.into().unwrap_or_default();
        self.tracer.before("find", &(&filter, &options));

        self.dispatch("find", |raw| async move { raw.find(filter, options).await })
            .await
    }

    pub async fn count<'s>(
        &self,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<u64> {
        let filter = strip_undefined(filter);
        let options = options.into().unwrap_or_default();
        self.tracer.before("count", &(&filter, &options));

        self.dispatch("count", |raw| async move { raw.count(filter, options).await })
            .await
    }

    pub async fn distinct<'s>(
        &self,
        field: &str,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Vec<Bson>> {
        let filter = strip_undefined(filter);
        let options = options.into().unwrap_or_default();
        self.tracer.before("distinct", &(field, &filter, &options));

        self.dispatch("distinct", |raw| async move {
            raw.distinct(field, filter, options).await
        })
        .await
    }

    /// Whether any document matches `filter`.
    ///
    /// Fetches at most one matching `_id` instead of counting; pass a hint in
    /// `options` to steer the lookup onto an index.
    pub async fn exists<'s>(
        &self,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<bool> {
        let filter = strip_undefined(filter);
        let mut options = options.into().unwrap_or_default();
        options.projection = Some(doc! { "_id": 1 });
        self.tracer.before("exists", &(&filter, &options));

        self.dispatch("exists", |raw| async move {
            raw.find_one(filter, options).await.map(|found| found.is_some())
        })
        .await
    }

    /// Insert one document and return what was stored: a fresh copy of
    /// `doc` without absent-valued keys and with its `_id` filled in.
    pub async fn insert<'s>(
        &self,
        doc: &Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Document> {
        let prepared = prepare_insert(doc);
        let options = options.into().unwrap_or_default();
        self.tracer.before("insert", &(&prepared, &options));

        let stored = prepared.clone();
        self.dispatch("insert", |raw| async move { raw.insert_one(stored, options).await })
            .await?;
        Ok(prepared)
    }

    /// Insert several documents; the result lines up with `docs`.
    pub async fn insert_many<'s>(
        &self,
        docs: &[Document],
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Vec<Document>> {
        let prepared: Vec<Document> = docs.iter().map(prepare_insert).collect();
        let options = options.into().unwrap_or_default();
        self.tracer.before("insert_many", &(&prepared, &options));

        let stored = prepared.clone();
        self.dispatch("insert_many", |raw| async move {
            raw.insert_many(stored, options).await
        })
        .await?;
        Ok(prepared)
    }

    /// Update the first match and return it, before or after the update as
    /// `options.return_document` asks. `None` when nothing matched and no
    /// document was upserted.
    pub async fn find_one_and_update<'s>(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Option<Document>> {
        let filter = strip_undefined(filter);
        let update = strip_undefined(update);
        let options = options.into().unwrap_or_default();
        self.tracer
            .before("find_one_and_update", &(&filter, &update, &options));

        self.dispatch("find_one_and_update", |raw| async move {
            raw.find_one_and_update(filter, update, options).await
        })
        .await
    }

    pub async fn update_one<'s>(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<UpdateCount> {
        let filter = strip_undefined(filter);
        let update = strip_undefined(update);
        let options = options.into().unwrap_or_default();
        self.tracer.before("update_one", &(&filter, &update, &options));

        self.dispatch("update_one", |raw| async move {
            raw.update_one(filter, update, options).await.map(update_count)
        })
        .await
    }

    pub async fn update_many<'s>(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<UpdateCount> {
        let filter = strip_undefined(filter);
        let update = strip_undefined(update);
        let options = options.into().unwrap_or_default();
        self.tracer.before("update_many", &(&filter, &update, &options));

        self.dispatch("update_many", |raw| async move {
            raw.update_many(filter, update, options).await.map(update_count)
        })
        .await
    }

    pub async fn delete_one<'s>(
        &self,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<u64> {
        let filter = strip_undefined(filter);
        let options = options.into().unwrap_or_default();
        self.tracer.before("delete_one", &(&filter, &options));

        self.dispatch("delete_one", |raw| async move {
            raw.delete_one(filter, options).await.map(delete_count)
        })
        .await
    }

    pub async fn delete_many<'s>(
        &self,
        filter: Document,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<u64> {
        let filter = strip_undefined(filter);
        let options = options.into().unwrap_or_default();
        self.tracer.before("delete_many", &(&filter, &options));

        self.dispatch("delete_many", |raw| async move {
            raw.delete_many(filter, options).await.map(delete_count)
        })
        .await
    }

    pub async fn aggregate<'s>(
        &self,
        pipeline: Vec<Document>,
        options: impl Into<Option<SessionOptions<'s, D>>>,
    ) -> AlbatrossResult<Vec<Document>> {
        let pipeline = strip_all(pipeline);
        let options = options.into().unwrap_or_default();
        self.tracer.before("aggregate", &(&pipeline, &options));

        self.dispatch("aggregate", |raw| async move {
            raw.aggregate(pipeline, options).await
        })
        .await
    }

    /// Create an index and return its name.
    pub async fn create_index(&self, keys: Document, options: IndexOptions) -> AlbatrossResult<String> {
        self.tracer.before("create_index", &(&keys, &options));

        self.dispatch("create_index", |raw| async move {
            raw.create_index(keys, options).await
        })
        .await
    }
}
