//! Driver backed by the official `mongodb` crate.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::future::BoxFuture;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use futures::{FutureExt, TryStreamExt};
use mongodb::gridfs::GridFsBucket;
use mongodb::options::{
    self, CountOptions, DeleteOptions, FindOneAndUpdateOptions, FindOneOptions,
    FindOptions, GridFsBucketOptions, GridFsUploadOptions, UpdateOptions,
};
use mongodb::{Client, ClientSession, Database, IndexModel};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{Driver, DriverHandle, DriverSession, RawBucket, RawCollection};
use crate::error::{AlbatrossError, AlbatrossResult};
use crate::protocol::{
    FileStream, Hint, IndexOptions, OperationOptions, RawDeleteResult, RawUpdateResult,
    ReturnDocument, UploadOptions,
};

/// Size of the buffer used to feed uploads into GridFS.
const UPLOAD_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

impl MongoDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for MongoDriver {
    type Handle = MongoHandle;

    async fn connect(&self, uri: &str) -> AlbatrossResult<MongoHandle> {
        let client = Client::with_uri_str(uri).await?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database("test"));

        // The driver connects lazily; one round trip proves the deployment is reachable.
        db.run_command(doc! { "ping": 1 }).await?;
        debug!(database = db.name(), "MongoDB client connected");

        Ok(MongoHandle {
            client,
            db,
            live: AtomicBool::new(true),
        })
    }
}

pub struct MongoHandle {
    client: Client,
    db: Database,
    live: AtomicBool,
}

impl MongoHandle {
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl DriverHandle for MongoHandle {
    type Session = ClientSession;
    type Collection = MongoCollection;
    type Bucket = MongoBucket;

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> AlbatrossResult<()> {
        self.db.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> MongoCollection {
        MongoCollection {
            inner: self.db.collection(name),
        }
    }

    fn bucket(&self, name: &str) -> MongoBucket {
        let mut options = GridFsBucketOptions::default();
        options.bucket_name = Some(name.to_string());

        MongoBucket {
            bucket: self.db.gridfs_bucket(options),
            files: self.db.collection(&format!("{}.files", name)),
        }
    }

    async fn start_session(&self) -> AlbatrossResult<ClientSession> {
        Ok(self.client.start_session().await?)
    }

    async fn close(&self, force: bool) -> AlbatrossResult<()> {
        self.live.store(false, Ordering::SeqCst);
        self.client.clone().shutdown().immediate(force).await;
        Ok(())
    }
}

/// Carries a non-driver error through the driver's transaction runner.
struct Carried(Mutex<Option<AlbatrossError>>);

fn into_driver_error(err: AlbatrossError) -> mongodb::error::Error {
    match err {
        // Keep driver errors as they are so their transient labels drive retries.
        AlbatrossError::Database(err) => err,
        other => mongodb::error::Error::custom(Carried(Mutex::new(Some(other)))),
    }
}

fn from_driver_error(err: mongodb::error::Error) -> AlbatrossError {
    if let Some(inner) = err.get_custom::<Carried>().and_then(|carried| carried.0.lock().take()) {
        return inner;
    }
    AlbatrossError::Database(err)
}

#[async_trait]
impl DriverSession for ClientSession {
    async fn with_transaction<T, F>(&mut self, mut body: F) -> AlbatrossResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnMut(&'s mut Self) -> BoxFuture<'s, AlbatrossResult<T>> + Send,
    {
        self.start_transaction()
            .and_run((), |session, _| {
                let attempt = body(session);
                async move { attempt.await.map_err(into_driver_error) }.boxed()
            })
            .await
            .map_err(from_driver_error)
    }

    fn end(self) {
        drop(self);
    }
}

fn driver_hint(hint: Option<Hint>) -> Option<options::Hint> {
    hint.map(|hint| match hint {
        Hint::Keys(keys) => options::Hint::Keys(keys),
        Hint::Name(name) => options::Hint::Name(name),
    })
}

pub struct MongoCollection {
    inner: mongodb::Collection<Document>,
}

#[async_trait]
impl RawCollection for MongoCollection {
    type Session = ClientSession;

    async fn find_one(
        &self,
        filter: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<Option<Document>> {
        let mut opts = FindOneOptions::default();
        opts.projection = options.projection;
        opts.sort = options.sort;
        opts.skip = options.skip;
        opts.hint = driver_hint(options.hint);

        let action = self.inner.find_one(filter).with_options(opts);
        let found = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(found)
    }

    async fn find(
        &self,
        filter: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<Vec<Document>> {
        let mut opts = FindOptions::default();
        opts.projection = options.projection;
        opts.sort = options.sort;
        opts.skip = options.skip;
        opts.limit = options.limit;
        opts.hint = driver_hint(options.hint);

        let action = self.inner.find(filter).with_options(opts);
        let docs: Vec<Document> = match options.session {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                cursor.stream(session).try_collect().await?
            }
            None => action.await?.try_collect().await?,
        };
        Ok(docs)
    }

    async fn count(
        &self,
        filter: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<u64> {
        let mut opts = CountOptions::default();
        opts.skip = options.skip;
        opts.limit = options.limit.map(i64::unsigned_abs);
        opts.hint = driver_hint(options.hint);

        let action = self.inner.count_documents(filter).with_options(opts);
        let count = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(count)
    }

    async fn distinct(
        &self,
        field: &str,
        filter: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<Vec<Bson>> {
        let action = self.inner.distinct(field, filter);
        let values = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(values)
    }

    async fn insert_one(
        &self,
        doc: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<()> {
        let action = self.inner.insert_one(doc);
        match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(())
    }

    async fn insert_many(
        &self,
        docs: Vec<Document>,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<()> {
        let action = self.inner.insert_many(docs);
        match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(())
    }

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<Option<Document>> {
        let mut opts = FindOneAndUpdateOptions::default();
        opts.projection = options.projection;
        opts.sort = options.sort;
        opts.upsert = options.upsert;
        opts.hint = driver_hint(options.hint);
        opts.return_document = options.return_document.map(|which| match which {
            ReturnDocument::Before => options::ReturnDocument::Before,
            ReturnDocument::After => options::ReturnDocument::After,
        });

        let action = self.inner.find_one_and_update(filter, update).with_options(opts);
        let found = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(found)
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<RawUpdateResult> {
        let mut opts = UpdateOptions::default();
        opts.upsert = options.upsert;
        opts.hint = driver_hint(options.hint);

        let action = self.inner.update_one(filter, update).with_options(opts);
        let result = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(RawUpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<RawUpdateResult> {
        let mut opts = UpdateOptions::default();
        opts.upsert = options.upsert;
        opts.hint = driver_hint(options.hint);

        let action = self.inner.update_many(filter, update).with_options(opts);
        let result = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(RawUpdateResult {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(
        &self,
        filter: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<RawDeleteResult> {
        let mut opts = DeleteOptions::default();
        opts.hint = driver_hint(options.hint);

        let action = self.inner.delete_one(filter).with_options(opts);
        let result = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(RawDeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn delete_many(
        &self,
        filter: Document,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<RawDeleteResult> {
        let mut opts = DeleteOptions::default();
        opts.hint = driver_hint(options.hint);

        let action = self.inner.delete_many(filter).with_options(opts);
        let result = match options.session {
            Some(session) => action.session(session).await?,
            None => action.await?,
        };
        Ok(RawDeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions<'_, ClientSession>,
    ) -> AlbatrossResult<Vec<Document>> {
        let mut opts = options::AggregateOptions::default();
        opts.hint = driver_hint(options.hint);

        let action = self.inner.aggregate(pipeline).with_options(opts);
        let docs: Vec<Document> = match options.session {
            Some(session) => {
                let mut cursor = action.session(&mut *session).await?;
                cursor.stream(session).try_collect().await?
            }
            None => action.await?.try_collect().await?,
        };
        Ok(docs)
    }

    async fn create_index(&self, keys: Document, options: IndexOptions) -> AlbatrossResult<String> {
        let mut opts = options::IndexOptions::default();
        opts.name = options.name;
        opts.unique = options.unique;
        opts.sparse = options.sparse;
        opts.expire_after = options.expire_after;

        let model = IndexModel::builder().keys(keys).options(opts).build();
        let created = self.inner.create_index(model).await?;
        Ok(created.index_name)
    }
}

pub struct MongoBucket {
    bucket: GridFsBucket,
    files: mongodb::Collection<Document>,
}

#[async_trait]
impl RawBucket for MongoBucket {
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        options: UploadOptions,
    ) -> AlbatrossResult<Document> {
        let id = options.id.unwrap_or_else(ObjectId::new);
        let mut upload_options = GridFsUploadOptions::default();
        upload_options.chunk_size_bytes = options.chunk_size_bytes;
        upload_options.metadata = options.metadata;

        let mut upload = self
            .bucket
            .open_upload_stream(options.filename.as_deref().unwrap_or_default())
            .id(Bson::ObjectId(id))
            .with_options(upload_options)
            .await?;

        let mut digest = md5::Context::new();
        let mut buffer = vec![0u8; UPLOAD_BUFFER];
        let copied: std::io::Result<()> = async {
            loop {
                let read = source.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                digest.consume(&buffer[..read]);
                upload.write_all(&buffer[..read]).await?;
            }
            upload.close().await
        }
        .await;

        if let Err(err) = copied {
            if let Err(abort_err) = upload.abort().await {
                warn!(error = %abort_err, "Failed to abort GridFS upload");
            }
            return Err(err.into());
        }

        let mut extra = doc! { "md5": format!("{:x}", digest.compute()) };
        if let Some(content_type) = options.content_type {
            extra.insert("contentType", content_type);
        }
        self.files
            .update_one(doc! { "_id": id }, doc! { "$set": extra })
            .await?;

        self.files
            .find_one(doc! { "_id": id })
            .await?
            .ok_or_else(|| AlbatrossError::FileNotFound(id.to_hex()))
    }

    async fn download(&self, id: ObjectId) -> AlbatrossResult<(Document, FileStream)> {
        let info = self
            .files
            .find_one(doc! { "_id": id })
            .await?
            .ok_or_else(|| AlbatrossError::FileNotFound(id.to_hex()))?;

        let stream = self.bucket.open_download_stream(Bson::ObjectId(id)).await?;
        Ok((info, Box::pin(stream)))
    }

    async fn delete(&self, id: ObjectId) -> AlbatrossResult<()> {
        self.bucket.delete(Bson::ObjectId(id)).await?;
        Ok(())
    }
}
