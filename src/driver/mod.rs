//! Driver collaborator interface.
//!
//! Everything below the client handle (sockets, server selection, wire
//! framing, query execution) belongs to a driver. The client only needs the
//! operations declared here, so any driver that implements these traits can
//! sit under [`Albatross`](crate::Albatross).
//!
//! - [`MongoDriver`] talks to a MongoDB deployment through the `mongodb` crate.
//! - [`MemoryDriver`] keeps data in process, for tests and embedded use.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use futures::future::BoxFuture;
use futures::io::AsyncRead;

use crate::error::AlbatrossResult;
use crate::protocol::{
    FileStream, IndexOptions, OperationOptions, RawDeleteResult, RawUpdateResult, UploadOptions,
};

pub mod memory;
pub mod mongo;

pub use memory::MemoryDriver;
pub use mongo::MongoDriver;

/// Session type of a driver.
pub type SessionOf<D> = <<D as Driver>::Handle as DriverHandle>::Session;

/// Raw collection type of a driver.
pub type CollectionOf<D> = <<D as Driver>::Handle as DriverHandle>::Collection;

/// Raw bucket type of a driver.
pub type BucketOf<D> = <<D as Driver>::Handle as DriverHandle>::Bucket;

#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Handle: DriverHandle;

    /// Open a new client handle for `uri`.
    async fn connect(&self, uri: &str) -> AlbatrossResult<Self::Handle>;
}

/// A live connection to a deployment, bound to its default database.
#[async_trait]
pub trait DriverHandle: Send + Sync + 'static {
    type Session: DriverSession;
    type Collection: RawCollection<Session = Self::Session>;
    type Bucket: RawBucket;

    /// Whether the handle still represents a usable session with the server.
    fn is_live(&self) -> bool;

    /// One `{ ping: 1 }` round trip.
    async fn ping(&self) -> AlbatrossResult<()>;

    fn collection(&self, name: &str) -> Self::Collection;

    fn bucket(&self, name: &str) -> Self::Bucket;

    async fn start_session(&self) -> AlbatrossResult<Self::Session>;

    async fn close(&self, force: bool) -> AlbatrossResult<()>;
}

#[async_trait]
pub trait DriverSession: Send + Sized + 'static {
    /// Run `body` inside a transaction and commit it. The driver decides
    /// whether to retry `body` or the commit on transient failures; the value
    /// of the attempt that committed is returned.
    async fn with_transaction<T, F>(&mut self, body: F) -> AlbatrossResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnMut(&'s mut Self) -> BoxFuture<'s, AlbatrossResult<T>> + Send;

    /// Release the session. Any transaction still open is aborted.
    fn end(self);
}

#[async_trait]
pub trait RawCollection: Send + Sync + 'static {
    type Session: Send;

    async fn find_one(
        &self,
        filter: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<Option<Document>>;

    async fn find(
        &self,
        filter: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<Vec<Document>>;

    async fn count(
        &self,
        filter: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<u64>;

    async fn distinct(
        &self,
        field: &str,
        filter: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<Vec<Bson>>;

    async fn insert_one(
        &self,
        doc: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<()>;

    /// Insert in order; the first failure stops the batch.
    async fn insert_many(
        &self,
        docs: Vec<Document>,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<()>;

    async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<Option<Document>>;

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<RawUpdateResult>;

    async fn update_many(
        &self,
        filter: Document,
        update: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<RawUpdateResult>;

    async fn delete_one(
        &self,
        filter: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<RawDeleteResult>;

    async fn delete_many(
        &self,
        filter: Document,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<RawDeleteResult>;

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: OperationOptions<'_, Self::Session>,
    ) -> AlbatrossResult<Vec<Document>>;

    /// Returns the name of the created (or already existing) index.
    async fn create_index(&self, keys: Document, options: IndexOptions) -> AlbatrossResult<String>;
}

#[async_trait]
pub trait RawBucket: Send + Sync + 'static {
    /// Store everything `source` yields and return the files-collection
    /// document describing it.
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        options: UploadOptions,
    ) -> AlbatrossResult<Document>;

    /// Fails with a file-not-found error when no file has this id.
    async fn download(&self, id: ObjectId) -> AlbatrossResult<(Document, FileStream)>;

    async fn delete(&self, id: ObjectId) -> AlbatrossResult<()>;
}
