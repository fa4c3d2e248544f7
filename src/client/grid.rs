use std::future::Future;
use std::sync::Arc;

use bson::{oid::ObjectId, Document};
use futures::io::{AsyncRead, Cursor};

use super::connection::ConnectionManager;
use super::tracer::OperationTracer;
use crate::driver::{BucketOf, Driver, DriverHandle, RawBucket};
use crate::error::AlbatrossResult;
use crate::protocol::normalize::{file_info, found_or_none};
use crate::protocol::{Download, FileInfo, FileStream, UploadOptions};

/// File storage under one bucket name.
///
/// The driver bucket is rebuilt from the current handle on every call.
pub struct Grid<D: Driver> {
    name: String,
    manager: Arc<ConnectionManager<D>>,
    tracer: OperationTracer,
}

impl<D: Driver> Grid<D> {
    pub(crate) fn new(name: &str, manager: Arc<ConnectionManager<D>>) -> Self {
        Self {
            name: name.to_string(),
            manager,
            tracer: OperationTracer::new(format!("grid-{}", name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self, hex: Option<&str>) -> AlbatrossResult<ObjectId> {
        super::object_id(hex)
    }

    async fn dispatch<T, F, Fut>(&self, op: &str, call: F) -> AlbatrossResult<T>
    where
        F: FnOnce(BucketOf<D>) -> Fut,
        Fut: Future<Output = AlbatrossResult<T>>,
    {
        let outcome = match self.manager.acquire().await {
            Ok(handle) => call(handle.bucket(&self.name)).await,
            Err(err) => Err(err),
        };
        self.tracer.after(op, &outcome);
        outcome
    }

    /// Store everything `source` yields as one file.
    pub async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        options: UploadOptions,
    ) -> AlbatrossResult<FileInfo> {
        self.tracer.before("upload", &options);

        self.dispatch("upload", |raw| async move {
            let stored = raw.upload(source, options).await?;
            file_info(&stored)
        })
        .await
    }

    pub async fn upload_bytes(&self, data: &[u8], options: UploadOptions) -> AlbatrossResult<FileInfo> {
        let mut source = Cursor::new(data);
        self.upload(&mut source, options).await
    }

    /// Open a stored file. Resolves to `None` when no file has this id.
    pub async fn download(&self, id: ObjectId) -> AlbatrossResult<Option<Download>> {
        self.tracer.before("download", &id);

        self.dispatch("download", |raw| async move {
            found_or_none(raw.download(id).await)?
                .map(into_download)
                .transpose()
        })
        .await
    }

    pub async fn delete(&self, id: ObjectId) -> AlbatrossResult<()> {
        self.tracer.before("delete", &id);

        self.dispatch("delete", |raw| async move { raw.delete(id).await })
            .await
    }
}

fn into_download((stored, stream): (Document, FileStream)) -> AlbatrossResult<Download> {
    Ok(Download {
        info: file_info(&stored)?,
        stream,
    })
}
