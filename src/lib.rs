//! Albatross: a resilient MongoDB client.
//!
//! The client connects lazily, heals itself after a lost connection, bounds
//! pings with a timeout and wraps transactions so their session always ends.
//! Collections and file buckets are reached through per-name façades that
//! trace every call and return plain result shapes.
//!
//! ```no_run
//! use albatross::{doc, Albatross};
//!
//! # async fn example() -> albatross::AlbatrossResult<()> {
//! let client = Albatross::new("mongodb://localhost:27017/app");
//! let users = client.collection("users");
//!
//! let stored = users.insert(&doc! { "name": "ada", "born": 1815 }, None).await?;
//! let count = users
//!     .update_one(doc! { "_id": stored.get("_id").cloned() }, doc! { "$set": { "born": 1815 } }, None)
//!     .await?;
//! assert_eq!((count.matched, count.modified), (1, 0));
//!
//! client.close(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;

pub use client::{Albatross, AlbatrossBuilder, Collection, Grid, SessionOptions, DEFAULT_BUCKET};
pub use config::ClientConfig;
pub use driver::{Driver, DriverHandle, DriverSession, MemoryDriver, MongoDriver, RawBucket, RawCollection};
pub use error::{AlbatrossError, AlbatrossResult};
pub use protocol::{
    Download, FileInfo, FileStream, Hint, IndexOptions, OperationOptions, ReturnDocument,
    UpdateCount, UploadOptions,
};

pub use bson::{self, doc, oid::ObjectId, Binary, Bson, DateTime, Decimal128, Document, Timestamp};
