//! Albatross client
//!
//! One [`Albatross`] owns one logical connection. It connects lazily on the
//! first operation, reconnects after the connection is lost, and hands out
//! per-name [`Collection`] and [`Grid`] façades that are created once and
//! then reused.

mod builder;
mod collection;
mod connection;
mod grid;
mod health;
mod tracer;
mod transaction;

pub use builder::AlbatrossBuilder;
pub use collection::Collection;
pub use connection::ConnectionManager;
pub use grid::Grid;
pub use health::HealthChecker;
pub use tracer::OperationTracer;
pub use transaction::TransactionRunner;

use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;

use crate::config::ClientConfig;
use crate::driver::{Driver, MongoDriver, SessionOf};
use crate::error::AlbatrossResult;
use crate::protocol::OperationOptions;

/// Operation options whose session type matches driver `D`.
pub type SessionOptions<'s, D> = OperationOptions<'s, SessionOf<D>>;

/// Bucket used by `grid(None)`.
pub const DEFAULT_BUCKET: &str = "fs";

/// Parse `hex` into an identifier, or generate a new one.
pub(crate) fn object_id(hex: Option<&str>) -> AlbatrossResult<ObjectId> {
    match hex {
        Some(hex) => Ok(ObjectId::parse_str(hex)?),
        None => Ok(ObjectId::new()),
    }
}

/// Resilient database client.
///
/// Cloning is cheap; clones share the connection and the façade caches.
pub struct Albatross<D: Driver = MongoDriver> {
    inner: Arc<Inner<D>>,
}

struct Inner<D: Driver> {
    config: ClientConfig,
    manager: Arc<ConnectionManager<D>>,
    health: HealthChecker<D>,
    transactions: TransactionRunner<D>,
    collections: DashMap<String, Arc<Collection<D>>>,
    grids: DashMap<String, Arc<Grid<D>>>,
}

impl<D: Driver> Clone for Albatross<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Albatross<MongoDriver> {
    /// Create a client for a MongoDB connection string. Nothing is opened
    /// until the first operation.
    pub fn new(uri: &str) -> Self {
        Self::with_driver(MongoDriver::new(), ClientConfig::new(uri))
    }

    pub fn builder(uri: &str) -> AlbatrossBuilder {
        AlbatrossBuilder::new(uri)
    }
}

impl<D: Driver> Albatross<D> {
    /// Create a client over any driver.
    pub fn with_driver(driver: D, config: ClientConfig) -> Self {
        let manager = Arc::new(ConnectionManager::new(driver, &config.uri));

        Self {
            inner: Arc::new(Inner {
                health: HealthChecker::new(manager.clone(), config.ping_timeout),
                transactions: TransactionRunner::new(manager.clone()),
                manager,
                config,
                collections: DashMap::new(),
                grids: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<D>> {
        &self.inner.manager
    }

    /// Parse `hex` into an identifier, or generate a new one.
    pub fn id(&self, hex: Option<&str>) -> AlbatrossResult<ObjectId> {
        object_id(hex)
    }

    /// The façade for collection `name`; the same instance for every call
    /// with the same name.
    pub fn collection(&self, name: &str) -> Arc<Collection<D>> {
        self.inner
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name, self.inner.manager.clone())))
            .clone()
    }

    /// The file bucket `name`, `fs` when not given.
    pub fn grid(&self, name: Option<&str>) -> Arc<Grid<D>> {
        let name = name.unwrap_or(DEFAULT_BUCKET);
        self.inner
            .grids
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Grid::new(name, self.inner.manager.clone())))
            .clone()
    }

    /// Open the connection now instead of on the first operation.
    pub async fn connect(&self) -> AlbatrossResult<()> {
        self.inner.manager.acquire().await.map(|_| ())
    }

    /// Round trip to the server. `timeout` falls back to the configured
    /// ping timeout; with neither, waits as long as the round trip takes.
    pub async fn ping(&self, timeout: Option<Duration>) -> AlbatrossResult<()> {
        self.inner.health.ping(timeout).await
    }

    /// Run `body` inside a transaction and return its value once committed.
    /// The value must own its data (`T: 'static`), since drivers box the
    /// transaction future.
    ///
    /// Pass the session to each operation through its options:
    ///
    /// ```no_run
    /// # use albatross::{doc, Albatross, OperationOptions};
    /// # use futures::FutureExt;
    /// # async fn example(client: Albatross) -> albatross::AlbatrossResult<()> {
    /// let users = client.collection("users");
    /// client
    ///     .transaction(|session| {
    ///         let users = users.clone();
    ///         async move {
    ///             let options = OperationOptions::new().session(session);
    ///             users.insert(&doc! { "name": "ada" }, options).await.map(|_| ())
    ///         }
    ///         .boxed()
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn transaction<T, F>(&self, body: F) -> AlbatrossResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnMut(&'s mut SessionOf<D>) -> BoxFuture<'s, AlbatrossResult<T>> + Send,
    {
        self.inner.transactions.run(body).await
    }

    /// Close the connection. The next operation reconnects.
    pub async fn close(&self, force: bool) -> AlbatrossResult<()> {
        if !self.inner.config.close_grace.is_zero() {
            tokio::time::sleep(self.inner.config.close_grace).await;
        }
        debug!(force, "Closing client");
        self.inner.manager.close(force).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn client() -> Albatross<MemoryDriver> {
        Albatross::with_driver(MemoryDriver::new(), ClientConfig::new("memory://unit"))
    }

    #[test]
    fn test_object_id() {
        let generated = object_id(None).unwrap();
        let parsed = object_id(Some(&generated.to_hex())).unwrap();
        assert_eq!(generated, parsed);
        assert!(object_id(Some("not-hex")).is_err());
    }

    #[test]
    fn test_facades_are_cached_per_name() {
        let client = client();
        assert!(Arc::ptr_eq(&client.collection("users"), &client.collection("users")));
        assert!(!Arc::ptr_eq(&client.collection("users"), &client.collection("posts")));
        assert!(Arc::ptr_eq(&client.grid(None), &client.grid(Some("fs"))));
        assert_eq!(client.grid(Some("images")).name(), "images");
    }

    #[test]
    fn test_clones_share_caches() {
        let client = client();
        let other = client.clone();
        assert!(Arc::ptr_eq(&client.collection("users"), &other.collection("users")));
    }

    #[tokio::test]
    async fn test_lazy_connect() {
        let client = client();
        assert!(!client.connection().is_connected());
        client.connect().await.unwrap();
        assert!(client.connection().is_connected());
        client.close(false).await.unwrap();
        assert!(!client.connection().is_connected());
    }
}
