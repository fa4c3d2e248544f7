//! Common test utilities
//!
//! Provides a scripted driver built on the in-memory driver:
//! - counters for connect, close and ping calls
//! - switchable connect and ping failures
//! - artificial connect and ping latency
//! - severing every open handle to simulate a lost connection

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use albatross::driver::memory::{MemoryBucket, MemoryCollection, MemoryHandle, MemorySession, MemoryStore};
use albatross::{
    Albatross, AlbatrossError, AlbatrossResult, ClientConfig, Driver, DriverHandle, MemoryDriver,
};
use async_trait::async_trait;
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared knobs and counters of a [`ScriptedDriver`].
#[derive(Default)]
pub struct Script {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub forced_closes: AtomicUsize,
    pub pings: AtomicUsize,
    /// Number of upcoming connect calls that fail
    pub failing_connects: AtomicUsize,
    pub failing_pings: AtomicBool,
    /// New handles come back already severed
    pub dead_on_arrival: AtomicBool,
    pub connect_delay_ms: AtomicU64,
    pub ping_delay_ms: AtomicU64,
    handles: Mutex<Vec<Arc<MemoryHandle>>>,
}

impl Script {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn fail_pings(&self, fail: bool) {
        self.failing_pings.store(fail, Ordering::SeqCst);
    }

    pub fn dead_on_arrival(&self, dead: bool) {
        self.dead_on_arrival.store(dead, Ordering::SeqCst);
    }

    pub fn connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn ping_delay(&self, delay: Duration) {
        self.ping_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Drop every connection opened so far, as a network outage would.
    pub fn sever_all(&self) {
        for handle in self.handles.lock().iter() {
            handle.sever();
        }
    }
}

#[derive(Clone)]
pub struct ScriptedDriver {
    inner: MemoryDriver,
    script: Arc<Script>,
}

impl ScriptedDriver {
    pub fn new() -> (Self, Arc<Script>) {
        let script = Arc::new(Script::default());
        let driver = Self {
            inner: MemoryDriver::new(),
            script: script.clone(),
        };
        (driver, script)
    }

    pub fn store(&self, uri: &str) -> Arc<MemoryStore> {
        self.inner.store(uri)
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    type Handle = ScriptedHandle;

    async fn connect(&self, uri: &str) -> AlbatrossResult<ScriptedHandle> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);

        let delay = self.script.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .script
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(AlbatrossError::Operation("connection refused".to_string()));
        }

        let handle = Arc::new(self.inner.connect(uri).await?);
        if self.script.dead_on_arrival.load(Ordering::SeqCst) {
            handle.sever();
        }
        self.script.handles.lock().push(handle.clone());
        Ok(ScriptedHandle {
            inner: handle,
            script: self.script.clone(),
        })
    }
}

pub struct ScriptedHandle {
    inner: Arc<MemoryHandle>,
    script: Arc<Script>,
}

#[async_trait]
impl DriverHandle for ScriptedHandle {
    type Session = MemorySession;
    type Collection = MemoryCollection;
    type Bucket = MemoryBucket;

    fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    async fn ping(&self) -> AlbatrossResult<()> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);

        let delay = self.script.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.script.failing_pings.load(Ordering::SeqCst) {
            return Err(AlbatrossError::Operation("ping failed".to_string()));
        }
        self.inner.ping().await
    }

    fn collection(&self, name: &str) -> MemoryCollection {
        self.inner.collection(name)
    }

    fn bucket(&self, name: &str) -> MemoryBucket {
        self.inner.bucket(name)
    }

    async fn start_session(&self) -> AlbatrossResult<MemorySession> {
        self.inner.start_session().await
    }

    async fn close(&self, force: bool) -> AlbatrossResult<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        if force {
            self.script.forced_closes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close(force).await
    }
}

pub const TEST_URI: &str = "memory://localhost/test";

/// A client over a fresh scripted driver, with no close delay.
pub fn scripted_client() -> (Albatross<ScriptedDriver>, Arc<Script>, Arc<MemoryStore>) {
    init_tracing();
    let (driver, script) = ScriptedDriver::new();
    let store = driver.store(TEST_URI);

    let mut config = ClientConfig::new(TEST_URI);
    config.close_grace = Duration::ZERO;

    (Albatross::with_driver(driver, config), script, store)
}

/// A client over the plain in-memory driver.
pub fn memory_client() -> Albatross<MemoryDriver> {
    init_tracing();
    let mut config = ClientConfig::new(TEST_URI);
    config.close_grace = Duration::ZERO;
    Albatross::with_driver(MemoryDriver::new(), config)
}

/// Let background tasks spawned by the client run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
