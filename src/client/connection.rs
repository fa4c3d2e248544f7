//! Lazy, self-healing ownership of the single driver handle.
//!
//! State moves `Disconnected -> Connecting -> Connected`. A connect attempt is
//! a shared future: every caller that arrives while it is pending awaits the
//! same attempt, so the driver's `connect` runs once per attempt. A failed
//! attempt leaves the manager `Disconnected` and the next `acquire` starts over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverHandle};
use crate::error::{AlbatrossError, AlbatrossResult};

type Attempt<H> = Shared<BoxFuture<'static, Result<Arc<H>, Arc<AlbatrossError>>>>;

enum State<H> {
    Disconnected,
    Connecting { attempt: Attempt<H>, id: u64 },
    Connected(Arc<H>),
}

pub struct ConnectionManager<D: Driver> {
    driver: Arc<D>,
    uri: String,
    state: Mutex<State<D::Handle>>,
    attempts: AtomicU64,
}

impl<D: Driver> ConnectionManager<D> {
    pub fn new(driver: D, uri: &str) -> Self {
        Self {
            driver: Arc::new(driver),
            uri: uri.to_string(),
            state: Mutex::new(State::Disconnected),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Whether a handle is currently held (it may still turn out stale).
    pub fn is_connected(&self) -> bool {
        matches!(&*self.state.lock(), State::Connected(_))
    }

    /// Return a live handle, connecting if needed.
    ///
    /// A handle that reports itself dead is retired and replaced once; if the
    /// replacement is dead too the call fails and the next `acquire` tries again.
    pub async fn acquire(&self) -> AlbatrossResult<Arc<D::Handle>> {
        let handle = self.current().await?;
        if handle.is_live() {
            return Ok(handle);
        }

        warn!(uri = %self.uri, "Connection is no longer live, reconnecting");
        self.invalidate(&handle);

        let handle = self.current().await?;
        if handle.is_live() {
            Ok(handle)
        } else {
            self.invalidate(&handle);
            Err(AlbatrossError::NotLive)
        }
    }

    async fn current(&self) -> AlbatrossResult<Arc<D::Handle>> {
        let (attempt, id) = {
            let mut state = self.state.lock();
            match &*state {
                State::Connected(handle) => return Ok(handle.clone()),
                State::Connecting { attempt, id } => (attempt.clone(), *id),
                State::Disconnected => {
                    let id = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let attempt = self.start_attempt(id);
                    *state = State::Connecting {
                        attempt: attempt.clone(),
                        id,
                    };
                    (attempt, id)
                }
            }
        };

        let outcome = attempt.await;

        {
            let mut state = self.state.lock();
            // Only the attempt that is still current may settle the state; a
            // close() or a newer attempt may have replaced it meanwhile.
            if matches!(&*state, State::Connecting { id: current, .. } if *current == id) {
                *state = match &outcome {
                    Ok(handle) => State::Connected(handle.clone()),
                    Err(_) => State::Disconnected,
                };
            }
        }

        outcome.map_err(AlbatrossError::Connection)
    }

    fn start_attempt(&self, id: u64) -> Attempt<D::Handle> {
        let driver = self.driver.clone();
        let uri = self.uri.clone();

        async move {
            debug!(attempt = id, "Connecting");
            match driver.connect(&uri).await {
                Ok(handle) => {
                    info!(attempt = id, "Connected");
                    Ok(Arc::new(handle))
                }
                Err(err) => {
                    warn!(attempt = id, error = %err, "Connection attempt failed");
                    Err(Arc::new(err))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Stop handing out `handle` and close it in the background.
    ///
    /// Does nothing to the current state if `handle` has already been replaced.
    pub fn invalidate(&self, handle: &Arc<D::Handle>) {
        {
            let mut state = self.state.lock();
            if matches!(&*state, State::Connected(current) if Arc::ptr_eq(current, handle)) {
                *state = State::Disconnected;
            }
        }

        let stale = handle.clone();
        tokio::spawn(async move {
            if let Err(err) = stale.close(true).await {
                debug!(error = %err, "Ignoring error while closing stale connection");
            }
        });
    }

    /// Close the current handle, waiting for a pending attempt first.
    /// Calling it again, or with nothing connected, is a no-op.
    pub async fn close(&self, force: bool) -> AlbatrossResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Disconnected);

        let handle = match previous {
            State::Disconnected => return Ok(()),
            State::Connected(handle) => handle,
            State::Connecting { attempt, .. } => match attempt.await {
                Ok(handle) => handle,
                // Nothing was opened, so nothing to close.
                Err(_) => return Ok(()),
            },
        };

        info!(force, "Closing connection");
        handle.close(force).await
    }
}
