use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::connection::ConnectionManager;
use crate::driver::{Driver, DriverHandle};
use crate::error::{AlbatrossError, AlbatrossResult};

/// Bounded-time round trip against the current connection.
pub struct HealthChecker<D: Driver> {
    manager: Arc<ConnectionManager<D>>,
    default_timeout: Option<Duration>,
}

impl<D: Driver> HealthChecker<D> {
    pub fn new(manager: Arc<ConnectionManager<D>>, default_timeout: Option<Duration>) -> Self {
        Self {
            manager,
            default_timeout,
        }
    }

    /// Ping the server, giving up after `timeout` (or the configured default).
    ///
    /// A failed or timed out ping invalidates the connection, so the next
    /// operation reconnects. The abandoned round trip is dropped with the
    /// timer; nothing keeps running after this returns.
    pub async fn ping(&self, timeout: Option<Duration>) -> AlbatrossResult<()> {
        let handle = self.manager.acquire().await?;

        let outcome = match timeout.or(self.default_timeout) {
            Some(limit) => match tokio::time::timeout(limit, handle.ping()).await {
                Ok(result) => result,
                Err(_) => Err(AlbatrossError::Timeout(limit)),
            },
            None => handle.ping().await,
        };

        if let Err(err) = &outcome {
            warn!(error = %err, "Ping failed, dropping connection");
            self.manager.invalidate(&handle);
        }

        outcome
    }
}
