use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::connection::ConnectionManager;
use crate::driver::{Driver, DriverHandle, DriverSession, SessionOf};
use crate::error::{AlbatrossError, AlbatrossResult};

pub struct TransactionRunner<D: Driver> {
    manager: Arc<ConnectionManager<D>>,
}

impl<D: Driver> TransactionRunner<D> {
    pub fn new(manager: Arc<ConnectionManager<D>>) -> Self {
        Self { manager }
    }

    /// Run `body` in a transaction on a fresh session.
    ///
    /// The driver may call `body` more than once on transient errors; the value
    /// of the attempt that committed is returned. The session is ended once,
    /// whatever the outcome.
    pub async fn run<T, F>(&self, body: F) -> AlbatrossResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnMut(&'s mut SessionOf<D>) -> BoxFuture<'s, AlbatrossResult<T>> + Send,
    {
        let handle = self.manager.acquire().await?;
        let session = handle.start_session().await?;

        SessionScope::new(session).run(body).await
    }
}

/// Ends the session when dropped, including when the transaction future is
/// itself dropped mid-flight.
struct SessionScope<S: DriverSession> {
    session: Option<S>,
}

impl<S: DriverSession> SessionScope<S> {
    fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    async fn run<T, F>(mut self, body: F) -> AlbatrossResult<T>
    where
        T: Send + 'static,
        F: for<'s> FnMut(&'s mut S) -> BoxFuture<'s, AlbatrossResult<T>> + Send,
    {
        match self.session.as_mut() {
            Some(session) => session.with_transaction(body).await,
            None => Err(AlbatrossError::Operation("session already ended".to_string())),
        }
    }
}

impl<S: DriverSession> Drop for SessionScope<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Ending session");
            session.end();
        }
    }
}
