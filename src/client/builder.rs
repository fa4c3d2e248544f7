use std::time::Duration;

use super::Albatross;
use crate::config::ClientConfig;
use crate::driver::{Driver, MongoDriver};
use crate::error::AlbatrossResult;

/// Builder for creating an [`Albatross`] client with additional options
pub struct AlbatrossBuilder {
    config: ClientConfig,
}

impl AlbatrossBuilder {
    /// Create a new builder
    pub fn new(uri: &str) -> Self {
        Self {
            config: ClientConfig::new(uri),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set the default ping timeout in milliseconds
    pub fn ping_timeout_ms(mut self, ms: u64) -> Self {
        self.config.ping_timeout = Some(Duration::from_millis(ms));
        self
    }

    /// Set the delay before close in milliseconds
    pub fn close_grace_ms(mut self, ms: u64) -> Self {
        self.config.close_grace = Duration::from_millis(ms);
        self
    }

    /// Build a MongoDB client; the connection opens on first use
    pub fn build(self) -> Albatross<MongoDriver> {
        Albatross::with_driver(MongoDriver::new(), self.config)
    }

    /// Build a client over another driver
    pub fn build_with_driver<D: Driver>(self, driver: D) -> Albatross<D> {
        Albatross::with_driver(driver, self.config)
    }

    /// Build the client and open its connection
    pub async fn connect(self) -> AlbatrossResult<Albatross<MongoDriver>> {
        let client = self.build();
        client.connect().await?;
        Ok(client)
    }
}
