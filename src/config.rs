//! Client configuration.
//!
//! ## Environment Variables
//!
//! [`ClientConfig::from_env`] reads:
//!
//! - `ALBATROSS_URI` - Connection string (required)
//! - `ALBATROSS_PING_TIMEOUT_MS` - Default timeout for `ping(None)`
//! - `ALBATROSS_CLOSE_GRACE_MS` - Delay before `close()` tears the connection down
//!
//! These can be set in a `.env` file in the working directory.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AlbatrossError, AlbatrossResult};

/// Environment variable names
pub const ENV_URI: &str = "ALBATROSS_URI";
pub const ENV_PING_TIMEOUT_MS: &str = "ALBATROSS_PING_TIMEOUT_MS";
pub const ENV_CLOSE_GRACE_MS: &str = "ALBATROSS_CLOSE_GRACE_MS";

/// Default delay before closing, so dropped cursors can release first.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Connection string handed to the driver
    pub uri: String,
    /// Timeout used by `ping(None)`; `None` waits indefinitely
    #[serde(default)]
    pub ping_timeout: Option<Duration>,
    #[serde(default = "default_close_grace")]
    pub close_grace: Duration,
}

fn default_close_grace() -> Duration {
    DEFAULT_CLOSE_GRACE
}

impl ClientConfig {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            ping_timeout: None,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    /// Load configuration from the process environment, after loading a
    /// `.env` file if one is present.
    pub fn from_env() -> AlbatrossResult<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AlbatrossResult<Self> {
        let uri = lookup(ENV_URI)
            .filter(|uri| !uri.trim().is_empty())
            .ok_or_else(|| AlbatrossError::Config(format!("{} is not set", ENV_URI)))?;

        let mut config = Self::new(&uri);
        if let Some(ms) = read_millis(&lookup, ENV_PING_TIMEOUT_MS)? {
            config.ping_timeout = Some(ms);
        }
        if let Some(ms) = read_millis(&lookup, ENV_CLOSE_GRACE_MS)? {
            config.close_grace = ms;
        }

        Ok(config)
    }
}

fn read_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> AlbatrossResult<Option<Duration>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| AlbatrossError::Config(format!("{} must be a number of milliseconds: {}", key, e))),
    }
}
