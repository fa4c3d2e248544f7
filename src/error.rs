use std::sync::Arc;
use std::time::Duration;

use mongodb::error::{ErrorKind, GridFsErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlbatrossError {
    /// The connect attempt failed. Shared by every caller that awaited the
    /// same attempt, hence the `Arc`.
    #[error("Connection error: {0}")]
    Connection(#[source] Arc<AlbatrossError>),

    #[error("Ping timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("File '{0}' not found")]
    FileNotFound(String),

    #[error("Connection is not live")]
    NotLive,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type AlbatrossResult<T> = Result<T, AlbatrossError>;

impl AlbatrossError {
    /// True when a GridFS lookup found no file, whichever driver raised it.
    pub fn is_file_not_found(&self) -> bool {
        match self {
            AlbatrossError::FileNotFound(_) => true,
            AlbatrossError::Database(err) => matches!(
                err.kind.as_ref(),
                ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. })
            ),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AlbatrossError::Timeout(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, AlbatrossError::Connection(_))
    }
}

impl From<bson::oid::Error> for AlbatrossError {
    fn from(err: bson::oid::Error) -> Self {
        AlbatrossError::InvalidId(err.to_string())
    }
}
