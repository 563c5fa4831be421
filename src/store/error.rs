//! Error types for store operations.

use std::fmt;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    ConnectionFailed(String),
    QueryFailed(String),
    MigrationFailed(String),
    InvalidConfig(String),
    NotFound(String),
    IoError(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ConnectionFailed(msg) => write!(f, "failed to connect to store: {msg}"),
            StoreError::QueryFailed(msg) => write!(f, "store query failed: {msg}"),
            StoreError::MigrationFailed(msg) => write!(f, "store migration failed: {msg}"),
            StoreError::InvalidConfig(msg) => write!(f, "invalid store configuration: {msg}"),
            StoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            StoreError::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StoreError::IoError(io_err),
            sqlx::Error::RowNotFound => StoreError::NotFound("no matching row".to_string()),
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}
