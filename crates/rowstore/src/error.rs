//! Error types for the rowstore crate

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored JSON snapshot could not be decoded
    #[error("malformed JSON in audit log: {0}")]
    Json(#[from] serde_json::Error),

    /// Name unsafe to interpolate into SQL
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Table does not exist
    #[error("table does not exist: {0}")]
    TableNotFound(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;
