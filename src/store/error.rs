//! Error types for the local store.

use std::path::PathBuf;

use thiserror::Error;

use crate::api::ApiError;

/// Errors raised by local store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open or create the database file.
    #[error("Failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a database migration.
    #[error("Database migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Database query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("Database schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    /// A cached profile could not be encoded or decoded.
    #[error("Profile serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Filesystem error while handling an image file.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The image stream failed while it was being written.
    #[error("Image stream failed: {0}")]
    Stream(#[from] ApiError),

    /// The image body length disagreed with the response's Content-Length.
    #[error("Image for user {user_id} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        user_id: String,
        expected: u64,
        actual: u64,
    },

    /// The server sent an image without any bytes.
    #[error("Empty image body for user {user_id}")]
    EmptyImage { user_id: String },
}

impl StoreError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
