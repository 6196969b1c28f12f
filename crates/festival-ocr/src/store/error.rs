//! Record store error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the database directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("HTTP request to record store failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Record store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A stored row could not be decoded into a `StagedContent`.
    #[error("Failed to decode row '{id}': {reason}")]
    Decode { id: String, reason: String },

    #[error("Record '{0}' not found")]
    NotFound(String),

    /// Another worker claimed the row after us; our write was not applied.
    #[error("Claim on record '{0}' was taken over by another worker")]
    ClaimLost(String),
}
