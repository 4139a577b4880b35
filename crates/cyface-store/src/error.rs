//! Error types for cyface-store.

use std::path::PathBuf;

use cyface_types::MeasurementId;

/// Result type for cyface-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cyface-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database file could not be opened.
    #[error("Store unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// The on-disk schema cannot be used by this version.
    #[error("Data model not loadable: schema version {found}, supported up to {supported}")]
    ModelNotLoadable { found: i32, supported: i32 },

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Measurement not found in database.
    #[error("Measurement not found: {0}")]
    NotFound(MeasurementId),

    /// Stored data could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
