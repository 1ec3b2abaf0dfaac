//! Error types for sensorhub-store.

use std::path::PathBuf;

/// Result type for sensorhub-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while ingesting into or reading from a stream store.
///
/// Every variant is scoped to a single request; none of them leaves another
/// stream's store in a modified state.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The stream identifier is not part of the configured stream set.
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    /// No file accompanied the upload request.
    #[error("No file uploaded")]
    MissingUpload,

    /// The uploaded payload contained no lines at all.
    #[error("Uploaded file is empty")]
    EmptyUpload,

    /// The uploaded payload or the store file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The append to the store file failed.
    #[error("Failed to append to {path}: {source}")]
    PersistFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No data has ever been ingested for the stream.
    #[error("No store for stream {0}")]
    StoreNotFound(String),

    /// The store content could not be converted into records.
    #[error("Failed to convert store content: {0}")]
    ConversionFailure(String),

    /// The uploaded header differs from the stored header.
    #[error("Header mismatch: store has '{expected}', upload has '{found}'")]
    SchemaMismatch { expected: String, found: String },

    /// A stream definition is invalid or duplicated.
    #[error("Invalid stream '{id}': {reason}")]
    InvalidStream { id: String, reason: String },

    /// Failed to create the store directory.
    #[error("Failed to create store directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}
