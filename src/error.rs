//! Error types for the shale library.
//!
//! All fallible operations return [`Result`], whose error type is the
//! [`ShaleError`] enum. Convenience constructors are provided for the
//! common string-message variants.

use std::io;

use thiserror::Error;

/// The main error type for shale operations.
#[derive(Error, Debug)]
pub enum ShaleError {
    /// The database directory or version file is missing when opening.
    #[error("Database opening error: {0}")]
    DatabaseOpening(String),

    /// The database (or its directory) could not be created.
    #[error("Database create error: {0}")]
    DatabaseCreate(String),

    /// The write lock could not be acquired.
    #[error("Database lock error: {0}")]
    DatabaseLock(String),

    /// On-disk state failed to decode, or no consistent revision exists.
    #[error("Database corrupt: {0}")]
    DatabaseCorrupt(String),

    /// The database is legitimately changing too fast to open a snapshot.
    #[error("Database modified: {0}")]
    DatabaseModified(String),

    /// I/O failure, magic mismatch, or changeset inconsistency.
    #[error("Database error: {0}")]
    Database(String),

    /// An optional table required by the operation is absent.
    #[error("Feature unavailable: {0}")]
    FeatureUnavailable(String),

    /// A caller-supplied argument is invalid (e.g. an over-long term).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested document id does not exist.
    #[error("Document not found: {0}")]
    DocNotFound(String),

    /// The operation is not valid in the current state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for operations that may fail with [`ShaleError`].
pub type Result<T> = std::result::Result<T, ShaleError>;

impl ShaleError {
    /// Create a new database opening error.
    pub fn opening<S: Into<String>>(msg: S) -> Self {
        ShaleError::DatabaseOpening(msg.into())
    }

    /// Create a new database create error.
    pub fn create<S: Into<String>>(msg: S) -> Self {
        ShaleError::DatabaseCreate(msg.into())
    }

    /// Create a new database lock error.
    pub fn lock<S: Into<String>>(msg: S) -> Self {
        ShaleError::DatabaseLock(msg.into())
    }

    /// Create a new corruption error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        ShaleError::DatabaseCorrupt(msg.into())
    }

    /// Create a new database-modified error.
    pub fn modified<S: Into<String>>(msg: S) -> Self {
        ShaleError::DatabaseModified(msg.into())
    }

    /// Create a new generic database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        ShaleError::Database(msg.into())
    }

    /// Create a new feature-unavailable error.
    pub fn feature_unavailable<S: Into<String>>(msg: S) -> Self {
        ShaleError::FeatureUnavailable(msg.into())
    }

    /// Create a new invalid-argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        ShaleError::InvalidArgument(msg.into())
    }

    /// Create a new document-not-found error.
    pub fn doc_not_found<S: Into<String>>(msg: S) -> Self {
        ShaleError::DocNotFound(msg.into())
    }

    /// Create a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        ShaleError::InvalidOperation(msg.into())
    }
}
