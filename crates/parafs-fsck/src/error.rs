//! Error types for the fsck database layer.

use thiserror::Error;

/// Result type alias for fsck database operations.
pub type FsckResult<T> = Result<T, FsckError>;

/// Error variants surfaced by cursors, checks and violation bookkeeping.
#[derive(Debug, Error)]
pub enum FsckError {
    /// A pooled connection could not be opened.
    #[error("Connection pool error for {path}: {source}")]
    Pool {
        /// Database file the pool serves.
        path: String,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A generated statement failed to prepare. This is a defect in a static
    /// query definition and ends the enclosing check.
    #[error("Failed to prepare statement `{sql}`: {source}")]
    Statement {
        /// The SQL text that failed to prepare.
        sql: String,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// Backing store failure while reading or writing rows.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row of a bulk mutation failed; the whole batch was rolled back.
    #[error("Batch aborted at element {index}: backend code {code}")]
    BatchAborted {
        /// Position of the first offending element in the batch.
        index: usize,
        /// SQLite extended result code of the failure.
        code: i32,
    },

    /// An entity key was used with an error table of another key shape.
    #[error("Key {key} does not fit error table {table}")]
    KeyMismatch {
        /// Error table addressed.
        table: String,
        /// Offending key.
        key: String,
    },

    /// An entry ID string could not be parsed.
    #[error("Invalid entry ID: {0:?}")]
    InvalidEntryId(String),

    /// Evidence payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsckError {
    /// Returns the SQLite extended result code carried by this error, if any.
    pub fn backend_code(&self) -> Option<i32> {
        match self {
            FsckError::Sqlite(e) | FsckError::Statement { source: e, .. } | FsckError::Pool { source: e, .. } => {
                sqlite_code(e)
            }
            FsckError::BatchAborted { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Extracts the extended result code from a rusqlite error.
pub(crate) fn sqlite_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => Some(e.extended_code),
        _ => None,
    }
}

/// Returns true when the error is a uniqueness or primary key violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
