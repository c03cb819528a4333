//! Error types for the clean and smudge pipelines.
//!
//! The taxonomy is deliberately small. Two variants ([`NotADatabase`] and
//! [`UnparseableInput`]) are recoverable: the fallback guard in
//! [`crate::filter`] turns them into a byte-for-byte pass-through. Everything
//! else is fatal for the invocation.
//!
//! [`NotADatabase`]: FilterError::NotADatabase
//! [`UnparseableInput`]: FilterError::UnparseableInput

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while cleaning or smudging a database.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Input is not an SQLite database (bad magic header, empty, corrupt).
    #[error("not a database: {0}")]
    NotADatabase(String),

    /// Database was readable but its content cannot be canonicalized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// SQL text was recognized but executing it against a fresh database failed.
    #[error("rebuild error: {0}")]
    Rebuild(String),

    /// Smudge input is not SQL text at all.
    #[error("unparseable input: {0}")]
    UnparseableInput(String),

    /// SQLite operation failure outside the classified cases above.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File or stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
}

impl FilterError {
    /// Returns `true` for the cases the fallback guard passes through unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FilterError::NotADatabase(_) | FilterError::UnparseableInput(_)
        )
    }

    /// Classifies an engine error raised while opening or copying a source file.
    ///
    /// `SQLITE_NOTADB` and `SQLITE_CORRUPT` mean the file is not something we
    /// can canonicalize and become [`FilterError::NotADatabase`]; everything
    /// else stays an engine error.
    pub(crate) fn from_open(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
                FilterError::NotADatabase(err.to_string())
            }
            _ => FilterError::Sqlite(err),
        }
    }
}

/// Convenience alias for results with [`FilterError`].
pub type Result<T> = std::result::Result<T, FilterError>;
