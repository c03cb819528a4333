//! Entry points for both filter directions, with the pass-through fallback.
//!
//! A version-control filter must never destroy working-tree content. When the
//! structured path does not apply (the file is not a database, the text is not
//! SQL) the input bytes are returned unchanged as an explicit
//! [`Cleaned::PassThrough`] / [`Smudged::PassThrough`] outcome. All other
//! errors propagate to the caller.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::dump::{DumpOptions, Dumper};
use crate::error::{FilterError, Result};
use crate::restore::Restorer;
use crate::schema;
use crate::snapshot::{self, Snapshot};

/// Where the clean direction reads its database from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanSource {
    /// A database file on disk, possibly open in another process.
    Path(PathBuf),
    /// Database bytes received on a stream.
    Bytes(Vec<u8>),
}

/// Result of the clean direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleaned {
    /// Canonical SQL text.
    Canonical(Vec<u8>),
    /// The input was not a database; these are its exact bytes.
    PassThrough { bytes: Vec<u8>, reason: String },
}

impl Cleaned {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Cleaned::Canonical(bytes) | Cleaned::PassThrough { bytes, .. } => bytes,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Cleaned::PassThrough { .. })
    }
}

/// Result of the smudge direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Smudged {
    /// Bytes of the rebuilt database file.
    Database(Vec<u8>),
    /// The input was not SQL; these are its exact bytes.
    PassThrough { bytes: Vec<u8>, reason: String },
}

impl Smudged {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Smudged::Database(bytes) | Smudged::PassThrough { bytes, .. } => bytes,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Smudged::PassThrough { .. })
    }
}

/// Converts a database into canonical SQL text.
///
/// # Errors
///
/// Returns [`FilterError::Serialization`] if the database is readable but
/// cannot be canonicalized; [`FilterError::Io`] if the input cannot be read.
/// A source that is not a database is not an error.
pub fn clean(source: &CleanSource, config: &FilterConfig) -> Result<Cleaned> {
    let outcome = match source {
        CleanSource::Path(path) => canonicalize(path, config),
        CleanSource::Bytes(bytes) if !snapshot::has_sqlite_header(bytes) => {
            Err(FilterError::NotADatabase(
                "input does not start with the SQLite header".to_string(),
            ))
        }
        CleanSource::Bytes(bytes) => {
            let mut staged = tempfile::Builder::new()
                .prefix("sqlite_in_")
                .suffix(".sqlite")
                .tempfile()?;
            staged.write_all(bytes)?;
            staged.flush()?;
            canonicalize(staged.path(), config)
        }
    };

    match outcome {
        Ok(text) => Ok(Cleaned::Canonical(text)),
        Err(FilterError::NotADatabase(reason)) => {
            info!(%reason, "Not a database; passing input through");
            let bytes = match source {
                CleanSource::Path(path) => std::fs::read(path)?,
                CleanSource::Bytes(bytes) => bytes.clone(),
            };
            Ok(Cleaned::PassThrough { bytes, reason })
        }
        Err(err) => Err(err),
    }
}

/// Rebuilds a database from SQL text.
///
/// # Errors
///
/// Returns [`FilterError::Rebuild`] if the text is SQL but executing it fails.
/// Input that is not SQL is not an error.
pub fn smudge(input: &[u8], config: &FilterConfig) -> Result<Smudged> {
    match rebuild(input, config) {
        Ok(bytes) => Ok(Smudged::Database(bytes)),
        Err(FilterError::UnparseableInput(reason)) => {
            info!(%reason, "Input is not SQL; passing it through");
            Ok(Smudged::PassThrough {
                bytes: input.to_vec(),
                reason,
            })
        }
        Err(err) => Err(err),
    }
}

fn canonicalize(path: &Path, config: &FilterConfig) -> Result<Vec<u8>> {
    let snapshot = Snapshot::take(path, config)?;
    let conn = snapshot.connection();
    let schema = schema::extract(conn)?;
    let text = Dumper::new(conn, &schema, DumpOptions::from(config)).to_bytes()?;
    debug!(bytes = text.len(), "Canonical dump rendered");
    Ok(text)
}

fn rebuild(input: &[u8], config: &FilterConfig) -> Result<Vec<u8>> {
    if snapshot::has_sqlite_header(input) {
        return Err(FilterError::UnparseableInput(
            "input is already an SQLite database".to_string(),
        ));
    }
    let sql = std::str::from_utf8(input)
        .map_err(|e| FilterError::UnparseableInput(format!("input is not UTF-8: {e}")))?;
    let rebuilt = Restorer::new(config.clone()).rebuild(sql)?;
    rebuilt.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_bytes_without_header_pass_through() {
        let input = b"raw binary content\n".to_vec();
        let cleaned = clean(&CleanSource::Bytes(input.clone()), &FilterConfig::default()).unwrap();
        assert!(cleaned.is_pass_through());
        assert_eq!(cleaned.bytes(), input.as_slice());
    }

    #[test]
    fn test_clean_empty_bytes_pass_through() {
        let cleaned = clean(&CleanSource::Bytes(Vec::new()), &FilterConfig::default()).unwrap();
        assert!(cleaned.is_pass_through());
        assert!(cleaned.bytes().is_empty());
    }

    #[test]
    fn test_smudge_non_sql_pass_through() {
        let smudged = smudge(b"not valid sql;;;", &FilterConfig::default()).unwrap();
        assert!(smudged.is_pass_through());
        assert_eq!(smudged.bytes(), b"not valid sql;;;");
    }

    #[test]
    fn test_smudge_binary_pass_through() {
        let input = [0xffu8, 0x00, 0x10, 0x80];
        let smudged = smudge(&input, &FilterConfig::default()).unwrap();
        assert!(smudged.is_pass_through());
        assert_eq!(smudged.bytes(), &input);
    }

    #[test]
    fn test_smudge_then_clean_bytes() {
        let sql = "PRAGMA user_version = 0;\n\
                   PRAGMA foreign_keys=OFF;\n\
                   BEGIN TRANSACTION;\n\
                   CREATE TABLE t(x INTEGER PRIMARY KEY);\n\
                   INSERT INTO \"t\" (\"x\") VALUES (1);\n\
                   COMMIT;\n";
        let smudged = smudge(sql.as_bytes(), &FilterConfig::default()).unwrap();
        let Smudged::Database(db) = smudged else {
            panic!("expected a database");
        };

        let cleaned = clean(&CleanSource::Bytes(db), &FilterConfig::default()).unwrap();
        assert_eq!(cleaned, Cleaned::Canonical(sql.as_bytes().to_vec()));
    }

    #[test]
    fn test_smudge_rebuild_error_propagates() {
        let err = smudge(
            b"CREATE TABLE t(x UNIQUE);\nINSERT INTO t VALUES (1);\nINSERT INTO t VALUES (1);\n",
            &FilterConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::Rebuild(_)));
    }
}
