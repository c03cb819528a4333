//! Rebuilding a database from SQL text ("smudge").
//!
//! Statements run one at a time, in input order, against a freshly created
//! temporary database. `CREATE VIRTUAL TABLE` regenerates its shadow tables as
//! a side effect, so nothing here knows about them.
//!
//! A statement the engine cannot even parse marks the whole input as
//! [`FilterError::UnparseableInput`]; any other failure is a
//! [`FilterError::Rebuild`]. Either way the partially built file is discarded.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::script;
use crate::session;

/// Engine messages that mean the text is not SQL rather than failing SQL.
const SYNTAX_MARKERS: &[&str] = &["syntax error", "incomplete input", "unrecognized token"];

static WRITABLE_SCHEMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*PRAGMA\s+writable_schema\b").expect("valid regex"));

static CATALOG_INSERT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*INSERT\s+(OR\s+\w+\s+)?INTO\s+["'`\[]?(sqlite_master|sqlite_schema|sqlite_stat\d)\b"#)
        .expect("valid regex")
});

static BARE_ROLLBACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*ROLLBACK(\s+TRANSACTION)?\s*;?\s*$").expect("valid regex")
});

/// A rebuilt database held in a temporary file until its bytes are taken.
#[derive(Debug)]
pub struct RebuiltDatabase {
    file: NamedTempFile,
    statements: usize,
}

impl RebuiltDatabase {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Number of statements executed.
    pub fn statements(&self) -> usize {
        self.statements
    }

    /// Reads the finished database file.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.file.path())?)
    }
}

/// Replays SQL text into new databases.
#[derive(Debug, Clone, Default)]
pub struct Restorer {
    config: FilterConfig,
}

impl Restorer {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Executes `sql` against a fresh database file.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::UnparseableInput`] if the text holds no
    /// statements or the engine reports a syntax-class error, and
    /// [`FilterError::Rebuild`] if a statement fails for any other reason.
    pub fn rebuild(&self, sql: &str) -> Result<RebuiltDatabase> {
        let statements = script::split_statements(sql);
        if statements.is_empty() {
            return Err(FilterError::UnparseableInput(
                "input contains no SQL statements".to_string(),
            ));
        }

        let file = tempfile::Builder::new()
            .prefix("sqlite_smudge_")
            .suffix(".sqlite")
            .tempfile()?;
        debug!(target_db = %file.path().display(), statements = statements.len(), "Rebuilding database");

        let conn = session::open_read_write(file.path(), &self.config)?;
        session::prepare_for_rebuild(&conn)?;

        let mut executed = 0;
        for (index, statement) in statements.iter().enumerate() {
            if let Some(reason) = suppression_reason(statement) {
                debug!(statement = index + 1, reason, "Skipping statement");
                continue;
            }
            conn.execute_batch(statement)
                .map_err(|e| classify_failure(index, statement, e))?;
            executed += 1;
        }

        finish(conn)?;
        debug!(executed, "Rebuild complete");
        Ok(RebuiltDatabase {
            file,
            statements: executed,
        })
    }
}

/// Commits a transaction the input left open and closes the connection.
fn finish(conn: Connection) -> Result<()> {
    if !conn.is_autocommit() {
        warn!("Input left a transaction open; committing");
        conn.execute_batch("COMMIT;")
            .map_err(|e| FilterError::Rebuild(format!("final commit failed: {e}")))?;
    }
    conn.close()
        .map_err(|(_, e)| FilterError::Rebuild(format!("closing rebuilt database failed: {e}")))
}

/// Statements from other dump dialects that must not be replayed.
fn suppression_reason(statement: &str) -> Option<&'static str> {
    if WRITABLE_SCHEMA.is_match(statement) {
        Some("writable_schema pragma")
    } else if CATALOG_INSERT.is_match(statement) {
        Some("direct catalog insert")
    } else if BARE_ROLLBACK.is_match(statement) {
        warn!("Skipping ROLLBACK in input (truncated or corrupted dump?)");
        Some("bare rollback")
    } else {
        None
    }
}

fn classify_failure(index: usize, statement: &str, err: rusqlite::Error) -> FilterError {
    let message = err.to_string();
    if SYNTAX_MARKERS.iter().any(|marker| message.contains(marker)) {
        FilterError::UnparseableInput(format!("statement {}: {message}", index + 1))
    } else {
        FilterError::Rebuild(format!(
            "statement {} failed: {message}: {}",
            index + 1,
            preview(statement)
        ))
    }
}

fn preview(statement: &str) -> String {
    const LIMIT: usize = 80;
    let line = statement.lines().next().unwrap_or_default();
    match line.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(rebuilt: &RebuiltDatabase) -> Connection {
        Connection::open(rebuilt.path()).unwrap()
    }

    #[test]
    fn test_rebuild_executes_in_order() {
        let rebuilt = Restorer::default()
            .rebuild(
                "PRAGMA user_version = 3;\n\
                 BEGIN TRANSACTION;\n\
                 CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT);\n\
                 INSERT INTO \"t\" (\"id\", \"v\") VALUES (1, 'a;b');\n\
                 COMMIT;\n",
            )
            .unwrap();
        assert_eq!(rebuilt.statements(), 5);

        let conn = open(&rebuilt);
        let v: String = conn
            .query_row("SELECT v FROM t WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(v, "a;b");
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn test_garbage_is_unparseable() {
        let err = Restorer::default().rebuild("not valid sql;;;").unwrap_err();
        assert!(matches!(err, FilterError::UnparseableInput(_)), "got {err:?}");
    }

    #[test]
    fn test_whitespace_is_unparseable() {
        let err = Restorer::default().rebuild(" \n\t").unwrap_err();
        assert!(matches!(err, FilterError::UnparseableInput(_)));
    }

    #[test]
    fn test_constraint_failure_is_rebuild_error() {
        let err = Restorer::default()
            .rebuild(
                "CREATE TABLE t(id INTEGER PRIMARY KEY);\n\
                 INSERT INTO t VALUES (1);\n\
                 INSERT INTO t VALUES (1);\n",
            )
            .unwrap_err();
        match err {
            FilterError::Rebuild(msg) => assert!(msg.contains("statement 3"), "{msg}"),
            other => panic!("expected rebuild error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_table_is_rebuild_error() {
        let err = Restorer::default()
            .rebuild("INSERT INTO missing VALUES (1);")
            .unwrap_err();
        assert!(matches!(err, FilterError::Rebuild(_)));
    }

    #[test]
    fn test_foreign_dump_statements_suppressed() {
        let rebuilt = Restorer::default()
            .rebuild(
                "PRAGMA writable_schema=ON;\n\
                 INSERT INTO sqlite_schema(type,name,tbl_name,rootpage,sql) VALUES('table','x','x',0,'CREATE VIRTUAL TABLE x USING fts5(a)');\n\
                 CREATE TABLE t(a);\n\
                 ROLLBACK; -- due to errors\n",
            )
            .unwrap();
        assert_eq!(rebuilt.statements(), 1);
    }

    #[test]
    fn test_open_transaction_committed() {
        let rebuilt = Restorer::default()
            .rebuild("BEGIN TRANSACTION;\nCREATE TABLE t(a);\nINSERT INTO t VALUES (9);\n")
            .unwrap();
        let conn = open(&rebuilt);
        let a: i64 = conn
            .query_row("SELECT a FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(a, 9);
    }

    #[test]
    fn test_bytes_are_a_database() {
        let rebuilt = Restorer::default().rebuild("CREATE TABLE t(a);").unwrap();
        let bytes = rebuilt.to_bytes().unwrap();
        assert!(crate::snapshot::has_sqlite_header(&bytes));
        assert_eq!(bytes.len() as u64, std::fs::metadata(rebuilt.path()).unwrap().len());
    }

    #[test]
    fn test_suppression_rules() {
        assert!(suppression_reason("pragma WRITABLE_SCHEMA = 1;").is_some());
        assert!(suppression_reason("INSERT INTO \"sqlite_stat1\" VALUES('t','i','1');").is_some());
        assert!(suppression_reason("ROLLBACK;").is_some());
        assert!(suppression_reason("ROLLBACK TO sp1;").is_none());
        assert!(suppression_reason("INSERT INTO sqlite_sequence VALUES('t', 1);").is_none());
    }

    #[test]
    fn test_preview_truncates_long_lines() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), 83);
        assert_eq!(preview("short\nsecond"), "short");
    }
}
