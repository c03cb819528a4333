//! Connection setup shared by every pipeline stage.
//!
//! Each invocation opens its own connections through these helpers and passes
//! them explicitly; nothing is cached process-wide.

use std::cmp::Ordering;
use std::path::Path;

use rusqlite::config::DbConfig;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::config::FilterConfig;
use crate::error::Result;

/// Opens an existing database read-only.
pub(crate) fn open_read_only(path: &Path, config: &FilterConfig) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    configure(&conn, config)?;
    Ok(conn)
}

/// Opens (creating if needed) a read-write database.
pub(crate) fn open_read_write(path: &Path, config: &FilterConfig) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn, config)?;
    Ok(conn)
}

/// Prepares a connection that replays a dump.
///
/// Trigger DDL precedes row data in the canonical order, so trigger firing is
/// switched off; foreign keys are off for the same reason.
pub(crate) fn prepare_for_rebuild(conn: &Connection) -> Result<()> {
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_TRIGGER, false)?;
    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_ENABLE_FKEY, false)?;
    Ok(())
}

fn configure(conn: &Connection, config: &FilterConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(config.busy_timeout())?;
    conn.collation_needed(register_fallback_collation)?;
    Ok(())
}

/// Registers a byte-order collation for any name the schema asks for.
///
/// Application-defined collations are not available outside the application
/// that created the database. Plain byte order is deterministic, which is all
/// the dump needs.
fn register_fallback_collation(conn: &Connection, name: &str) -> rusqlite::Result<()> {
    debug!(collation = name, "Registering fallback collation");
    conn.create_collation(name, byte_order)
}

fn byte_order(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_collation_is_registered_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_read_write(&dir.path().join("c.db"), &FilterConfig::default()).unwrap();
        conn.execute_batch(
            "CREATE TABLE t(name TEXT COLLATE app_nocase);
             INSERT INTO t VALUES ('b'), ('a'), ('c');",
        )
        .unwrap();

        let mut stmt = conn.prepare("SELECT name FROM t ORDER BY name").unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rebuild_connection_does_not_fire_triggers() {
        let conn = Connection::open_in_memory().unwrap();
        prepare_for_rebuild(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE t(x);
             CREATE TABLE log(x);
             CREATE TRIGGER t_ai AFTER INSERT ON t BEGIN INSERT INTO log VALUES (new.x); END;
             INSERT INTO t VALUES (1);",
        )
        .unwrap();
        let logged: i64 = conn
            .query_row("SELECT count(*) FROM log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(logged, 0);
    }
}
