//! Point-in-time copies of a live database.
//!
//! The source file may be open in another process, possibly mid-write or in
//! WAL mode. Reading its pages directly risks observing a half-committed
//! transaction, so every clean first copies the database through SQLite's
//! online backup API into a private temporary file and reads only that copy.
//!
//! The copy is owned by [`Snapshot`] and removed when it is dropped.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use rusqlite::backup::{Backup, StepResult};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::error::{FilterError, Result};
use crate::session;

/// The 16-byte header every SQLite 3 database file starts with.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

const BUSY_PAUSE: Duration = Duration::from_millis(10);

/// Returns `true` if `bytes` starts with the SQLite 3 magic header.
pub fn has_sqlite_header(bytes: &[u8]) -> bool {
    bytes.len() >= SQLITE_MAGIC.len() && &bytes[..SQLITE_MAGIC.len()] == SQLITE_MAGIC
}

/// Reads the header of the file at `path` and checks the magic.
pub fn file_has_sqlite_header(path: &Path) -> Result<bool> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(has_sqlite_header(&header[..filled]))
}

/// An isolated, consistent copy of a database.
#[derive(Debug)]
pub struct Snapshot {
    conn: Connection,
    // Dropped after `conn`, which releases the file before it is unlinked.
    file: NamedTempFile,
}

impl Snapshot {
    /// Copies the database at `path` into a private temporary file.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::NotADatabase`] if the file lacks the SQLite
    /// header or the engine rejects it as corrupt, and
    /// [`FilterError::Serialization`] if the source stays locked past the
    /// configured lock timeout.
    pub fn take(path: &Path, config: &FilterConfig) -> Result<Self> {
        if !file_has_sqlite_header(path)? {
            return Err(FilterError::NotADatabase(format!(
                "{} does not start with the SQLite header",
                path.display()
            )));
        }

        let file = tempfile::Builder::new()
            .prefix("sqlite_bak_")
            .suffix(".sqlite")
            .tempfile()?;
        debug!(source = %path.display(), snapshot = %file.path().display(), "Taking snapshot");

        let source = session::open_read_only(path, config).map_err(FilterError::from_open)?;
        let mut conn = session::open_read_write(file.path(), config)?;
        copy_pages(&source, &mut conn, config)?;
        drop(source);

        // A header-valid file with garbage pages fails on first schema access.
        conn.query_row("SELECT count(*) FROM sqlite_schema", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(FilterError::from_open)?;

        Ok(Self { conn, file })
    }

    /// Connection to the snapshot copy.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Location of the temporary copy; gone once the snapshot is dropped.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

fn copy_pages(source: &Connection, dest: &mut Connection, config: &FilterConfig) -> Result<()> {
    let backup = Backup::new(source, dest).map_err(FilterError::from_open)?;
    let deadline = Instant::now() + config.lock_timeout();
    let mut steps = 0u64;

    loop {
        let step = backup
            .step(config.pages_per_step)
            .map_err(FilterError::from_open)?;
        steps += 1;
        match step {
            StepResult::Done => break,
            StepResult::More => continue,
            contended => {
                if Instant::now() >= deadline {
                    warn!(steps, "Source database stayed locked; giving up");
                    return Err(FilterError::Serialization(format!(
                        "source database locked for more than {} ms",
                        config.lock_timeout_ms
                    )));
                }
                debug!(?contended, "Backup step contended; retrying");
                thread::sleep(BUSY_PAUSE);
            }
        }
    }

    let progress = backup.progress();
    debug!(steps, pages = progress.pagecount, "Snapshot complete");
    Ok(())
}
