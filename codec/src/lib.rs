//! Canonical SQL codec for SQLite databases under version control.
//!
//! The clean direction turns a binary database into deterministic SQL text
//! that diffs well; the smudge direction rebuilds a database from that text.
//! Running clean on a smudged dump reproduces the dump byte for byte.
//!
//! # Architecture
//!
//! - **`snapshot`**: lock-safe point-in-time copy through the backup API
//! - **`schema`**: catalog introspection, object ordering, column roles
//! - **`dump`**: canonical DDL and row serialization
//! - **`value`**: closed value type and literal formatting
//! - **`script`**: splitting SQL text into complete statements
//! - **`restore`**: sequential replay into a fresh database
//! - **`filter`**: both directions plus the pass-through fallback
//!
//! # Quick start
//!
//! ```no_run
//! use git_sqlite_codec::{CleanSource, FilterConfig, clean, smudge};
//!
//! let config = FilterConfig::default();
//! let cleaned = clean(&CleanSource::Path("app.db".into()), &config).unwrap();
//! let smudged = smudge(cleaned.bytes(), &config).unwrap();
//! std::fs::write("app-rebuilt.db", smudged.bytes()).unwrap();
//! ```
//!
//! # Dump format
//!
//! ```text
//! PRAGMA user_version = 0;
//! PRAGMA foreign_keys=OFF;
//! BEGIN TRANSACTION;
//! CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT);
//! INSERT INTO "users" ("id", "name") VALUES (1, 'alice');
//! COMMIT;
//! ```

mod config;
pub mod dump;
mod error;
mod filter;
pub mod restore;
pub mod schema;
pub mod script;
mod session;
pub mod snapshot;
pub mod value;

pub use config::{FilterConfig, Sections};
pub use dump::{DumpOptions, DumpStats, Dumper};
pub use error::{FilterError, Result};
pub use filter::{CleanSource, Cleaned, Smudged, clean, smudge};
pub use restore::{RebuiltDatabase, Restorer};
pub use schema::{Column, ColumnRole, ObjectKind, Schema, SchemaObject};
pub use snapshot::Snapshot;
pub use value::SqlValue;
