//! Schema extraction from the engine catalog.
//!
//! Enumerates user-visible objects from `sqlite_schema`, classifies tables
//! using `PRAGMA table_list`, and columns using `PRAGMA table_xinfo`.
//!
//! # Ordering
//!
//! Objects are ordered by kind in the fixed sequence Table, View, Index,
//! Trigger, VirtualTable, then by name. The catalog position (its rowid in
//! `sqlite_schema`) only breaks ties, so two databases with the same logical
//! schema serialize identical DDL regardless of creation history.
//!
//! # Shadow tables
//!
//! Virtual tables such as FTS5 keep their state in ordinary tables the engine
//! creates on their behalf. The engine reports those as `shadow` in
//! `PRAGMA table_list`; they are attached to their virtual table and never
//! enumerated on their own.

use std::collections::{BTreeMap, HashSet};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{FilterError, Result};

/// Kind of a schema object, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Table,
    View,
    Index,
    Trigger,
    VirtualTable,
}

impl ObjectKind {
    /// Whether rows are read from objects of this kind.
    pub fn holds_rows(self) -> bool {
        matches!(self, ObjectKind::Table | ObjectKind::VirtualTable)
    }
}

/// How the engine treats a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Plain stored column.
    Ordinary,
    /// Hidden column of a virtual table.
    Hidden,
    /// `GENERATED ALWAYS AS (...) VIRTUAL`.
    GeneratedVirtual,
    /// `GENERATED ALWAYS AS (...) STORED`.
    GeneratedStored,
}

impl ColumnRole {
    /// Maps the `hidden` field of `PRAGMA table_xinfo`.
    fn from_xinfo(hidden: i64) -> Self {
        match hidden {
            1 => ColumnRole::Hidden,
            2 => ColumnRole::GeneratedVirtual,
            3 => ColumnRole::GeneratedStored,
            _ => ColumnRole::Ordinary,
        }
    }
}

/// A column of a table or virtual table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    /// 1-based position in the primary key, 0 if not part of it.
    pub pk_position: u32,
    pub role: ColumnRole,
}

impl Column {
    /// Columns that receive values in `INSERT` statements.
    pub fn is_insertable(&self) -> bool {
        self.role == ColumnRole::Ordinary
    }
}

/// One object from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
    /// Table the object belongs to (itself for tables).
    pub table_name: String,
    /// DDL exactly as stored by the engine.
    pub sql: String,
    /// Rowid in `sqlite_schema`.
    pub catalog_position: i64,
    /// Columns in declared order; empty for views, indexes and triggers.
    pub columns: Vec<Column>,
    /// Shadow tables owned by a virtual table, sorted by name.
    pub shadow_tables: Vec<String>,
}

impl SchemaObject {
    pub fn insertable_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_insertable())
    }

    /// Declared primary key columns in key order.
    pub fn primary_key(&self) -> Vec<&Column> {
        let mut key: Vec<&Column> = self.columns.iter().filter(|c| c.pk_position > 0).collect();
        key.sort_by_key(|c| c.pk_position);
        key
    }
}

/// The extracted schema of one database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub objects: Vec<SchemaObject>,
    /// Whether `sqlite_sequence` exists (some table uses AUTOINCREMENT).
    pub has_sequence: bool,
}

impl Schema {
    /// Objects whose rows are dumped, in emission order.
    pub fn row_sources(&self) -> impl Iterator<Item = &SchemaObject> {
        self.objects.iter().filter(|o| o.kind.holds_rows())
    }

    pub fn get(&self, name: &str) -> Option<&SchemaObject> {
        self.objects.iter().find(|o| o.name == name)
    }
}

/// Reads the schema of the `main` database on `conn`.
///
/// # Errors
///
/// Returns [`FilterError::Serialization`] if a table's columns cannot be
/// introspected (for example a virtual table whose module is unavailable).
pub fn extract(conn: &Connection) -> Result<Schema> {
    let table_types = table_types(conn)?;
    let shadows: HashSet<&str> = table_types
        .iter()
        .filter(|(_, kind)| kind.as_str() == "shadow")
        .map(|(name, _)| name.as_str())
        .collect();

    let mut stmt = conn.prepare(
        "SELECT type, name, tbl_name, sql, rowid FROM sqlite_schema \
         WHERE name NOT LIKE 'sqlite\\_%' ESCAPE '\\' AND sql IS NOT NULL",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut objects = Vec::new();
    for row in rows {
        let (object_type, name, table_name, sql, catalog_position) = row?;
        if shadows.contains(name.as_str()) {
            debug!(table = %name, "Skipping shadow table");
            continue;
        }

        let kind = match object_type.as_str() {
            "table" if table_types.get(&name).map(String::as_str) == Some("virtual") => {
                ObjectKind::VirtualTable
            }
            "table" => ObjectKind::Table,
            "view" => ObjectKind::View,
            "index" => ObjectKind::Index,
            "trigger" => ObjectKind::Trigger,
            other => {
                warn!(object = %name, kind = other, "Skipping unknown catalog entry");
                continue;
            }
        };

        let columns = if kind.holds_rows() {
            table_columns(conn, &name)?
        } else {
            Vec::new()
        };

        objects.push(SchemaObject {
            kind,
            name,
            table_name,
            sql: sql.trim().to_string(),
            catalog_position,
            columns,
            shadow_tables: Vec::new(),
        });
    }

    attach_shadow_tables(&mut objects, &shadows);
    objects.sort_by(|a, b| {
        (a.kind, &a.name, a.catalog_position).cmp(&(b.kind, &b.name, b.catalog_position))
    });

    let has_sequence = conn
        .query_row(
            "SELECT count(*) FROM sqlite_schema WHERE type = 'table' AND name = 'sqlite_sequence'",
            [],
            |row| row.get::<_, i64>(0),
        )?
        > 0;

    debug!(
        objects = objects.len(),
        shadow_tables = shadows.len(),
        has_sequence,
        "Extracted schema"
    );
    Ok(Schema {
        objects,
        has_sequence,
    })
}

/// Table name to `PRAGMA table_list` type (`table`, `view`, `virtual`, `shadow`).
fn table_types(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT name, type FROM pragma_table_list WHERE schema = 'main'")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut types = BTreeMap::new();
    for row in rows {
        let (name, kind) = row?;
        types.insert(name, kind);
    }
    Ok(types)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<Column>> {
    let introspect = || -> rusqlite::Result<Vec<Column>> {
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", pk, hidden FROM pragma_table_xinfo(?1) ORDER BY cid",
        )?;
        let rows = stmt.query_map([table], |row| {
            Ok(Column {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                pk_position: row.get::<_, u32>(3)?,
                role: ColumnRole::from_xinfo(row.get(4)?),
            })
        })?;
        rows.collect()
    };

    let columns = introspect().map_err(|e| {
        FilterError::Serialization(format!("cannot read columns of {table}: {e}"))
    })?;
    debug!(
        table,
        columns = columns.len(),
        insertable = columns.iter().filter(|c| c.is_insertable()).count(),
        "Read table columns"
    );
    Ok(columns)
}

/// Links each shadow table to the virtual table whose name prefixes it.
///
/// The engine names shadow tables `<vtab>_<suffix>`; the longest matching
/// virtual table name wins so `docs` and `docs_x` are told apart.
fn attach_shadow_tables(objects: &mut [SchemaObject], shadows: &HashSet<&str>) {
    let mut sorted: Vec<&str> = shadows.iter().copied().collect();
    sorted.sort_unstable();

    for shadow in sorted {
        let owner = objects
            .iter_mut()
            .filter(|o| o.kind == ObjectKind::VirtualTable)
            .filter(|o| {
                shadow.len() > o.name.len() + 1
                    && shadow.starts_with(o.name.as_str())
                    && shadow.as_bytes()[o.name.len()] == b'_'
            })
            .max_by_key(|o| o.name.len());
        match owner {
            Some(vtab) => vtab.shadow_tables.push(shadow.to_string()),
            None => warn!(table = shadow, "Shadow table without a virtual table owner"),
        }
    }
}
