//! Canonical SQL serialization ("clean").
//!
//! Walks an extracted [`Schema`] and writes DDL followed by one `INSERT` per
//! row. Row order is computed by the engine's own type-aware `ORDER BY`:
//!
//! - tables with a declared primary key sort by the key columns in key order;
//! - tables without one sort by every insertable column in declared order,
//!   which unlike the implicit rowid survives `VACUUM` and re-insertion;
//! - either way every insertable column then breaks ties by storage class and
//!   exact bytes, so values a collation or numeric comparison deems equal
//!   (`'a'` and `'A'` under NOCASE, `1` and `1.0`) still get one order;
//! - virtual tables that keep their content in shadow tables sort by rowid,
//!   which is written out so the rebuilt index keeps the same row ids.
//!
//! Generated and hidden columns never appear in `INSERT` statements; the
//! engine recomputes them from the DDL.

use std::io::Write;

use rusqlite::Connection;
use tracing::debug;

use crate::config::{FilterConfig, Sections};
use crate::error::{FilterError, Result};
use crate::schema::{ObjectKind, Schema, SchemaObject};
use crate::value::{SqlValue, quote_ident};

/// Options controlling what the dump contains and how values render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    pub sections: Sections,
    pub float_precision: Option<u32>,
}

impl From<&FilterConfig> for DumpOptions {
    fn from(config: &FilterConfig) -> Self {
        Self {
            sections: config.sections,
            float_precision: config.float_precision,
        }
    }
}

/// Counts reported after a dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub objects: usize,
    pub tables: usize,
    pub rows: usize,
}

/// Serializes one database into canonical SQL.
pub struct Dumper<'a> {
    conn: &'a Connection,
    schema: &'a Schema,
    options: DumpOptions,
}

impl<'a> Dumper<'a> {
    pub fn new(conn: &'a Connection, schema: &'a Schema, options: DumpOptions) -> Self {
        Self {
            conn,
            schema,
            options,
        }
    }

    /// Renders the full dump into memory.
    ///
    /// Nothing is returned unless the whole dump succeeds, so callers never
    /// see a truncated dump.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Writes the dump to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<DumpStats> {
        let mut stats = DumpStats::default();
        let sections = self.options.sections;

        if sections.includes_schema() {
            self.write_header(out)?;
            for object in &self.schema.objects {
                writeln!(out, "{}", terminate(&object.sql))?;
                stats.objects += 1;
            }
        }

        if sections.includes_data() {
            for object in self.schema.row_sources() {
                if let Some(rows) = self.write_rows(out, object)? {
                    stats.tables += 1;
                    stats.rows += rows;
                }
            }
        }

        if sections == Sections::All && self.schema.has_sequence {
            self.write_sequences(out)?;
        }

        if sections.includes_schema() {
            writeln!(out, "COMMIT;")?;
        }

        debug!(
            objects = stats.objects,
            tables = stats.tables,
            rows = stats.rows,
            "Dump complete"
        );
        Ok(stats)
    }

    fn write_header<W: Write>(&self, out: &mut W) -> Result<()> {
        let user_version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        writeln!(out, "PRAGMA user_version = {user_version};")?;
        writeln!(out, "PRAGMA foreign_keys=OFF;")?;
        writeln!(out, "BEGIN TRANSACTION;")?;
        Ok(())
    }

    /// Writes the rows of one table; `None` if the object carries no row data.
    fn write_rows<W: Write>(&self, out: &mut W, object: &SchemaObject) -> Result<Option<usize>> {
        let columns: Vec<&str> = object
            .insertable_columns()
            .map(|c| c.name.as_str())
            .collect();
        if columns.is_empty() {
            debug!(table = %object.name, "No insertable columns");
            return Ok(None);
        }

        let query = match object.kind {
            ObjectKind::VirtualTable if object.shadow_tables.is_empty() => {
                // Content lives outside this database file.
                debug!(table = %object.name, "Skipping rows of virtual table without shadow tables");
                return Ok(None);
            }
            ObjectKind::VirtualTable => self.virtual_table_query(object, &columns),
            _ => table_query(object, &columns),
        };

        debug!(table = %object.name, sql = %query.select, "Dumping rows");
        let mut stmt = self
            .conn
            .prepare(&query.select)
            .map_err(|e| row_error(object, e))?;
        let width = query.insert_columns.len();
        let prefix = format!(
            "INSERT INTO {} ({}) VALUES (",
            quote_ident(&object.name),
            query
                .insert_columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut rows = stmt.query([]).map_err(|e| row_error(object, e))?;
        let mut count = 0;
        while let Some(row) = rows.next().map_err(|e| row_error(object, e))? {
            let mut literals = Vec::with_capacity(width);
            for i in 0..width {
                let value = row.get_ref(i).map_err(|e| row_error(object, e))?;
                let value = SqlValue::try_from(value).map_err(|e| match e {
                    FilterError::Serialization(msg) => {
                        FilterError::Serialization(format!("{}: {msg}", object.name))
                    }
                    other => other,
                })?;
                literals.push(value.to_literal(self.options.float_precision));
            }
            writeln!(out, "{prefix}{});", literals.join(", "))?;
            count += 1;
        }
        Ok(Some(count))
    }

    fn virtual_table_query(&self, object: &SchemaObject, columns: &[&str]) -> RowQuery {
        let with_rowid = RowQuery {
            select: format!(
                "SELECT rowid, {} FROM {} ORDER BY rowid",
                column_list(columns),
                quote_ident(&object.name)
            ),
            insert_columns: std::iter::once("rowid")
                .chain(columns.iter().copied())
                .map(String::from)
                .collect(),
        };
        if self.conn.prepare(&with_rowid.select).is_ok() {
            return with_rowid;
        }
        debug!(table = %object.name, "Virtual table has no rowid; ordering by content");
        table_query(object, columns)
    }

    fn write_sequences<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, seq FROM sqlite_sequence ORDER BY name")?;
        let mut rows = stmt.query([])?;
        writeln!(out, "DELETE FROM \"sqlite_sequence\";")?;
        while let Some(row) = rows.next()? {
            let name = SqlValue::try_from(row.get_ref(0)?)?;
            let seq = SqlValue::try_from(row.get_ref(1)?)?;
            writeln!(
                out,
                "INSERT INTO \"sqlite_sequence\" (\"name\", \"seq\") VALUES ({}, {});",
                name.to_literal(None),
                seq.to_literal(None)
            )?;
        }
        Ok(())
    }
}

struct RowQuery {
    select: String,
    insert_columns: Vec<String>,
}

fn table_query(object: &SchemaObject, columns: &[&str]) -> RowQuery {
    let mut order_by: Vec<String> = object
        .primary_key()
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect();
    order_by.extend(columns.iter().flat_map(|c| content_order(c)));
    let order_by = order_by.join(", ");
    RowQuery {
        select: format!(
            "SELECT {} FROM {} ORDER BY {order_by}",
            column_list(columns),
            quote_ident(&object.name)
        ),
        insert_columns: columns.iter().map(|c| c.to_string()).collect(),
    }
}

/// Sort terms giving a total order over one column's stored values.
fn content_order(column: &str) -> [String; 3] {
    let ident = quote_ident(column);
    [
        ident.clone(),
        format!("typeof({ident})"),
        format!("{ident} COLLATE BINARY"),
    ]
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn terminate(sql: &str) -> String {
    if sql.ends_with(';') {
        sql.to_string()
    } else {
        format!("{sql};")
    }
}

fn row_error(object: &SchemaObject, err: rusqlite::Error) -> FilterError {
    FilterError::Serialization(format!("cannot read rows of {}: {err}", object.name))
}
