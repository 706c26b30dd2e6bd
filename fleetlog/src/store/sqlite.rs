//! SQLite output for derived stores.
//!
//! Every session replaces the table contents inside a single transaction: the
//! table is emptied, all rows are inserted, and the transaction commits only
//! when the session does. Any failure, or dropping the session, rolls back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::ToSqlOutput;
use rusqlite::{Connection, ToSql};
use tracing::debug;

use super::csv::Column;
use super::{Record, StoreWriter, WriteMode, WriteSession};
use crate::codec::{decode_fields, Field, FieldKind};
use crate::error::{FleetError, Result};

impl ToSql for Field {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Field::Str(s) => s.to_sql(),
            Field::Int(i) => i.to_sql(),
        }
    }
}

/// Creates table writers against one database file.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: PathBuf,
}

impl SqliteManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writer(&self, table: &str, keys: Vec<Column>, values: Vec<Column>) -> Result<Arc<SqliteWriter>> {
        let valid = |name: &str| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !valid(table) || !keys.iter().chain(values.iter()).all(|c| valid(&c.name)) {
            return Err(FleetError::Configuration(format!(
                "invalid sqlite identifier in table '{table}'"
            )));
        }
        Ok(Arc::new(SqliteWriter {
            path: self.path.clone(),
            table: table.to_string(),
            columns: keys.iter().chain(values.iter()).cloned().collect(),
            key_count: keys.len(),
        }))
    }
}

/// Replaces one table per session.
#[derive(Debug, Clone)]
pub struct SqliteWriter {
    path: PathBuf,
    table: String,
    columns: Vec<Column>,
    key_count: usize,
}

impl SqliteWriter {
    fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let sql_type = match c.kind {
                    FieldKind::Str => "TEXT",
                    FieldKind::Int => "INTEGER",
                };
                format!("{} {sql_type}", c.name)
            })
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            columns.join(", ")
        )
    }

    fn insert_sql(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.table,
            names.join(", ")
        )
    }
}

impl StoreWriter for SqliteWriter {
    fn name(&self) -> &str {
        &self.table
    }

    fn open_with(&self, _mode: WriteMode) -> Result<Box<dyn WriteSession>> {
        let conn = Connection::open(&self.path).map_err(|err| {
            FleetError::sink(
                &self.table,
                format!("cannot open {}: {err}", self.path.display()),
            )
        })?;
        conn.execute_batch(&self.create_sql())?;
        conn.execute_batch("BEGIN")?;
        conn.execute(&format!("DELETE FROM {}", self.table), [])?;
        Ok(Box::new(SqliteSession {
            conn,
            insert_sql: self.insert_sql(),
            table: self.table.clone(),
            key_kinds: self.columns[..self.key_count].iter().map(|c| c.kind).collect(),
            value_kinds: self.columns[self.key_count..].iter().map(|c| c.kind).collect(),
            rows: 0,
            finished: false,
        }))
    }
}

struct SqliteSession {
    conn: Connection,
    insert_sql: String,
    table: String,
    key_kinds: Vec<FieldKind>,
    value_kinds: Vec<FieldKind>,
    rows: u64,
    finished: bool,
}

impl WriteSession for SqliteSession {
    fn write(&mut self, record: Record) -> Result<()> {
        let mut fields = decode_fields(&record.key, &self.key_kinds)?;
        fields.extend(decode_fields(&record.value, &self.value_kinds)?);
        let mut stmt = self.conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(rusqlite::params_from_iter(fields.iter()))?;
        self.rows += 1;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        debug!(table = %self.table, rows = self.rows, "replaced sqlite table");
        Ok(())
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}
