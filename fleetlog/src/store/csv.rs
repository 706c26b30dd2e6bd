//! CSV output for derived stores.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Record, StoreWriter, WriteMode, WriteSession};
use crate::codec::{decode_fields, FieldKind};
use crate::error::{FleetError, Result};

/// A named, typed CSV column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: FieldKind,
}

impl Column {
    pub fn str(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Str,
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Int,
        }
    }
}

/// Formats one CSV line (without the newline), quoting fields as needed.
pub fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|field| escape(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Creates CSV writers for files inside one directory.
#[derive(Debug, Clone)]
pub struct CsvFileManager {
    dir: PathBuf,
}

impl CsvFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A writer that renders each record's key columns then value columns.
    pub fn writer(&self, file: &str, keys: Vec<Column>, values: Vec<Column>) -> Arc<CsvWriter> {
        Arc::new(CsvWriter {
            path: self.dir.join(file),
            name: file.to_string(),
            keys,
            values,
        })
    }
}

/// Rewrites a CSV file from a record stream.
///
/// Rows go to a temporary file that replaces the target at commit, so readers
/// of the CSV never see a half-written run.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    path: PathBuf,
    name: String,
    keys: Vec<Column>,
    values: Vec<Column>,
}

impl CsvWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreWriter for CsvWriter {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_with(&self, _mode: WriteMode) -> Result<Box<dyn WriteSession>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("csv.tmp");
        let mut out = BufWriter::new(File::create(&temp_path)?);
        let header: Vec<&str> = self
            .keys
            .iter()
            .chain(self.values.iter())
            .map(|c| c.name.as_str())
            .collect();
        writeln!(out, "{}", csv_line(&header))?;
        Ok(Box::new(CsvSession {
            name: self.name.clone(),
            path: self.path.clone(),
            temp_path,
            out: Some(out),
            key_kinds: self.keys.iter().map(|c| c.kind).collect(),
            value_kinds: self.values.iter().map(|c| c.kind).collect(),
        }))
    }
}

struct CsvSession {
    name: String,
    path: PathBuf,
    temp_path: PathBuf,
    out: Option<BufWriter<File>>,
    key_kinds: Vec<FieldKind>,
    value_kinds: Vec<FieldKind>,
}

impl WriteSession for CsvSession {
    fn write(&mut self, record: Record) -> Result<()> {
        let mut fields = decode_fields(&record.key, &self.key_kinds)?;
        fields.extend(decode_fields(&record.value, &self.value_kinds)?);
        let rendered: Vec<String> = fields.iter().map(ToString::to_string).collect();
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| FleetError::sink(&self.name, "session already closed"))?;
        writeln!(out, "{}", csv_line(&rendered))?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(out) = self.out.take() {
            let file = out
                .into_inner()
                .map_err(|err| FleetError::Io(err.into_error()))?;
            file.sync_all()?;
        }
        fs::rename(&self.temp_path, &self.path)?;
        Ok(())
    }
}

impl Drop for CsvSession {
    fn drop(&mut self) {
        if self.temp_path.exists() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}
