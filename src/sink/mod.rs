pub mod clickhouse;

use std::collections::HashMap;
use std::future::Future;

use anyhow::{bail, Result};

/// The closed set of column types a sink table may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float64,
    Bool,
    /// Variable-length list of unsigned integers (histogram-style model
    /// data).
    UInt64List,
}

impl ColumnType {
    /// Canonical name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::UInt64List => "uint64_list",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One named, typed column in a table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

/// A single staged cell value.
///
/// `Null` marks a cell left unset; the sink supplies its own default.
/// There is no implicit narrowing anywhere: a value only ever matches
/// the column type it was constructed as.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Int32(i32),
    Int64(i64),
    UInt32(u32),
    UInt64(u64),
    Float64(f64),
    Bool(bool),
    UInt64List(Vec<u64>),
}

impl CellValue {
    /// Whether this value may be stored in a column of type `ty`.
    /// `Null` is storable anywhere.
    pub fn matches(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Self::Null, _)
                | (Self::Text(_), ColumnType::Text)
                | (Self::Int32(_), ColumnType::Int32)
                | (Self::Int64(_), ColumnType::Int64)
                | (Self::UInt32(_), ColumnType::UInt32)
                | (Self::UInt64(_), ColumnType::UInt64)
                | (Self::Float64(_), ColumnType::Float64)
                | (Self::Bool(_), ColumnType::Bool)
                | (Self::UInt64List(_), ColumnType::UInt64List)
        )
    }

    /// Name of this value's own type, used in mismatch diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Int32(_) => "int32",
            Self::Int64(_) => "int64",
            Self::UInt32(_) => "uint32",
            Self::UInt64(_) => "uint64",
            Self::Float64(_) => "float64",
            Self::Bool(_) => "bool",
            Self::UInt64List(_) => "uint64_list",
        }
    }
}

/// Columnar analytical store reached through a connection handle.
///
/// Collaborator boundary: the core stages rows in [`crate::table`]
/// buffers and hands them over here in batches. Durability across
/// tables is not atomic; a crash between commits leaves the sink
/// partially updated (accepted tradeoff).
pub trait Sink: Send {
    /// Creates the table if it does not already exist.
    fn define_table(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Appends staged rows in one batch. Not yet guaranteed durable.
    fn append_rows(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Vec<CellValue>],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Makes previously appended rows durable. Failure here is fatal
    /// for the whole run.
    fn commit(&mut self, table: &str) -> impl Future<Output = Result<()>> + Send;

    /// Diagnostic row count for a table.
    fn table_size(&mut self, table: &str) -> impl Future<Output = Result<u64>> + Send;
}

/// One table held by [`MemorySink`].
#[derive(Debug, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<CellValue>>,
    /// Number of leading rows that have been committed.
    pub committed: usize,
}

impl MemoryTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Cell access by column name; panics on unknown names, which is
    /// what assertions want.
    pub fn cell(&self, row: usize, column: &str) -> &CellValue {
        let idx = self
            .column_index(column)
            .unwrap_or_else(|| panic!("no column `{column}`"));
        &self.rows[row][idx]
    }
}

/// In-memory sink used by the test suite and local dry runs.
///
/// Models the written→committed distinction explicitly so lifecycle
/// tests can observe that `clear()` never touches sink state.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: HashMap<String, MemoryTable>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl Sink for MemorySink {
    async fn define_table(&mut self, table: &str, columns: &[ColumnSpec]) -> Result<()> {
        let entry = self.tables.entry(table.to_string()).or_default();
        if entry.columns.is_empty() {
            entry.columns = columns.to_vec();
        } else if entry.columns != columns {
            bail!("table `{table}` redefined with a different column set");
        }
        Ok(())
    }

    async fn append_rows(
        &mut self,
        table: &str,
        columns: &[ColumnSpec],
        rows: &[Vec<CellValue>],
    ) -> Result<()> {
        let Some(entry) = self.tables.get_mut(table) else {
            bail!("append to undefined table `{table}`");
        };
        if entry.columns != columns {
            bail!("append to `{table}` with mismatched columns");
        }
        entry.rows.extend_from_slice(rows);
        Ok(())
    }

    async fn commit(&mut self, table: &str) -> Result<()> {
        let Some(entry) = self.tables.get_mut(table) else {
            bail!("commit of undefined table `{table}`");
        };
        entry.committed = entry.rows.len();
        Ok(())
    }

    async fn table_size(&mut self, table: &str) -> Result<u64> {
        Ok(self.tables.get(table).map_or(0, |t| t.rows.len() as u64))
    }
}
