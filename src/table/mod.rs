//! In-memory staging buffer bound to one output table.
//!
//! Lifecycle: columns are declared, the set is sealed with `define`,
//! rows are staged, and the staged batch cycles through
//! write → commit → clear for the process lifetime. The sink-side DDL
//! is issued on the first `write` so statically- and dynamically-shaped
//! tables share one lifecycle; no row reaches the sink before its
//! table exists there.

use std::collections::HashMap;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::sink::{CellValue, ColumnSpec, ColumnType, Sink};

/// Misuse of the buffer state machine or a cell-type violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("table `{table}`: column `{column}` added after define")]
    ColumnAfterDefine { table: String, column: String },

    #[error("table `{table}`: duplicate column `{column}`")]
    DuplicateColumn { table: String, column: String },

    #[error("table `{table}`: row staged before define")]
    NotDefined { table: String },

    #[error("table `{table}`: unknown column `{column}`")]
    UnknownColumn { table: String, column: String },

    #[error(
        "table `{table}`: column `{column}` is {expected}, got {got} \
         (no implicit narrowing)"
    )]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnType,
        got: &'static str,
    },

    #[error("table `{table}`: row {row} out of range")]
    RowOutOfRange { table: String, row: usize },
}

/// Column-oriented write buffer for one table.
#[derive(Debug)]
pub struct TableBuffer {
    name: String,
    columns: Vec<ColumnSpec>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<CellValue>>,
    defined: bool,
    ddl_issued: bool,
}

impl TableBuffer {
    /// New buffer with no columns declared.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            index: HashMap::new(),
            rows: Vec::new(),
            defined: false,
            ddl_issued: false,
        }
    }

    /// Declares columns and seals the set in one step, for tables whose
    /// layout is known statically.
    pub fn with_columns(name: &str, columns: &[(&str, ColumnType)]) -> Result<Self, TableError> {
        let mut buf = Self::new(name);
        for (col, ty) in columns {
            buf.add_column(col, *ty)?;
        }
        buf.define();
        Ok(buf)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }

    pub fn staged_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Declares one column. Only legal before [`define`](Self::define).
    pub fn add_column(&mut self, column: &str, ty: ColumnType) -> Result<(), TableError> {
        if self.defined {
            return Err(TableError::ColumnAfterDefine {
                table: self.name.clone(),
                column: column.to_string(),
            });
        }
        if self.index.contains_key(column) {
            return Err(TableError::DuplicateColumn {
                table: self.name.clone(),
                column: column.to_string(),
            });
        }
        self.index.insert(column.to_string(), self.columns.len());
        self.columns.push(ColumnSpec::new(column, ty));
        Ok(())
    }

    /// Seals the column set. Irreversible; no further `add_column`
    /// calls are permitted for the buffer's lifetime.
    pub fn define(&mut self) {
        self.defined = true;
    }

    /// Stages one empty row (all cells unset) and returns its index.
    pub fn add_row(&mut self) -> Result<usize, TableError> {
        if !self.defined {
            return Err(TableError::NotDefined {
                table: self.name.clone(),
            });
        }
        self.rows.push(vec![CellValue::Null; self.columns.len()]);
        Ok(self.rows.len() - 1)
    }

    /// Sets one cell. The value's type must match the declared column
    /// type exactly; a signed/unsigned or width mismatch is an error,
    /// never a coercion.
    pub fn set(&mut self, row: usize, column: &str, value: CellValue) -> Result<(), TableError> {
        let col = self
            .column_index(column)
            .ok_or_else(|| TableError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })?;
        let ty = self.columns[col].ty;
        if !value.matches(ty) {
            return Err(TableError::TypeMismatch {
                table: self.name.clone(),
                column: column.to_string(),
                expected: ty,
                got: value.type_name(),
            });
        }
        let cells = self
            .rows
            .get_mut(row)
            .ok_or_else(|| TableError::RowOutOfRange {
                table: self.name.clone(),
                row,
            })?;
        cells[col] = value;
        Ok(())
    }

    /// Transfers all staged rows to the sink in one batch append.
    /// Issues the table DDL on first use. Not yet durable.
    ///
    /// A buffer that was never defined has nothing staged and nothing
    /// to create; `write` is a no-op for it.
    pub async fn write<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        if !self.defined {
            return Ok(());
        }
        if !self.ddl_issued {
            sink.define_table(&self.name, &self.columns)
                .await
                .with_context(|| format!("defining table {}", self.name))?;
            self.ddl_issued = true;
        }
        if self.rows.is_empty() {
            return Ok(());
        }
        sink.append_rows(&self.name, &self.columns, &self.rows)
            .await
            .with_context(|| format!("appending {} rows to {}", self.rows.len(), self.name))?;
        Ok(())
    }

    /// Durability barrier for previously written rows.
    pub async fn commit<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        if !self.ddl_issued {
            return Ok(());
        }
        sink.commit(&self.name)
            .await
            .with_context(|| format!("committing table {}", self.name))
    }

    /// Discards staged rows and frees their memory. Never affects rows
    /// already written or committed, and never resets any dedup key
    /// set.
    pub fn clear(&mut self) {
        drop(std::mem::take(&mut self.rows));
    }

    /// write → commit → clear in one batch boundary step.
    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.write(sink).await?;
        self.commit(sink).await?;
        self.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn event_table() -> TableBuffer {
        TableBuffer::with_columns(
            "events",
            &[
                ("event_id", ColumnType::Text),
                ("entry", ColumnType::UInt64),
                ("fid", ColumnType::Int32),
            ],
        )
        .expect("distinct columns")
    }

    #[test]
    fn test_no_rows_before_define() {
        let mut buf = TableBuffer::new("t");
        buf.add_column("a", ColumnType::Text).unwrap();
        assert!(matches!(
            buf.add_row(),
            Err(TableError::NotDefined { .. })
        ));
    }

    #[test]
    fn test_no_columns_after_define() {
        let mut buf = event_table();
        assert!(matches!(
            buf.add_column("late", ColumnType::Bool),
            Err(TableError::ColumnAfterDefine { .. })
        ));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut buf = TableBuffer::new("t");
        buf.add_column("a", ColumnType::Text).unwrap();
        assert!(matches!(
            buf.add_column("a", ColumnType::Text),
            Err(TableError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_strict_cell_typing() {
        let mut buf = event_table();
        let r = buf.add_row().unwrap();

        buf.set(r, "entry", CellValue::UInt64(100)).unwrap();

        // u32 into a u64 column is a mismatch, not a widening.
        let err = buf.set(r, "entry", CellValue::UInt32(100)).unwrap_err();
        assert!(matches!(err, TableError::TypeMismatch { .. }));

        // Signed/unsigned mismatch likewise.
        let err = buf.set(r, "fid", CellValue::UInt32(7)).unwrap_err();
        assert!(matches!(err, TableError::TypeMismatch { .. }));

        let err = buf
            .set(r, "ghost", CellValue::UInt64(1))
            .unwrap_err();
        assert!(matches!(err, TableError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_write_commit_clear_cycle() {
        let mut buf = event_table();
        let mut sink = MemorySink::new();

        let r = buf.add_row().unwrap();
        buf.set(r, "event_id", CellValue::Text("2:0:3:10".into()))
            .unwrap();
        buf.set(r, "fid", CellValue::Int32(7)).unwrap();

        buf.write(&mut sink).await.unwrap();
        buf.commit(&mut sink).await.unwrap();
        buf.clear();

        assert_eq!(buf.staged_rows(), 0);
        let t = sink.table("events").unwrap();
        assert_eq!(t.rows.len(), 1);
        assert_eq!(t.committed, 1);
        // Unset cell arrived as Null (sink default).
        assert_eq!(*t.cell(0, "entry"), CellValue::Null);

        // Second cycle appends without redefining.
        let r = buf.add_row().unwrap();
        buf.set(r, "event_id", CellValue::Text("2:0:3:11".into()))
            .unwrap();
        buf.flush(&mut sink).await.unwrap();
        assert_eq!(sink.table("events").unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_without_write_discards_rows() {
        let mut buf = event_table();
        let mut sink = MemorySink::new();

        buf.write(&mut sink).await.unwrap(); // DDL only
        let r = buf.add_row().unwrap();
        buf.set(r, "event_id", CellValue::Text("x".into())).unwrap();
        buf.clear();
        buf.write(&mut sink).await.unwrap();

        assert_eq!(sink.table("events").unwrap().rows.len(), 0);
    }

    #[tokio::test]
    async fn test_undefined_buffer_write_is_noop() {
        let mut buf = TableBuffer::new("never_seen");
        let mut sink = MemorySink::new();
        buf.write(&mut sink).await.unwrap();
        buf.commit(&mut sink).await.unwrap();
        assert!(sink.table("never_seen").is_none());
    }
}
