//! Dynamic schema discovery for tables whose metric columns are not
//! known until the first record arrives.
//!
//! The first document seen for such a table fixes the column set for
//! the rest of the run. Later documents carrying a field the first one
//! lacked get that field dropped with a once-per-column warning; fields
//! the later document lacks are simply left unset.

use std::collections::HashSet;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

/// Maps a JSON value to a typed cell and the column type it implies.
/// Returns `None` for shapes no column type covers (nested objects,
/// mixed arrays, null).
pub fn infer_cell(value: &Value) -> Option<(CellValue, ColumnType)> {
    match value {
        Value::Bool(b) => Some((CellValue::Bool(*b), ColumnType::Bool)),
        Value::String(s) => Some((CellValue::Text(s.clone()), ColumnType::Text)),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some((CellValue::UInt64(u), ColumnType::UInt64))
            } else if let Some(i) = n.as_i64() {
                Some((CellValue::Int64(i), ColumnType::Int64))
            } else {
                n.as_f64().map(|f| (CellValue::Float64(f), ColumnType::Float64))
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(item.as_u64()?);
            }
            Some((CellValue::UInt64List(out), ColumnType::UInt64List))
        }
        Value::Null | Value::Object(_) => None,
    }
}

/// A staging buffer whose non-fixed columns are discovered from data.
#[derive(Debug)]
pub struct DynamicTable {
    buffer: TableBuffer,
    warned: HashSet<String>,
}

impl DynamicTable {
    /// New table carrying only its fixed leading columns; the dynamic
    /// tail is supplied later by [`define_with`](Self::define_with).
    pub fn new(name: &str, fixed: &[(&str, ColumnType)]) -> Result<Self, TableError> {
        let mut buffer = TableBuffer::new(name);
        for (col, ty) in fixed {
            buffer.add_column(col, *ty)?;
        }
        Ok(Self {
            buffer,
            warned: HashSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.buffer.name()
    }

    pub fn is_defined(&self) -> bool {
        self.buffer.is_defined()
    }

    pub fn staged_rows(&self) -> usize {
        self.buffer.staged_rows()
    }

    /// Seals the schema with the dynamic columns taken from the first
    /// document. A name colliding with a fixed column is an error.
    pub fn define_with<'a, I>(&mut self, columns: I) -> Result<(), TableError>
    where
        I: IntoIterator<Item = (&'a str, ColumnType)>,
    {
        for (col, ty) in columns {
            self.buffer.add_column(col, ty)?;
        }
        self.buffer.define();
        Ok(())
    }

    pub fn add_row(&mut self) -> Result<usize, TableError> {
        self.buffer.add_row()
    }

    /// Sets a fixed (mandatory-schema) column; failures propagate.
    pub fn set_fixed(&mut self, row: usize, column: &str, value: CellValue) -> Result<(), TableError> {
        self.buffer.set(row, column, value)
    }

    /// Sets a discovered column. A name the first document did not
    /// carry, or a value whose type no longer matches, is dropped with
    /// a warning emitted once per column for the run.
    pub fn set_dynamic(&mut self, doc_id: &str, row: usize, column: &str, value: CellValue) {
        match self.buffer.set(row, column, value) {
            Ok(()) => {}
            Err(e @ (TableError::UnknownColumn { .. } | TableError::TypeMismatch { .. })) => {
                if self.warned.insert(column.to_string()) {
                    warn!(
                        table = self.buffer.name(),
                        column,
                        doc_id,
                        "dropping field absent from the discovered schema: {e}"
                    );
                }
            }
            Err(e) => {
                // Row-index and lifecycle misuse is a caller bug, not
                // a data problem; keep it loud.
                warn!(table = self.buffer.name(), doc_id, "dropping cell: {e}");
            }
        }
    }

    pub async fn write<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.buffer.write(sink).await
    }

    pub async fn commit<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.buffer.commit(sink).await
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.buffer.flush(sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::sink::MemorySink;

    #[test]
    fn test_infer_cell_shapes() {
        assert_eq!(
            infer_cell(&json!(3)),
            Some((CellValue::UInt64(3), ColumnType::UInt64))
        );
        assert_eq!(
            infer_cell(&json!(-3)),
            Some((CellValue::Int64(-3), ColumnType::Int64))
        );
        assert_eq!(
            infer_cell(&json!(0.5)),
            Some((CellValue::Float64(0.5), ColumnType::Float64))
        );
        assert_eq!(
            infer_cell(&json!("sstd")),
            Some((CellValue::Text("sstd".to_string()), ColumnType::Text))
        );
        assert_eq!(
            infer_cell(&json!(true)),
            Some((CellValue::Bool(true), ColumnType::Bool))
        );
        assert_eq!(
            infer_cell(&json!([1, 2, 3])),
            Some((CellValue::UInt64List(vec![1, 2, 3]), ColumnType::UInt64List))
        );
        assert_eq!(infer_cell(&json!(null)), None);
        assert_eq!(infer_cell(&json!({"nested": 1})), None);
        assert_eq!(infer_cell(&json!([1, "mixed"])), None);
    }

    #[test]
    fn test_first_document_fixes_schema() {
        let mut t = DynamicTable::new("node_state", &[("event_id", ColumnType::Text)]).unwrap();
        assert!(!t.is_defined());

        t.define_with([("mem_free", ColumnType::Float64), ("load", ColumnType::Float64)])
            .unwrap();
        assert!(t.is_defined());

        let r = t.add_row().unwrap();
        t.set_fixed(r, "event_id", CellValue::Text("2:0:3:10".into()))
            .unwrap();
        t.set_dynamic("2:0:3:10", r, "mem_free", CellValue::Float64(12.0));
        assert_eq!(t.staged_rows(), 1);
    }

    #[test]
    fn test_unknown_dynamic_field_dropped_not_fatal() {
        let mut t = DynamicTable::new("node_state", &[("event_id", ColumnType::Text)]).unwrap();
        t.define_with([("a", ColumnType::Float64)]).unwrap();

        let r = t.add_row().unwrap();
        // Column never discovered; silently dropped after one warning.
        t.set_dynamic("d1", r, "c", CellValue::Float64(1.0));
        t.set_dynamic("d2", r, "c", CellValue::Float64(2.0));
        assert_eq!(t.staged_rows(), 1);
    }

    #[test]
    fn test_fixed_column_collision_is_error() {
        let mut t = DynamicTable::new("t", &[("event_id", ColumnType::Text)]).unwrap();
        let err = t
            .define_with([("event_id", ColumnType::Float64)])
            .unwrap_err();
        assert!(matches!(err, TableError::DuplicateColumn { .. }));
    }

    #[tokio::test]
    async fn test_flush_through_sink() {
        let mut sink = MemorySink::new();
        let mut t = DynamicTable::new("node_state", &[("event_id", ColumnType::Text)]).unwrap();
        t.define_with([("load", ColumnType::Float64)]).unwrap();

        let r = t.add_row().unwrap();
        t.set_fixed(r, "event_id", CellValue::Text("1:0:0:0".into()))
            .unwrap();
        t.set_dynamic("1:0:0:0", r, "load", CellValue::Float64(0.7));
        t.flush(&mut sink).await.unwrap();

        let stored = sink.table("node_state").unwrap();
        assert_eq!(stored.rows.len(), 1);
        assert_eq!(*stored.cell(0, "load"), CellValue::Float64(0.7));
        assert_eq!(t.staged_rows(), 0);
    }
}
