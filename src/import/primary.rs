//! Primary event tables: one row per top-level document.
//!
//! The `anomalies` and `normal_execs` tables share a layout; which one
//! a document lands in is decided by the orchestrator. Primary rows
//! are never deduplicated.

use anyhow::Result;

use crate::doc::Node;
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::ImportError;

const COLUMNS: &[(&str, ColumnType)] = &[
    ("event_id", ColumnType::Text),
    ("entry", ColumnType::UInt64),
    ("exit", ColumnType::UInt64),
    ("fid", ColumnType::Int32),
    ("pid", ColumnType::UInt32),
    ("rid", ColumnType::UInt32),
    ("tid", ColumnType::UInt32),
    ("io_step", ColumnType::UInt32),
    ("runtime_exclusive", ColumnType::UInt64),
    ("outlier_score", ColumnType::Float64),
    ("outlier_severity", ColumnType::Float64),
    ("is_gpu_event", ColumnType::Bool),
];

pub struct PrimaryImporter {
    table: TableBuffer,
}

impl PrimaryImporter {
    pub fn new(name: &str) -> Result<Self, TableError> {
        Ok(Self {
            table: TableBuffer::with_columns(name, COLUMNS)?,
        })
    }

    /// Stages exactly one row. `gid` and `pid` were already extracted
    /// by the orchestrator (their absence fails the record before this
    /// point); every other field is optional and left unset when
    /// absent. A present-but-mistyped field fails the record, and no
    /// partial row is staged.
    pub fn import(&mut self, gid: &str, pid: u32, node: &Node) -> Result<(), ImportError> {
        let entry = node.opt_u64("entry")?;
        let exit = node.opt_u64("exit")?;
        let fid = node.opt_i32("fid")?;
        let rid = node.opt_u32("rid")?;
        let tid = node.opt_u32("tid")?;
        let io_step = node.opt_u32("io_step")?;
        let runtime_exclusive = node.opt_u64("runtime_exclusive")?;
        let outlier_score = node.opt_f64("outlier_score")?;
        let outlier_severity = node.opt_f64("outlier_severity")?;
        let is_gpu_event = node.opt_bool("is_gpu_event")?;

        let r = self.table.add_row()?;
        self.table.set(r, "event_id", CellValue::Text(gid.to_string()))?;
        self.table.set(r, "pid", CellValue::UInt32(pid))?;
        if let Some(v) = entry {
            self.table.set(r, "entry", CellValue::UInt64(v))?;
        }
        if let Some(v) = exit {
            self.table.set(r, "exit", CellValue::UInt64(v))?;
        }
        if let Some(v) = fid {
            self.table.set(r, "fid", CellValue::Int32(v))?;
        }
        if let Some(v) = rid {
            self.table.set(r, "rid", CellValue::UInt32(v))?;
        }
        if let Some(v) = tid {
            self.table.set(r, "tid", CellValue::UInt32(v))?;
        }
        if let Some(v) = io_step {
            self.table.set(r, "io_step", CellValue::UInt32(v))?;
        }
        if let Some(v) = runtime_exclusive {
            self.table.set(r, "runtime_exclusive", CellValue::UInt64(v))?;
        }
        if let Some(v) = outlier_score {
            self.table.set(r, "outlier_score", CellValue::Float64(v))?;
        }
        if let Some(v) = outlier_severity {
            self.table.set(r, "outlier_severity", CellValue::Float64(v))?;
        }
        if let Some(v) = is_gpu_event {
            self.table.set(r, "is_gpu_event", CellValue::Bool(v))?;
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.table.flush(sink).await
    }
}
