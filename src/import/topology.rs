//! I/O-step and rank↔host satellites, keyed by composite tuples.
//!
//! Both are pure entity pools: one row per distinct key for the whole
//! run, no junction side.

use anyhow::Result;

use crate::dedup::KeySet;
use crate::doc::Node;
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::{opt_or_warn, ImportError};

/// One row per distinct `(pid, rid, io_step)`.
pub struct IoStepImporter {
    table: TableBuffer,
    seen: KeySet<(u32, u32, u32)>,
}

impl IoStepImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: TableBuffer::with_columns(
                "io_steps",
                &[
                    ("pid", ColumnType::UInt32),
                    ("rid", ColumnType::UInt32),
                    ("io_step", ColumnType::UInt32),
                    ("io_step_tstart", ColumnType::UInt64),
                    ("io_step_tend", ColumnType::UInt64),
                ],
            )?,
            seen: KeySet::new(),
        })
    }

    pub fn import(&mut self, gid: &str, node: &Node, pid: u32) -> Result<(), ImportError> {
        let Some(rid) = opt_or_warn(node.opt_u32("rid"), gid, "io_steps") else {
            return Ok(());
        };
        let Some(io_step) = opt_or_warn(node.opt_u32("io_step"), gid, "io_steps") else {
            return Ok(());
        };
        if !self.seen.insert_if_absent((pid, rid, io_step)) {
            return Ok(());
        }

        let tstart = opt_or_warn(node.opt_u64("io_step_tstart"), gid, "io_steps");
        let tend = opt_or_warn(node.opt_u64("io_step_tend"), gid, "io_steps");

        let r = self.table.add_row()?;
        self.table.set(r, "pid", CellValue::UInt32(pid))?;
        self.table.set(r, "rid", CellValue::UInt32(rid))?;
        self.table.set(r, "io_step", CellValue::UInt32(io_step))?;
        if let Some(v) = tstart {
            self.table.set(r, "io_step_tstart", CellValue::UInt64(v))?;
        }
        if let Some(v) = tend {
            self.table.set(r, "io_step_tend", CellValue::UInt64(v))?;
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.table.flush(sink).await
    }
}

/// One row per distinct `(pid, rid)` mapping a rank to its host.
pub struct RankNodeImporter {
    table: TableBuffer,
    seen: KeySet<(u32, u32)>,
}

impl RankNodeImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: TableBuffer::with_columns(
                "rank_nodes",
                &[
                    ("pid", ColumnType::UInt32),
                    ("rid", ColumnType::UInt32),
                    ("hostname", ColumnType::Text),
                ],
            )?,
            seen: KeySet::new(),
        })
    }

    pub fn import(&mut self, gid: &str, node: &Node, pid: u32) -> Result<(), ImportError> {
        let Some(rid) = opt_or_warn(node.opt_u32("rid"), gid, "rank_nodes") else {
            return Ok(());
        };
        if !self.seen.insert_if_absent((pid, rid)) {
            return Ok(());
        }

        let hostname = opt_or_warn(node.opt_str("hostname"), gid, "rank_nodes");

        let r = self.table.add_row()?;
        self.table.set(r, "pid", CellValue::UInt32(pid))?;
        self.table.set(r, "rid", CellValue::UInt32(rid))?;
        if let Some(v) = hostname {
            self.table
                .set(r, "hostname", CellValue::Text(v.to_string()))?;
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.table.flush(sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::doc::Document;
    use crate::sink::MemorySink;

    fn node_doc(v: serde_json::Value) -> Document {
        Document::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn test_io_step_key_idempotent() {
        let mut imp = IoStepImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = node_doc(json!({
            "rid": 0, "io_step": 3,
            "io_step_tstart": 100u64, "io_step_tend": 900u64
        }));
        for _ in 0..5 {
            imp.import("2:0:3:1", &d.node(), 2).unwrap();
        }
        // Different pid is a different key.
        imp.import("4:0:3:1", &d.node(), 4).unwrap();
        imp.flush(&mut sink).await.unwrap();

        let t = sink.table("io_steps").unwrap();
        assert_eq!(t.rows.len(), 2);
        assert_eq!(*t.cell(0, "io_step_tend"), CellValue::UInt64(900));
    }

    #[tokio::test]
    async fn test_rank_node_key_idempotent() {
        let mut imp = RankNodeImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = node_doc(json!({"rid": 1, "hostname": "node07"}));
        imp.import("2:1:0:1", &d.node(), 2).unwrap();
        imp.import("2:1:0:2", &d.node(), 2).unwrap();
        imp.flush(&mut sink).await.unwrap();

        let t = sink.table("rank_nodes").unwrap();
        assert_eq!(t.rows.len(), 1);
        assert_eq!(
            *t.cell(0, "hostname"),
            CellValue::Text("node07".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_key_fields_stage_nothing() {
        let mut imp = IoStepImporter::new().unwrap();
        let mut sink = MemorySink::new();

        imp.import("2:0:0:1", &node_doc(json!({"rid": 0})).node(), 2)
            .unwrap();
        imp.flush(&mut sink).await.unwrap();
        assert_eq!(sink.table("io_steps").unwrap().rows.len(), 0);
    }
}
