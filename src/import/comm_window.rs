//! Communication-window satellite: flat rows, no junction/pool split.
//!
//! Communication events are inherently record-once, so each window
//! entry becomes one row directly. Only the entry's event-reference
//! field is resolved; everything else is stored as-is.

use anyhow::Result;
use tracing::warn;

use crate::doc::Node;
use crate::ident::global_id;
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::{opt_or_warn, ImportError};

pub struct CommWindowImporter {
    table: TableBuffer,
}

impl CommWindowImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: TableBuffer::with_columns(
                "comm_windows",
                &[
                    ("event_id", ColumnType::Text),
                    ("comm_type", ColumnType::Text),
                    ("src", ColumnType::UInt32),
                    ("tar", ColumnType::UInt32),
                    ("bytes", ColumnType::UInt64),
                    ("tag", ColumnType::UInt32),
                    ("timestamp", ColumnType::UInt64),
                ],
            )?,
        })
    }

    pub fn import(&mut self, gid: &str, node: &Node, pid: u32) -> Result<(), ImportError> {
        let Some(window) = opt_or_warn(node.opt_node_at(&["event_window"]), gid, "comm_windows")
        else {
            return Ok(());
        };
        let Some(entries) = opt_or_warn(window.opt_array("comm_window"), gid, "comm_windows")
        else {
            return Ok(());
        };

        for value in entries {
            let entry = match Node::from_value(value, "comm_window") {
                Ok(e) => e,
                Err(e) => {
                    warn!(doc_id = gid, "skipping comm-window entry: {e}");
                    continue;
                }
            };
            // The referenced event id is the one mandatory field.
            let raw = match entry.str_field("event_id") {
                Ok(r) => r,
                Err(e) => {
                    warn!(doc_id = gid, "skipping comm-window entry: {e}");
                    continue;
                }
            };
            let referenced = global_id(raw, pid);

            let comm_type = opt_or_warn(entry.opt_str("type"), gid, "comm_windows");
            let src = opt_or_warn(entry.opt_u32("src"), gid, "comm_windows");
            let tar = opt_or_warn(entry.opt_u32("tar"), gid, "comm_windows");
            let bytes = opt_or_warn(entry.opt_u64("bytes"), gid, "comm_windows");
            let tag = opt_or_warn(entry.opt_u32("tag"), gid, "comm_windows");
            let timestamp = opt_or_warn(entry.opt_u64("timestamp"), gid, "comm_windows");

            let r = self.table.add_row()?;
            self.table
                .set(r, "event_id", CellValue::Text(referenced))?;
            if let Some(v) = comm_type {
                self.table
                    .set(r, "comm_type", CellValue::Text(v.to_string()))?;
            }
            if let Some(v) = src {
                self.table.set(r, "src", CellValue::UInt32(v))?;
            }
            if let Some(v) = tar {
                self.table.set(r, "tar", CellValue::UInt32(v))?;
            }
            if let Some(v) = bytes {
                self.table.set(r, "bytes", CellValue::UInt64(v))?;
            }
            if let Some(v) = tag {
                self.table.set(r, "tag", CellValue::UInt32(v))?;
            }
            if let Some(v) = timestamp {
                self.table.set(r, "timestamp", CellValue::UInt64(v))?;
            }
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.table.flush(sink).await
    }
}
