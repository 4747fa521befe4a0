//! Execution-window satellite: same junction/pool split as the call
//! stack, with one difference — pooled frames carry their own resolved
//! parent-reference field, which may hold the no-correlation sentinel.

use anyhow::Result;
use tracing::warn;

use crate::dedup::KeySet;
use crate::doc::{FieldError, Node};
use crate::ident::{global_id, global_parent_ref};
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::{opt_or_warn, ImportError};

struct Frame {
    entry: u64,
    exit: u64,
    fid: i32,
    is_anomaly: bool,
    parent_event_id: String,
}

fn extract_frame(frame: &Node, pid: u32) -> Result<Frame, FieldError> {
    Ok(Frame {
        entry: frame.u64_field("entry")?,
        exit: frame.u64_field("exit")?,
        fid: frame.i32_field("fid")?,
        is_anomaly: frame.bool_field("is_anomaly")?,
        parent_event_id: global_parent_ref(frame.str_field("parent_event_id")?, pid),
    })
}

pub struct ExecWindowImporter {
    junction: TableBuffer,
    pool: TableBuffer,
    seen: KeySet<String>,
}

impl ExecWindowImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            junction: TableBuffer::with_columns(
                "exec_windows",
                &[
                    ("event_id", ColumnType::Text),
                    ("exec_window_entry_id", ColumnType::Text),
                ],
            )?,
            pool: TableBuffer::with_columns(
                "exec_window_events",
                &[
                    ("event_id", ColumnType::Text),
                    ("entry", ColumnType::UInt64),
                    ("exit", ColumnType::UInt64),
                    ("fid", ColumnType::Int32),
                    ("is_anomaly", ColumnType::Bool),
                    ("parent_event_id", ColumnType::Text),
                ],
            )?,
            seen: KeySet::new(),
        })
    }

    pub fn import(&mut self, gid: &str, node: &Node, pid: u32) -> Result<(), ImportError> {
        let Some(window) = opt_or_warn(node.opt_node_at(&["event_window"]), gid, "exec_windows")
        else {
            return Ok(());
        };
        let Some(frames) = opt_or_warn(window.opt_array("exec_window"), gid, "exec_windows")
        else {
            return Ok(());
        };

        for value in frames {
            let frame = match Node::from_value(value, "exec_window") {
                Ok(f) => f,
                Err(e) => {
                    warn!(doc_id = gid, "skipping exec-window frame: {e}");
                    continue;
                }
            };
            let raw = match frame.str_field("event_id") {
                Ok(r) => r,
                Err(e) => {
                    warn!(doc_id = gid, "skipping exec-window frame: {e}");
                    continue;
                }
            };
            let child = global_id(raw, pid);

            let r = self.junction.add_row()?;
            self.junction
                .set(r, "event_id", CellValue::Text(gid.to_string()))?;
            self.junction
                .set(r, "exec_window_entry_id", CellValue::Text(child.clone()))?;

            if self.seen.contains(&child) {
                continue;
            }
            let fields = match extract_frame(&frame, pid) {
                Ok(f) => f,
                Err(e) => {
                    warn!(doc_id = gid, frame = child, "frame not pooled: {e}");
                    continue;
                }
            };
            self.seen.insert_if_absent(child.clone());

            let r = self.pool.add_row()?;
            self.pool.set(r, "event_id", CellValue::Text(child))?;
            self.pool.set(r, "entry", CellValue::UInt64(fields.entry))?;
            self.pool.set(r, "exit", CellValue::UInt64(fields.exit))?;
            self.pool.set(r, "fid", CellValue::Int32(fields.fid))?;
            self.pool
                .set(r, "is_anomaly", CellValue::Bool(fields.is_anomaly))?;
            self.pool.set(
                r,
                "parent_event_id",
                CellValue::Text(fields.parent_event_id),
            )?;
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.pool.flush(sink).await?;
        self.junction.flush(sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::doc::Document;
    use crate::ident::ERR_NO_CORRELATION;
    use crate::sink::MemorySink;

    #[tokio::test]
    async fn test_pool_carries_resolved_parent_reference() {
        let mut imp = ExecWindowImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = Document::from_value(json!({
            "event_window": {
                "exec_window": [
                    {"event_id": "0:2:4", "entry": 5u64, "exit": 9u64, "fid": 1,
                     "is_anomaly": false, "parent_event_id": "0:2:3"},
                    {"event_id": "0:2:5", "entry": 6u64, "exit": 8u64, "fid": 2,
                     "is_anomaly": true, "parent_event_id": ERR_NO_CORRELATION}
                ]
            }
        }))
        .unwrap();
        imp.import("7:0:2:9", &d.node(), 7).unwrap();
        imp.flush(&mut sink).await.unwrap();

        let pool = sink.table("exec_window_events").unwrap();
        assert_eq!(pool.rows.len(), 2);
        assert_eq!(
            *pool.cell(0, "parent_event_id"),
            CellValue::Text("7:0:2:3".to_string())
        );
        // Sentinel stays verbatim, never pid-prefixed.
        assert_eq!(
            *pool.cell(1, "parent_event_id"),
            CellValue::Text(ERR_NO_CORRELATION.to_string())
        );

        let junction = sink.table("exec_windows").unwrap();
        assert_eq!(junction.rows.len(), 2);
        assert_eq!(
            *junction.cell(0, "event_id"),
            CellValue::Text("7:0:2:9".to_string())
        );
    }

    #[tokio::test]
    async fn test_window_without_exec_layer_is_skipped() {
        let mut imp = ExecWindowImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = Document::from_value(json!({"event_window": {}})).unwrap();
        imp.import("7:0:2:9", &d.node(), 7).unwrap();
        imp.flush(&mut sink).await.unwrap();
        assert_eq!(sink.table("exec_windows").unwrap().rows.len(), 0);
    }
}
