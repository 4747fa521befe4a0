//! GPU-event satellite and the GPU-parent pool.
//!
//! This is the one place the satellite graph is not a simple tree:
//! discovering a new GPU parent stages a pool row and recursively runs
//! the call-stack importer over the parent's own call stack, under the
//! parent's id and the same pid.

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::dedup::KeySet;
use crate::doc::Node;
use crate::ident::{global_id, ERR_NO_CORRELATION};
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::call_stack::CallStackImporter;
use super::{opt_or_warn, ImportError};

pub struct GpuImporter {
    events: TableBuffer,
    parents: TableBuffer,
    seen: KeySet<String>,
}

impl GpuImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            events: TableBuffer::with_columns(
                "gpu_events",
                &[
                    ("event_id", ColumnType::Text),
                    ("context", ColumnType::UInt32),
                    ("device", ColumnType::UInt32),
                    ("stream", ColumnType::UInt32),
                    ("parent_event_id", ColumnType::Text),
                ],
            )?,
            parents: TableBuffer::with_columns(
                "gpu_parents",
                &[
                    ("event_id", ColumnType::Text),
                    ("tid", ColumnType::UInt32),
                ],
            )?,
            seen: KeySet::new(),
        })
    }

    /// Applies only to documents whose GPU flag is true; all others
    /// stage nothing.
    pub fn import(
        &mut self,
        gid: &str,
        node: &Node,
        pid: u32,
        call_stack: &mut CallStackImporter,
    ) -> Result<(), ImportError> {
        if opt_or_warn(node.opt_bool("is_gpu_event"), gid, "gpu_events") != Some(true) {
            return Ok(());
        }

        let location = opt_or_warn(node.opt_object("gpu_location"), gid, "gpu_events");
        let (context, device, stream) = match location {
            Some(loc) => (
                opt_or_warn(loc.opt_u32("context"), gid, "gpu_events"),
                opt_or_warn(loc.opt_u32("device"), gid, "gpu_events"),
                opt_or_warn(loc.opt_u32("stream"), gid, "gpu_events"),
            ),
            None => (None, None, None),
        };

        let r = self.events.add_row()?;
        self.events
            .set(r, "event_id", CellValue::Text(gid.to_string()))?;
        if let Some(v) = context {
            self.events.set(r, "context", CellValue::UInt32(v))?;
        }
        if let Some(v) = device {
            self.events.set(r, "device", CellValue::UInt32(v))?;
        }
        if let Some(v) = stream {
            self.events.set(r, "stream", CellValue::UInt32(v))?;
        }

        match node.raw("gpu_parent") {
            None => {}
            // The sentinel is stored verbatim; no pool row, no recursion.
            Some(Value::String(s)) if s == ERR_NO_CORRELATION => {
                self.events
                    .set(r, "parent_event_id", CellValue::Text(s.clone()))?;
            }
            // A bare reference carries no attributes to pool.
            Some(Value::String(raw)) => {
                self.events
                    .set(r, "parent_event_id", CellValue::Text(global_id(raw, pid)))?;
            }
            Some(value) => {
                let parent = match Node::from_value(value, "gpu_parent") {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(doc_id = gid, "skipping GPU parent: {e}");
                        return Ok(());
                    }
                };
                let raw = match parent.str_field("event_id") {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(doc_id = gid, "skipping GPU parent: {e}");
                        return Ok(());
                    }
                };
                let parent_gid = global_id(raw, pid);
                self.events
                    .set(r, "parent_event_id", CellValue::Text(parent_gid.clone()))?;

                if self.seen.insert_if_absent(parent_gid.clone()) {
                    let tid = opt_or_warn(parent.opt_u32("tid"), gid, "gpu_parents");
                    let p = self.parents.add_row()?;
                    self.parents
                        .set(p, "event_id", CellValue::Text(parent_gid.clone()))?;
                    if let Some(v) = tid {
                        self.parents.set(p, "tid", CellValue::UInt32(v))?;
                    }

                    // The parent is a CPU-side event with its own call
                    // stack; it carries no pid field, so the document's
                    // pid is passed through.
                    if let Some(frames) =
                        opt_or_warn(parent.opt_array("call_stack"), gid, "gpu_parents")
                    {
                        call_stack.import_frames(&parent_gid, frames, pid)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.parents.flush(sink).await?;
        self.events.flush(sink).await
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
    async fn test_non_gpu_document_stages_nothing() {
        let mut imp = GpuImporter::new().unwrap();
        let mut cs = CallStackImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = node_doc(json!({"is_gpu_event": false, "gpu_parent": "0:0:1"}));
        imp.import("1:0:0:2", &d.node(), 1, &mut cs).unwrap();
        imp.flush(&mut sink).await.unwrap();
        assert_eq!(sink.table("gpu_events").unwrap().rows.len(), 0);
    }

    #[tokio::test]
    async fn test_bare_string_parent_resolved_without_pooling() {
        let mut imp = GpuImporter::new().unwrap();
        let mut cs = CallStackImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = node_doc(json!({
            "is_gpu_event": true,
            "gpu_location": {"context": 2, "device": 1, "stream": 0},
            "gpu_parent": "0:0:1"
        }));
        imp.import("1:0:0:2", &d.node(), 1, &mut cs).unwrap();
        imp.flush(&mut sink).await.unwrap();

        let events = sink.table("gpu_events").unwrap();
        assert_eq!(events.rows.len(), 1);
        assert_eq!(
            *events.cell(0, "parent_event_id"),
            CellValue::Text("1:0:0:1".to_string())
        );
        assert_eq!(*events.cell(0, "device"), CellValue::UInt32(1));
        assert_eq!(sink.table("gpu_parents").unwrap().rows.len(), 0);
    }

    #[tokio::test]
    async fn test_missing_parent_leaves_reference_unset() {
        let mut imp = GpuImporter::new().unwrap();
        let mut cs = CallStackImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = node_doc(json!({"is_gpu_event": true}));
        imp.import("1:0:0:2", &d.node(), 1, &mut cs).unwrap();
        imp.flush(&mut sink).await.unwrap();

        let events = sink.table("gpu_events").unwrap();
        assert_eq!(events.rows.len(), 1);
        assert_eq!(*events.cell(0, "parent_event_id"), CellValue::Null);
    }
}
