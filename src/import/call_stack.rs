//! Call-stack satellite: junction table plus deduplicated frame pool.
//!
//! Every frame reference is a distinct fact, so `call_stacks` rows are
//! appended unconditionally; `call_stack_events` records each distinct
//! frame once, gated by a run-scoped key set that is never reset by
//! buffer clears.

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::dedup::KeySet;
use crate::doc::{FieldError, Node};
use crate::ident::global_id;
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::{opt_or_warn, ImportError};

struct Frame {
    entry: u64,
    exit: u64,
    fid: i32,
    is_anomaly: bool,
}

fn extract_frame(frame: &Node) -> Result<Frame, FieldError> {
    Ok(Frame {
        entry: frame.u64_field("entry")?,
        exit: frame.u64_field("exit")?,
        fid: frame.i32_field("fid")?,
        is_anomaly: frame.bool_field("is_anomaly")?,
    })
}

pub struct CallStackImporter {
    junction: TableBuffer,
    pool: TableBuffer,
    seen: KeySet<String>,
}

impl CallStackImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            junction: TableBuffer::with_columns(
                "call_stacks",
                &[
                    ("event_id", ColumnType::Text),
                    ("call_stack_entry_id", ColumnType::Text),
                ],
            )?,
            pool: TableBuffer::with_columns(
                "call_stack_events",
                &[
                    ("event_id", ColumnType::Text),
                    ("entry", ColumnType::UInt64),
                    ("exit", ColumnType::UInt64),
                    ("fid", ColumnType::Int32),
                    ("is_anomaly", ColumnType::Bool),
                ],
            )?,
            seen: KeySet::new(),
        })
    }

    pub fn import(&mut self, gid: &str, node: &Node, pid: u32) -> Result<(), ImportError> {
        let Some(frames) = opt_or_warn(node.opt_array("call_stack"), gid, "call_stacks") else {
            return Ok(());
        };
        self.import_frames(gid, frames, pid)
    }

    /// Imports an explicit frame list hanging off `parent_gid`. Also
    /// the entry point for GPU-parent call stacks, which carry no pid
    /// of their own; the caller supplies it.
    pub fn import_frames(
        &mut self,
        parent_gid: &str,
        frames: &[Value],
        pid: u32,
    ) -> Result<(), ImportError> {
        for value in frames {
            let frame = match Node::from_value(value, "call_stack") {
                Ok(f) => f,
                Err(e) => {
                    warn!(doc_id = parent_gid, "skipping call-stack frame: {e}");
                    continue;
                }
            };
            let raw = match frame.str_field("event_id") {
                Ok(r) => r,
                Err(e) => {
                    warn!(doc_id = parent_gid, "skipping call-stack frame: {e}");
                    continue;
                }
            };
            let child = global_id(raw, pid);

            let r = self.junction.add_row()?;
            self.junction
                .set(r, "event_id", CellValue::Text(parent_gid.to_string()))?;
            self.junction
                .set(r, "call_stack_entry_id", CellValue::Text(child.clone()))?;

            if self.seen.contains(&child) {
                continue;
            }
            // Malformed frames leave the key unconsumed so a later
            // well-formed occurrence can still populate the pool.
            let fields = match extract_frame(&frame) {
                Ok(f) => f,
                Err(e) => {
                    warn!(doc_id = parent_gid, frame = child, "frame not pooled: {e}");
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
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.pool.flush(sink).await?;
        self.junction.flush(sink).await
    }
}
