//! Counter-events satellite with run-scoped name interning.
//!
//! Counter names repeat constantly, so rows store a small dense index
//! instead of the name; the index↔name mapping is written to
//! `counter_names` exactly once per distinct name, on first sight.

use anyhow::Result;
use tracing::warn;

use crate::dedup::CounterRegistry;
use crate::doc::Node;
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::{opt_or_warn, ImportError};

pub struct CounterImporter {
    events: TableBuffer,
    names: TableBuffer,
}

impl CounterImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            events: TableBuffer::with_columns(
                "counter_events",
                &[
                    ("event_id", ColumnType::Text),
                    ("counter_idx", ColumnType::UInt32),
                    ("counter_value", ColumnType::UInt64),
                    ("ts", ColumnType::UInt64),
                ],
            )?,
            names: TableBuffer::with_columns(
                "counter_names",
                &[
                    ("counter_idx", ColumnType::UInt32),
                    ("counter_name", ColumnType::Text),
                ],
            )?,
        })
    }

    /// The registry is owned by the orchestrator and run-scoped;
    /// counter names are process-independent, so every shard and both
    /// record kinds share one index space.
    pub fn import(
        &mut self,
        gid: &str,
        node: &Node,
        registry: &mut CounterRegistry,
    ) -> Result<(), ImportError> {
        let Some(entries) = opt_or_warn(node.opt_array("counters"), gid, "counter_events") else {
            return Ok(());
        };

        for value in entries {
            let entry = match Node::from_value(value, "counters") {
                Ok(e) => e,
                Err(e) => {
                    warn!(doc_id = gid, "skipping counter entry: {e}");
                    continue;
                }
            };
            let name = match entry.str_field("counter_name") {
                Ok(v) => v,
                Err(e) => {
                    warn!(doc_id = gid, "skipping counter entry: {e}");
                    continue;
                }
            };
            let counter_value = match entry.u64_field("counter_value") {
                Ok(v) => v,
                Err(e) => {
                    warn!(doc_id = gid, counter = name, "skipping counter entry: {e}");
                    continue;
                }
            };
            let ts = match entry.u64_field("ts") {
                Ok(v) => v,
                Err(e) => {
                    warn!(doc_id = gid, counter = name, "skipping counter entry: {e}");
                    continue;
                }
            };

            let (idx, newly) = registry.intern(name);
            if newly {
                let r = self.names.add_row()?;
                self.names.set(r, "counter_idx", CellValue::UInt32(idx))?;
                self.names
                    .set(r, "counter_name", CellValue::Text(name.to_string()))?;
            }

            let r = self.events.add_row()?;
            self.events
                .set(r, "event_id", CellValue::Text(gid.to_string()))?;
            self.events.set(r, "counter_idx", CellValue::UInt32(idx))?;
            self.events
                .set(r, "counter_value", CellValue::UInt64(counter_value))?;
            self.events.set(r, "ts", CellValue::UInt64(ts))?;
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.names.flush(sink).await?;
        self.events.flush(sink).await
    }
}
