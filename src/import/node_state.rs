//! Node-state satellite: monitored host metrics with a schema that is
//! only discoverable from the first record.
//!
//! The deployed monitoring configuration decides which metrics exist,
//! so the metric columns are declared from the first document's
//! `node_state.data` list and fixed for the rest of the run.

use anyhow::Result;

use crate::doc::Node;
use crate::schema::DynamicTable;
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::TableError;

use super::{opt_or_warn, ImportError};

pub struct NodeStateImporter {
    table: DynamicTable,
}

impl NodeStateImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: DynamicTable::new(
                "node_state",
                &[
                    ("event_id", ColumnType::Text),
                    ("timestamp", ColumnType::UInt64),
                ],
            )?,
        })
    }

    pub fn import(&mut self, gid: &str, node: &Node) -> Result<(), ImportError> {
        let Some(state) = opt_or_warn(node.opt_object("node_state"), gid, "node_state") else {
            return Ok(());
        };
        let timestamp = opt_or_warn(state.opt_u64("timestamp"), gid, "node_state");
        let Some(data) = opt_or_warn(state.opt_array("data"), gid, "node_state") else {
            return Ok(());
        };

        // Each data entry is {field, value}; values are uniformly
        // floating point.
        let mut metrics: Vec<(&str, f64)> = Vec::with_capacity(data.len());
        for value in data {
            let entry = match Node::from_value(value, "node_state.data") {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(doc_id = gid, "skipping node-state entry: {e}");
                    continue;
                }
            };
            let field = match entry.str_field("field") {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(doc_id = gid, "skipping node-state entry: {e}");
                    continue;
                }
            };
            let metric = match entry.f64_field("value") {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(doc_id = gid, field, "skipping node-state entry: {e}");
                    continue;
                }
            };
            metrics.push((field, metric));
        }

        if !self.table.is_defined() {
            self.table
                .define_with(metrics.iter().map(|(name, _)| (*name, ColumnType::Float64)))?;
        }

        let r = self.table.add_row()?;
        self.table
            .set_fixed(r, "event_id", CellValue::Text(gid.to_string()))?;
        if let Some(v) = timestamp {
            self.table
                .set_fixed(r, "timestamp", CellValue::UInt64(v))?;
        }
        for (name, metric) in metrics {
            self.table
                .set_dynamic(gid, r, name, CellValue::Float64(metric));
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

    fn state_doc(metrics: &[(&str, f64)], ts: u64) -> Document {
        let data: Vec<serde_json::Value> = metrics
            .iter()
            .map(|(f, v)| json!({"field": f, "value": v}))
            .collect();
        Document::from_value(json!({"node_state": {"timestamp": ts, "data": data}})).unwrap()
    }

    #[tokio::test]
    async fn test_first_document_declares_metric_columns() {
        let mut imp = NodeStateImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let first = state_doc(&[("mem_free", 2048.0), ("load1", 0.75)], 10);
        imp.import("1:0:0:1", &first.node()).unwrap();

        // Second doc: `load1` missing (cell unset), `cpu_temp` unknown
        // (dropped with a warning).
        let second = state_doc(&[("mem_free", 1024.0), ("cpu_temp", 61.0)], 20);
        imp.import("1:0:0:2", &second.node()).unwrap();
        imp.flush(&mut sink).await.unwrap();

        let t = sink.table("node_state").unwrap();
        assert_eq!(t.rows.len(), 2);
        assert_eq!(*t.cell(0, "load1"), CellValue::Float64(0.75));
        assert_eq!(*t.cell(1, "mem_free"), CellValue::Float64(1024.0));
        assert_eq!(*t.cell(1, "load1"), CellValue::Null);
        assert!(t.column_index("cpu_temp").is_none());
    }

    #[tokio::test]
    async fn test_document_without_state_layer_is_skipped() {
        let mut imp = NodeStateImporter::new().unwrap();
        let mut sink = MemorySink::new();

        let d = Document::from_value(json!({"event_id": "0:0:1"})).unwrap();
        imp.import("1:0:0:1", &d.node()).unwrap();
        imp.flush(&mut sink).await.unwrap();
        // Never defined, so the table was never even created.
        assert!(sink.table("node_state").is_none());
    }
}
