//! Run-global tables: per-function anomaly statistics and the fitted
//! anomaly-detection model parameters.
//!
//! The three statistics tables share one layout and differ only in
//! which nested layer of the record they read, so a single component
//! parameterized by (table name, source path) covers all of them.

use anyhow::Result;

use crate::doc::{FieldError, Node};
use crate::schema::{infer_cell, DynamicTable};
use crate::sink::{CellValue, ColumnType, Sink};
use crate::table::{TableBuffer, TableError};

use super::ImportError;

/// Model kinds with a known parameter layout. Anything else is fatal:
/// silently emitting a wrong schema is worse than stopping.
const KNOWN_MODEL_KINDS: &[&str] = &["hbos", "copod", "sstd"];

const STATS: &[(&str, ColumnType)] = &[
    ("accumulate", ColumnType::Float64),
    ("count", ColumnType::UInt64),
    ("mean", ColumnType::Float64),
    ("stddev", ColumnType::Float64),
    ("skewness", ColumnType::Float64),
    ("kurtosis", ColumnType::Float64),
    ("maximum", ColumnType::Float64),
    ("minimum", ColumnType::Float64),
];

/// One running-statistics table fed from a fixed layer of the record.
pub struct RunStatsImporter {
    table: TableBuffer,
    path: &'static [&'static str],
}

impl RunStatsImporter {
    pub fn new(name: &str, path: &'static [&'static str]) -> Result<Self, TableError> {
        let mut columns = vec![("fid", ColumnType::Int32)];
        columns.extend_from_slice(STATS);
        Ok(Self {
            table: TableBuffer::with_columns(name, &columns)?,
            path,
        })
    }

    /// Both the `fid` key and the statistics layer are mandatory for
    /// these records; absence fails the record, not the run.
    pub fn import(&mut self, node: &Node) -> Result<(), ImportError> {
        let fid = node.i32_field("fid")?;
        let data = self.data_layer(node)?;

        let accumulate = data.f64_field("accumulate")?;
        let count = data.u64_field("count")?;
        let mean = data.f64_field("mean")?;
        let stddev = data.f64_field("stddev")?;
        let skewness = data.f64_field("skewness")?;
        let kurtosis = data.f64_field("kurtosis")?;
        let maximum = data.f64_field("maximum")?;
        let minimum = data.f64_field("minimum")?;

        let r = self.table.add_row()?;
        self.table.set(r, "fid", CellValue::Int32(fid))?;
        self.table.set(r, "accumulate", CellValue::Float64(accumulate))?;
        self.table.set(r, "count", CellValue::UInt64(count))?;
        self.table.set(r, "mean", CellValue::Float64(mean))?;
        self.table.set(r, "stddev", CellValue::Float64(stddev))?;
        self.table.set(r, "skewness", CellValue::Float64(skewness))?;
        self.table.set(r, "kurtosis", CellValue::Float64(kurtosis))?;
        self.table.set(r, "maximum", CellValue::Float64(maximum))?;
        self.table.set(r, "minimum", CellValue::Float64(minimum))?;
        Ok(())
    }

    fn data_layer<'a>(&self, node: &Node<'a>) -> Result<Node<'a>, FieldError> {
        let mut cur = *node;
        for step in self.path {
            cur = cur.object_field(step)?;
        }
        Ok(cur)
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.table.flush(sink).await
    }
}

/// Fitted model parameters, one row per function, with parameter
/// columns discovered from the first record of a known model kind.
pub struct ModelImporter {
    table: DynamicTable,
}

impl ModelImporter {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            table: DynamicTable::new(
                "ad_model",
                &[
                    ("fid", ColumnType::Int32),
                    ("model_type", ColumnType::Text),
                ],
            )?,
        })
    }

    pub fn import(&mut self, node: &Node) -> Result<(), ImportError> {
        let fid = node.i32_field("fid")?;
        let kind = node.str_field("model_type")?;
        if !KNOWN_MODEL_KINDS.contains(&kind) {
            return Err(ImportError::UnsupportedModel {
                kind: kind.to_string(),
            });
        }
        let params = node.object_field("model_params")?;

        if !self.table.is_defined() {
            let mut columns = Vec::new();
            for (name, value) in params.entries() {
                match infer_cell(value) {
                    Some((_, ty)) => columns.push((name, ty)),
                    None => {
                        tracing::warn!(
                            table = "ad_model",
                            column = name,
                            "parameter shape has no column type; excluded from schema"
                        );
                    }
                }
            }
            self.table.define_with(columns)?;
        }

        let doc_id = format!("fid={fid}");
        let r = self.table.add_row()?;
        self.table.set_fixed(r, "fid", CellValue::Int32(fid))?;
        self.table
            .set_fixed(r, "model_type", CellValue::Text(kind.to_string()))?;
        for (name, value) in params.entries() {
            match infer_cell(value) {
                Some((cell, _)) => self.table.set_dynamic(&doc_id, r, name, cell),
                None => {
                    tracing::warn!(doc_id, column = name, "dropping uninferable parameter");
                }
            }
        }
        Ok(())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.table.flush(sink).await
    }
}
