//! Linked-table importers and the per-shard / global orchestrators.
//!
//! One document is fully imported (primary row plus every satellite)
//! before the next is considered; nothing here needs locking. Buffers
//! and dedup key sets are created once per orchestrator and live for
//! the process lifetime; buffers cycle through write/commit/clear,
//! key sets only grow.

mod call_stack;
mod comm_window;
mod counters;
mod exec_window;
mod gpu;
mod node_state;
mod primary;
mod stats;
mod topology;

use anyhow::Result;
use thiserror::Error;
use tracing::warn;

use crate::dedup::CounterRegistry;
use crate::doc::{Document, FieldError};
use crate::ident::global_id;
use crate::sink::Sink;
use crate::table::TableError;

use call_stack::CallStackImporter;
use comm_window::CommWindowImporter;
use counters::CounterImporter;
use exec_window::ExecWindowImporter;
use gpu::GpuImporter;
use node_state::NodeStateImporter;
use primary::PrimaryImporter;
use stats::{ModelImporter, RunStatsImporter};
use topology::{IoStepImporter, RankNodeImporter};

/// Error raised while importing one document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    /// A mandatory field is missing or mistyped. Fails the record,
    /// never the run.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Buffer misuse or a cell-type violation. Fatal: the staged data
    /// no longer matches the declared schema.
    #[error(transparent)]
    Table(#[from] TableError),

    /// An anomaly-detection model kind with no known field layout.
    /// Fatal: silently emitting a wrong schema is worse than stopping.
    #[error("unsupported anomaly-detection model kind `{kind}`")]
    UnsupportedModel { kind: String },
}

impl ImportError {
    /// Whether this error must abort the whole run rather than just
    /// the current record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Field(_))
    }
}

/// Unwraps an optional-field read inside a satellite importer.
///
/// Satellites never fail a record: a mistyped or missing satellite
/// field is warned with document context and the value skipped.
fn opt_or_warn<T>(res: Result<Option<T>, FieldError>, doc_id: &str, table: &str) -> Option<T> {
    match res {
        Ok(v) => v,
        Err(e) => {
            warn!(doc_id, table, "skipping satellite value: {e}");
            None
        }
    }
}

/// The two mutually exclusive primary document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Anomaly,
    NormalExec,
}

/// All tables fed by one shard's document stream.
///
/// The two primary importers are kind-specific; every satellite
/// importer (and the counter registry) is shared between kinds.
pub struct ShardTables {
    anomalies: PrimaryImporter,
    normal_execs: PrimaryImporter,
    call_stack: CallStackImporter,
    exec_window: ExecWindowImporter,
    comm_window: CommWindowImporter,
    counters: CounterImporter,
    io_steps: IoStepImporter,
    rank_nodes: RankNodeImporter,
    gpu: GpuImporter,
    node_state: NodeStateImporter,
    registry: CounterRegistry,
}

impl ShardTables {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            anomalies: PrimaryImporter::new("anomalies")?,
            normal_execs: PrimaryImporter::new("normal_execs")?,
            call_stack: CallStackImporter::new()?,
            exec_window: ExecWindowImporter::new()?,
            comm_window: CommWindowImporter::new()?,
            counters: CounterImporter::new()?,
            io_steps: IoStepImporter::new()?,
            rank_nodes: RankNodeImporter::new()?,
            gpu: GpuImporter::new()?,
            node_state: NodeStateImporter::new()?,
            registry: CounterRegistry::new(),
        })
    }

    pub fn import_anomaly(&mut self, doc: &Document) -> Result<(), ImportError> {
        self.import(doc, RecordKind::Anomaly)
    }

    pub fn import_normal_exec(&mut self, doc: &Document) -> Result<(), ImportError> {
        self.import(doc, RecordKind::NormalExec)
    }

    /// Imports one document: the kind-matching primary row plus every
    /// satellite, in a fixed order. The order affects only row grouping
    /// in the output, not correctness.
    pub fn import(&mut self, doc: &Document, kind: RecordKind) -> Result<(), ImportError> {
        let node = doc.node();
        let raw = node.str_field("event_id")?;
        let pid = node.u32_field("pid")?;
        let gid = global_id(raw, pid);

        match kind {
            RecordKind::Anomaly => self.anomalies.import(&gid, pid, &node)?,
            RecordKind::NormalExec => self.normal_execs.import(&gid, pid, &node)?,
        }

        self.call_stack.import(&gid, &node, pid)?;
        self.exec_window.import(&gid, &node, pid)?;
        self.comm_window.import(&gid, &node, pid)?;
        self.counters.import(&gid, &node, &mut self.registry)?;
        self.io_steps.import(&gid, &node, pid)?;
        self.rank_nodes.import(&gid, &node, pid)?;
        self.gpu.import(&gid, &node, pid, &mut self.call_stack)?;
        self.node_state.import(&gid, &node)?;

        Ok(())
    }

    /// write → commit → clear on every owned buffer. Entity pools are
    /// flushed no later than their junction tables.
    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.anomalies.flush(sink).await?;
        self.normal_execs.flush(sink).await?;
        self.call_stack.flush(sink).await?;
        self.exec_window.flush(sink).await?;
        self.comm_window.flush(sink).await?;
        self.counters.flush(sink).await?;
        self.io_steps.flush(sink).await?;
        self.rank_nodes.flush(sink).await?;
        self.gpu.flush(sink).await?;
        self.node_state.flush(sink).await?;
        Ok(())
    }
}

/// Tables fed by the run-global (cross-shard) document collections.
pub struct GlobalTables {
    anomaly_count: RunStatsImporter,
    anomaly_score: RunStatsImporter,
    anomaly_severity: RunStatsImporter,
    model: ModelImporter,
}

impl GlobalTables {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            anomaly_count: RunStatsImporter::new(
                "func_anomaly_count_stats",
                &["anomaly_metrics", "anomaly_count"],
            )?,
            anomaly_score: RunStatsImporter::new(
                "func_anomaly_score_stats",
                &["anomaly_metrics", "score"],
            )?,
            anomaly_severity: RunStatsImporter::new(
                "func_anomaly_severity_stats",
                &["anomaly_metrics", "severity"],
            )?,
            model: ModelImporter::new()?,
        })
    }

    /// One function-statistics record feeds all three run-stats tables.
    pub fn import_func_stats(&mut self, doc: &Document) -> Result<(), ImportError> {
        let node = doc.node();
        self.anomaly_count.import(&node)?;
        self.anomaly_score.import(&node)?;
        self.anomaly_severity.import(&node)?;
        Ok(())
    }

    pub fn import_ad_model(&mut self, doc: &Document) -> Result<(), ImportError> {
        self.model.import(&doc.node())
    }

    pub async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        self.anomaly_count.flush(sink).await?;
        self.anomaly_score.flush(sink).await?;
        self.anomaly_severity.flush(sink).await?;
        self.model.flush(sink).await?;
        Ok(())
    }
}
