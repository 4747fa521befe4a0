//! Shard iteration and the record fetch loop.
//!
//! The driver owns everything the import core does not: walking each
//! shard's collections, skipping unassigned record indices, counting
//! failed records, honoring per-collection record caps and specific
//! record selections, and flushing the orchestrators at batch
//! boundaries.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::doc::Document;
use crate::import::{GlobalTables, ImportError, RecordKind, ShardTables};
use crate::sink::Sink;
use crate::source::{DocumentCollection, DocumentSource, SourceError};

/// Per-shard collection of anomalous events.
const ANOMALIES: &str = "anomalies";
/// Per-shard collection of normal execution events.
const NORMAL_EXECS: &str = "normalexecs";
/// Global per-function statistics collection.
const FUNC_STATS: &str = "func_stats";
/// Global fitted-model collection.
const AD_MODEL: &str = "ad_model";

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Cap on records imported per collection, counted across all
    /// shards; `None` imports all.
    pub nrecord_max: Option<u64>,
    /// Staged documents per orchestrator flush.
    pub batch_size: u64,
    /// Restrict a shard's anomaly import to specific record indices.
    pub specific_anomalies: HashMap<u32, HashSet<u64>>,
    /// Restrict the func-stats import to specific record indices.
    pub specific_func_stats: Option<HashSet<u64>>,
}

/// Outcome counters for one whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub imported: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy)]
enum GlobalKind {
    FuncStats,
    AdModel,
}

/// One import destination: a shard orchestrator with a record kind, or
/// a global orchestrator with a collection kind.
enum Target<'a> {
    Shard(&'a mut ShardTables, RecordKind),
    Global(&'a mut GlobalTables, GlobalKind),
}

impl Target<'_> {
    fn import(&mut self, doc: &Document) -> Result<(), ImportError> {
        match self {
            Self::Shard(tables, kind) => tables.import(doc, *kind),
            Self::Global(tables, GlobalKind::FuncStats) => tables.import_func_stats(doc),
            Self::Global(tables, GlobalKind::AdModel) => tables.import_ad_model(doc),
        }
    }

    async fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<()> {
        match self {
            Self::Shard(tables, _) => tables.flush(sink).await,
            Self::Global(tables, _) => tables.flush(sink).await,
        }
    }
}

/// Imports every shard and, when present, the global collections.
pub async fn run<S: Sink, D: DocumentSource>(
    opts: &DriverOptions,
    shards: &[D],
    global: Option<&D>,
    sink: &mut S,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    // One orchestrator for the whole run: dedup key sets and the
    // counter registry are run-scoped, not per-shard. Global ids keep
    // different processes' entities distinct within the shared pools.
    let mut tables = ShardTables::new().context("building shard tables")?;

    // The record cap is per logical table: one counter per collection,
    // decremented across every shard.
    let mut anomalies_remaining = opts.nrecord_max;
    let mut normal_execs_remaining = opts.nrecord_max;

    for (idx, db) in shards.iter().enumerate() {
        let shard = idx as u32;

        import_collection(
            db,
            ANOMALIES,
            Target::Shard(&mut tables, RecordKind::Anomaly),
            sink,
            opts,
            opts.specific_anomalies.get(&shard),
            &mut anomalies_remaining,
            &mut summary,
        )
        .await
        .with_context(|| format!("shard {shard}"))?;

        import_collection(
            db,
            NORMAL_EXECS,
            Target::Shard(&mut tables, RecordKind::NormalExec),
            sink,
            opts,
            None,
            &mut normal_execs_remaining,
            &mut summary,
        )
        .await
        .with_context(|| format!("shard {shard}"))?;

        debug!(shard, "shard imported");
    }

    if let Some(db) = global {
        let mut tables = GlobalTables::new().context("building global tables")?;
        let mut func_stats_remaining = opts.nrecord_max;
        let mut ad_model_remaining = opts.nrecord_max;

        import_collection(
            db,
            FUNC_STATS,
            Target::Global(&mut tables, GlobalKind::FuncStats),
            sink,
            opts,
            opts.specific_func_stats.as_ref(),
            &mut func_stats_remaining,
            &mut summary,
        )
        .await?;

        import_collection(
            db,
            AD_MODEL,
            Target::Global(&mut tables, GlobalKind::AdModel),
            sink,
            opts,
            None,
            &mut ad_model_remaining,
            &mut summary,
        )
        .await?;
    }

    info!(
        imported = summary.imported,
        failed = summary.failed,
        "import run finished"
    );
    Ok(summary)
}

/// Walks one collection's index space, importing into `target` and
/// flushing at batch boundaries plus once at the end.
///
/// `remaining` is the collection's record-cap counter, shared across
/// shards by the caller. An explicit record selection bypasses the cap
/// but still counts toward it.
async fn import_collection<S: Sink, D: DocumentSource>(
    db: &D,
    collection: &str,
    mut target: Target<'_>,
    sink: &mut S,
    opts: &DriverOptions,
    specific: Option<&HashSet<u64>>,
    remaining: &mut Option<u64>,
    summary: &mut RunSummary,
) -> Result<()> {
    let records = match db.open(collection) {
        Ok(r) => r,
        Err(SourceError::CollectionNotFound { .. }) => {
            debug!(collection, "collection not present, skipping");
            return Ok(());
        }
        Err(e) => {
            warn!(collection, "cannot open collection, treating as empty: {e}");
            return Ok(());
        }
    };
    // Single emptiness check: unqueryable and empty both report 0.
    if records.size() == 0 {
        debug!(collection, "collection empty, skipping");
        return Ok(());
    }

    let mut pending = 0u64;
    for index in 0..records.last_record_id() {
        match specific {
            Some(wanted) => {
                if !wanted.contains(&index) {
                    continue;
                }
            }
            None => {
                if *remaining == Some(0) {
                    debug!(collection, "record cap reached");
                    break;
                }
            }
        }

        let doc = match records.fetch(index) {
            // Unassigned index; a normal condition.
            Ok(None) => continue,
            Ok(Some(doc)) => doc,
            Err(e) => {
                warn!(collection, index, "skipping malformed record: {e}");
                summary.failed += 1;
                continue;
            }
        };

        match target.import(&doc) {
            Ok(()) => {
                summary.imported += 1;
                pending += 1;
                if let Some(r) = remaining.as_mut() {
                    *r = r.saturating_sub(1);
                }
            }
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| format!("importing {collection} record {index}"));
            }
            Err(e) => {
                warn!(collection, index, "record failed: {e}");
                summary.failed += 1;
            }
        }

        if pending >= opts.batch_size && opts.batch_size > 0 {
            target.flush(sink).await?;
            pending = 0;
        }
    }

    target.flush(sink).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::sink::MemorySink;
    use crate::source::{MemorySource, RecordSet};

    fn doc(v: serde_json::Value) -> Document {
        Document::from_value(v).unwrap()
    }

    fn event(id: &str, pid: u32) -> Document {
        doc(json!({"event_id": id, "pid": pid}))
    }

    fn opts() -> DriverOptions {
        DriverOptions {
            batch_size: 10_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sparse_and_malformed_records() {
        let mut anomalies = RecordSet::new();
        anomalies.push(event("0:0:1", 1));
        anomalies.push_missing();
        anomalies.push_malformed("bad line");
        anomalies.push(doc(json!({"pid": 1}))); // missing event_id
        anomalies.push(event("0:0:5", 1));

        let mut source = MemorySource::new();
        source.insert(ANOMALIES, anomalies);

        let mut sink = MemorySink::new();
        let summary = run(&opts(), &[source], None, &mut sink).await.unwrap();

        assert_eq!(summary, RunSummary { imported: 2, failed: 2 });
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_record_cap_per_collection() {
        let mut anomalies = RecordSet::new();
        let mut normal = RecordSet::new();
        for i in 0..10 {
            anomalies.push(event(&format!("0:0:{i}"), 1));
            normal.push(event(&format!("0:1:{i}"), 1));
        }
        let mut source = MemorySource::new();
        source.insert(ANOMALIES, anomalies);
        source.insert(NORMAL_EXECS, normal);

        let options = DriverOptions {
            nrecord_max: Some(3),
            ..opts()
        };
        let mut sink = MemorySink::new();
        let summary = run(&options, &[source], None, &mut sink).await.unwrap();

        // Each collection name gets its own counter, so anomalies and
        // normal execs cap independently.
        assert_eq!(summary.imported, 6);
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 3);
        assert_eq!(sink.table("normal_execs").unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_record_cap_shared_across_shards() {
        let mut sources = Vec::new();
        for shard in 0..3u32 {
            let mut anomalies = RecordSet::new();
            anomalies.push(event("0:0:1", shard + 1));
            anomalies.push(event("0:0:2", shard + 1));
            let mut source = MemorySource::new();
            source.insert(ANOMALIES, anomalies);
            sources.push(source);
        }

        let options = DriverOptions {
            nrecord_max: Some(3),
            ..opts()
        };
        let mut sink = MemorySink::new();
        let summary = run(&options, &sources, None, &mut sink).await.unwrap();

        // One counter over all shards: shard 0 takes two, shard 1 one,
        // shard 2 none.
        assert_eq!(summary.imported, 3);
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_specific_selection_bypasses_cap() {
        let mut anomalies = RecordSet::new();
        for i in 0..6 {
            anomalies.push(event(&format!("0:0:{i}"), 1));
        }
        let mut source = MemorySource::new();
        source.insert(ANOMALIES, anomalies);

        let mut options = DriverOptions {
            nrecord_max: Some(1),
            ..opts()
        };
        options.specific_anomalies.insert(0, HashSet::from([1, 4]));

        let mut sink = MemorySink::new();
        let summary = run(&options, &[source], None, &mut sink).await.unwrap();
        // Both selected records import despite the cap of one.
        assert_eq!(summary.imported, 2);
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_specific_record_selection() {
        let mut anomalies = RecordSet::new();
        for i in 0..6 {
            anomalies.push(event(&format!("0:0:{i}"), 1));
        }
        let mut source = MemorySource::new();
        source.insert(ANOMALIES, anomalies);

        let mut options = opts();
        options
            .specific_anomalies
            .insert(0, HashSet::from([1, 4]));

        let mut sink = MemorySink::new();
        let summary = run(&options, &[source], None, &mut sink).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_boundary_flushes_mid_collection() {
        let mut anomalies = RecordSet::new();
        for i in 0..5 {
            anomalies.push(event(&format!("0:0:{i}"), 1));
        }
        let mut source = MemorySource::new();
        source.insert(ANOMALIES, anomalies);

        let options = DriverOptions {
            batch_size: 2,
            ..Default::default()
        };
        let mut sink = MemorySink::new();
        run(&options, &[source], None, &mut sink).await.unwrap();
        // All five land regardless of how many flushes happened.
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 5);
        assert_eq!(sink.table("anomalies").unwrap().committed, 5);
    }

    #[tokio::test]
    async fn test_missing_collections_are_skipped() {
        let source = MemorySource::new();
        let mut sink = MemorySink::new();
        let summary = run(&opts(), &[source.clone()], Some(&source), &mut sink)
            .await
            .unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_unsupported_model_aborts_run() {
        let mut models = RecordSet::new();
        models.push(doc(json!({
            "fid": 1, "model_type": "lof", "model_params": {}
        })));
        let mut global = MemorySource::new();
        global.insert(AD_MODEL, models);

        let mut sink = MemorySink::new();
        let err = run(&opts(), &[] as &[MemorySource], Some(&global), &mut sink)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ad_model"));
    }

    #[tokio::test]
    async fn test_counter_registry_spans_shards() {
        let mut a = RecordSet::new();
        a.push(doc(json!({
            "event_id": "0:0:1", "pid": 1,
            "counters": [{"counter_name": "bytes_read", "counter_value": 1u64, "ts": 1u64}]
        })));
        let mut b = RecordSet::new();
        b.push(doc(json!({
            "event_id": "0:0:1", "pid": 2,
            "counters": [{"counter_name": "bytes_read", "counter_value": 2u64, "ts": 2u64}]
        })));

        let mut s0 = MemorySource::new();
        s0.insert(ANOMALIES, a);
        let mut s1 = MemorySource::new();
        s1.insert(ANOMALIES, b);

        let mut sink = MemorySink::new();
        run(&opts(), &[s0, s1], None, &mut sink).await.unwrap();

        // One name row for the whole run; both shards reuse the index.
        let names = sink.table("counter_names").unwrap();
        assert_eq!(names.rows.len(), 1);
        let events = sink.table("counter_events").unwrap();
        assert_eq!(events.rows.len(), 2);
        assert_eq!(events.cell(0, "counter_idx"), events.cell(1, "counter_idx"));
    }

    #[tokio::test]
    async fn test_multiple_shards_namespace_independently() {
        let mut a = RecordSet::new();
        a.push(event("0:0:1", 1));
        let mut b = RecordSet::new();
        b.push(event("0:0:1", 2));

        let mut s0 = MemorySource::new();
        s0.insert(ANOMALIES, a);
        let mut s1 = MemorySource::new();
        s1.insert(ANOMALIES, b);

        let mut sink = MemorySink::new();
        let summary = run(&opts(), &[s0, s1], None, &mut sink).await.unwrap();
        assert_eq!(summary.imported, 2);
        assert_eq!(sink.table("anomalies").unwrap().rows.len(), 2);
    }
}
