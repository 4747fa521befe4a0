//! Filesystem-backed source: one JSON document per line.
//!
//! File naming follows the shard layout the instrumentation framework
//! writes: `{prefix}.{collection}.jsonl` inside one directory, with
//! per-shard prefixes `provdb.{shard}` and the cross-shard prefix
//! `provdb.global`. A blank line leaves its record index unassigned.

use std::fs;
use std::path::PathBuf;

use crate::doc::Document;

use super::{DocumentSource, RecordSet, SourceError};

pub struct JsonlSource {
    dir: PathBuf,
    prefix: String,
}

impl JsonlSource {
    pub fn new(dir: PathBuf, prefix: String) -> Self {
        Self { dir, prefix }
    }

    /// Source for one shard's collections.
    pub fn shard(dir: PathBuf, shard: u32) -> Self {
        Self::new(dir, format!("provdb.{shard}"))
    }

    /// Source for the run-global collections.
    pub fn global(dir: PathBuf) -> Self {
        Self::new(dir, "provdb.global".to_string())
    }
}

impl DocumentSource for JsonlSource {
    type Collection = RecordSet;

    fn open(&self, collection: &str) -> Result<RecordSet, SourceError> {
        let path = self.dir.join(format!("{}.{collection}.jsonl", self.prefix));
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::CollectionNotFound {
                    collection: collection.to_string(),
                });
            }
            Err(e) => return Err(SourceError::Io { path, source: e }),
        };

        let mut records = RecordSet::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                records.push_missing();
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => match Document::from_value(value) {
                    Ok(doc) => records.push(doc),
                    Err(e) => records.push_malformed(&e.to_string()),
                },
                Err(e) => records.push_malformed(&e.to_string()),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::source::DocumentCollection;

    fn write_file(dir: &std::path::Path, name: &str, content: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_shard_file_naming_and_parsing() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "provdb.0.anomalies.jsonl",
            "{\"event_id\": \"0:0:1\", \"pid\": 1}\n\n{\"event_id\": \"0:0:3\", \"pid\": 1}\n",
        );

        let source = JsonlSource::shard(dir.path().to_path_buf(), 0);
        let records = source.open("anomalies").unwrap();

        assert_eq!(records.last_record_id(), 3);
        assert_eq!(records.size(), 2);
        assert!(records.fetch(1).unwrap().is_none());
        let doc = records.fetch(2).unwrap().unwrap();
        assert_eq!(doc.raw_event_id(), Some("0:0:3"));
    }

    #[test]
    fn test_missing_file_is_collection_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonlSource::global(dir.path().to_path_buf());
        assert!(matches!(
            source.open("func_stats"),
            Err(SourceError::CollectionNotFound { .. })
        ));
    }

    #[test]
    fn test_unparseable_line_becomes_malformed_record() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "provdb.global.ad_model.jsonl",
            "{\"fid\": 1}\nnot json\n[1, 2]\n",
        );

        let source = JsonlSource::global(dir.path().to_path_buf());
        let records = source.open("ad_model").unwrap();
        assert!(records.fetch(0).unwrap().is_some());
        assert!(matches!(
            records.fetch(1),
            Err(SourceError::Malformed { .. })
        ));
        // Valid JSON but not an object root.
        assert!(matches!(
            records.fetch(2),
            Err(SourceError::Malformed { .. })
        ));
    }
}
