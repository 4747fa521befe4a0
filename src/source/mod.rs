//! Document-store access: enumerating and fetching source records.
//!
//! Record indices may be sparse — `fetch` returning `None` below the
//! last assigned index is a normal condition to skip silently, never an
//! error. A collection whose size cannot be queried is reported as
//! empty; the two cases are not distinguishable at this layer.

pub mod jsonl;

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::doc::Document;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("collection `{collection}` not found")]
    CollectionNotFound { collection: String },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record {index}: malformed document: {reason}")]
    Malformed { index: u64, reason: String },
}

/// A handle over one opened collection of documents.
pub trait DocumentCollection {
    /// Number of stored records. Zero both for a legitimately empty
    /// collection and for one whose size cannot be queried.
    fn size(&self) -> u64;

    /// Exclusive upper bound on record indices. Indices below it may
    /// be unassigned.
    fn last_record_id(&self) -> u64;

    /// Fetches one record. Absence is `Ok(None)`; an unparseable
    /// stored record is `Err(Malformed)`.
    fn fetch(&self, index: u64) -> Result<Option<Document>, SourceError>;
}

/// A store holding named document collections.
pub trait DocumentSource {
    type Collection: DocumentCollection;

    fn open(&self, collection: &str) -> Result<Self::Collection, SourceError>;
}

#[derive(Debug, Clone)]
enum Slot {
    Missing,
    Malformed(String),
    Present(Document),
}

/// Materialized record slots for one collection, indexable and sparse.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    slots: Vec<Slot>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(docs: Vec<Document>) -> Self {
        Self {
            slots: docs.into_iter().map(Slot::Present).collect(),
        }
    }

    pub fn push(&mut self, doc: Document) {
        self.slots.push(Slot::Present(doc));
    }

    /// Leaves a hole at the next index.
    pub fn push_missing(&mut self) {
        self.slots.push(Slot::Missing);
    }

    pub fn push_malformed(&mut self, reason: &str) {
        self.slots.push(Slot::Malformed(reason.to_string()));
    }
}

impl DocumentCollection for RecordSet {
    fn size(&self) -> u64 {
        self.slots
            .iter()
            .filter(|s| !matches!(s, Slot::Missing))
            .count() as u64
    }

    fn last_record_id(&self) -> u64 {
        self.slots.len() as u64
    }

    fn fetch(&self, index: u64) -> Result<Option<Document>, SourceError> {
        match self.slots.get(index as usize) {
            None | Some(Slot::Missing) => Ok(None),
            Some(Slot::Malformed(reason)) => Err(SourceError::Malformed {
                index,
                reason: reason.clone(),
            }),
            Some(Slot::Present(doc)) => Ok(Some(doc.clone())),
        }
    }
}

/// In-memory source for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    collections: HashMap<String, RecordSet>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &str, records: RecordSet) {
        self.collections.insert(collection.to_string(), records);
    }
}

impl DocumentSource for MemorySource {
    type Collection = RecordSet;

    fn open(&self, collection: &str) -> Result<RecordSet, SourceError> {
        self.collections
            .get(collection)
            .cloned()
            .ok_or_else(|| SourceError::CollectionNotFound {
                collection: collection.to_string(),
            })
    }
}
