//! provtab normalizes nested provenance/trace documents produced by a
//! distributed instrumentation framework into linked, strongly-typed
//! columnar tables.
//!
//! The core is the record-normalization and batched-write engine: global
//! event-id assignment, run-scoped deduplication of recurring
//! sub-entities, empirical schema discovery for partially-known tables,
//! and the staging/flush/commit lifecycle of column-oriented write
//! buffers. The document store and the analytical sink are external
//! collaborators reached through the traits in [`source`] and [`sink`].

pub mod config;
pub mod dedup;
pub mod doc;
pub mod driver;
pub mod ident;
pub mod import;
pub mod schema;
pub mod sink;
pub mod source;
pub mod table;
