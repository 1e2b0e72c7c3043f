//! Kestrel Store
//!
//! Persistence for harvested records. Both pipelines talk to the store
//! through [`RecordStore`]; [`SqliteStore`] is the on-disk implementation.

pub mod sqlite;

pub use sqlite::*;

use kestrel_core::{Record, RecordField, Source};
use serde_json::Value;
use thiserror::Error;

/// Errors from record persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Payload encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Selection of records for a source, always in ascending `id` order
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub source: Source,
    /// Only records with `id` strictly greater than this
    pub after_id: Option<i64>,
    /// Only records whose `predicted_label` is unset
    pub unscored_only: bool,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn for_source(source: Source) -> Self {
        Self {
            source,
            after_id: None,
            unscored_only: false,
            limit: None,
        }
    }

    pub fn unscored(mut self, unscored_only: bool) -> Self {
        self.unscored_only = unscored_only;
        self
    }

    pub fn after(mut self, id: i64) -> Self {
        self.after_id = Some(id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Per-source record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub total: u64,
    pub scored: u64,
    pub positive: u64,
    pub manually_labeled: u64,
}

/// Storage operations required by the collector and the scorer
pub trait RecordStore: Send + Sync {
    /// Insert the record if `(source, external_id)` is new, otherwise replace
    /// its `response`. Returns the stored record and whether it was created.
    fn upsert(
        &self,
        source: Source,
        external_id: &str,
        response: &Value,
    ) -> Result<(Record, bool), StoreError>;

    fn get(&self, source: Source, external_id: &str) -> Result<Option<Record>, StoreError>;

    fn filter_by(&self, query: &RecordQuery) -> Result<Vec<Record>, StoreError>;

    /// Number of records matching `query`, ignoring its limit
    fn count(&self, query: &RecordQuery) -> Result<u64, StoreError>;

    /// Write the named fields of every record in one transaction.
    /// Returns the number of rows updated.
    fn bulk_update(&self, records: &[Record], fields: &[RecordField]) -> Result<usize, StoreError>;

    fn stats(&self, source: Source) -> Result<SourceStats, StoreError>;
}
