//! Record sink with scoped deduplication
//!
//! Extracted records are fingerprinted within their target scope and upserted
//! existing-wins: a fingerprint seen before links the session to the stored
//! entity instead of creating a duplicate.
//!
//! The SQLite checkpoint store implements [`RecordSink`] on its own
//! connection, so a page's records commit in the same transaction as the
//! checkpoint that counts them.

mod fingerprint;
mod sqlite;

pub use fingerprint::{fingerprint, normalize_text};
pub(crate) use sqlite::write_page;

use crate::extract::ExtractedRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by a record sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Record rejected: {0}")]
    InvalidRecord(String),

    #[error("Failed to encode record fields: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Corrupt record data: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Result of upserting one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// True when the record created a new entity
    pub created: bool,
    /// ID of the new or pre-existing entity
    pub id: i64,
}

/// A deduplicated record as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub scope_key: String,
    pub fingerprint: String,
    pub primary_text: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
}

/// Destination for extracted records
pub trait RecordSink {
    /// Upserts a single record and links it to `session_id`
    fn upsert(
        &mut self,
        record: &ExtractedRecord,
        scope_key: &str,
        session_id: i64,
    ) -> SinkResult<UpsertOutcome>;

    /// Number of distinct records stored for a scope
    fn count_records(&self, scope_key: &str) -> SinkResult<u64>;

    /// Records linked to a session, in first-link order
    fn records_for_session(&self, session_id: i64) -> SinkResult<Vec<StoredRecord>>;
}
