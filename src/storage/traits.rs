//! Storage traits and error types
//!
//! This module defines the checkpoint store interface the crawl executor
//! depends on, plus the page outcome type it persists after every page.

use crate::extract::ExtractedRecord;
use crate::sink::{RecordSink, SinkError};
use crate::state::{
    CrawlSession, FailureKind, InvalidTransition, RecordCounts, SessionOptions, SessionStatus,
    NEXT_URL_KEY,
};
use chrono::Duration;
use thiserror::Error;

/// Errors that can occur during checkpoint storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Crawl session {0} not found")]
    SessionNotFound(i64),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Crawl session {0} is terminal and cannot be modified")]
    TerminalSession(i64),

    #[error("Lease on crawl session {id} was lost (now held by {holder:?})")]
    LeaseLost { id: i64, holder: Option<String> },

    #[error("Corrupt checkpoint data: {0}")]
    Corrupt(String),

    #[error("Record write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What happened to one page, as committed to the checkpoint
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// The page was fetched and extracted; its records are upserted in the
    /// same commit as the checkpoint
    Processed {
        url: String,
        records: Vec<ExtractedRecord>,
        /// A newly discovered next page; None ends pagination
        next_url: Option<String>,
    },

    /// The page was already processed; only the cursor moves
    Skipped { url: String },

    /// The page failed; the cursor stays so the page is redone on resume
    Failed {
        url: String,
        error: String,
        kind: FailureKind,
    },
}

impl PageOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Processed { url, .. } | Self::Skipped { url } | Self::Failed { url, .. } => url,
        }
    }

    /// Applies the outcome to an in-memory session
    ///
    /// `counts` is the tally of upserting a processed page's records; other
    /// outcomes ignore it.
    pub fn apply(&self, session: &mut CrawlSession, counts: RecordCounts) {
        match self {
            Self::Processed { url, next_url, .. } => {
                session.record_processed(url, counts);
                session.advance();
                match next_url {
                    Some(next) => {
                        session.discover(next);
                        session
                            .adapter_state
                            .insert(NEXT_URL_KEY.to_string(), next.clone());
                    }
                    None => {
                        session.adapter_state.remove(NEXT_URL_KEY);
                    }
                }
            }
            Self::Skipped { .. } => session.advance(),
            Self::Failed { url, error, kind } => session.record_failure(url, error, *kind),
        }
    }
}

/// Durable store for crawl sessions
///
/// Implementations must make `persist_page_result` and `transition` atomic:
/// either the whole updated session, together with a processed page's
/// records, is visible afterwards or none of it is. Sessions in a terminal
/// status must never be written again, and a commit is refused once the
/// stored lease names a different holder than the session copy was loaded
/// under.
pub trait CheckpointStore: RecordSink {
    // ===== Session Lifecycle =====

    /// Returns a resumable session for `(source_url, scope_key)` when
    /// `options.resume` is set and one exists, otherwise creates a `Pending` one
    fn get_or_create(
        &mut self,
        source_url: &str,
        scope_key: &str,
        options: &SessionOptions,
    ) -> StorageResult<CrawlSession>;

    /// Always creates a new `Pending` session
    fn create_session(
        &mut self,
        source_url: &str,
        scope_key: &str,
        options: &SessionOptions,
    ) -> StorageResult<CrawlSession>;

    /// Loads a session by ID
    fn load(&self, session_id: i64) -> StorageResult<CrawlSession>;

    /// Finds the most recently updated resumable session for a source and scope
    fn find_resumable(
        &self,
        source_url: &str,
        scope_key: &str,
    ) -> StorageResult<Option<CrawlSession>>;

    /// Lists sessions whose status is in `statuses` (all sessions when empty)
    fn list_sessions(&self, statuses: &[SessionStatus]) -> StorageResult<Vec<CrawlSession>>;

    // ===== Checkpointing =====

    /// Applies a page outcome and commits the resulting session in one write
    ///
    /// A processed page's records are deduplicated into the scope inside the
    /// same transaction. On success `session` reflects the committed state; on
    /// error it is left exactly as it was and no record was written.
    fn persist_page_result(
        &mut self,
        session: &mut CrawlSession,
        outcome: PageOutcome,
    ) -> StorageResult<()>;

    /// Moves a session to a new status, enforcing the state machine
    fn transition(&mut self, session: &mut CrawlSession, to: SessionStatus) -> StorageResult<()>;

    /// Replaces the per-run knobs a resume request may change
    fn update_run_options(
        &mut self,
        session: &mut CrawlSession,
        chunk_size: u32,
        auto_continue: bool,
        inter_chunk_delay_secs: u64,
    ) -> StorageResult<()>;

    // ===== Stop requests =====

    /// Flags a session for cooperative cancellation
    fn request_cancel(&mut self, session_id: i64) -> StorageResult<()>;

    /// Returns true if cancellation was requested for a session
    fn cancel_requested(&self, session_id: i64) -> StorageResult<bool>;

    /// Flags a running session to pause before its next page
    ///
    /// The flag is cleared when the session is next committed as `Paused`.
    fn request_pause(&mut self, session_id: i64) -> StorageResult<()>;

    /// Returns true if a pause was requested and not yet honored
    fn pause_requested(&self, session_id: i64) -> StorageResult<bool>;

    // ===== Single-writer lease =====

    /// Takes (or renews) the executor lease on a session
    ///
    /// Returns false if another owner holds an unexpired lease.
    fn acquire_lease(&mut self, session_id: i64, owner: &str, ttl: Duration)
        -> StorageResult<bool>;

    /// Drops the lease if `owner` still holds it
    fn release_lease(&mut self, session_id: i64, owner: &str) -> StorageResult<()>;

    /// Returns the current lease holder, if the lease has not expired
    fn lease_owner(&self, session_id: i64) -> StorageResult<Option<String>>;
}
