use crate::state::{CrawlSession, FailedPage, SessionStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Request to start (or reuse) a crawl session
///
/// Unset knobs fall back to the configured `[defaults]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub source_url: String,
    pub target_scope_key: String,
    pub chunk_size: Option<u32>,
    pub max_pages: Option<u32>,
    /// Reuse a matching resumable session instead of starting over
    pub resume: bool,
    /// Continue this exact session instead of looking one up
    pub session_id: Option<i64>,
    pub auto_continue: Option<bool>,
    pub inter_chunk_delay_seconds: Option<u64>,
    pub site_id: Option<String>,
}

impl EnqueueRequest {
    pub fn new(source_url: impl Into<String>, target_scope_key: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            target_scope_key: target_scope_key.into(),
            chunk_size: None,
            max_pages: None,
            resume: true,
            session_id: None,
            auto_continue: None,
            inter_chunk_delay_seconds: None,
            site_id: None,
        }
    }
}

/// Request to continue a stopped session, optionally with new run knobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub session_id: i64,
    pub chunk_size: Option<u32>,
    pub auto_continue: Option<bool>,
    pub inter_chunk_delay_seconds: Option<u64>,
}

impl ResumeRequest {
    pub fn new(session_id: i64) -> Self {
        Self {
            session_id,
            chunk_size: None,
            auto_continue: None,
            inter_chunk_delay_seconds: None,
        }
    }
}

/// Acknowledgement for an enqueue or resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnqueueResponse {
    pub message: String,
    pub session_id: i64,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub session_id: i64,
    pub status: SessionStatus,
    pub source_url: String,
    pub target_scope_key: String,
    pub progress_percent: f64,
    pub pages_processed: u64,
    pub total_pages_discovered: u64,
    pub current_page_index: u64,
    pub records_found: u64,
    pub records_saved: u64,
    pub records_new: u64,
    /// Failures not yet resolved by a later successful attempt
    pub failed_pages_count: usize,
    pub failed_pages: Vec<FailedPage>,
    pub resumable: bool,
    pub adapter_state: BTreeMap<String, String>,
    pub error_message: Option<String>,
    /// An executor task for this session is live in this process
    pub running: bool,
}

impl StatusReport {
    pub fn from_session(session: &CrawlSession, running: bool) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            source_url: session.source_url.clone(),
            target_scope_key: session.target_scope_key.clone(),
            progress_percent: session.progress_percent(),
            pages_processed: session.pages_processed,
            total_pages_discovered: session.total_pages_discovered,
            current_page_index: session.current_page_index,
            records_found: session.records_found,
            records_saved: session.records_saved,
            records_new: session.records_new,
            failed_pages_count: session.unresolved_failures().count(),
            failed_pages: session.failed_pages.clone(),
            resumable: session.status.is_resumable(),
            adapter_state: session.adapter_state.clone(),
            error_message: session.error_message.clone(),
            running,
        }
    }
}
