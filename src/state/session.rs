use crate::state::{InvalidTransition, SessionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Adapter-state key holding the extractor's pending "next page" hint
pub const NEXT_URL_KEY: &str = "next_url";

/// Per-session configuration supplied at enqueue (and partly at resume) time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Pages processed per executor invocation before yielding
    pub chunk_size: u32,

    /// Hard cap on processed pages; reaching it pauses the session
    pub max_pages: Option<u32>,

    /// Reuse a matching resumable session instead of creating a new one
    pub resume: bool,

    /// Keep running chunk after chunk within one invocation
    pub auto_continue: bool,

    /// Sleep between chunks when `auto_continue` is set
    pub inter_chunk_delay_secs: u64,

    /// Explicit extractor registry key; resolved from the source host when None
    pub site_id: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            max_pages: None,
            resume: true,
            auto_continue: true,
            inter_chunk_delay_secs: 0,
            site_id: None,
        }
    }
}

/// Why a page ended up in `failed_pages`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The page could not be fetched within the retry budget
    Fetch,
    /// Storage rejected the page's records or checkpoint write
    Persistence,
}

impl FailureKind {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Persistence => "persistence",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "fetch" => Some(Self::Fetch),
            "persistence" => Some(Self::Persistence),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A page that failed at least once
///
/// Entries are kept as audit history: a later successful retry stamps
/// `resolved_at` instead of removing the entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedPage {
    pub url: String,
    pub error: String,
    pub kind: FailureKind,
    pub timestamp: DateTime<Utc>,
    pub attempt_count: u32,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailedPage {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Record counts produced by a single page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    /// Records the extractor returned
    pub found: u64,
    /// Records accepted by the sink (new or linked to an existing entity)
    pub saved: u64,
    /// Records that created a new entity
    pub new: u64,
}

/// Durable record of one resumable crawl job
///
/// Every mutation happens on an in-memory copy that the executor hands to the
/// checkpoint store in one atomic write; a copy that fails to persist is
/// discarded, never partially applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSession {
    // ===== Identity =====
    pub id: i64,
    pub source_url: String,
    pub target_scope_key: String,
    pub site_id: Option<String>,

    // ===== Status =====
    pub status: SessionStatus,

    // ===== Progress =====
    pub total_pages_discovered: u64,
    pub pages_processed: u64,
    pub current_page_index: u64,
    pub discovered_pages: Vec<String>,
    pub processed_pages: BTreeSet<String>,
    pub failed_pages: Vec<FailedPage>,

    // ===== Record counters =====
    pub records_found: u64,
    pub records_saved: u64,
    pub records_new: u64,

    // ===== Adapter cursor =====
    pub adapter_state: BTreeMap<String, String>,

    // ===== Config =====
    pub chunk_size: u32,
    pub max_pages: Option<u32>,
    pub resume: bool,
    pub auto_continue: bool,
    pub inter_chunk_delay_secs: u64,

    // ===== Diagnostics =====
    pub error_message: Option<String>,
    pub error_count: u32,
    pub last_error_at: Option<DateTime<Utc>>,

    // ===== Timestamps =====
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    // ===== Lease =====
    /// Lease holder recorded when this copy was loaded
    ///
    /// A commit only lands while the stored lease still names the same
    /// holder, so a copy whose lease was taken over cannot overwrite the
    /// new holder's progress.
    pub lease_holder: Option<String>,
}

impl CrawlSession {
    /// Creates an unsaved `Pending` session (id 0 until the store assigns one)
    pub fn new(source_url: &str, target_scope_key: &str, options: &SessionOptions) -> Self {
        Self {
            id: 0,
            source_url: source_url.to_string(),
            target_scope_key: target_scope_key.to_string(),
            site_id: options.site_id.clone(),
            status: SessionStatus::Pending,
            total_pages_discovered: 0,
            pages_processed: 0,
            current_page_index: 0,
            discovered_pages: Vec::new(),
            processed_pages: BTreeSet::new(),
            failed_pages: Vec::new(),
            records_found: 0,
            records_saved: 0,
            records_new: 0,
            adapter_state: BTreeMap::new(),
            chunk_size: options.chunk_size,
            max_pages: options.max_pages,
            resume: options.resume,
            auto_continue: options.auto_continue,
            inter_chunk_delay_secs: options.inter_chunk_delay_secs,
            error_message: None,
            error_count: 0,
            last_error_at: None,
            created_at: Utc::now(),
            started_at: None,
            updated_at: None,
            completed_at: None,
            lease_holder: None,
        }
    }

    /// Moves the session to `to`, stamping the lifecycle timestamps
    pub fn transition_to(&mut self, to: SessionStatus) -> Result<(), InvalidTransition> {
        self.status.check_transition(to)?;

        let now = Utc::now();
        match to {
            SessionStatus::InProgress => {
                self.started_at.get_or_insert(now);
            }
            SessionStatus::Completed | SessionStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            _ => {}
        }

        self.status = to;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Seeds the source URL as the first page if nothing was discovered yet
    pub fn seed_source(&mut self) {
        if self.discovered_pages.is_empty() {
            let source = self.source_url.clone();
            self.discover(&source);
        }
    }

    /// The page under the cursor, if any
    pub fn next_candidate(&self) -> Option<&str> {
        self.discovered_pages
            .get(self.current_page_index as usize)
            .map(String::as_str)
    }

    pub fn is_discovered(&self, url: &str) -> bool {
        self.discovered_pages.iter().any(|u| u == url)
    }

    pub fn is_processed(&self, url: &str) -> bool {
        self.processed_pages.contains(url)
    }

    /// Appends a page to the ordered discovery list
    ///
    /// Returns false when the page was already known.
    pub fn discover(&mut self, url: &str) -> bool {
        if self.is_discovered(url) {
            return false;
        }
        self.discovered_pages.push(url.to_string());
        self.total_pages_discovered = self.discovered_pages.len() as u64;
        self.updated_at = Some(Utc::now());
        true
    }

    /// Moves the cursor one page forward, never past the discovered list
    pub fn advance(&mut self) {
        let len = self.discovered_pages.len() as u64;
        self.current_page_index = (self.current_page_index + 1).min(len);
        self.updated_at = Some(Utc::now());
    }

    /// Marks a page processed and folds its record counts into the totals
    pub fn record_processed(&mut self, url: &str, counts: RecordCounts) {
        let now = Utc::now();

        self.processed_pages.insert(url.to_string());
        self.pages_processed = self.processed_pages.len() as u64;

        self.records_found += counts.found;
        self.records_saved += counts.saved;
        self.records_new += counts.new;

        for failure in self.failed_pages.iter_mut().filter(|f| f.url == url) {
            failure.resolved_at.get_or_insert(now);
        }

        self.updated_at = Some(now);
    }

    /// Records a page failure, bumping `attempt_count` for repeat offenders
    pub fn record_failure(&mut self, url: &str, error: &str, kind: FailureKind) {
        let now = Utc::now();

        match self.failed_pages.iter_mut().find(|f| f.url == url) {
            Some(existing) => {
                existing.attempt_count += 1;
                existing.error = error.to_string();
                existing.kind = kind;
                existing.timestamp = now;
                existing.resolved_at = None;
            }
            None => self.failed_pages.push(FailedPage {
                url: url.to_string(),
                error: error.to_string(),
                kind,
                timestamp: now,
                attempt_count: 1,
                resolved_at: None,
            }),
        }

        self.error_message = Some(error.to_string());
        self.error_count += 1;
        self.last_error_at = Some(now);
        self.updated_at = Some(now);
    }

    /// Failures that no later successful attempt has resolved
    pub fn unresolved_failures(&self) -> impl Iterator<Item = &FailedPage> {
        self.failed_pages.iter().filter(|f| !f.is_resolved())
    }

    /// Returns true when `max_pages` is set and already reached
    pub fn page_limit_reached(&self) -> bool {
        self.max_pages
            .is_some_and(|max| self.pages_processed >= u64::from(max))
    }

    /// Percentage of discovered pages that have been processed
    pub fn progress_percent(&self) -> f64 {
        if self.total_pages_discovered == 0 {
            return 0.0;
        }
        (self.pages_processed as f64 / self.total_pages_discovered as f64) * 100.0
    }

    /// The extractor's pending next-page hint
    pub fn next_url(&self) -> Option<&str> {
        self.adapter_state.get(NEXT_URL_KEY).map(String::as_str)
    }

    /// Checks the progress invariants every persisted session must satisfy
    pub fn invariants_hold(&self) -> bool {
        let discovered = self.discovered_pages.len() as u64;
        self.pages_processed == self.processed_pages.len() as u64
            && self.total_pages_discovered == discovered
            && self.current_page_index <= discovered
            && self.total_pages_discovered >= self.pages_processed
    }
}
