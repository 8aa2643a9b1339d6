//! Chunked crawl executor
//!
//! The executor drives one session through its pages strictly in order,
//! checkpointing after every page. A run stops at a chunk boundary, a page
//! limit, a failed page, a pause or cancellation request, or the end of
//! pagination; the next run picks up at the stored cursor. The session lease
//! is renewed before every page.

use crate::crawler::PageFetcher;
use crate::extract::{Extractor, ExtractorRegistry};
use crate::state::{CrawlSession, FailureKind, SessionStatus};
use crate::storage::{CheckpointStore, PageOutcome, StorageResult};
use crate::url::normalize_url;
use crate::{HarvestError, Result, UrlError};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use url::Url;

static EXECUTOR_SEQ: AtomicU64 = AtomicU64::new(0);

/// Why a run returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The last page had no next link
    NoNextPage,
    /// The next link pointed at the current or an earlier page
    LoopDetected,
    /// `max_pages` was reached
    PageLimit,
    /// A chunk finished and `auto_continue` is off
    ChunkLimit,
    /// A page could not be fetched
    FetchFailed,
    /// Records or the checkpoint could not be written
    PersistenceFailed,
    /// A pause was requested; the session stays resumable
    PauseRequested,
    /// Cancellation was requested
    Cancelled,
    /// The session was already completed or cancelled
    AlreadyTerminal,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoNextPage => "no next page",
            Self::LoopDetected => "pagination loop detected",
            Self::PageLimit => "page limit reached",
            Self::ChunkLimit => "chunk limit reached",
            Self::FetchFailed => "fetch failed",
            Self::PersistenceFailed => "persistence failed",
            Self::PauseRequested => "pause requested",
            Self::Cancelled => "cancelled",
            Self::AlreadyTerminal => "already terminal",
        };
        f.write_str(s)
    }
}

/// Summary of one executor invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub session_id: i64,
    pub status: SessionStatus,
    /// Pages fetched over the network during this run
    pub pages_fetched: u64,
    /// Already-processed pages stepped over without fetching
    pub pages_skipped: u64,
    pub stop: StopReason,
}

/// Runs crawl sessions against a checkpoint store
///
/// The store also receives each page's records, inside the page's checkpoint
/// commit.
pub struct CrawlExecutor<S> {
    store: Arc<Mutex<S>>,
    fetcher: Arc<dyn PageFetcher>,
    extractors: Arc<ExtractorRegistry>,
    owner: String,
    lease_ttl: chrono::Duration,
}

impl<S> Clone for CrawlExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            fetcher: Arc::clone(&self.fetcher),
            extractors: Arc::clone(&self.extractors),
            owner: self.owner.clone(),
            lease_ttl: self.lease_ttl,
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|e| HarvestError::Task(format!("Failed to lock shared state: {}", e)))
}

impl<S> CrawlExecutor<S>
where
    S: CheckpointStore + Send + 'static,
{
    pub fn new(
        store: Arc<Mutex<S>>,
        fetcher: Arc<dyn PageFetcher>,
        extractors: Arc<ExtractorRegistry>,
    ) -> Self {
        Self {
            store,
            fetcher,
            extractors,
            owner: next_owner_token(),
            lease_ttl: chrono::Duration::seconds(300),
        }
    }

    /// A copy sharing every collaborator but holding its own lease token
    pub fn fork(&self) -> Self {
        Self {
            owner: next_owner_token(),
            ..self.clone()
        }
    }

    /// Sets the lease owner token (must be unique per live executor)
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300));
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &Arc<Mutex<S>> {
        &self.store
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut S) -> StorageResult<T>) -> Result<T> {
        let mut store = lock(&self.store)?;
        Ok(f(&mut *store)?)
    }

    /// Runs a session until it stops, holding its lease throughout
    pub async fn run(&self, session_id: i64) -> Result<ChunkReport> {
        self.take_lease(session_id)?;

        let result = self.run_leased(session_id).await;

        if let Err(e) = self.with_store(|s| s.release_lease(session_id, &self.owner)) {
            tracing::warn!("Failed to release lease on session {}: {}", session_id, e);
        }

        match &result {
            Ok(report) => tracing::info!(
                "Session {} stopped: {} (status {}, {} fetched, {} skipped)",
                report.session_id,
                report.stop,
                report.status,
                report.pages_fetched,
                report.pages_skipped
            ),
            Err(e) => tracing::error!("Session {} aborted: {}", session_id, e),
        }

        result
    }

    fn take_lease(&self, session_id: i64) -> Result<()> {
        let acquired =
            self.with_store(|s| s.acquire_lease(session_id, &self.owner, self.lease_ttl))?;
        if acquired {
            return Ok(());
        }

        let owner = self
            .with_store(|s| s.lease_owner(session_id))?
            .unwrap_or_default();
        Err(HarvestError::LeaseHeld {
            id: session_id,
            owner,
        })
    }

    async fn run_leased(&self, session_id: i64) -> Result<ChunkReport> {
        let mut session = self.with_store(|s| s.load(session_id))?;

        let mut report = ChunkReport {
            session_id,
            status: session.status,
            pages_fetched: 0,
            pages_skipped: 0,
            stop: StopReason::AlreadyTerminal,
        };

        if session.status.is_terminal() {
            tracing::info!("Session {} is already {}", session_id, session.status);
            return Ok(report);
        }

        if session.status.can_start() {
            self.with_store(|s| s.transition(&mut session, SessionStatus::InProgress))?;
        } else {
            // InProgress without a live lease means the last executor died
            tracing::warn!(
                "Recovering session {} left in progress at page {}",
                session_id,
                session.current_page_index
            );
        }

        let extractor = match self.resolve_extractor(&session) {
            Ok(extractor) => extractor,
            Err(e) => {
                session.error_message = Some(e.to_string());
                self.with_store(|s| s.transition(&mut session, SessionStatus::Failed))?;
                return Err(e);
            }
        };

        tracing::info!(
            "Running session {} for {} from page {} (chunk size {})",
            session_id,
            session.source_url,
            session.current_page_index,
            session.chunk_size
        );

        loop {
            if let Some(stop) = self.run_chunk(&mut session, extractor, &mut report).await? {
                report.stop = stop;
                break;
            }

            if !session.auto_continue {
                self.with_store(|s| s.transition(&mut session, SessionStatus::Paused))?;
                report.stop = StopReason::ChunkLimit;
                break;
            }

            if session.inter_chunk_delay_secs > 0 {
                tracing::debug!(
                    "Session {} sleeping {}s before next chunk",
                    session_id,
                    session.inter_chunk_delay_secs
                );
                tokio::time::sleep(Duration::from_secs(session.inter_chunk_delay_secs)).await;
            }
        }

        report.status = session.status;
        Ok(report)
    }

    fn resolve_extractor(&self, session: &CrawlSession) -> Result<&dyn Extractor> {
        match &session.site_id {
            Some(site_id) => self
                .extractors
                .get(site_id)
                .ok_or_else(|| HarvestError::UnknownSite(site_id.clone())),
            None => {
                let url = parse_page_url(&session.source_url)?;
                self.extractors
                    .resolve(&url)
                    .map(|(_, extractor)| extractor)
                    .ok_or_else(|| HarvestError::UnknownSite(session.source_url.clone()))
            }
        }
    }

    /// Processes up to `chunk_size` pages
    ///
    /// Returns None when the chunk ran out without the session stopping.
    async fn run_chunk(
        &self,
        session: &mut CrawlSession,
        extractor: &dyn Extractor,
        report: &mut ChunkReport,
    ) -> Result<Option<StopReason>> {
        let session_id = session.id;

        for _ in 0..session.chunk_size.max(1) {
            self.take_lease(session_id)?;

            if self.with_store(|s| s.cancel_requested(session_id))? {
                tracing::info!("Session {} cancelled", session_id);
                self.with_store(|s| s.transition(session, SessionStatus::Cancelled))?;
                return Ok(Some(StopReason::Cancelled));
            }

            if self.with_store(|s| s.pause_requested(session_id))? {
                tracing::info!(
                    "Session {} paused on request at page {}",
                    session_id,
                    session.current_page_index
                );
                self.with_store(|s| s.transition(session, SessionStatus::Paused))?;
                return Ok(Some(StopReason::PauseRequested));
            }

            if session.page_limit_reached() {
                tracing::info!(
                    "Session {} reached its page limit ({} pages)",
                    session_id,
                    session.pages_processed
                );
                self.with_store(|s| s.transition(session, SessionStatus::Paused))?;
                return Ok(Some(StopReason::PageLimit));
            }

            session.seed_source();
            let Some(candidate) = session.next_candidate().map(str::to_string) else {
                self.with_store(|s| s.transition(session, SessionStatus::Completed))?;
                return Ok(Some(StopReason::NoNextPage));
            };

            if session.is_processed(&candidate) {
                tracing::debug!("Skipping already processed {}", candidate);
                self.with_store(|s| {
                    s.persist_page_result(session, PageOutcome::Skipped { url: candidate })
                })?;
                report.pages_skipped += 1;
                continue;
            }

            let page_url = parse_page_url(&candidate)?;
            let html = match self.fetcher.fetch(&page_url).await {
                Ok(html) => html,
                Err(e) => {
                    tracing::error!("Pausing session {}: {}", session_id, e);
                    self.fail_page(session, &candidate, &e.to_string(), FailureKind::Fetch)?;
                    return Ok(Some(StopReason::FetchFailed));
                }
            };
            report.pages_fetched += 1;

            let (records, next_page) = match extractor.extract(&html, &page_url) {
                Ok(extraction) => (extraction.records, extraction.next_page),
                Err(e) => {
                    tracing::warn!("Extraction failed on {}: {}", candidate, e);
                    (Vec::new(), extractor.next_page(&html, &page_url))
                }
            };

            let (next_url, stop) = self.classify_next(session, &candidate, next_page);

            let found = records.len();
            let new_before = session.records_new;
            let outcome = PageOutcome::Processed {
                url: candidate.clone(),
                records,
                next_url,
            };
            match self.with_store(|s| s.persist_page_result(session, outcome)) {
                Ok(()) => {}
                Err(e @ HarvestError::LeaseHeld { .. }) => return Err(e),
                Err(e) => {
                    tracing::error!("Pausing session {}: checkpoint failed: {}", session_id, e);
                    self.fail_page(session, &candidate, &e.to_string(), FailureKind::Persistence)?;
                    return Ok(Some(StopReason::PersistenceFailed));
                }
            }

            tracing::debug!(
                "Session {} processed {} ({} records, {} new)",
                session_id,
                candidate,
                found,
                session.records_new - new_before
            );

            if let Some(stop) = stop {
                tracing::info!("Session {} finished: {}", session_id, stop);
                self.with_store(|s| s.transition(session, SessionStatus::Completed))?;
                return Ok(Some(stop));
            }
        }

        Ok(None)
    }

    /// Decides whether the extractor's next page continues the crawl
    ///
    /// A next page equal to the current one, or one already seen, ends the
    /// session like a missing next page does.
    fn classify_next(
        &self,
        session: &CrawlSession,
        current: &str,
        next_page: Option<Url>,
    ) -> (Option<String>, Option<StopReason>) {
        let Some(next) = next_page.and_then(|u| normalize_url(u.as_str()).ok()) else {
            return (None, Some(StopReason::NoNextPage));
        };

        let next = next.to_string();
        if next == current || session.is_discovered(&next) || session.is_processed(&next) {
            tracing::info!("Next page {} was already visited; stopping", next);
            return (None, Some(StopReason::LoopDetected));
        }

        (Some(next), None)
    }

    /// Records a page failure and pauses the session
    fn fail_page(
        &self,
        session: &mut CrawlSession,
        url: &str,
        error: &str,
        kind: FailureKind,
    ) -> Result<()> {
        let outcome = PageOutcome::Failed {
            url: url.to_string(),
            error: error.to_string(),
            kind,
        };
        if let Err(e) = self.with_store(|s| s.persist_page_result(session, outcome)) {
            tracing::error!("Could not record failure of {}: {}", url, e);
        }

        self.with_store(|s| s.transition(session, SessionStatus::Paused))
    }
}

fn next_owner_token() -> String {
    let seq = EXECUTOR_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("executor-{}-{}", std::process::id(), seq)
}

fn parse_page_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| HarvestError::Url(UrlError::Parse(format!("{}: {}", url, e))))
}
