//! Session controller
//!
//! The controller is the outer surface of the engine: it creates or reuses
//! sessions, spawns an executor task per session, and answers status,
//! pause, cancellation and listing queries from the checkpoint store.

mod requests;

pub use requests::{EnqueueRequest, EnqueueResponse, ResumeRequest, StatusReport};

use crate::config::{Config, DefaultsConfig};
use crate::crawler::{lock, ChunkReport, CrawlExecutor, HttpFetcher};
use crate::extract::ExtractorRegistry;
use crate::state::{CrawlSession, SessionOptions, SessionStatus};
use crate::storage::{CheckpointStore, SqliteStorage};
use crate::url::normalize_url;
use crate::{HarvestError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

type TaskMap = HashMap<i64, JoinHandle<Result<ChunkReport>>>;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the controller holds a session while stopping it directly
const CONTROLLER_LEASE_TTL_SECS: i64 = 30;

fn controller_owner() -> String {
    format!("controller-{}", std::process::id())
}

/// Starts, resumes, pauses, cancels and reports on crawl sessions
pub struct SessionController<S> {
    executor: CrawlExecutor<S>,
    defaults: DefaultsConfig,
    tasks: Mutex<TaskMap>,
}

impl SessionController<SqliteStorage> {
    /// Wires up the SQLite store, HTTP fetcher and `[[site]]` extractors
    /// described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = Path::new(&config.storage.database_path);
        let store = SqliteStorage::new(db_path)?;
        let fetcher = HttpFetcher::new(&config.fetcher)?;
        let extractors = ExtractorRegistry::from_sites(&config.sites)?;

        tracing::info!(
            "Loaded {} site extractor(s), database at {}",
            extractors.len(),
            db_path.display()
        );

        let executor = CrawlExecutor::new(
            Arc::new(Mutex::new(store)),
            Arc::new(fetcher),
            Arc::new(extractors),
        )
        .with_lease_ttl(Duration::from_secs(config.defaults.lease_ttl_secs));

        Ok(Self::new(executor, config.defaults.clone()))
    }
}

impl<S> SessionController<S>
where
    S: CheckpointStore + Send + 'static,
{
    pub fn new(executor: CrawlExecutor<S>, defaults: DefaultsConfig) -> Self {
        Self {
            executor,
            defaults,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn executor(&self) -> &CrawlExecutor<S> {
        &self.executor
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut S) -> crate::storage::StorageResult<T>,
    ) -> Result<T> {
        let mut store = lock(self.executor.store())?;
        Ok(f(&mut *store)?)
    }

    fn load(&self, session_id: i64) -> Result<CrawlSession> {
        self.with_store(|s| s.load(session_id))
            .map_err(|e| match e {
                HarvestError::Storage(crate::storage::StorageError::SessionNotFound(id)) => {
                    HarvestError::SessionNotFound(id)
                }
                other => other,
            })
    }

    /// Creates or reuses a session and starts an executor for it
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueResponse> {
        let session = match request.session_id {
            Some(id) => {
                let session = self.load(id)?;
                if !session.status.is_resumable() {
                    return Err(HarvestError::NotResumable {
                        id,
                        status: session.status,
                    });
                }
                session
            }
            None => {
                let source_url = normalize_url(&request.source_url)?;
                if let Some(site_id) = &request.site_id {
                    if self.executor.extractors().get(site_id).is_none() {
                        return Err(HarvestError::UnknownSite(site_id.clone()));
                    }
                } else if self.executor.extractors().resolve(&source_url).is_none() {
                    return Err(HarvestError::UnknownSite(source_url.to_string()));
                }

                let options = SessionOptions {
                    chunk_size: request.chunk_size.unwrap_or(self.defaults.chunk_size),
                    max_pages: request.max_pages,
                    resume: request.resume,
                    auto_continue: request.auto_continue.unwrap_or(self.defaults.auto_continue),
                    inter_chunk_delay_secs: request
                        .inter_chunk_delay_seconds
                        .unwrap_or(self.defaults.inter_chunk_delay_secs),
                    site_id: request.site_id.clone(),
                };

                self.with_store(|s| {
                    s.get_or_create(source_url.as_str(), &request.target_scope_key, &options)
                })?
            }
        };

        let message = if session.pages_processed > 0 || session.status != SessionStatus::Pending {
            format!(
                "Resuming crawl session {} at page {} ({} processed)",
                session.id, session.current_page_index, session.pages_processed
            )
        } else {
            format!("Crawl session {} enqueued for {}", session.id, session.source_url)
        };

        self.spawn(session.id)?;
        Ok(EnqueueResponse {
            message,
            session_id: session.id,
        })
    }

    /// Continues a stopped session, applying any new run knobs first
    pub fn resume(&self, request: ResumeRequest) -> Result<EnqueueResponse> {
        let mut session = self.load(request.session_id)?;
        if !session.status.is_resumable() {
            return Err(HarvestError::NotResumable {
                id: session.id,
                status: session.status,
            });
        }

        let chunk_size = request.chunk_size.unwrap_or(session.chunk_size);
        let auto_continue = request.auto_continue.unwrap_or(session.auto_continue);
        let delay = request
            .inter_chunk_delay_seconds
            .unwrap_or(session.inter_chunk_delay_secs);
        if (chunk_size, auto_continue, delay)
            != (
                session.chunk_size,
                session.auto_continue,
                session.inter_chunk_delay_secs,
            )
        {
            self.with_store(|s| {
                s.update_run_options(&mut session, chunk_size, auto_continue, delay)
            })?;
        }

        self.spawn(session.id)?;
        Ok(EnqueueResponse {
            message: format!(
                "Resuming crawl session {} at page {} ({} processed)",
                session.id, session.current_page_index, session.pages_processed
            ),
            session_id: session.id,
        })
    }

    /// Reports the stored state of a session
    pub fn status(&self, session_id: i64) -> Result<StatusReport> {
        let session = self.load(session_id)?;
        Ok(StatusReport::from_session(&session, self.is_running(session_id)?))
    }

    /// Asks a session to stop after its current page, leaving it `Paused`
    ///
    /// Unlike [`cancel`](Self::cancel) the session stays resumable. A session
    /// no executor is running is left untouched. Returns the status after the
    /// call.
    pub fn pause(&self, session_id: i64) -> Result<SessionStatus> {
        let session = self.load(session_id)?;
        if session.status.is_terminal() {
            return Err(HarvestError::NotResumable {
                id: session_id,
                status: session.status,
            });
        }

        if self.is_running(session_id)? {
            self.with_store(|s| s.request_pause(session_id))?;
            tracing::info!("Pause requested for running session {}", session_id);
            return Ok(session.status);
        }

        // Idle here; only flag it when another process holds the lease
        let owner = controller_owner();
        let ttl = chrono::Duration::seconds(CONTROLLER_LEASE_TTL_SECS);
        if self.with_store(|s| s.acquire_lease(session_id, &owner, ttl))? {
            self.with_store(|s| s.release_lease(session_id, &owner))?;
            tracing::info!("Session {} is not running; nothing to pause", session_id);
        } else {
            self.with_store(|s| s.request_pause(session_id))?;
            tracing::info!("Pause requested for leased session {}", session_id);
        }
        Ok(session.status)
    }

    /// Requests cancellation
    ///
    /// A session with a live executor stops before its next page; an idle
    /// one is cancelled immediately. Returns the status after the call.
    pub fn cancel(&self, session_id: i64) -> Result<SessionStatus> {
        let session = self.load(session_id)?;
        if session.status.is_terminal() {
            return Err(HarvestError::NotResumable {
                id: session_id,
                status: session.status,
            });
        }

        self.with_store(|s| s.request_cancel(session_id))?;
        if self.is_running(session_id)? {
            tracing::info!("Cancellation requested for running session {}", session_id);
            return Ok(session.status);
        }

        // Idle here, but another process may still hold the lease
        let owner = controller_owner();
        let ttl = chrono::Duration::seconds(CONTROLLER_LEASE_TTL_SECS);
        if !self.with_store(|s| s.acquire_lease(session_id, &owner, ttl))? {
            tracing::info!("Cancellation requested for leased session {}", session_id);
            return Ok(session.status);
        }

        let result = self.load(session_id).and_then(|mut session| {
            if !session.status.is_terminal() {
                self.with_store(|s| s.transition(&mut session, SessionStatus::Cancelled))?;
            }
            Ok(session.status)
        });
        self.with_store(|s| s.release_lease(session_id, &owner))?;

        tracing::info!("Session {} cancelled", session_id);
        result
    }

    /// Sessions that can still be resumed, most recently updated first
    pub fn list_resumable(&self) -> Result<Vec<StatusReport>> {
        let sessions =
            self.with_store(|s| s.list_sessions(&SessionStatus::resumable_states()))?;
        sessions
            .iter()
            .map(|session| Ok(StatusReport::from_session(session, self.is_running(session.id)?)))
            .collect()
    }

    /// Waits for the executor task of a session to finish
    ///
    /// Returns None when no task for the session was started by this
    /// controller (or it was already awaited). Dropping the returned future
    /// early leaves the task tracked, so `wait` can be called again.
    pub async fn wait(&self, session_id: i64) -> Result<Option<ChunkReport>> {
        loop {
            let finished = match lock(&self.tasks)?.get(&session_id) {
                Some(handle) => handle.is_finished(),
                None => return Ok(None),
            };
            if finished {
                break;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }

        let handle = lock(&self.tasks)?.remove(&session_id);
        match handle {
            Some(handle) => {
                let report = handle
                    .await
                    .map_err(|e| HarvestError::Task(e.to_string()))??;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    fn is_running(&self, session_id: i64) -> Result<bool> {
        Ok(lock(&self.tasks)?
            .get(&session_id)
            .is_some_and(|handle| !handle.is_finished()))
    }

    /// Spawns an executor task unless one is already live for the session
    fn spawn(&self, session_id: i64) -> Result<()> {
        let mut tasks = lock(&self.tasks)?;
        if tasks
            .get(&session_id)
            .is_some_and(|handle| !handle.is_finished())
        {
            tracing::info!("Session {} already has a running executor", session_id);
            return Ok(());
        }

        let executor = self.executor.fork();
        let handle = tokio::spawn(async move { executor.run(session_id).await });
        tasks.insert(session_id, handle);
        Ok(())
    }
}
