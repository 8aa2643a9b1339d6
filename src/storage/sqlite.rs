//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the CheckpointStore trait.
//! The same connection carries the deduplicated records tables, so a page's
//! records and its checkpoint share one transaction.

use crate::sink::write_page;
use crate::state::{
    CrawlSession, FailedPage, FailureKind, RecordCounts, SessionOptions, SessionStatus,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{CheckpointStore, PageOutcome, StorageError, StorageResult};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const SESSION_COLUMNS: &str = "id, source_url, target_scope_key, site_id, status,
     total_pages_discovered, pages_processed, current_page_index,
     records_found, records_saved, records_new,
     chunk_size, max_pages, resume, auto_continue, inter_chunk_delay_secs,
     error_message, error_count, last_error_at,
     created_at, started_at, updated_at, completed_at, lease_owner";

/// Opens a connection configured for concurrent session workers
///
/// Each store holds its own connection to the same file; WAL plus a busy
/// timeout lets them interleave writes.
pub fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}

/// Formats a timestamp the way every table stores it
///
/// Fixed precision and a `Z` suffix keep the text lexicographically ordered,
/// which the lease expiry comparison relies on.
pub(crate) fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

fn from_db_time_opt(s: Option<String>) -> StorageResult<Option<DateTime<Utc>>> {
    s.as_deref().map(from_db_time).transpose()
}

/// SQLite checkpoint store
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the checkpoint database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            conn: open_connection(path)?,
        })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn insert_session(&mut self, session: &CrawlSession) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO crawl_sessions (source_url, target_scope_key, site_id, status,
             chunk_size, max_pages, resume, auto_continue, inter_chunk_delay_secs, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.source_url,
                session.target_scope_key,
                session.site_id,
                session.status.to_db_string(),
                session.chunk_size,
                session.max_pages,
                session.resume,
                session.auto_continue,
                session.inter_chunk_delay_secs as i64,
                to_db_time(session.created_at),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query_sessions(
        &self,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StorageResult<Vec<CrawlSession>> {
        let sql = format!(
            "SELECT {} FROM crawl_sessions {} ORDER BY COALESCE(updated_at, created_at) DESC, id DESC",
            SESSION_COLUMNS, where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, SessionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| self.hydrate(row))
            .collect::<StorageResult<Vec<_>>>()
    }

    /// Loads the child tables for a session row
    fn hydrate(&self, row: SessionRow) -> StorageResult<CrawlSession> {
        let id = row.id;

        let mut discovered_pages = Vec::new();
        let mut processed_pages = BTreeSet::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT url, processed_at FROM session_pages WHERE session_id = ?1 ORDER BY position",
            )?;
            let pages = stmt.query_map(params![id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
            })?;
            for page in pages {
                let (url, processed_at) = page?;
                if processed_at.is_some() {
                    processed_pages.insert(url.clone());
                }
                discovered_pages.push(url);
            }
        }

        let mut failed_pages = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT url, error, kind, failed_at, attempt_count, resolved_at
                 FROM failed_pages WHERE session_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, u32>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            })?;
            for failure in rows {
                let (url, error, kind, failed_at, attempt_count, resolved_at) = failure?;
                failed_pages.push(FailedPage {
                    url,
                    error,
                    kind: FailureKind::from_db_string(&kind).ok_or_else(|| {
                        StorageError::Corrupt(format!("unknown failure kind '{}'", kind))
                    })?,
                    timestamp: from_db_time(&failed_at)?,
                    attempt_count,
                    resolved_at: from_db_time_opt(resolved_at)?,
                });
            }
        }

        let mut adapter_state = BTreeMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT key, value FROM adapter_state WHERE session_id = ?1")?;
            let rows = stmt.query_map(params![id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for entry in rows {
                let (key, value) = entry?;
                adapter_state.insert(key, value);
            }
        }

        let status = SessionStatus::from_db_string(&row.status)
            .ok_or_else(|| StorageError::Corrupt(format!("unknown status '{}'", row.status)))?;

        Ok(CrawlSession {
            id,
            source_url: row.source_url,
            target_scope_key: row.target_scope_key,
            site_id: row.site_id,
            status,
            total_pages_discovered: row.total_pages_discovered as u64,
            pages_processed: row.pages_processed as u64,
            current_page_index: row.current_page_index as u64,
            discovered_pages,
            processed_pages,
            failed_pages,
            records_found: row.records_found as u64,
            records_saved: row.records_saved as u64,
            records_new: row.records_new as u64,
            adapter_state,
            chunk_size: row.chunk_size,
            max_pages: row.max_pages,
            resume: row.resume,
            auto_continue: row.auto_continue,
            inter_chunk_delay_secs: row.inter_chunk_delay_secs as u64,
            error_message: row.error_message,
            error_count: row.error_count,
            last_error_at: from_db_time_opt(row.last_error_at)?,
            created_at: from_db_time(&row.created_at)?,
            started_at: from_db_time_opt(row.started_at)?,
            updated_at: from_db_time_opt(row.updated_at)?,
            completed_at: from_db_time_opt(row.completed_at)?,
            lease_holder: row.lease_owner,
        })
    }

    /// Writes the full session inside an open transaction
    ///
    /// Refuses to touch a session whose stored status is already terminal, or
    /// whose stored lease holder differs from the one `session` was loaded
    /// under. A terminal write drops the lease; a paused write clears any
    /// pending pause request.
    fn write_session(tx: &Transaction<'_>, session: &CrawlSession) -> StorageResult<()> {
        let stored: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT status, lease_owner FROM crawl_sessions WHERE id = ?1",
                params![session.id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let Some((status, holder)) = stored else {
            return Err(StorageError::SessionNotFound(session.id));
        };
        match SessionStatus::from_db_string(&status) {
            None => {
                return Err(StorageError::Corrupt(format!(
                    "unknown status '{}' on session {}",
                    status, session.id
                )))
            }
            Some(status) if status.is_terminal() => {
                return Err(StorageError::TerminalSession(session.id))
            }
            Some(_) => {}
        }
        if holder != session.lease_holder {
            return Err(StorageError::LeaseLost {
                id: session.id,
                holder,
            });
        }

        let terminal = session.status.is_terminal();
        let paused = session.status == SessionStatus::Paused;
        let changed = tx.execute(
            "UPDATE crawl_sessions SET
                status = ?1, total_pages_discovered = ?2, pages_processed = ?3,
                current_page_index = ?4, records_found = ?5, records_saved = ?6,
                records_new = ?7, chunk_size = ?8, max_pages = ?9, resume = ?10,
                auto_continue = ?11, inter_chunk_delay_secs = ?12, error_message = ?13,
                error_count = ?14, last_error_at = ?15, started_at = ?16,
                updated_at = ?17, completed_at = ?18,
                lease_owner = CASE WHEN ?19 THEN NULL ELSE lease_owner END,
                lease_expires_at = CASE WHEN ?19 THEN NULL ELSE lease_expires_at END,
                pause_requested = CASE WHEN ?20 THEN 0 ELSE pause_requested END
             WHERE id = ?21 AND lease_owner IS ?22",
            params![
                session.status.to_db_string(),
                session.total_pages_discovered as i64,
                session.pages_processed as i64,
                session.current_page_index as i64,
                session.records_found as i64,
                session.records_saved as i64,
                session.records_new as i64,
                session.chunk_size,
                session.max_pages,
                session.resume,
                session.auto_continue,
                session.inter_chunk_delay_secs as i64,
                session.error_message,
                session.error_count,
                session.last_error_at.map(to_db_time),
                session.started_at.map(to_db_time),
                to_db_time(session.updated_at.unwrap_or_else(Utc::now)),
                session.completed_at.map(to_db_time),
                terminal,
                paused,
                session.id,
                session.lease_holder,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::LeaseLost {
                id: session.id,
                holder,
            });
        }

        let now = to_db_time(Utc::now());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO session_pages (session_id, position, url, processed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id, position) DO UPDATE SET
                    processed_at = COALESCE(session_pages.processed_at, excluded.processed_at)",
            )?;
            for (position, url) in session.discovered_pages.iter().enumerate() {
                let processed_at = session.is_processed(url).then(|| now.clone());
                stmt.execute(params![session.id, position as i64, url, processed_at])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO failed_pages (session_id, url, error, kind, failed_at, attempt_count, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(session_id, url) DO UPDATE SET
                    error = excluded.error, kind = excluded.kind, failed_at = excluded.failed_at,
                    attempt_count = excluded.attempt_count, resolved_at = excluded.resolved_at",
            )?;
            for failure in &session.failed_pages {
                stmt.execute(params![
                    session.id,
                    failure.url,
                    failure.error,
                    failure.kind.to_db_string(),
                    to_db_time(failure.timestamp),
                    failure.attempt_count,
                    failure.resolved_at.map(to_db_time),
                ])?;
            }
        }

        tx.execute(
            "DELETE FROM adapter_state WHERE session_id = ?1",
            params![session.id],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO adapter_state (session_id, key, value) VALUES (?1, ?2, ?3)",
            )?;
            for (key, value) in &session.adapter_state {
                stmt.execute(params![session.id, key, value])?;
            }
        }

        Ok(())
    }

    /// Commits `draft` atomically and swaps it into `session` on success
    fn commit(&mut self, session: &mut CrawlSession, draft: CrawlSession) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        Self::commit_on(tx, session, draft)
    }

    /// Writes `draft` on `tx` and commits everything the transaction holds
    ///
    /// Dropping `tx` on any error rolls back earlier writes made on it too.
    fn commit_on(
        tx: Transaction<'_>,
        session: &mut CrawlSession,
        mut draft: CrawlSession,
    ) -> StorageResult<()> {
        if !draft.invariants_hold() {
            return Err(StorageError::Corrupt(format!(
                "session {} violates progress invariants",
                draft.id
            )));
        }

        Self::write_session(&tx, &draft)?;
        tx.commit()?;

        if draft.status.is_terminal() {
            draft.lease_holder = None;
        }
        *session = draft;
        Ok(())
    }
}

impl CheckpointStore for SqliteStorage {
    // ===== Session Lifecycle =====

    fn get_or_create(
        &mut self,
        source_url: &str,
        scope_key: &str,
        options: &SessionOptions,
    ) -> StorageResult<CrawlSession> {
        if options.resume {
            if let Some(existing) = self.find_resumable(source_url, scope_key)? {
                tracing::info!(
                    "Reusing crawl session {} ({}) for {}",
                    existing.id,
                    existing.status,
                    source_url
                );
                return Ok(existing);
            }
        }

        self.create_session(source_url, scope_key, options)
    }

    fn create_session(
        &mut self,
        source_url: &str,
        scope_key: &str,
        options: &SessionOptions,
    ) -> StorageResult<CrawlSession> {
        let mut session = CrawlSession::new(source_url, scope_key, options);
        session.id = self.insert_session(&session)?;
        tracing::info!("Created crawl session {} for {}", session.id, source_url);
        Ok(session)
    }

    fn load(&self, session_id: i64) -> StorageResult<CrawlSession> {
        self.query_sessions("WHERE id = ?1", params![session_id])?
            .pop()
            .ok_or(StorageError::SessionNotFound(session_id))
    }

    fn find_resumable(
        &self,
        source_url: &str,
        scope_key: &str,
    ) -> StorageResult<Option<CrawlSession>> {
        let [a, b, c, d] = SessionStatus::resumable_states().map(|s| s.to_db_string());
        let mut sessions = self.query_sessions(
            "WHERE source_url = ?1 AND target_scope_key = ?2 AND status IN (?3, ?4, ?5, ?6)",
            params![source_url, scope_key, a, b, c, d],
        )?;

        if sessions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(sessions.remove(0)))
        }
    }

    fn list_sessions(&self, statuses: &[SessionStatus]) -> StorageResult<Vec<CrawlSession>> {
        if statuses.is_empty() {
            return self.query_sessions("", params![]);
        }

        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let names: Vec<&'static str> = statuses.iter().map(|s| s.to_db_string()).collect();
        let args: Vec<&dyn rusqlite::ToSql> =
            names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();

        self.query_sessions(&format!("WHERE status IN ({})", placeholders), &args)
    }

    // ===== Checkpointing =====

    fn persist_page_result(
        &mut self,
        session: &mut CrawlSession,
        outcome: PageOutcome,
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let counts = match &outcome {
            PageOutcome::Processed { records, .. } => {
                write_page(&tx, records, &session.target_scope_key, session.id)?
            }
            _ => RecordCounts::default(),
        };

        let mut draft = session.clone();
        outcome.apply(&mut draft, counts);
        Self::commit_on(tx, session, draft)
    }

    fn transition(&mut self, session: &mut CrawlSession, to: SessionStatus) -> StorageResult<()> {
        let mut draft = session.clone();
        draft.transition_to(to)?;
        self.commit(session, draft)?;

        tracing::debug!("Session {} is now {}", session.id, to);
        Ok(())
    }

    fn update_run_options(
        &mut self,
        session: &mut CrawlSession,
        chunk_size: u32,
        auto_continue: bool,
        inter_chunk_delay_secs: u64,
    ) -> StorageResult<()> {
        let mut draft = session.clone();
        draft.chunk_size = chunk_size;
        draft.auto_continue = auto_continue;
        draft.inter_chunk_delay_secs = inter_chunk_delay_secs;
        draft.updated_at = Some(Utc::now());
        self.commit(session, draft)
    }

    // ===== Stop requests =====

    fn request_cancel(&mut self, session_id: i64) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_sessions SET cancel_requested = 1 WHERE id = ?1",
            params![session_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn cancel_requested(&self, session_id: i64) -> StorageResult<bool> {
        self.conn
            .query_row(
                "SELECT cancel_requested FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |r| r.get::<_, bool>(0),
            )
            .optional()?
            .ok_or(StorageError::SessionNotFound(session_id))
    }

    fn request_pause(&mut self, session_id: i64) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE crawl_sessions SET pause_requested = 1 WHERE id = ?1",
            params![session_id],
        )?;
        if changed == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn pause_requested(&self, session_id: i64) -> StorageResult<bool> {
        self.conn
            .query_row(
                "SELECT pause_requested FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |r| r.get::<_, bool>(0),
            )
            .optional()?
            .ok_or(StorageError::SessionNotFound(session_id))
    }

    // ===== Single-writer lease =====

    fn acquire_lease(
        &mut self,
        session_id: i64,
        owner: &str,
        ttl: Duration,
    ) -> StorageResult<bool> {
        let now = Utc::now();
        let changed = self.conn.execute(
            "UPDATE crawl_sessions SET lease_owner = ?1, lease_expires_at = ?2
             WHERE id = ?3
               AND (lease_owner IS NULL OR lease_owner = ?1 OR lease_expires_at < ?4)",
            params![owner, to_db_time(now + ttl), session_id, to_db_time(now)],
        )?;

        if changed == 0 {
            // Distinguish "held by someone else" from "no such session"
            self.load(session_id)?;
        }
        Ok(changed == 1)
    }

    fn release_lease(&mut self, session_id: i64, owner: &str) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND lease_owner = ?2",
            params![session_id, owner],
        )?;
        Ok(())
    }

    fn lease_owner(&self, session_id: i64) -> StorageResult<Option<String>> {
        let lease: Option<(Option<String>, Option<String>)> = self
            .conn
            .query_row(
                "SELECT lease_owner, lease_expires_at FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let (owner, expires_at) = lease.ok_or(StorageError::SessionNotFound(session_id))?;
        match (owner, from_db_time_opt(expires_at)?) {
            (Some(owner), Some(expires_at)) if expires_at > Utc::now() => Ok(Some(owner)),
            _ => Ok(None),
        }
    }
}

/// Raw `crawl_sessions` row before child tables and timestamps are decoded
struct SessionRow {
    id: i64,
    source_url: String,
    target_scope_key: String,
    site_id: Option<String>,
    status: String,
    total_pages_discovered: i64,
    pages_processed: i64,
    current_page_index: i64,
    records_found: i64,
    records_saved: i64,
    records_new: i64,
    chunk_size: u32,
    max_pages: Option<u32>,
    resume: bool,
    auto_continue: bool,
    inter_chunk_delay_secs: i64,
    error_message: Option<String>,
    error_count: u32,
    last_error_at: Option<String>,
    created_at: String,
    started_at: Option<String>,
    updated_at: Option<String>,
    completed_at: Option<String>,
    lease_owner: Option<String>,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_url: row.get(1)?,
            target_scope_key: row.get(2)?,
            site_id: row.get(3)?,
            status: row.get(4)?,
            total_pages_discovered: row.get(5)?,
            pages_processed: row.get(6)?,
            current_page_index: row.get(7)?,
            records_found: row.get(8)?,
            records_saved: row.get(9)?,
            records_new: row.get(10)?,
            chunk_size: row.get(11)?,
            max_pages: row.get(12)?,
            resume: row.get(13)?,
            auto_continue: row.get(14)?,
            inter_chunk_delay_secs: row.get(15)?,
            error_message: row.get(16)?,
            error_count: row.get(17)?,
            last_error_at: row.get(18)?,
            created_at: row.get(19)?,
            started_at: row.get(20)?,
            updated_at: row.get(21)?,
            completed_at: row.get(22)?,
            lease_owner: row.get(23)?,
        })
    }
}
