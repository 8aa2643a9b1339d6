//! Database schema definitions
//!
//! Checkpoint tables and record sink tables share one SQLite file; every
//! connection initializes the full schema idempotently.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per resumable crawl job
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL,
    target_scope_key TEXT NOT NULL,
    site_id TEXT,
    status TEXT NOT NULL,
    total_pages_discovered INTEGER NOT NULL DEFAULT 0,
    pages_processed INTEGER NOT NULL DEFAULT 0,
    current_page_index INTEGER NOT NULL DEFAULT 0,
    records_found INTEGER NOT NULL DEFAULT 0,
    records_saved INTEGER NOT NULL DEFAULT 0,
    records_new INTEGER NOT NULL DEFAULT 0,
    chunk_size INTEGER NOT NULL,
    max_pages INTEGER,
    resume INTEGER NOT NULL,
    auto_continue INTEGER NOT NULL,
    inter_chunk_delay_secs INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error_at TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    pause_requested INTEGER NOT NULL DEFAULT 0,
    lease_owner TEXT,
    lease_expires_at TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    updated_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_resume
    ON crawl_sessions(source_url, target_scope_key, status);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON crawl_sessions(status);

-- Ordered discovered pages; processed_at marks membership in processed_pages
CREATE TABLE IF NOT EXISTS session_pages (
    session_id INTEGER NOT NULL REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    processed_at TEXT,
    PRIMARY KEY (session_id, position),
    UNIQUE (session_id, url)
);

-- Failure audit history, one row per failing URL
CREATE TABLE IF NOT EXISTS failed_pages (
    session_id INTEGER NOT NULL REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    error TEXT NOT NULL,
    kind TEXT NOT NULL,
    failed_at TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 1,
    resolved_at TEXT,
    PRIMARY KEY (session_id, url)
);

-- Opaque extractor cursor (next_url and friends)
CREATE TABLE IF NOT EXISTS adapter_state (
    session_id INTEGER NOT NULL REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (session_id, key)
);

-- Deduplicated records, unique per scope and fingerprint
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope_key TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    primary_text TEXT NOT NULL,
    fields TEXT NOT NULL,
    source_url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (scope_key, fingerprint)
);

-- Which sessions produced (or re-encountered) which records
CREATE TABLE IF NOT EXISTS session_records (
    session_id INTEGER NOT NULL,
    record_id INTEGER NOT NULL REFERENCES records(id),
    linked_at TEXT NOT NULL,
    PRIMARY KEY (session_id, record_id)
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
