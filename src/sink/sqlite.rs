use crate::extract::ExtractedRecord;
use crate::sink::{fingerprint, RecordSink, SinkError, SinkResult, StoredRecord, UpsertOutcome};
use crate::state::RecordCounts;
use crate::storage::{from_db_time, to_db_time, SqliteStorage};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Existing-wins upsert on an open connection or transaction
fn upsert_on(
    conn: &Connection,
    record: &ExtractedRecord,
    scope_key: &str,
    session_id: i64,
) -> SinkResult<UpsertOutcome> {
    if record.primary_text.trim().is_empty() {
        return Err(SinkError::InvalidRecord(format!(
            "empty primary text from {}",
            record.source_url
        )));
    }

    let fp = fingerprint(scope_key, &record.primary_text);
    let fields = serde_json::to_string(&record.fields)?;
    let now = to_db_time(Utc::now());

    let inserted = conn.execute(
        "INSERT INTO records (scope_key, fingerprint, primary_text, fields, source_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(scope_key, fingerprint) DO NOTHING",
        params![scope_key, fp, record.primary_text.trim(), fields, record.source_url, now],
    )?;

    let outcome = if inserted == 1 {
        UpsertOutcome {
            created: true,
            id: conn.last_insert_rowid(),
        }
    } else {
        let id: i64 = conn
            .query_row(
                "SELECT id FROM records WHERE scope_key = ?1 AND fingerprint = ?2",
                params![scope_key, fp],
                |r| r.get(0),
            )
            .optional()?
            .ok_or_else(|| SinkError::Corrupt(format!("record {} vanished after conflict", fp)))?;
        UpsertOutcome { created: false, id }
    };

    conn.execute(
        "INSERT OR IGNORE INTO session_records (session_id, record_id, linked_at)
         VALUES (?1, ?2, ?3)",
        params![session_id, outcome.id, now],
    )?;

    Ok(outcome)
}

/// Upserts one page of records on the caller's transaction and tallies them
///
/// The caller owns the transaction: nothing written here is visible until it
/// commits, and dropping it discards the whole page.
pub(crate) fn write_page(
    conn: &Connection,
    records: &[ExtractedRecord],
    scope_key: &str,
    session_id: i64,
) -> SinkResult<RecordCounts> {
    let outcomes = records
        .iter()
        .map(|record| upsert_on(conn, record, scope_key, session_id))
        .collect::<SinkResult<Vec<_>>>()?;

    Ok(RecordCounts {
        found: records.len() as u64,
        saved: outcomes.len() as u64,
        new: outcomes.iter().filter(|o| o.created).count() as u64,
    })
}

impl RecordSink for SqliteStorage {
    fn upsert(
        &mut self,
        record: &ExtractedRecord,
        scope_key: &str,
        session_id: i64,
    ) -> SinkResult<UpsertOutcome> {
        let tx = self.connection_mut().transaction()?;
        let outcome = upsert_on(&tx, record, scope_key, session_id)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn count_records(&self, scope_key: &str) -> SinkResult<u64> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM records WHERE scope_key = ?1",
            params![scope_key],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    }

    fn records_for_session(&self, session_id: i64) -> SinkResult<Vec<StoredRecord>> {
        let mut stmt = self.connection().prepare(
            "SELECT r.id, r.scope_key, r.fingerprint, r.primary_text, r.fields, r.source_url, r.created_at
             FROM session_records sr JOIN records r ON r.id = sr.record_id
             WHERE sr.session_id = ?1
             ORDER BY sr.rowid",
        )?;

        let rows = stmt
            .query_map(params![session_id], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, scope_key, fingerprint, primary_text, fields, source_url, created_at)| {
                    Ok(StoredRecord {
                        id,
                        scope_key,
                        fingerprint,
                        primary_text,
                        fields: serde_json::from_str(&fields)?,
                        source_url,
                        created_at: from_db_time(&created_at)
                            .map_err(|e| SinkError::Corrupt(e.to_string()))?,
                    })
                },
            )
            .collect()
    }
}
