//! Crash and storage-failure behavior

use crate::common::*;
use chrono::Duration;
use rusqlite::Connection;
use sumi_harvest::crawler::StopReason;
use sumi_harvest::sink::RecordSink;
use sumi_harvest::state::{FailureKind, SessionStatus};
use sumi_harvest::storage::CheckpointStore;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Makes every checkpoint that advances `pages_processed` fail, like a disk
/// error between upserting a page's records and committing its checkpoint
fn break_progress_commits(fx: &Fixture) -> Connection {
    let conn = Connection::open(fx.db_path()).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_progress BEFORE UPDATE ON crawl_sessions
         WHEN NEW.pages_processed > OLD.pages_processed
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
    )
    .unwrap();
    conn
}

#[tokio::test]
async fn test_lost_checkpoint_refetches_page_without_duplicates() {
    let server = MockServer::start().await;
    // Page 1 is fetched again after its checkpoint write is lost
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(
            1,
            2,
            &["Alpha", "Beta"],
        )))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(2, 2, &["Gamma"])))
        .expect(1)
        .mount(&server)
        .await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));
    let saboteur = break_progress_commits(&fx);

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::PersistenceFailed);
    assert_eq!(report.status, SessionStatus::Paused);

    let paused = fx.load(session.id);
    assert_eq!(paused.pages_processed, 0);
    assert_eq!(paused.current_page_index, 0);
    assert_eq!(paused.records_saved, 0);
    assert_eq!(paused.failed_pages.len(), 1);
    assert_eq!(paused.failed_pages[0].kind, FailureKind::Persistence);

    // The page's records went down with its checkpoint
    {
        let store = fx.executor.store().lock().unwrap();
        assert_eq!(store.count_records(SCOPE).unwrap(), 0);
        assert!(store.records_for_session(session.id).unwrap().is_empty());
    }

    saboteur
        .execute_batch("DROP TRIGGER reject_progress;")
        .unwrap();
    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);

    let done = fx.load(session.id);
    assert_eq!(done.pages_processed, 2);
    assert_eq!(done.records_saved, 3);
    assert_eq!(done.records_new, 3);
    assert!(done.unresolved_failures().next().is_none());

    let store = fx.executor.store().lock().unwrap();
    assert_eq!(store.count_records(SCOPE).unwrap(), 3);
    assert_eq!(store.records_for_session(session.id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_interrupted_session_is_recovered() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 2).await;

    let fx = Fixture::new();
    let mut session = fx.create(&page_url(&server, 1), options(25, true));

    // An executor that died mid-run leaves the session in progress, lease expired
    {
        let mut store = fx.executor.store().lock().unwrap();
        store
            .transition(&mut session, SessionStatus::InProgress)
            .unwrap();
        assert!(store
            .acquire_lease(session.id, "dead-worker", Duration::seconds(-1))
            .unwrap());
        assert!(store.lease_owner(session.id).unwrap().is_none());
    }

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(fx.load(session.id).pages_processed, 2);
}

#[tokio::test]
async fn test_rejected_page_pauses_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::FetchFailed);

    let paused = fx.load(session.id);
    assert_eq!(paused.status, SessionStatus::Paused);
    assert_eq!(paused.failed_pages.len(), 1);
    assert!(paused.failed_pages[0].error.contains("404"));
}
