//! End-to-end crawls against a mock listing site
//!
//! These tests drive the executor with the real HTTP fetcher, the selector
//! extractor and SQLite storage, and check what ends up checkpointed.

use crate::common::*;
use chrono::Duration;
use sumi_harvest::crawler::StopReason;
use sumi_harvest::sink::RecordSink;
use sumi_harvest::state::{FailureKind, SessionOptions, SessionStatus};
use sumi_harvest::storage::CheckpointStore;
use sumi_harvest::HarvestError;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_chunked_crawl_completes_over_three_runs() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 5).await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(2, false));

    let first = fx.executor.run(session.id).await.unwrap();
    assert_eq!(first.stop, StopReason::ChunkLimit);
    assert_eq!(first.status, SessionStatus::Paused);
    assert_eq!(first.pages_fetched, 2);

    let stored = fx.load(session.id);
    assert_eq!(stored.pages_processed, 2);
    assert_eq!(stored.current_page_index, 2);
    assert_eq!(stored.next_url(), Some(page_url(&server, 3).as_str()));

    let second = fx.executor.run(session.id).await.unwrap();
    assert_eq!(second.stop, StopReason::ChunkLimit);
    assert_eq!(second.pages_fetched, 2);

    let third = fx.executor.run(session.id).await.unwrap();
    assert_eq!(third.stop, StopReason::NoNextPage);
    assert_eq!(third.status, SessionStatus::Completed);
    assert_eq!(third.pages_fetched, 1);

    let done = fx.load(session.id);
    assert_eq!(done.pages_processed, 5);
    assert_eq!(done.total_pages_discovered, 5);
    assert_eq!(done.records_found, 10);
    assert_eq!(done.records_new, 10);
    assert!(done.completed_at.is_some());
    assert!(done.next_url().is_none());
    assert_eq!(done.progress_percent(), 100.0);

    let sink = fx.executor.store().lock().unwrap();
    assert_eq!(sink.count_records(SCOPE).unwrap(), 10);
    let records = sink.records_for_session(session.id).unwrap();
    assert_eq!(records.len(), 10);
    assert_eq!(records[0].primary_text, "Question 1a");
    assert_eq!(records[0].fields["answer"], serde_json::json!("A"));
}

#[tokio::test]
async fn test_failed_page_pauses_and_resume_continues_there() {
    let server = MockServer::start().await;
    for n in [1, 2, 4, 5] {
        let questions = questions_for(n);
        let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .and(query_param("page", n.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(n, 5, &refs)))
            .expect(1)
            .mount(&server)
            .await;
    }
    // Page 3 is down for exactly one exhausted fetch (two attempts)
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_page(&server, 3, 5, &["Question 3a", "Question 3b"]).await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::FetchFailed);
    assert_eq!(report.status, SessionStatus::Paused);

    let paused = fx.load(session.id);
    assert_eq!(paused.pages_processed, 2);
    assert_eq!(paused.current_page_index, 2);
    assert_eq!(paused.failed_pages.len(), 1);
    assert_eq!(paused.failed_pages[0].url, page_url(&server, 3));
    assert_eq!(paused.failed_pages[0].attempt_count, 1);
    assert_eq!(paused.failed_pages[0].kind, FailureKind::Fetch);
    assert!(paused.error_message.is_some());

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::NoNextPage);
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.pages_fetched, 3);

    let done = fx.load(session.id);
    assert_eq!(done.pages_processed, 5);
    assert_eq!(done.records_new, 10);
    assert_eq!(done.unresolved_failures().count(), 0);
    assert!(done.failed_pages[0].resolved_at.is_some());
}

#[tokio::test]
async fn test_duplicate_records_are_linked_not_recreated() {
    let server = MockServer::start().await;
    mount_page(&server, 1, 2, &["Alpha", "Beta"]).await;
    mount_page(&server, 2, 2, &["  BETA  ", "Gamma"]).await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));
    fx.executor.run(session.id).await.unwrap();

    let done = fx.load(session.id);
    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(done.records_found, 4);
    assert_eq!(done.records_saved, 4);
    assert_eq!(done.records_new, 3);

    let sink = fx.executor.store().lock().unwrap();
    assert_eq!(sink.count_records(SCOPE).unwrap(), 3);
    assert_eq!(sink.records_for_session(session.id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_same_records_in_another_scope_are_new() {
    let server = MockServer::start().await;
    mount_page(&server, 1, 1, &["Alpha"]).await;

    let fx = Fixture::new();
    let first = fx.create(&page_url(&server, 1), options(25, true));
    fx.executor.run(first.id).await.unwrap();

    let second = fx
        .executor
        .store()
        .lock()
        .unwrap()
        .create_session(&page_url(&server, 1), "physics", &options(25, true))
        .unwrap();
    fx.executor.run(second.id).await.unwrap();

    assert_eq!(fx.load(first.id).records_new, 1);
    assert_eq!(fx.load(second.id).records_new, 1);

    let sink = fx.executor.store().lock().unwrap();
    assert_eq!(sink.count_records(SCOPE).unwrap(), 1);
    assert_eq!(sink.count_records("physics").unwrap(), 1);
}

#[tokio::test]
async fn test_pagination_loop_ends_session() {
    let server = MockServer::start().await;
    mount_page(&server, 1, 2, &["Alpha"]).await;
    let looping = format!(
        r#"<html><body><div class="mcq"><h3>Beta</h3></div><a rel="next" href="{}?page=1">Next</a></body></html>"#,
        LIST_PATH
    );
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(looping))
        .expect(1)
        .mount(&server)
        .await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));
    let report = fx.executor.run(session.id).await.unwrap();

    assert_eq!(report.stop, StopReason::LoopDetected);
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.pages_fetched, 2);

    let done = fx.load(session.id);
    assert_eq!(done.pages_processed, 2);
    assert_eq!(done.total_pages_discovered, 2);
}

#[tokio::test]
async fn test_completed_session_is_not_recrawled() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 2).await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));
    fx.executor.run(session.id).await.unwrap();
    let before = fx.load(session.id);

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::AlreadyTerminal);
    assert_eq!(report.pages_fetched, 0);

    let after = fx.load(session.id);
    assert_eq!(after.pages_processed, before.pages_processed);
    assert_eq!(after.records_saved, before.records_saved);
    assert_eq!(after.completed_at, before.completed_at);
}

#[tokio::test]
async fn test_page_limit_pauses_session() {
    let server = MockServer::start().await;
    for n in 1..=3 {
        let questions = questions_for(n);
        let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
        mount_page(&server, n, 3, &refs).await;
    }

    let fx = Fixture::new();
    let session = fx.create(
        &page_url(&server, 1),
        SessionOptions {
            max_pages: Some(2),
            ..options(25, true)
        },
    );

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::PageLimit);
    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(fx.load(session.id).pages_processed, 2);

    // The limit still holds on the next run
    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::PageLimit);
    assert_eq!(report.pages_fetched, 0);
}

#[tokio::test]
async fn test_cancel_requested_before_run_fetches_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));
    fx.executor
        .store()
        .lock()
        .unwrap()
        .request_cancel(session.id)
        .unwrap();

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.stop, StopReason::Cancelled);
    assert_eq!(report.status, SessionStatus::Cancelled);
    assert_eq!(fx.load(session.id).status, SessionStatus::Cancelled);
}

#[tokio::test]
async fn test_lease_keeps_second_executor_out() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 1).await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(25, true));
    let acquired = fx
        .executor
        .store()
        .lock()
        .unwrap()
        .acquire_lease(session.id, "other-worker", Duration::seconds(60))
        .unwrap();
    assert!(acquired);

    match fx.executor.run(session.id).await {
        Err(HarvestError::LeaseHeld { id, owner }) => {
            assert_eq!(id, session.id);
            assert_eq!(owner, "other-worker");
        }
        other => panic!("expected LeaseHeld, got {:?}", other),
    }
    assert_eq!(fx.load(session.id).status, SessionStatus::Pending);

    fx.executor
        .store()
        .lock()
        .unwrap()
        .release_lease(session.id, "other-worker")
        .unwrap();

    let report = fx.executor.run(session.id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_checkpoint_survives_reopening_database() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 3).await;

    let fx = Fixture::new();
    let session = fx.create(&page_url(&server, 1), options(1, false));
    fx.executor.run(session.id).await.unwrap();

    // A fresh connection sees exactly what the executor committed
    let reopened = sumi_harvest::storage::SqliteStorage::new(&fx.db_path()).unwrap();
    let stored = reopened.load(session.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Paused);
    assert_eq!(stored.pages_processed, 1);
    assert_eq!(stored.discovered_pages.len(), 2);
    assert!(reopened.lease_owner(session.id).unwrap().is_none());
}
