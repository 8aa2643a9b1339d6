//! Session controller driven from a parsed configuration

use crate::common::*;
use sumi_harvest::config::parse_config;
use sumi_harvest::controller::{EnqueueRequest, ResumeRequest, SessionController};
use sumi_harvest::crawler::StopReason;
use sumi_harvest::sink::RecordSink;
use sumi_harvest::state::SessionStatus;
use sumi_harvest::storage::SqliteStorage;
use sumi_harvest::HarvestError;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn controller(dir: &TempDir) -> SessionController<SqliteStorage> {
    let toml = format!(
        r#"
[fetcher]
max-attempts = 2
backoff-base-ms = 1
backoff-cap-ms = 5

[storage]
database-path = "{}"

[defaults]
chunk-size = 2
auto-continue = false

[[site]]
id = "mcq"
hosts = ["127.0.0.1"]
record-selector = "div.mcq"
primary-selector = "h3"

[[site.field]]
name = "answer"
selector = "span.answer"
"#,
        dir.path().join("harvest.db").display()
    );
    let config = parse_config(&toml).unwrap();
    SessionController::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_enqueue_wait_and_resume_to_completion() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 3).await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let response = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap();
    assert!(response.message.contains("enqueued"));

    let report = controller.wait(response.session_id).await.unwrap().unwrap();
    assert_eq!(report.stop, StopReason::ChunkLimit);
    assert_eq!(report.pages_fetched, 2);

    let status = controller.status(response.session_id).unwrap();
    assert_eq!(status.status, SessionStatus::Paused);
    assert_eq!(status.pages_processed, 2);
    assert_eq!(status.total_pages_discovered, 3);
    assert!(status.resumable);
    assert!(!status.running);

    // Enqueueing the same source and scope picks the paused session back up
    let again = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap();
    assert_eq!(again.session_id, response.session_id);
    assert!(again.message.contains("Resuming"));

    let report = controller.wait(again.session_id).await.unwrap().unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.pages_fetched, 1);

    let status = controller.status(again.session_id).unwrap();
    assert_eq!(status.records_new, 6);
    assert_eq!(status.progress_percent, 100.0);
    assert!(!status.resumable);

    assert!(controller.wait(again.session_id).await.unwrap().is_none());
    assert!(controller.list_resumable().unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_applies_new_chunk_size() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 4).await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let id = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap()
        .session_id;
    controller.wait(id).await.unwrap();

    let mut request = ResumeRequest::new(id);
    request.chunk_size = Some(10);
    controller.resume(request).unwrap();

    let report = controller.wait(id).await.unwrap().unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.pages_fetched, 2);

    let sink = controller.executor().store().lock().unwrap();
    assert_eq!(sink.count_records(SCOPE).unwrap(), 8);
}

#[tokio::test]
async fn test_fresh_enqueue_creates_new_session() {
    let server = MockServer::start().await;
    for n in 1..=3 {
        let questions = questions_for(n);
        let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
        mount_page(&server, n, 3, &refs).await;
    }

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let first = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap()
        .session_id;
    controller.wait(first).await.unwrap();

    let mut request = EnqueueRequest::new(page_url(&server, 1), SCOPE);
    request.resume = false;
    let second = controller.enqueue(request).unwrap().session_id;
    controller.wait(second).await.unwrap();

    assert_ne!(first, second);

    let listed: Vec<i64> = controller
        .list_resumable()
        .unwrap()
        .iter()
        .map(|r| r.session_id)
        .collect();
    assert_eq!(listed.len(), 2);
    assert!(listed.contains(&first) && listed.contains(&second));

    // Both sessions saw the same questions; the second only linked them
    assert_eq!(controller.status(second).unwrap().records_new, 0);
    assert_eq!(controller.status(second).unwrap().records_saved, 4);
}

#[tokio::test]
async fn test_cancel_idle_session() {
    let server = MockServer::start().await;
    for n in 1..=3 {
        let questions = questions_for(n);
        let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
        mount_page(&server, n, 3, &refs).await;
    }

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let id = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap()
        .session_id;
    controller.wait(id).await.unwrap();

    assert_eq!(controller.cancel(id).unwrap(), SessionStatus::Cancelled);

    let status = controller.status(id).unwrap();
    assert_eq!(status.status, SessionStatus::Cancelled);
    assert_eq!(status.pages_processed, 2);

    assert!(matches!(
        controller.resume(ResumeRequest::new(id)),
        Err(HarvestError::NotResumable {
            status: SessionStatus::Cancelled,
            ..
        })
    ));
    assert!(matches!(
        controller.cancel(id),
        Err(HarvestError::NotResumable { .. })
    ));
    assert!(matches!(
        controller.pause(id),
        Err(HarvestError::NotResumable { .. })
    ));

    // Page 3 was never fetched
    drop(controller);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_pause_running_session_keeps_it_resumable() {
    let server = MockServer::start().await;
    for n in 1..=4 {
        let questions = questions_for(n);
        let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .and(query_param("page", n.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(listing_html(n, 4, &refs))
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let mut request = EnqueueRequest::new(page_url(&server, 1), SCOPE);
    request.chunk_size = Some(10);
    request.auto_continue = Some(true);
    let id = controller.enqueue(request).unwrap().session_id;

    // Page 1 is still in flight
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(controller.status(id).unwrap().running);
    assert!(!controller.pause(id).unwrap().is_terminal());

    let report = controller.wait(id).await.unwrap().unwrap();
    assert_eq!(report.stop, StopReason::PauseRequested);
    assert_eq!(report.status, SessionStatus::Paused);
    assert_eq!(report.pages_fetched, 1);

    let status = controller.status(id).unwrap();
    assert!(status.resumable);
    assert_eq!(status.pages_processed, 1);

    // Enqueueing again continues the paused session instead of starting over
    let again = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap();
    assert_eq!(again.session_id, id);

    let report = controller.wait(id).await.unwrap().unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(controller.status(id).unwrap().records_new, 8);
}

#[tokio::test]
async fn test_pause_idle_session_leaves_next_run_alone() {
    let server = MockServer::start().await;
    mount_listing_once(&server, 3).await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let id = controller
        .enqueue(EnqueueRequest::new(page_url(&server, 1), SCOPE))
        .unwrap()
        .session_id;
    controller.wait(id).await.unwrap();

    assert_eq!(controller.pause(id).unwrap(), SessionStatus::Paused);

    controller.resume(ResumeRequest::new(id)).unwrap();
    let report = controller.wait(id).await.unwrap().unwrap();
    assert_eq!(report.stop, StopReason::NoNextPage);
    assert_eq!(report.pages_fetched, 1);
}

#[tokio::test]
async fn test_enqueue_rejects_unknown_site() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    let result = controller.enqueue(EnqueueRequest::new("https://unknown.example.org/list", SCOPE));
    assert!(matches!(result, Err(HarvestError::UnknownSite(_))));

    let mut request = EnqueueRequest::new(page_url(&server, 1), SCOPE);
    request.site_id = Some("nope".to_string());
    assert!(matches!(
        controller.enqueue(request),
        Err(HarvestError::UnknownSite(site)) if site == "nope"
    ));

    assert!(controller.list_resumable().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_of_missing_session() {
    let dir = TempDir::new().unwrap();
    let controller = controller(&dir);

    assert!(matches!(
        controller.status(999),
        Err(HarvestError::SessionNotFound(999))
    ));
    assert!(matches!(
        controller.resume(ResumeRequest::new(999)),
        Err(HarvestError::SessionNotFound(999))
    ));
}
