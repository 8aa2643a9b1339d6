//! Shared fixtures: a mock paginated listing site and an executor wired to it

use std::sync::{Arc, Mutex};
use sumi_harvest::config::{FetcherConfig, FieldConfig, SiteConfig};
use sumi_harvest::crawler::{CrawlExecutor, HttpFetcher};
use sumi_harvest::extract::ExtractorRegistry;
use sumi_harvest::state::{CrawlSession, SessionOptions};
use sumi_harvest::storage::{CheckpointStore, SqliteStorage};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const LIST_PATH: &str = "/mcqs/gk";
pub const SCOPE: &str = "gk";

/// A site definition that matches the mock server's host
pub fn mcq_site() -> SiteConfig {
    SiteConfig {
        id: "mcq".to_string(),
        hosts: vec!["127.0.0.1".to_string()],
        record_selector: "div.mcq".to_string(),
        primary_selector: "h3".to_string(),
        next_selector: r#"a[rel~="next"]"#.to_string(),
        require_records: false,
        fields: vec![FieldConfig {
            name: "answer".to_string(),
            selector: "span.answer".to_string(),
            attr: None,
            multiple: false,
        }],
    }
}

/// Retries quickly so exhausted fetches don't slow the suite down
pub fn fast_fetcher_config() -> FetcherConfig {
    FetcherConfig {
        max_attempts: 2,
        backoff_base_ms: 1,
        backoff_cap_ms: 5,
        ..FetcherConfig::default()
    }
}

pub fn page_url(server: &MockServer, n: u32) -> String {
    format!("{}{}?page={}", server.uri(), LIST_PATH, n)
}

/// HTML for listing page `n` of `total`, with one record per question
pub fn listing_html(n: u32, total: u32, questions: &[&str]) -> String {
    let mut html = String::from("<html><body>");
    for question in questions {
        html.push_str(&format!(
            r#"<div class="mcq"><h3>{}</h3><span class="answer">A</span></div>"#,
            question
        ));
    }
    if n < total {
        html.push_str(&format!(
            r#"<a rel="next" href="{}?page={}">Next</a>"#,
            LIST_PATH,
            n + 1
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Default questions for page `n`: two unique per page
pub fn questions_for(n: u32) -> Vec<String> {
    vec![format!("Question {}a", n), format!("Question {}b", n)]
}

/// Mounts page `n` of a `total`-page listing
pub async fn mount_page(server: &MockServer, n: u32, total: u32, questions: &[&str]) {
    Mock::given(method("GET"))
        .and(path(LIST_PATH))
        .and(query_param("page", n.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(n, total, questions)))
        .mount(server)
        .await;
}

/// Mounts a `total`-page listing where every page serves exactly once
pub async fn mount_listing_once(server: &MockServer, total: u32) {
    for n in 1..=total {
        let questions = questions_for(n);
        let refs: Vec<&str> = questions.iter().map(String::as_str).collect();
        Mock::given(method("GET"))
            .and(path(LIST_PATH))
            .and(query_param("page", n.to_string()))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(listing_html(n, total, &refs)),
            )
            .expect(1)
            .mount(server)
            .await;
    }
}

/// Executor over an on-disk database in a temp dir
pub struct Fixture {
    pub dir: TempDir,
    pub executor: CrawlExecutor<SqliteStorage>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_fetcher(fast_fetcher_config())
    }

    pub fn with_fetcher(config: FetcherConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("harvest.db");
        let store = SqliteStorage::new(&db_path).unwrap();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let extractors = ExtractorRegistry::from_sites(&[mcq_site()]).unwrap();

        let executor = CrawlExecutor::new(
            Arc::new(Mutex::new(store)),
            Arc::new(fetcher),
            Arc::new(extractors),
        );

        Self { dir, executor }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("harvest.db")
    }

    pub fn create(&self, source_url: &str, options: SessionOptions) -> CrawlSession {
        self.executor
            .store()
            .lock()
            .unwrap()
            .create_session(source_url, SCOPE, &options)
            .unwrap()
    }

    pub fn load(&self, session_id: i64) -> CrawlSession {
        self.executor.store().lock().unwrap().load(session_id).unwrap()
    }
}

pub fn options(chunk_size: u32, auto_continue: bool) -> SessionOptions {
    SessionOptions {
        chunk_size,
        auto_continue,
        ..SessionOptions::default()
    }
}
