//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the executor, including:
//! - Building HTTP clients with the configured user agent and timeouts
//! - GET requests with response compression disabled
//! - Exponential backoff retry for transient failures
//! - Error classification (transient, rejected, exhausted)

use crate::config::FetcherConfig;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Page-fatal fetch errors
///
/// Transient failures never escape the fetcher; they are retried until the
/// attempt budget runs out and then surface as [`FetchError::Exhausted`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{url} rejected with HTTP {status}")]
    Rejected { url: String, status: u16 },

    #[error("Cannot fetch {url}: {reason}")]
    Invalid { url: String, reason: String },
}

impl FetchError {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Rejected { .. } | Self::Invalid { .. } => 1,
        }
    }
}

/// Source of page HTML
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches a page body, retrying transient failures internally
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// Retry schedule: `delay(n) = min(cap, base * 2^(n-1))`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1500),
            cap: Duration::from_secs(20),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }
}

/// Outcome of a single HTTP attempt
enum Attempt {
    Done(String),
    Transient(String),
    Fatal(FetchError),
}

/// Returns true for statuses worth retrying
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Returns true for network errors worth retrying
///
/// Timeouts, refused or reset connections and truncated bodies are transient;
/// redirect loops and malformed requests are not.
fn is_transient_error(err: &reqwest::Error) -> bool {
    !(err.is_builder() || err.is_redirect())
}

/// reqwest-backed [`PageFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    /// Builds a fetcher from configuration
    ///
    /// The client carries no decompression support and asks for identity
    /// encoding; some list sites truncate compressed chunked responses.
    pub fn new(config: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT_ENCODING,
            header::HeaderValue::from_static("identity"),
        );

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            backoff: BackoffPolicy::from_config(config),
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    async fn attempt(&self, url: &Url) -> Attempt {
        let response = match self.client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) if is_transient_error(&e) => return Attempt::Transient(e.to_string()),
            Err(e) => {
                return Attempt::Fatal(FetchError::Invalid {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let status = response.status();
        if is_transient_status(status) {
            return Attempt::Transient(format!("HTTP {}", status.as_u16()));
        }
        if !status.is_success() {
            return Attempt::Fatal(FetchError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // A body that breaks off mid-read is retried like a dropped connection
        match response.text().await {
            Ok(body) => Attempt::Done(body),
            Err(e) => Attempt::Transient(format!("incomplete body: {}", e)),
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let max_attempts = self.backoff.max_attempts;
        let mut attempt = 1;

        loop {
            match self.attempt(url).await {
                Attempt::Done(body) => {
                    tracing::debug!("Fetched {} ({} bytes, attempt {})", url, body.len(), attempt);
                    return Ok(body);
                }
                Attempt::Fatal(err) => return Err(err),
                Attempt::Transient(error) if attempt >= max_attempts => {
                    return Err(FetchError::Exhausted {
                        url: url.to_string(),
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Attempt::Transient(error) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        "Attempt {}/{} for {} failed ({}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        url,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
