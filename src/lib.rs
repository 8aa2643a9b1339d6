//! Sumi-Harvest: a resumable crawl-and-extract engine
//!
//! This crate walks paginated list pages of external websites, hands each page
//! to a pluggable extractor, deduplicates the resulting records into a scoped
//! store, and checkpoints its progress after every page so a crawl can stop and
//! restart without losing or duplicating work.

pub mod config;
pub mod controller;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod sink;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint storage error: {0}")]
    Storage(storage::StorageError),

    #[error("Record sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    InvalidTransition(#[from] state::InvalidTransition),

    #[error("Crawl session {0} not found")]
    SessionNotFound(i64),

    #[error("Crawl session {id} cannot be resumed (status: {status})")]
    NotResumable {
        id: i64,
        status: state::SessionStatus,
    },

    #[error("Crawl session {id} is leased by another executor ({owner})")]
    LeaseHeld { id: i64, owner: String },

    #[error("No extractor registered for {0}")]
    UnknownSite(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<storage::StorageError> for HarvestError {
    fn from(err: storage::StorageError) -> Self {
        match err {
            // A commit fenced out by another holder surfaces like a refused lease
            storage::StorageError::LeaseLost { id, holder } => Self::LeaseHeld {
                id,
                owner: holder.unwrap_or_default(),
            },
            other => Self::Storage(other),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid CSS selector for site '{site}': {selector}")]
    InvalidSelector { site: String, selector: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use controller::SessionController;
pub use crawler::{ChunkReport, CrawlExecutor, StopReason};
pub use extract::{ExtractedRecord, Extractor, ExtractorRegistry};
pub use state::{CrawlSession, SessionStatus};
pub use crate::url::{extract_domain, normalize_url};
