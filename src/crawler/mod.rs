//! Crawler module for fetching and walking paginated listings
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with backoff retry
//! - The chunked, checkpointing session executor

mod executor;
mod fetcher;

pub(crate) use executor::lock;
pub use executor::{ChunkReport, CrawlExecutor, StopReason};
pub use fetcher::{BackoffPolicy, FetchError, HttpFetcher, PageFetcher};
