//! State module for tracking crawl session progress
//!
//! # Components
//!
//! - `SessionStatus`: lifecycle of a crawl session and its legal transitions
//! - `CrawlSession`: the checkpointed cursor, page sets and record counters
//! - `FailedPage`: audit entry for a page that failed to fetch or persist

mod session;
mod status;

pub use session::{
    CrawlSession, FailedPage, FailureKind, RecordCounts, SessionOptions, NEXT_URL_KEY,
};
pub use status::{InvalidTransition, SessionStatus};
