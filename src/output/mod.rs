//! Output module for presenting session state
//!
//! This module handles:
//! - Human-readable session status and listings
//! - Executor run summaries
//! - JSON rendering for scripting

mod status;

pub use status::{
    print_chunk_report, print_session_list, print_status, render_chunk_report,
    render_session_list, render_status,
};

use serde::Serialize;

/// Renders any report as pretty-printed JSON
pub fn to_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}
