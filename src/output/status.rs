//! Plain-text rendering of session state
//!
//! Renderers build a `String` so they can be tested; the `print_*` wrappers
//! write to stdout.

use crate::controller::StatusReport;
use crate::crawler::ChunkReport;

/// Renders a full status report for one session
pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== Crawl Session {} ===\n\n", report.session_id));

    out.push_str("Overview:\n");
    out.push_str(&format!("  Source: {}\n", report.source_url));
    out.push_str(&format!("  Scope: {}\n", report.target_scope_key));
    out.push_str(&format!(
        "  Status: {}{}\n",
        report.status,
        if report.running { " (running)" } else { "" }
    ));
    out.push_str(&format!(
        "  Resumable: {}\n\n",
        if report.resumable { "yes" } else { "no" }
    ));

    out.push_str("Progress:\n");
    out.push_str(&format!(
        "  Pages: {} / {} processed ({:.1}%)\n",
        report.pages_processed, report.total_pages_discovered, report.progress_percent
    ));
    out.push_str(&format!("  Cursor: page {}\n", report.current_page_index));
    if let Some(next) = report.adapter_state.get(crate::state::NEXT_URL_KEY) {
        out.push_str(&format!("  Next page: {}\n", next));
    }
    out.push('\n');

    out.push_str("Records:\n");
    out.push_str(&format!("  Found: {}\n", report.records_found));
    out.push_str(&format!("  Saved: {}\n", report.records_saved));
    out.push_str(&format!("  New: {}\n", report.records_new));

    if !report.failed_pages.is_empty() {
        out.push_str(&format!(
            "\nFailed Pages ({} unresolved):\n",
            report.failed_pages_count
        ));
        for failure in &report.failed_pages {
            let state = match failure.resolved_at {
                Some(at) => format!("resolved {}", at.format("%Y-%m-%d %H:%M:%S")),
                None => "unresolved".to_string(),
            };
            out.push_str(&format!(
                "  - {} [{}, {} attempt(s), {}]: {}\n",
                failure.url, failure.kind, failure.attempt_count, state, failure.error
            ));
        }
    }

    if let Some(error) = &report.error_message {
        out.push_str(&format!("\nLast error: {}\n", error));
    }

    out
}

/// Renders a compact one-line-per-session listing
pub fn render_session_list(reports: &[StatusReport]) -> String {
    if reports.is_empty() {
        return "No resumable sessions.\n".to_string();
    }

    let mut out = format!("Resumable Sessions ({}):\n", reports.len());
    for report in reports {
        out.push_str(&format!(
            "  #{} {} [{}] {}/{} pages, {} records ({} new) - {}\n",
            report.session_id,
            report.status,
            report.target_scope_key,
            report.pages_processed,
            report.total_pages_discovered,
            report.records_saved,
            report.records_new,
            report.source_url
        ));
    }
    out
}

/// Renders the summary of one executor run
pub fn render_chunk_report(report: &ChunkReport) -> String {
    format!(
        "Session {} stopped ({}): status {}, {} page(s) fetched, {} skipped\n",
        report.session_id, report.stop, report.status, report.pages_fetched, report.pages_skipped
    )
}

pub fn print_status(report: &StatusReport) {
    print!("{}", render_status(report));
}

pub fn print_session_list(reports: &[StatusReport]) {
    print!("{}", render_session_list(reports));
}

pub fn print_chunk_report(report: &ChunkReport) {
    print!("{}", render_chunk_report(report));
}
