//! Display contract: where refreshed pages are published.

use std::io::Write;

use crate::mail::types::MessageSummary;

use super::state::ViewWindow;

/// One refreshed page of the thread list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPageSnapshot {
    pub label: String,
    /// Zero-based page index.
    pub page: usize,
    pub page_count: usize,
    pub total_threads: usize,
    pub rows: Vec<MessageSummary>,
    pub window: Option<ViewWindow>,
}

/// Receives every refreshed page. Sinks live inside the spawned refresher
/// task and are borrowed across its awaits.
pub trait DisplaySink: Send + Sync + 'static {
    fn publish(&mut self, snapshot: &ThreadPageSnapshot);
}

/// Format one list row.
pub fn format_row(summary: &MessageSummary, date_format: &str) -> String {
    let uid = summary
        .uid
        .map(|u| u.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} {:>7} {:>8}  {:<24.24}  {}",
        summary.status_icons(),
        uid,
        summary.display_date(date_format),
        summary.from,
        summary.subject
    )
}

fn header_line(snapshot: &ThreadPageSnapshot) -> String {
    format!(
        "{} - page {}/{} ({} threads)",
        snapshot.label,
        snapshot.page + 1,
        snapshot.page_count,
        snapshot.total_threads
    )
}

/// Writes pages to the log. Used while running in the background.
pub struct LogSink {
    date_format: String,
    last: Option<ThreadPageSnapshot>,
}

impl LogSink {
    pub fn new(date_format: &str) -> Self {
        Self {
            date_format: date_format.to_string(),
            last: None,
        }
    }
}

impl DisplaySink for LogSink {
    fn publish(&mut self, snapshot: &ThreadPageSnapshot) {
        // Refreshes are frequent; only log pages that changed
        if self.last.as_ref() == Some(snapshot) {
            return;
        }
        tracing::info!("{}", header_line(snapshot));
        for row in &snapshot.rows {
            tracing::info!("{}", format_row(row, &self.date_format));
        }
        self.last = Some(snapshot.clone());
    }
}

/// Prints pages to standard output.
pub struct StdoutSink {
    date_format: String,
}

impl StdoutSink {
    pub fn new(date_format: &str) -> Self {
        Self {
            date_format: date_format.to_string(),
        }
    }
}

impl DisplaySink for StdoutSink {
    fn publish(&mut self, snapshot: &ThreadPageSnapshot) {
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", header_line(snapshot)).ok();
        if snapshot.rows.is_empty() {
            writeln!(out, "  (no messages)").ok();
        }
        for row in &snapshot.rows {
            writeln!(out, "{}", format_row(row, &self.date_format)).ok();
        }
    }
}
