use chrono::{DateTime, Utc};

/// Where the synchronizer currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Connecting,
    Bulk,
    Incremental,
    /// Waiting to reconnect after a failed cycle.
    Reconnecting,
    Stopped,
}

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
    /// Messages returned by the header listing.
    pub listed: usize,
    /// Messages whose full content was fetched.
    pub fetched: usize,
    /// Lines that could not be decoded.
    pub skipped: usize,
    /// Rows inserted or updated, including label associations.
    pub changed: usize,
    /// Label associations removed.
    pub pruned: u64,
}

impl PassReport {
    /// Total rows touched.
    pub fn net_changes(&self) -> u64 {
        self.changed as u64 + self.pruned
    }
}

/// Snapshot published after every state change.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Most recent error that aborted a connection.
    pub last_error: Option<String>,
    pub reconnects: u64,
    pub last_bulk: Option<PassReport>,
    pub last_pass_at: Option<DateTime<Utc>>,
}
