//! Periodic thread-list refresh.
//!
//! Every tick reads the current page from the cache, turns rows into
//! summaries, publishes them to the display sink and records the page's
//! UID window for the synchronizer's windowed prune. Navigation arrives
//! over a channel from [`ViewHandle`]. The refresher never writes the
//! cache and never talks to the server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{Cache, PageRow};
use crate::constants::{CHANNEL_CAPACITY, SUMMARY_CACHE_CAPACITY};
use crate::mail::parser::parse_headers;
use crate::mail::types::MessageSummary;

use super::sink::{DisplaySink, ThreadPageSnapshot};
use super::state::{ViewState, ViewWindow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    NextPage,
    PrevPage,
    SwitchLabel(String),
}

/// Navigation entry point for the display layer.
#[derive(Clone)]
pub struct ViewHandle {
    tx: mpsc::Sender<ViewCommand>,
}

impl ViewHandle {
    pub async fn next_page(&self) {
        self.tx.send(ViewCommand::NextPage).await.ok();
    }

    pub async fn prev_page(&self) {
        self.tx.send(ViewCommand::PrevPage).await.ok();
    }

    pub async fn switch_label(&self, label: &str) {
        self.tx
            .send(ViewCommand::SwitchLabel(label.to_string()))
            .await
            .ok();
    }
}

/// Parsed summary plus the row state it was built from.
#[derive(Clone)]
struct SummaryEntry {
    headers_only: bool,
    summary: MessageSummary,
}

pub struct ViewRefresher<D> {
    cache: Arc<Cache>,
    state: ViewState,
    sink: D,
    /// Per-session parsed summaries keyed by stable id
    summaries: moka::future::Cache<u64, SummaryEntry>,
    window_tx: watch::Sender<Option<ViewWindow>>,
    commands: mpsc::Receiver<ViewCommand>,
    interval: Duration,
    total_threads: usize,
}

impl<D: DisplaySink> ViewRefresher<D> {
    pub fn new(
        cache: Arc<Cache>,
        state: ViewState,
        sink: D,
        interval: Duration,
    ) -> (Self, ViewHandle, watch::Receiver<Option<ViewWindow>>) {
        let (tx, commands) = mpsc::channel(CHANNEL_CAPACITY);
        let (window_tx, window_rx) = watch::channel(None);
        let refresher = Self {
            cache,
            state,
            sink,
            summaries: moka::future::Cache::builder()
                .max_capacity(SUMMARY_CACHE_CAPACITY)
                .build(),
            window_tx,
            commands,
            interval,
            total_threads: 0,
        };
        (refresher, ViewHandle { tx }, window_rx)
    }

    pub fn spawn(self, running: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(self.run(running))
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub async fn run(mut self, running: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        while running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {}
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command),
                    None => commands_open = false,
                },
            }

            if let Err(e) = self.refresh().await {
                tracing::warn!("View refresh failed: {:#}", e);
            }
        }

        tracing::debug!("View refresher stopped");
    }

    pub fn apply(&mut self, command: ViewCommand) {
        match command {
            ViewCommand::NextPage => self.state.next_page(self.total_threads),
            ViewCommand::PrevPage => self.state.prev_page(),
            ViewCommand::SwitchLabel(label) => {
                if label != self.state.label {
                    self.state.switch_label(&label);
                    self.window_tx.send_replace(None);
                }
            }
        }
    }

    /// Read the current page, publish it and record its window.
    pub async fn refresh(&mut self) -> Result<ThreadPageSnapshot> {
        let label = self.state.label.clone();
        self.total_threads = self.cache.thread_count(&label).await?;

        // The label may have shrunk under the current page
        let page_count = self.state.page_count(self.total_threads);
        if self.state.page >= page_count {
            self.state.page = page_count - 1;
        }

        let rows = self
            .cache
            .threaded_page(&label, self.state.skip(), self.state.page_size)
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            summaries.push(self.summary(row).await);
        }

        let window = ViewWindow::from_uids(&label, rows.iter().filter_map(|r| r.uid));
        self.window_tx.send_replace(window.clone());

        let snapshot = ThreadPageSnapshot {
            label,
            page: self.state.page,
            page_count,
            total_threads: self.total_threads,
            rows: summaries,
            window,
        };
        self.sink.publish(&snapshot);
        Ok(snapshot)
    }

    /// Summary for a row, parsing content only when the cached entry is
    /// missing or stale.
    async fn summary(&self, row: &PageRow) -> MessageSummary {
        let message = &row.message;

        if let Some(entry) = self.summaries.get(&message.stable_id).await
            && entry.headers_only == message.headers_only
            && entry.summary.unread == message.unread
            && entry.summary.starred == message.starred
            && entry.summary.uid == row.uid
        {
            return entry.summary;
        }

        let parsed = message
            .content
            .as_deref()
            .and_then(parse_headers)
            .unwrap_or_default();

        let summary = MessageSummary {
            stable_id: message.stable_id,
            thread_id: message.thread_id,
            uid: row.uid,
            subject: parsed.subject,
            from: parsed.from,
            date: parsed.date,
            preview: parsed.preview,
            unread: message.unread,
            starred: message.starred,
        };

        self.summaries
            .insert(
                message.stable_id,
                SummaryEntry {
                    headers_only: message.headers_only,
                    summary: summary.clone(),
                },
            )
            .await;
        summary
    }
}
