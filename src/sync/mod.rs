//! Background synchronizer: keeps the cache in agreement with one label.
//!
//! Each connection runs a bulk pass over the label and then loops on
//! bounded IDLE waits, rescanning after every wake. Any error drops the
//! connection and the next cycle starts over with a bulk pass. Retries
//! are unbounded; the last error is published in [`SyncStatus`].

mod reconcile;
mod status;

pub use status::{PassReport, SyncPhase, SyncStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::config::SyncConfig;
use crate::mail::session::{Activity, Criteria, MailboxSession, SessionFactory};
use crate::mail::uid_range::{self, UidToken};
use crate::retry::{RetryConfig, with_retry};
use crate::view::ViewWindow;

use reconcile::{Reconciler, decode};

pub struct Synchronizer<F: SessionFactory> {
    factory: F,
    cache: Arc<Cache>,
    config: SyncConfig,
    retry: RetryConfig,
    window: watch::Receiver<Option<ViewWindow>>,
    running: Arc<AtomicBool>,
    status: watch::Sender<SyncStatus>,
}

impl<F: SessionFactory> Synchronizer<F> {
    pub fn new(
        factory: F,
        cache: Arc<Cache>,
        config: SyncConfig,
        window: watch::Receiver<Option<ViewWindow>>,
        running: Arc<AtomicBool>,
    ) -> (Self, watch::Receiver<SyncStatus>) {
        let (status, status_rx) = watch::channel(SyncStatus::default());
        let sync = Self {
            factory,
            cache,
            config,
            retry: RetryConfig::default(),
            window,
            running,
            status,
        };
        (sync, status_rx)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler {
            cache: &self.cache,
            retry: &self.retry,
            label: &self.config.label,
        }
    }

    /// Reconnect loop. Returns once the running flag is cleared.
    pub async fn run(self) {
        tracing::info!("Synchronizer started for {}", self.config.label);

        while self.is_running() {
            match self.run_connection().await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!("Sync cycle failed, reconnecting: {:#}", e);
                    self.status.send_modify(|s| {
                        s.phase = SyncPhase::Reconnecting;
                        s.last_error = Some(format!("{:#}", e));
                        s.reconnects += 1;
                    });

                    let delay = self.config.reconnect_delay();
                    if !delay.is_zero() && self.is_running() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.set_phase(SyncPhase::Stopped);
        tracing::info!("Synchronizer stopped");
    }

    /// One connection: bulk pass, then incremental passes until stopped.
    async fn run_connection(&self) -> Result<()> {
        self.set_phase(SyncPhase::Connecting);
        let mut session = self
            .factory
            .connect()
            .await
            .context("Failed to open mailbox session")?;

        let result = self.drive(&mut session).await;
        session.logout().await.ok();
        result
    }

    async fn drive(&self, session: &mut F::Session) -> Result<()> {
        self.set_phase(SyncPhase::Bulk);
        let report = self.bulk_sync(session).await?;
        self.status.send_modify(|s| {
            s.last_bulk = Some(report);
            s.last_pass_at = Some(chrono::Utc::now());
        });

        if !self.is_running() {
            return Ok(());
        }

        self.set_phase(SyncPhase::Incremental);
        while self.is_running() {
            let activity = session
                .wait_for_activity(&self.config.label, self.config.idle_timeout())
                .await?;
            if !self.is_running() {
                break;
            }

            // A timeout rescans too, so merged or missed notifications
            // are still picked up.
            if activity == Activity::NewData {
                tracing::debug!("New activity on {}", self.config.label);
            }
            self.incremental_sync(session).await?;
            self.status
                .send_modify(|s| s.last_pass_at = Some(chrono::Utc::now()));
        }

        Ok(())
    }

    /// Full reconciliation of the label. Cached messages only get their
    /// flags and labels refreshed; bodies are fetched for the rest.
    pub(crate) async fn bulk_sync<S: MailboxSession>(&self, session: &mut S) -> Result<PassReport> {
        let label = self.config.label.as_str();
        let reconciler = self.reconciler();
        let mut report = PassReport::default();

        with_retry(&self.retry, || self.cache.upsert_label(label)).await?;

        let listed = session
            .list_headers(label, &Criteria::All, self.config.fetch_limit)
            .await?;
        report.listed = listed.len();

        let mut observed = Vec::with_capacity(listed.len());
        let mut uncached = Vec::new();
        for message in &listed {
            observed.push(message.uid);
            if reconciler
                .observe(message, self.config.header_stubs, &mut report)
                .await?
            {
                uncached.push(message.uid);
            }
        }
        observed.sort_unstable();
        uncached.sort_unstable();

        self.fetch_bodies(session, &uncached, &mut report).await?;

        report.pruned += with_retry(&self.retry, || {
            self.cache.prune_label_associations(label, &observed)
        })
        .await?;

        tracing::info!(
            "Bulk sync of {}: {} listed, {} fetched, {} skipped, {} changed, {} pruned",
            label,
            report.listed,
            report.fetched,
            report.skipped,
            report.changed,
            report.pruned
        );
        Ok(report)
    }

    /// Rescan after a wake: refresh flags, sweep the visible window, and
    /// pull in unseen arrivals that are not cached yet.
    pub(crate) async fn incremental_sync<S: MailboxSession>(
        &self,
        session: &mut S,
    ) -> Result<PassReport> {
        let label = self.config.label.as_str();
        let reconciler = self.reconciler();
        let mut report = PassReport::default();

        let listed = session
            .list_headers(label, &Criteria::All, self.config.fetch_limit)
            .await?;
        report.listed = listed.len();

        let mut observed: Vec<u32> = Vec::with_capacity(listed.len());
        for message in &listed {
            observed.push(message.uid);
            reconciler
                .observe(message, self.config.header_stubs, &mut report)
                .await?;
        }
        observed.sort_unstable();

        let window = self.window.borrow().clone();
        if let Some(window) = window.filter(|w| w.label == label) {
            // A capped listing says nothing about UIDs below its oldest entry
            let min_uid = match observed.first() {
                Some(&oldest) if listed.len() >= self.config.fetch_limit => {
                    window.min_uid.max(oldest)
                }
                _ => window.min_uid,
            };
            if min_uid <= window.max_uid {
                report.pruned += with_retry(&self.retry, || {
                    self.cache
                        .prune_in_window(label, min_uid, window.max_uid, &observed)
                })
                .await?;
            }
        }

        let unseen = session
            .list_headers(label, &Criteria::Unseen, self.config.fetch_limit)
            .await?;
        let mut missing = Vec::new();
        for message in &unseen {
            if let Some((_, stable_id)) = decode(message)
                && reconciler.needs_body(stable_id).await?
            {
                missing.push(message.uid);
            }
        }

        if !missing.is_empty() {
            missing.sort_unstable();
            self.fetch_bodies(session, &missing, &mut report).await?;
        }

        if report.net_changes() > 0 {
            tracing::debug!(
                "Incremental sync of {}: {} changed, {} fetched, {} pruned",
                label,
                report.changed,
                report.fetched,
                report.pruned
            );
        }
        Ok(report)
    }

    /// Fetch full content for exactly `wanted`.
    ///
    /// The UIDs go out as a plain list. The session range-compresses them
    /// against the label's complete UID list, which a capped listing does
    /// not have.
    async fn fetch_bodies<S: MailboxSession>(
        &self,
        session: &mut S,
        wanted: &[u32],
        report: &mut PassReport,
    ) -> Result<()> {
        if wanted.is_empty() {
            return Ok(());
        }

        let tokens: Vec<UidToken> = wanted.iter().copied().map(UidToken::Single).collect();
        let criteria = Criteria::Uids(uid_range::serialize(&tokens));
        tracing::debug!("Fetching {} bodies from {}", wanted.len(), self.config.label);

        let fetched = session
            .fetch_full(&self.config.label, &criteria, wanted.len())
            .await?;

        let reconciler = self.reconciler();
        for message in &fetched {
            reconciler.store_full(message, report).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NewMessage, WriteMode};
    use crate::mail::fake::{FakeFactory, FakeMailbox, FakeMessage};
    use crate::mail::types::MessageFlags;

    const INBOX: &str = "INBOX";

    fn config() -> SyncConfig {
        SyncConfig {
            label: INBOX.to_string(),
            ..SyncConfig::default()
        }
    }

    fn mailbox(messages: &[FakeMessage]) -> FakeMailbox {
        let mut mailbox = FakeMailbox::default();
        for message in messages {
            mailbox.insert(INBOX, message.clone());
        }
        mailbox
    }

    struct Harness {
        sync: Synchronizer<FakeFactory>,
        factory: FakeFactory,
        cache: Arc<Cache>,
        window: watch::Sender<Option<ViewWindow>>,
        running: Arc<AtomicBool>,
        status: watch::Receiver<SyncStatus>,
    }

    async fn harness(mailbox: FakeMailbox, config: SyncConfig) -> Harness {
        let factory = FakeFactory::new(mailbox);
        let cache = Arc::new(Cache::open_in_memory().await.unwrap());
        let (window, window_rx) = watch::channel(None);
        let running = Arc::new(AtomicBool::new(true));
        factory.mailbox.lock().unwrap().running = Some(running.clone());
        let (sync, status) = Synchronizer::new(
            factory.clone(),
            cache.clone(),
            config,
            window_rx,
            running.clone(),
        );
        Harness {
            sync,
            factory,
            cache,
            window,
            running,
            status,
        }
    }

    async fn page_ids(cache: &Cache, label: &str) -> Vec<u64> {
        cache
            .threaded_page(label, 0, 50)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.message.stable_id)
            .collect()
    }

    #[tokio::test]
    async fn test_bulk_fetches_bodies_and_links() {
        let h = harness(
            mailbox(&[
                FakeMessage::new(1, 100, 100, "First"),
                FakeMessage::new(2, 200, 100, "Reply"),
                FakeMessage::new(5, 500, 500, "Other"),
            ]),
            config(),
        )
        .await;
        let mut session = h.factory.connect().await.unwrap();

        let report = h.sync.bulk_sync(&mut session).await.unwrap();
        assert_eq!(report.listed, 3);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.skipped, 0);

        // One full fetch covering the whole run
        assert_eq!(h.factory.mailbox.lock().unwrap().full_fetches, vec![vec![5, 2, 1]]);

        let message = h.cache.get_message(200).await.unwrap().unwrap();
        assert!(!message.needs_body());
        assert_eq!(message.thread_id, Some(100));
        assert_eq!(page_ids(&h.cache, INBOX).await, vec![500, 200]);
    }

    #[tokio::test]
    async fn test_bulk_is_idempotent() {
        let h = harness(
            mailbox(&[
                FakeMessage::new(1, 100, 100, "First"),
                FakeMessage::new(3, 300, 300, "Second"),
            ]),
            config(),
        )
        .await;
        let mut session = h.factory.connect().await.unwrap();

        let first = h.sync.bulk_sync(&mut session).await.unwrap();
        assert!(first.net_changes() > 0);

        let second = h.sync.bulk_sync(&mut session).await.unwrap();
        assert_eq!(second.net_changes(), 0);
        assert_eq!(second.fetched, 0);
        assert_eq!(h.factory.mailbox.lock().unwrap().full_fetches.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_updates_flags_without_refetch() {
        let h = harness(mailbox(&[FakeMessage::new(1, 100, 100, "First")]), config()).await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        h.factory
            .mailbox
            .lock()
            .unwrap()
            .message_mut(INBOX, 1)
            .unwrap()
            .flags = MessageFlags::SEEN | MessageFlags::FLAGGED;

        let report = h.sync.bulk_sync(&mut session).await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.fetched, 0);

        let message = h.cache.get_message(100).await.unwrap().unwrap();
        assert!(!message.unread);
        assert!(message.starred);
    }

    #[tokio::test]
    async fn test_bulk_prunes_removed_label() {
        let h = harness(
            mailbox(&[
                FakeMessage::new(1, 100, 100, "Stays"),
                FakeMessage::new(2, 200, 200, "Archived"),
            ]),
            config(),
        )
        .await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();
        h.cache.link_label(200, "Work", Some(9)).await.unwrap();

        h.factory.mailbox.lock().unwrap().remove(INBOX, 2);
        let report = h.sync.bulk_sync(&mut session).await.unwrap();
        assert_eq!(report.pruned, 1);

        assert_eq!(page_ids(&h.cache, INBOX).await, vec![100]);
        assert!(h.cache.message_exists(200).await.unwrap());
        assert_eq!(page_ids(&h.cache, "Work").await, vec![200]);
    }

    #[tokio::test]
    async fn test_bulk_skips_undecodable_line() {
        let mut remote = mailbox(&[
            FakeMessage::new(1, 100, 100, "Good"),
            FakeMessage::new(2, 200, 200, "Broken"),
        ]);
        remote.corrupt = vec![2];
        let h = harness(remote, config()).await;
        let mut session = h.factory.connect().await.unwrap();

        let report = h.sync.bulk_sync(&mut session).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(h.cache.message_exists(100).await.unwrap());
        assert!(!h.cache.message_exists(200).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_labels_follow_label_set() {
        let mut message = FakeMessage::new(1, 100, 100, "Tagged");
        message.labels = vec!["\\Inbox".to_string(), "Work".to_string()];
        let h = harness(mailbox(&[message]), config()).await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        assert_eq!(
            h.cache.labels_for_message(100).await.unwrap(),
            vec![(INBOX.to_string(), Some(1)), ("Work".to_string(), None)]
        );

        h.factory
            .mailbox
            .lock()
            .unwrap()
            .message_mut(INBOX, 1)
            .unwrap()
            .labels = vec!["\\Inbox".to_string()];
        h.sync.bulk_sync(&mut session).await.unwrap();

        assert_eq!(
            h.cache.labels_for_message(100).await.unwrap(),
            vec![(INBOX.to_string(), Some(1))]
        );
    }

    #[tokio::test]
    async fn test_system_label_target_not_duplicated() {
        const STARRED: &str = "[Gmail]/Starred";
        let mut message = FakeMessage::new(3, 300, 300, "Starred one");
        message.labels = vec!["\\Inbox".to_string(), "\\Starred".to_string()];
        let mut remote = FakeMailbox::default();
        remote.insert(STARRED, message);
        let config = SyncConfig {
            label: STARRED.to_string(),
            ..SyncConfig::default()
        };
        let h = harness(remote, config).await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        assert_eq!(
            h.cache.labels_for_message(300).await.unwrap(),
            vec![("Inbox".to_string(), None), (STARRED.to_string(), Some(3))]
        );
    }

    #[tokio::test]
    async fn test_header_stubs_policy() {
        let remote = || mailbox(&[FakeMessage::new(1, 100, 100, "Stub")]);
        let mut stubs = config();
        stubs.header_stubs = true;

        // Without stubs, discovery alone creates nothing
        let h = harness(remote(), config()).await;
        let mut session = h.factory.connect().await.unwrap();
        let mut report = PassReport::default();
        let listed = session.list_headers(INBOX, &Criteria::All, 10).await.unwrap();
        let needs_body = h
            .sync
            .reconciler()
            .observe(&listed[0], false, &mut report)
            .await
            .unwrap();
        assert!(needs_body);
        assert!(!h.cache.message_exists(100).await.unwrap());

        // With stubs, the row exists header-only until the body arrives
        let h = harness(remote(), stubs).await;
        let mut session = h.factory.connect().await.unwrap();
        let listed = session.list_headers(INBOX, &Criteria::All, 10).await.unwrap();
        h.sync
            .reconciler()
            .observe(&listed[0], true, &mut report)
            .await
            .unwrap();
        let stub = h.cache.get_message(100).await.unwrap().unwrap();
        assert!(stub.headers_only);

        h.sync.bulk_sync(&mut session).await.unwrap();
        let full = h.cache.get_message(100).await.unwrap().unwrap();
        assert!(!full.needs_body());
    }

    #[tokio::test]
    async fn test_incremental_fetches_new_unseen_arrival() {
        let h = harness(mailbox(&[FakeMessage::new(1, 100, 100, "Old")]), config()).await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        h.factory
            .mailbox
            .lock()
            .unwrap()
            .insert(INBOX, FakeMessage::new(7, 700, 700, "New"));

        let report = h.sync.incremental_sync(&mut session).await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(page_ids(&h.cache, INBOX).await, vec![700, 100]);
        assert!(!h.cache.get_message(700).await.unwrap().unwrap().needs_body());
    }

    #[tokio::test]
    async fn test_incremental_window_prune() {
        let h = harness(
            mailbox(&[
                FakeMessage::new(1, 100, 100, "A"),
                FakeMessage::new(2, 200, 200, "B"),
                FakeMessage::new(3, 300, 300, "C"),
            ]),
            config(),
        )
        .await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        h.factory.mailbox.lock().unwrap().remove(INBOX, 1);
        h.factory.mailbox.lock().unwrap().remove(INBOX, 3);

        // Only UID 3 is inside the visible window
        h.window
            .send(Some(ViewWindow {
                label: INBOX.to_string(),
                min_uid: 2,
                max_uid: 3,
            }))
            .unwrap();

        let report = h.sync.incremental_sync(&mut session).await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(page_ids(&h.cache, INBOX).await, vec![200, 100]);
    }

    fn capped(limit: usize) -> SyncConfig {
        SyncConfig {
            fetch_limit: limit,
            ..config()
        }
    }

    #[tokio::test]
    async fn test_incremental_fetches_arrivals_below_listing() {
        let messages: Vec<FakeMessage> = (1..=10u32)
            .map(|uid| {
                let mut message = FakeMessage::new(uid, u64::from(uid) * 100, u64::from(uid), "Msg");
                if uid != 2 && uid != 5 {
                    message.flags = MessageFlags::SEEN;
                }
                message
            })
            .collect();
        let h = harness(mailbox(&messages), capped(3)).await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        let report = h.sync.incremental_sync(&mut session).await.unwrap();
        assert_eq!(report.fetched, 2);

        // Exactly the two unread messages, with nothing in between
        assert_eq!(
            h.factory.mailbox.lock().unwrap().full_fetches,
            vec![vec![10, 9, 8], vec![5, 2]]
        );
        assert!(!h.cache.message_exists(400).await.unwrap());
        assert!(!h.cache.get_message(200).await.unwrap().unwrap().needs_body());
        assert!(!h.cache.get_message(500).await.unwrap().unwrap().needs_body());
    }

    #[tokio::test]
    async fn test_incremental_capped_listing_keeps_older_associations() {
        let messages: Vec<FakeMessage> = (1..=5u32)
            .map(|uid| FakeMessage::new(uid, u64::from(uid) * 100, u64::from(uid), "Msg"))
            .collect();
        let h = harness(mailbox(&messages), capped(3)).await;
        let mut session = h.factory.connect().await.unwrap();
        h.sync.bulk_sync(&mut session).await.unwrap();

        // Older messages cached earlier, still present remotely
        for uid in [1u32, 2] {
            let stable_id = u64::from(uid) * 100;
            let content = format!("Subject: Old {}\r\n\r\nHi\r\n", uid);
            h.cache
                .upsert_message(
                    &NewMessage {
                        stable_id,
                        thread_id: Some(u64::from(uid)),
                        content: Some(content.as_bytes()),
                        headers_only: false,
                        unread: false,
                        starred: false,
                    },
                    WriteMode::Upsert,
                )
                .await
                .unwrap();
            h.cache.link_label(stable_id, INBOX, Some(uid)).await.unwrap();
        }

        h.factory.mailbox.lock().unwrap().remove(INBOX, 4);
        h.window
            .send(Some(ViewWindow {
                label: INBOX.to_string(),
                min_uid: 1,
                max_uid: 5,
            }))
            .unwrap();

        // The listing now covers UIDs 2, 3 and 5, so only 4 may go
        let report = h.sync.incremental_sync(&mut session).await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(page_ids(&h.cache, INBOX).await, vec![500, 300, 200, 100]);
    }

    #[tokio::test]
    async fn test_run_stops_when_flag_cleared() {
        let mut remote = mailbox(&[FakeMessage::new(1, 100, 100, "A")]);
        remote.activity.push_back(Ok(Activity::NewData));
        remote.activity.push_back(Ok(Activity::Timeout));
        let h = harness(remote, config()).await;

        h.sync.run().await;

        assert!(!h.running.load(Ordering::SeqCst));
        let status = h.status.borrow().clone();
        assert_eq!(status.phase, SyncPhase::Stopped);
        assert_eq!(status.reconnects, 0);
        assert_eq!(status.last_bulk.map(|r| r.listed), Some(1));
        assert!(h.cache.message_exists(100).await.unwrap());
    }

    #[tokio::test]
    async fn test_run_reconnects_after_failure() {
        let mut remote = mailbox(&[FakeMessage::new(1, 100, 100, "A")]);
        remote.fail_connect = 2;
        remote
            .activity
            .push_back(Err(anyhow::anyhow!("connection reset")));
        let h = harness(remote, config()).await;
        let connects = h.factory.connects.clone();

        h.sync.run().await;

        // Two refused connects, one reset during IDLE, then a clean cycle
        assert_eq!(connects.load(Ordering::SeqCst), 4);
        let status = h.status.borrow().clone();
        assert_eq!(status.reconnects, 3);
        assert!(status.last_error.unwrap().contains("connection reset"));
        assert_eq!(status.phase, SyncPhase::Stopped);
    }
}
