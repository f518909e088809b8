//! Scripted in-memory mailbox used by tests in place of a live server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};

use super::session::{Activity, Criteria, MailboxSession, SessionFactory};
use super::types::{MessageFlags, RemoteMessage};
use super::uid_range;

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub uid: u32,
    pub stable_id: u64,
    pub thread_id: u64,
    pub labels: Vec<String>,
    pub flags: MessageFlags,
    pub body: String,
}

impl FakeMessage {
    pub fn new(uid: u32, stable_id: u64, thread_id: u64, subject: &str) -> Self {
        Self {
            uid,
            stable_id,
            thread_id,
            labels: vec!["\\Inbox".to_string()],
            flags: MessageFlags::empty(),
            body: format!(
                "From: Alice <alice@example.com>\r\nSubject: {}\r\n\r\nBody of {}\r\n",
                subject, subject
            ),
        }
    }

    fn header_block(&self) -> Vec<u8> {
        let end = self.body.find("\r\n\r\n").map_or(self.body.len(), |i| i + 4);
        self.body.as_bytes()[..end].to_vec()
    }

    fn raw_line(&self) -> String {
        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|l| format!("\"{}\"", l.replace('\\', "\\\\")))
            .collect();
        format!(
            "{} (X-GM-THRID {} X-GM-MSGID {} X-GM-LABELS ({}) UID {})",
            self.uid,
            self.thread_id,
            self.stable_id,
            labels.join(" "),
            self.uid
        )
    }
}

/// A recorded mutation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetFlag(String, Vec<u32>, MessageFlags, bool),
    Move(String, Vec<u32>, String),
    Copy(String, Vec<u32>, String),
}

#[derive(Default)]
pub struct FakeMailbox {
    pub mailboxes: HashMap<String, Vec<FakeMessage>>,
    /// Outcomes handed out by `wait_for_activity`, in order.
    pub activity: VecDeque<Result<Activity>>,
    /// Cleared once `activity` runs dry.
    pub running: Option<Arc<AtomicBool>>,
    /// UIDs whose vendor line is replaced with garbage.
    pub corrupt: Vec<u32>,
    pub fail_connect: usize,
    pub calls: Vec<Call>,
    pub full_fetches: Vec<Vec<u32>>,
    pub labels: Vec<String>,
}

impl FakeMailbox {
    pub fn insert(&mut self, mailbox: &str, message: FakeMessage) {
        let messages = self.mailboxes.entry(mailbox.to_string()).or_default();
        messages.push(message);
        messages.sort_by_key(|m| m.uid);
    }

    pub fn remove(&mut self, mailbox: &str, uid: u32) {
        if let Some(messages) = self.mailboxes.get_mut(mailbox) {
            messages.retain(|m| m.uid != uid);
        }
    }

    pub fn message_mut(&mut self, mailbox: &str, uid: u32) -> Option<&mut FakeMessage> {
        self.mailboxes
            .get_mut(mailbox)?
            .iter_mut()
            .find(|m| m.uid == uid)
    }

    fn select(&self, label: &str, criteria: &Criteria, limit: usize) -> Result<Vec<FakeMessage>> {
        let messages = self.mailboxes.get(label).cloned().unwrap_or_default();
        let all: Vec<u32> = messages.iter().map(|m| m.uid).collect();
        let matching: Vec<u32> = match criteria {
            Criteria::All => all,
            Criteria::Unseen => messages
                .iter()
                .filter(|m| m.flags.is_unread())
                .map(|m| m.uid)
                .collect(),
            Criteria::Uids(set) => uid_range::expand(&all, &uid_range::parse(set)?),
            Criteria::GmailRaw(query) => messages
                .iter()
                .filter(|m| m.body.contains(query.as_str()))
                .map(|m| m.uid)
                .collect(),
        };
        let keep = &matching[matching.len().saturating_sub(limit)..];

        let mut selected: Vec<FakeMessage> = messages
            .into_iter()
            .filter(|m| keep.contains(&m.uid))
            .collect();
        selected.sort_by(|a, b| b.uid.cmp(&a.uid));
        Ok(selected)
    }

    fn to_remote(&self, message: &FakeMessage, headers_only: bool) -> RemoteMessage {
        let raw_line = if self.corrupt.contains(&message.uid) {
            format!("{} (X-GM-LABELS (\"unterminated", message.uid)
        } else {
            message.raw_line()
        };
        RemoteMessage {
            uid: message.uid,
            raw_line: Some(raw_line),
            flags: message.flags,
            content: if headers_only {
                message.header_block()
            } else {
                message.body.clone().into_bytes()
            },
            headers_only,
        }
    }
}

pub type SharedMailbox = Arc<Mutex<FakeMailbox>>;

pub struct FakeSession {
    mailbox: SharedMailbox,
}

impl FakeSession {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeMailbox> {
        self.mailbox.lock().unwrap()
    }
}

impl MailboxSession for FakeSession {
    async fn list_headers(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>> {
        let mailbox = self.lock();
        let selected = mailbox.select(label, criteria, limit)?;
        Ok(selected.iter().map(|m| mailbox.to_remote(m, true)).collect())
    }

    async fn fetch_full(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>> {
        let mut mailbox = self.lock();
        let selected = mailbox.select(label, criteria, limit)?;
        mailbox
            .full_fetches
            .push(selected.iter().map(|m| m.uid).collect());
        Ok(selected.iter().map(|m| mailbox.to_remote(m, false)).collect())
    }

    async fn wait_for_activity(&mut self, _label: &str, _timeout: Duration) -> Result<Activity> {
        let mut mailbox = self.lock();
        match mailbox.activity.pop_front() {
            Some(outcome) => outcome,
            None => {
                if let Some(running) = &mailbox.running {
                    running.store(false, Ordering::SeqCst);
                }
                Ok(Activity::Timeout)
            }
        }
    }

    async fn set_flag(
        &mut self,
        label: &str,
        uids: &[u32],
        flag: MessageFlags,
        value: bool,
    ) -> Result<()> {
        let mut mailbox = self.lock();
        mailbox
            .calls
            .push(Call::SetFlag(label.to_string(), uids.to_vec(), flag, value));
        for uid in uids {
            if let Some(message) = mailbox.message_mut(label, *uid) {
                message.flags.set(flag, value);
            }
        }
        Ok(())
    }

    async fn move_messages(&mut self, label: &str, uids: &[u32], destination: &str) -> Result<()> {
        self.lock().calls.push(Call::Move(
            label.to_string(),
            uids.to_vec(),
            destination.to_string(),
        ));
        Ok(())
    }

    async fn copy_messages(&mut self, label: &str, uids: &[u32], destination: &str) -> Result<()> {
        self.lock().calls.push(Call::Copy(
            label.to_string(),
            uids.to_vec(),
            destination.to_string(),
        ));
        Ok(())
    }

    async fn list_labels(&mut self) -> Result<Vec<String>> {
        Ok(self.lock().labels.clone())
    }

    async fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Hands out sessions over one shared mailbox and counts connections.
#[derive(Clone, Default)]
pub struct FakeFactory {
    pub mailbox: SharedMailbox,
    pub connects: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(mailbox: FakeMailbox) -> Self {
        Self {
            mailbox: Arc::new(Mutex::new(mailbox)),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        {
            let mut mailbox = self.mailbox.lock().unwrap();
            if mailbox.fail_connect > 0 {
                mailbox.fail_connect -= 1;
                bail!("connection refused");
            }
        }
        Ok(FakeSession {
            mailbox: self.mailbox.clone(),
        })
    }
}
