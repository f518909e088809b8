//! Contract over the remote mailbox protocol.
//!
//! The synchronizer, mutation workers and search only talk to the remote
//! store through [`MailboxSession`], which keeps them testable against a
//! scripted fake. [`crate::mail::imap::ImapClient`] is the live
//! implementation.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use super::types::{MessageFlags, RemoteMessage};

/// Which messages of a label a listing addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criteria {
    All,
    Unseen,
    /// A UID sequence set as produced by the range codec.
    Uids(String),
    /// A Gmail search expression (`X-GM-RAW`).
    GmailRaw(String),
}

impl Criteria {
    /// Render as the argument of `UID SEARCH`.
    pub fn to_search_query(&self) -> String {
        match self {
            Criteria::All => "ALL".to_string(),
            Criteria::Unseen => "UNSEEN".to_string(),
            Criteria::Uids(set) => format!("UID {}", set),
            Criteria::GmailRaw(query) => format!("X-GM-RAW {}", quote(query)),
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Outcome of a bounded push-notification wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// The server reported a change.
    NewData,
    /// The wait ran out without a notification.
    Timeout,
}

pub trait MailboxSession: Send {
    /// List messages of `label` matching `criteria`, newest `limit` first,
    /// with flags and the header block only.
    fn list_headers(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RemoteMessage>>> + Send;

    /// Like [`MailboxSession::list_headers`] but with full message content.
    fn fetch_full(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RemoteMessage>>> + Send;

    /// Block until the server reports activity on `label` or `timeout`
    /// elapses.
    fn wait_for_activity(
        &mut self,
        label: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Activity>> + Send;

    /// Add (`value = true`) or remove a system flag on the given UIDs.
    fn set_flag(
        &mut self,
        label: &str,
        uids: &[u32],
        flag: MessageFlags,
        value: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn move_messages(
        &mut self,
        label: &str,
        uids: &[u32],
        destination: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn copy_messages(
        &mut self,
        label: &str,
        uids: &[u32],
        destination: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn list_labels(&mut self) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn logout(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens fresh authenticated sessions. Each reconnect cycle and each
/// one-off worker gets its own.
pub trait SessionFactory: Send + Sync + 'static {
    type Session: MailboxSession + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Session>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_queries() {
        assert_eq!(Criteria::All.to_search_query(), "ALL");
        assert_eq!(Criteria::Unseen.to_search_query(), "UNSEEN");
        assert_eq!(
            Criteria::Uids("9,5,2:3".to_string()).to_search_query(),
            "UID 9,5,2:3"
        );
        assert_eq!(
            Criteria::GmailRaw(r#"from:bob "q4""#.to_string()).to_search_query(),
            r#"X-GM-RAW "from:bob \"q4\"""#
        );
    }
}
