//! One-off Gmail search (`X-GM-RAW`). Results are returned directly and
//! never written to the cache.

use anyhow::{Context, Result};

use crate::constants::{ALL_MAIL_MAILBOX, SEARCH_LIMIT};
use crate::mail::parser::parse_headers;
use crate::mail::response::decode_gmail_fields;
use crate::mail::session::{Criteria, MailboxSession, SessionFactory};
use crate::mail::types::{MessageSummary, RemoteMessage};

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub label: String,
    /// Search `[Gmail]/All Mail` instead of `label`.
    pub all_mailboxes: bool,
}

impl SearchRequest {
    fn mailbox(&self) -> &str {
        if self.all_mailboxes {
            ALL_MAIL_MAILBOX
        } else {
            &self.label
        }
    }
}

fn to_summary(message: &RemoteMessage) -> Option<MessageSummary> {
    let line = message.raw_line.as_deref()?;
    let fields = match decode_gmail_fields(line) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!("Skipping search result UID {}: {}", message.uid, e);
            return None;
        }
    };
    let parsed = parse_headers(&message.content).unwrap_or_default();

    Some(MessageSummary {
        stable_id: fields.stable_id?,
        thread_id: fields.thread_id,
        uid: Some(message.uid),
        subject: parsed.subject,
        from: parsed.from,
        date: parsed.date,
        preview: parsed.preview,
        unread: message.flags.is_unread(),
        starred: message.flags.is_starred(),
    })
}

/// Run `request` on an open session, newest first.
pub async fn search<S: MailboxSession>(
    session: &mut S,
    request: &SearchRequest,
) -> Result<Vec<MessageSummary>> {
    let criteria = Criteria::GmailRaw(request.query.clone());
    let messages = session
        .fetch_full(request.mailbox(), &criteria, SEARCH_LIMIT)
        .await
        .with_context(|| format!("Search in {} failed", request.mailbox()))?;

    let results: Vec<MessageSummary> = messages.iter().filter_map(to_summary).collect();
    tracing::info!(
        "Search '{}' in {}: {} results",
        request.query,
        request.mailbox(),
        results.len()
    );
    Ok(results)
}

/// Search on a connection of its own.
pub async fn run_search<F: SessionFactory>(
    factory: &F,
    request: &SearchRequest,
) -> Result<Vec<MessageSummary>> {
    let mut session = factory.connect().await?;
    let result = search(&mut session, request).await;
    session.logout().await.ok();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::fake::{FakeFactory, FakeMailbox, FakeMessage};

    fn factory() -> FakeFactory {
        let mut mailbox = FakeMailbox::default();
        mailbox.insert("INBOX", FakeMessage::new(1, 100, 100, "Invoice March"));
        mailbox.insert("INBOX", FakeMessage::new(2, 200, 200, "Lunch"));
        mailbox.insert(ALL_MAIL_MAILBOX, FakeMessage::new(7, 100, 100, "Invoice March"));
        mailbox.insert(ALL_MAIL_MAILBOX, FakeMessage::new(9, 900, 900, "Invoice April"));
        FakeFactory::new(mailbox)
    }

    #[tokio::test]
    async fn test_search_label() {
        let request = SearchRequest {
            query: "Invoice".to_string(),
            label: "INBOX".to_string(),
            all_mailboxes: false,
        };
        let results = run_search(&factory(), &request).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].stable_id, 100);
        assert_eq!(results[0].uid, Some(1));
        assert_eq!(results[0].subject, "Invoice March");
    }

    #[tokio::test]
    async fn test_search_all_mail() {
        let request = SearchRequest {
            query: "Invoice".to_string(),
            label: "INBOX".to_string(),
            all_mailboxes: true,
        };
        let results = run_search(&factory(), &request).await.unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.stable_id).collect();
        assert_eq!(ids, vec![900, 100]);
    }
}
