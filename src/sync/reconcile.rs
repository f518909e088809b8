//! Per-message cache writes shared by the bulk and incremental passes.

use anyhow::Result;

use crate::cache::{Cache, NewMessage, WriteMode, WriteOutcome};
use crate::constants::SYSTEM_LABELS;
use crate::mail::response::{GmailFields, decode_gmail_fields};
use crate::mail::types::{MessageFlags, RemoteMessage};
use crate::retry::{RetryConfig, with_retry};

use super::status::PassReport;

/// Decode the vendor line of a listed message. Failures are logged and
/// the message is skipped.
pub(super) fn decode(message: &RemoteMessage) -> Option<(GmailFields, u64)> {
    let Some(line) = message.raw_line.as_deref() else {
        tracing::warn!("UID {} has no vendor attributes, skipping", message.uid);
        return None;
    };

    let fields = match decode_gmail_fields(line) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!("Skipping UID {}: {}", message.uid, e);
            return None;
        }
    };

    match fields.stable_id {
        Some(stable_id) => Some((fields, stable_id)),
        None => {
            tracing::warn!("UID {} has no X-GM-MSGID, skipping", message.uid);
            None
        }
    }
}

/// Flags from the vendor line when it carries `FLAGS`, otherwise the
/// typed fetch result.
fn flags_of(message: &RemoteMessage, fields: &GmailFields) -> MessageFlags {
    fields
        .flags
        .as_deref()
        .map(MessageFlags::from_names)
        .unwrap_or(message.flags)
}

/// Whether a reported label names the mailbox being synced. System labels
/// are reported by marker (`Starred`) but listed as `[Gmail]/Starred`.
fn is_target_label(reported: &str, target: &str) -> bool {
    if reported.eq_ignore_ascii_case(target) {
        return true;
    }
    SYSTEM_LABELS
        .iter()
        .find(|(marker, _)| marker.eq_ignore_ascii_case(reported))
        .is_some_and(|(_, mailbox)| mailbox.eq_ignore_ascii_case(target))
}

/// Writes observations of one label into the cache.
pub(super) struct Reconciler<'a> {
    pub cache: &'a Cache,
    pub retry: &'a RetryConfig,
    pub label: &'a str,
}

impl Reconciler<'_> {
    async fn write(&self, message: &NewMessage<'_>, mode: WriteMode) -> Result<WriteOutcome> {
        with_retry(self.retry, || self.cache.upsert_message(message, mode)).await
    }

    pub async fn needs_body(&self, stable_id: u64) -> Result<bool> {
        with_retry(self.retry, || self.cache.needs_body(stable_id)).await
    }

    /// Refresh flags and labels of a header-only listing entry. Returns
    /// whether the message still needs its full content.
    ///
    /// Rows are only created here when `allow_stub` is set, and then only
    /// with header content.
    pub async fn observe(
        &self,
        message: &RemoteMessage,
        allow_stub: bool,
        report: &mut PassReport,
    ) -> Result<bool> {
        let Some((fields, stable_id)) = decode(message) else {
            report.skipped += 1;
            return Ok(false);
        };

        let flags = flags_of(message, &fields);
        let mut update = NewMessage {
            stable_id,
            thread_id: fields.thread_id,
            content: None,
            headers_only: true,
            unread: flags.is_unread(),
            starred: flags.is_starred(),
        };

        let mut outcome = self.write(&update, WriteMode::UpdateOnly).await?;
        if outcome == WriteOutcome::Skipped && allow_stub {
            update.content = Some(message.content.as_slice());
            outcome = self.write(&update, WriteMode::InsertOnly).await?;
        }
        if outcome.changed() {
            report.changed += 1;
        }

        if outcome != WriteOutcome::Skipped {
            self.link(stable_id, message.uid, &fields, report).await?;
        }

        self.needs_body(stable_id).await
    }

    /// Store a fully fetched message, creating its row if needed.
    pub async fn store_full(&self, message: &RemoteMessage, report: &mut PassReport) -> Result<()> {
        let Some((fields, stable_id)) = decode(message) else {
            report.skipped += 1;
            return Ok(());
        };

        let flags = flags_of(message, &fields);
        let full = NewMessage {
            stable_id,
            thread_id: fields.thread_id,
            content: Some(message.content.as_slice()),
            headers_only: message.headers_only,
            unread: flags.is_unread(),
            starred: flags.is_starred(),
        };

        if self.write(&full, WriteMode::Upsert).await?.changed() {
            report.changed += 1;
        }
        report.fetched += 1;

        self.link(stable_id, message.uid, &fields, report).await
    }

    /// Link the target label with its UID and every other reported label
    /// without one, then drop UID-less labels no longer reported.
    async fn link(
        &self,
        stable_id: u64,
        uid: u32,
        fields: &GmailFields,
        report: &mut PassReport,
    ) -> Result<()> {
        let linked = with_retry(self.retry, || {
            self.cache.link_label(stable_id, self.label, Some(uid))
        })
        .await?;
        if linked {
            report.changed += 1;
        }

        let Some(labels) = &fields.labels else {
            return Ok(());
        };

        for other in labels.iter().filter(|l| !is_target_label(l, self.label)) {
            let linked =
                with_retry(self.retry, || self.cache.link_label(stable_id, other, None)).await?;
            if linked {
                report.changed += 1;
            }
        }

        report.pruned += with_retry(self.retry, || {
            self.cache
                .prune_unreported_labels(stable_id, labels, self.label)
        })
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_target_label() {
        assert!(is_target_label("Inbox", "INBOX"));
        assert!(is_target_label("Starred", "[Gmail]/Starred"));
        assert!(is_target_label("Sent", "[Gmail]/Sent Mail"));
        assert!(is_target_label("Work", "work"));
        assert!(!is_target_label("Starred", "INBOX"));
        assert!(!is_target_label("Inbox", "[Gmail]/Starred"));
    }
}
