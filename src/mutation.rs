//! User-initiated remote operations.
//!
//! Each mutation runs on a short-lived task with its own connection,
//! performs one remote operation and reports the outcome on a channel.
//! Mutations never write the cache; the synchronizer's next pass picks up
//! the new remote state.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AccountConfig;
use crate::constants::{ALL_MAIL_MAILBOX, CHANNEL_CAPACITY, RESTORE_MAILBOX, TRASH_MAILBOX};
use crate::credentials::CredentialProvider;
use crate::mail::session::{MailboxSession, SessionFactory};
use crate::mail::smtp::SmtpClient;
use crate::mail::types::{ComposeEmail, MessageFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    MarkRead,
    MarkUnread,
    Star,
    Unstar,
    /// Remove from the label, keeping the message in All Mail.
    Archive,
    Trash,
    /// Copy back out of the trash into the inbox.
    Restore,
}

impl FromStr for MutationOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "read" => MutationOp::MarkRead,
            "unread" => MutationOp::MarkUnread,
            "star" => MutationOp::Star,
            "unstar" => MutationOp::Unstar,
            "archive" => MutationOp::Archive,
            "trash" => MutationOp::Trash,
            "restore" => MutationOp::Restore,
            other => bail!("Unknown operation '{}'", other),
        })
    }
}

#[derive(Debug, Clone)]
pub enum Mutation {
    Remote {
        op: MutationOp,
        label: String,
        uids: Vec<u32>,
    },
    Send(ComposeEmail),
}

impl Mutation {
    pub fn describe(&self) -> String {
        match self {
            Mutation::Remote { op, label, uids } => {
                format!("{:?} {} message(s) in {}", op, uids.len(), label)
            }
            Mutation::Send(compose) => format!("Send to {}", compose.to.join(", ")),
        }
    }
}

#[derive(Debug)]
pub struct MutationResult {
    pub description: String,
    pub result: Result<()>,
}

/// Perform `op` on `uids` of `label`.
pub async fn apply<S: MailboxSession>(
    session: &mut S,
    op: MutationOp,
    label: &str,
    uids: &[u32],
) -> Result<()> {
    match op {
        MutationOp::MarkRead => session.set_flag(label, uids, MessageFlags::SEEN, true).await,
        MutationOp::MarkUnread => session.set_flag(label, uids, MessageFlags::SEEN, false).await,
        MutationOp::Star => session.set_flag(label, uids, MessageFlags::FLAGGED, true).await,
        MutationOp::Unstar => {
            session
                .set_flag(label, uids, MessageFlags::FLAGGED, false)
                .await
        }
        MutationOp::Archive => {
            if label == ALL_MAIL_MAILBOX {
                bail!("Messages in {} are already archived", ALL_MAIL_MAILBOX);
            }
            session.move_messages(label, uids, ALL_MAIL_MAILBOX).await
        }
        MutationOp::Trash => session.move_messages(label, uids, TRASH_MAILBOX).await,
        MutationOp::Restore => {
            session
                .copy_messages(TRASH_MAILBOX, uids, RESTORE_MAILBOX)
                .await
        }
    }
}

/// Spawns one-off mutation workers and collects their results.
pub struct Mutations<F, C> {
    factory: Arc<F>,
    account: AccountConfig,
    credentials: Arc<C>,
    tx: mpsc::Sender<MutationResult>,
}

impl<F, C> Mutations<F, C>
where
    F: SessionFactory,
    C: CredentialProvider + 'static,
{
    pub fn new(
        factory: Arc<F>,
        account: AccountConfig,
        credentials: Arc<C>,
    ) -> (Self, mpsc::Receiver<MutationResult>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mutations = Self {
            factory,
            account,
            credentials,
            tx,
        };
        (mutations, rx)
    }

    pub fn spawn(&self, mutation: Mutation) -> JoinHandle<()> {
        let factory = self.factory.clone();
        let account = self.account.clone();
        let credentials = self.credentials.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let description = mutation.describe();
            let result = match mutation {
                Mutation::Remote { op, label, uids } => {
                    run_remote(factory.as_ref(), op, &label, &uids).await
                }
                Mutation::Send(compose) => {
                    run_send(&account, credentials.as_ref(), &compose).await
                }
            };

            match &result {
                Ok(()) => tracing::info!("{}: done", description),
                Err(e) => tracing::warn!("{}: {:#}", description, e),
            }
            tx.send(MutationResult {
                description,
                result,
            })
            .await
            .ok();
        })
    }
}

async fn run_remote<F: SessionFactory>(
    factory: &F,
    op: MutationOp,
    label: &str,
    uids: &[u32],
) -> Result<()> {
    if uids.is_empty() {
        return Ok(());
    }
    let mut session = factory.connect().await?;
    let result = apply(&mut session, op, label, uids).await;
    session.logout().await.ok();
    result
}

async fn run_send<C: CredentialProvider>(
    account: &AccountConfig,
    credentials: &C,
    compose: &ComposeEmail,
) -> Result<()> {
    let secret = credentials.access_token(account).await?;
    let client = SmtpClient::new(account, &secret)?;
    client.send(compose).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMethod, ImapConfig, SmtpConfig};
    use crate::credentials::Secret;
    use crate::mail::fake::{Call, FakeFactory, FakeMailbox, FakeMessage};

    struct NoCredentials;

    impl CredentialProvider for NoCredentials {
        async fn access_token(&self, _account: &AccountConfig) -> Result<Secret> {
            bail!("no credentials in tests")
        }
    }

    fn account() -> AccountConfig {
        AccountConfig {
            email: "me@example.com".to_string(),
            display_name: None,
            imap: ImapConfig {
                server: "imap.example.com".to_string(),
                port: 993,
            },
            smtp: SmtpConfig {
                server: "smtp.example.com".to_string(),
                port: 587,
            },
            auth: AuthMethod::Password,
        }
    }

    fn mutations() -> (
        Mutations<FakeFactory, NoCredentials>,
        mpsc::Receiver<MutationResult>,
        FakeFactory,
    ) {
        let mut mailbox = FakeMailbox::default();
        mailbox.insert("INBOX", FakeMessage::new(4, 400, 400, "Hello"));
        let factory = FakeFactory::new(mailbox);
        let (mutations, rx) =
            Mutations::new(Arc::new(factory.clone()), account(), Arc::new(NoCredentials));
        (mutations, rx, factory)
    }

    #[test]
    fn test_parse_op() {
        assert_eq!("archive".parse::<MutationOp>().unwrap(), MutationOp::Archive);
        assert_eq!("unread".parse::<MutationOp>().unwrap(), MutationOp::MarkUnread);
        assert!("explode".parse::<MutationOp>().is_err());
    }

    #[tokio::test]
    async fn test_mark_read_reports_result() {
        let (mutations, mut rx, factory) = mutations();

        mutations.spawn(Mutation::Remote {
            op: MutationOp::MarkRead,
            label: "INBOX".to_string(),
            uids: vec![4],
        });

        let result = rx.recv().await.unwrap();
        assert!(result.result.is_ok());
        let mailbox = factory.mailbox.lock().unwrap();
        assert_eq!(
            mailbox.calls,
            vec![Call::SetFlag(
                "INBOX".to_string(),
                vec![4],
                MessageFlags::SEEN,
                true
            )]
        );
        assert_eq!(factory.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_archive_trash_restore_destinations() {
        let (mutations, mut rx, factory) = mutations();

        for op in [MutationOp::Archive, MutationOp::Trash, MutationOp::Restore] {
            mutations.spawn(Mutation::Remote {
                op,
                label: "INBOX".to_string(),
                uids: vec![4],
            });
            assert!(rx.recv().await.unwrap().result.is_ok());
        }

        let calls = factory.mailbox.lock().unwrap().calls.clone();
        assert_eq!(
            calls,
            vec![
                Call::Move("INBOX".to_string(), vec![4], ALL_MAIL_MAILBOX.to_string()),
                Call::Move("INBOX".to_string(), vec![4], TRASH_MAILBOX.to_string()),
                Call::Copy(TRASH_MAILBOX.to_string(), vec![4], RESTORE_MAILBOX.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_archive_from_all_mail_fails() {
        let (mutations, mut rx, _factory) = mutations();
        mutations.spawn(Mutation::Remote {
            op: MutationOp::Archive,
            label: ALL_MAIL_MAILBOX.to_string(),
            uids: vec![4],
        });
        assert!(rx.recv().await.unwrap().result.is_err());
    }

    #[tokio::test]
    async fn test_send_surfaces_credential_failure() {
        let (mutations, mut rx, _factory) = mutations();
        mutations.spawn(Mutation::Send(ComposeEmail {
            to: vec!["bob@example.com".to_string()],
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
        }));
        let result = rx.recv().await.unwrap();
        assert!(result.description.starts_with("Send to bob@example.com"));
        assert!(result.result.is_err());
    }
}
