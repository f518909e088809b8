//! IMAP client operations: connection, listing, IDLE, flag and label management.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_imap::extensions::idle::IdleResponse;
use async_imap::types::{Fetch, Flag};
use futures::StreamExt;

use super::{ImapClient, ImapSession, XOAuth2Authenticator, vendor};
use crate::credentials::Secret;
use crate::mail::session::{Activity, Criteria, MailboxSession};
use crate::mail::types::{MessageFlags, RemoteMessage};
use crate::mail::uid_range;

const HEADER_QUERY: &str = "(UID FLAGS BODY.PEEK[HEADER])";
const FULL_QUERY: &str = "(UID FLAGS BODY.PEEK[])";

fn tls_connector() -> Result<tokio_rustls::TlsConnector> {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .context("Failed to configure TLS")?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(tokio_rustls::TlsConnector::from(Arc::new(config)))
}

/// Plain comma-separated UID set for mutation commands.
fn uid_list(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl ImapClient {
    //
    // Connection Management
    //

    pub async fn connect(&mut self) -> Result<()> {
        use tokio::net::TcpStream;
        use tokio_util::compat::TokioAsyncReadCompatExt;

        let addr = format!("{}:{}", self.config.server, self.config.port);

        let tcp = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;

        let server_name = rustls::pki_types::ServerName::try_from(self.config.server.clone())
            .with_context(|| format!("Invalid server name '{}'", self.config.server))?;
        let tls_stream = tls_connector()?
            .connect(server_name, tcp)
            .await
            .context("TLS handshake failed")?;

        // Wrap tokio stream with compat layer for futures-io compatibility
        let client = async_imap::Client::new(tls_stream.compat());

        let session = match &self.secret {
            Secret::Password(password) => client
                .login(&self.username, password)
                .await
                .map_err(|e| anyhow::anyhow!("Login failed: {:?}", e.0))?,
            Secret::AccessToken(token) => {
                let authenticator = XOAuth2Authenticator {
                    user: self.username.clone(),
                    access_token: token.clone(),
                };
                client
                    .authenticate("XOAUTH2", authenticator)
                    .await
                    .map_err(|e| anyhow::anyhow!("XOAUTH2 authentication failed: {:?}", e.0))?
            }
        };

        self.session = Some(session);
        self.selected = None;
        tracing::info!("Connected to IMAP server {}", self.config.server);

        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.selected = None;
        if let Some(mut session) = self.session.take() {
            session.logout().await.ok();
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Take the session out of the client (for IDLE)
    pub fn take_session(&mut self) -> Option<ImapSession> {
        self.session.take()
    }

    /// Put the session back into the client
    pub fn restore_session(&mut self, session: ImapSession) {
        self.session = Some(session);
    }

    pub(crate) async fn ensure_connected(&mut self) -> Result<()> {
        if !self.is_connected() {
            self.connect().await?;
        }
        Ok(())
    }

    pub(crate) fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .context("Not connected to IMAP server")
    }

    //
    // Mailbox Operations
    //

    async fn select_label(&mut self, label: &str) -> Result<()> {
        self.ensure_connected().await?;
        if self.selected.as_deref() == Some(label) {
            return Ok(());
        }
        self.session()?
            .select(label)
            .await
            .with_context(|| format!("Failed to select mailbox '{}'", label))?;
        self.selected = Some(label.to_string());
        Ok(())
    }

    async fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let mut uids: Vec<u32> = self
            .session()?
            .uid_search(query)
            .await
            .with_context(|| format!("UID SEARCH {} failed", query))?
            .into_iter()
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Resolve `criteria`, keep the newest `limit` UIDs and fetch them with
    /// `query`, pairing each message with its vendor attribute line.
    async fn list_messages(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
        query: &str,
        headers_only: bool,
    ) -> Result<Vec<RemoteMessage>> {
        self.select_label(label).await?;

        let matching = self.search(&criteria.to_search_query()).await?;
        let selected = &matching[matching.len().saturating_sub(limit)..];
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        // Ranges may only span UIDs that exist in the mailbox
        let mailbox = if *criteria == Criteria::All {
            matching.clone()
        } else {
            self.search("ALL").await?
        };
        let tokens = uid_range::compress(&mailbox, selected)?;
        let uid_set = uid_range::serialize(&tokens);
        tracing::debug!("Fetching {} messages from {} as {}", selected.len(), label, uid_set);

        let session = self.session()?;
        let mut messages = Vec::with_capacity(selected.len());
        {
            let mut stream = session
                .uid_fetch(&uid_set, query)
                .await
                .context("Failed to fetch messages")?;

            while let Some(result) = stream.next().await {
                let fetch = result.context("Failed to fetch message")?;
                if let Some(message) = to_remote_message(&fetch, headers_only) {
                    messages.push(message);
                }
            }
        }

        let mut lines = vendor::fetch_vendor_lines(session, &uid_set).await?;
        for message in &mut messages {
            message.raw_line = lines.remove(&message.uid);
        }

        // Newest first
        messages.sort_by(|a, b| b.uid.cmp(&a.uid));
        Ok(messages)
    }

    async fn store_flag(&mut self, uids: &[u32], flag: MessageFlags, value: bool) -> Result<()> {
        let Some(flag_str) = flag.imap_name() else {
            return Ok(());
        };
        let op = if value { '+' } else { '-' };

        let session = self.session()?;
        let responses: Vec<_> = session
            .uid_store(uid_list(uids), format!("{}FLAGS ({})", op, flag_str))
            .await
            .context("Failed to store flag")?
            .collect()
            .await;

        // Check for errors in the stream responses
        for response in responses {
            if let Err(e) = response {
                tracing::warn!("Error in store response: {:?}", e);
            }
        }

        Ok(())
    }

    pub async fn list_folders(&mut self) -> Result<Vec<String>> {
        self.ensure_connected().await?;
        let session = self.session()?;

        let mut folders = Vec::new();
        let mut list_stream = session.list(Some(""), Some("*")).await?;

        while let Some(result) = list_stream.next().await {
            if let Ok(name) = result {
                folders.push(name.name().to_string());
            }
        }

        // INBOX first, then Gmail system folders, then user labels
        folders.sort_by(|a, b| {
            let priority = |s: &str| -> u8 {
                match s {
                    s if s.eq_ignore_ascii_case("INBOX") => 0,
                    s if s.starts_with("[Gmail]") => 1,
                    _ => 2,
                }
            };
            priority(a).cmp(&priority(b)).then_with(|| a.cmp(b))
        });

        Ok(folders)
    }

    /// One bounded IDLE on `label`.
    async fn idle(&mut self, label: &str, timeout: Duration) -> Result<Activity> {
        self.select_label(label).await?;

        let session = self.take_session().context("No session available for IDLE")?;
        let mut idle = session.idle();
        if let Err(e) = idle.init().await {
            // The session is dropped; the next call reconnects
            self.selected = None;
            anyhow::bail!("Failed to init IDLE: {:?}", e);
        }

        tracing::debug!("IDLE started on {}, waiting up to {:?}", label, timeout);

        let result = {
            let (idle_wait, _stop) = idle.wait();
            tokio::time::timeout(timeout, idle_wait).await
        };

        match idle.done().await {
            Ok(session) => self.restore_session(session),
            Err(e) => {
                self.selected = None;
                anyhow::bail!("Failed to end IDLE: {:?}", e);
            }
        }

        match result {
            Ok(Ok(IdleResponse::NewData(_))) => {
                tracing::debug!("IDLE: server notification received");
                Ok(Activity::NewData)
            }
            Ok(Ok(_)) => Ok(Activity::Timeout),
            Ok(Err(e)) => Err(e).context("IDLE failed"),
            // Servers may drop long IDLEs, so the wait is bounded locally too
            Err(_) => Ok(Activity::Timeout),
        }
    }
}

impl MailboxSession for ImapClient {
    async fn list_headers(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>> {
        self.list_messages(label, criteria, limit, HEADER_QUERY, true)
            .await
    }

    async fn fetch_full(
        &mut self,
        label: &str,
        criteria: &Criteria,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>> {
        self.list_messages(label, criteria, limit, FULL_QUERY, false)
            .await
    }

    async fn wait_for_activity(&mut self, label: &str, timeout: Duration) -> Result<Activity> {
        self.idle(label, timeout).await
    }

    async fn set_flag(
        &mut self,
        label: &str,
        uids: &[u32],
        flag: MessageFlags,
        value: bool,
    ) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        self.select_label(label).await?;
        self.store_flag(uids, flag, value).await
    }

    async fn move_messages(&mut self, label: &str, uids: &[u32], destination: &str) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        self.select_label(label).await?;
        self.session()?
            .uid_mv(uid_list(uids), destination)
            .await
            .with_context(|| format!("Failed to move messages to '{}'", destination))?;
        Ok(())
    }

    async fn copy_messages(&mut self, label: &str, uids: &[u32], destination: &str) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        self.select_label(label).await?;
        self.session()?
            .uid_copy(uid_list(uids), destination)
            .await
            .with_context(|| format!("Failed to copy messages to '{}'", destination))?;
        Ok(())
    }

    async fn list_labels(&mut self) -> Result<Vec<String>> {
        self.list_folders().await
    }

    async fn logout(&mut self) -> Result<()> {
        self.disconnect().await
    }
}

fn flags_from_fetch(fetch: &Fetch) -> MessageFlags {
    fetch
        .flags()
        .fold(MessageFlags::empty(), |acc, flag| match flag {
            Flag::Seen => acc | MessageFlags::SEEN,
            Flag::Answered => acc | MessageFlags::ANSWERED,
            Flag::Flagged => acc | MessageFlags::FLAGGED,
            Flag::Deleted => acc | MessageFlags::DELETED,
            Flag::Draft => acc | MessageFlags::DRAFT,
            _ => acc,
        })
}

/// Convert a typed FETCH reply. The vendor line is attached later.
fn to_remote_message(fetch: &Fetch, headers_only: bool) -> Option<RemoteMessage> {
    let uid = fetch.uid?;
    let content = if headers_only {
        fetch.header()
    } else {
        fetch.body()
    };

    Some(RemoteMessage {
        uid,
        raw_line: None,
        flags: flags_from_fetch(fetch),
        content: content.unwrap_or_default().to_vec(),
        headers_only,
    })
}
