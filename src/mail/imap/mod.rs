//! Live IMAP session against Gmail.
//!
//! This module is split into:
//! - `mod.rs` - Types, structs, and the connection factory
//! - `client.rs` - Connection, listing, IDLE, flag and label operations
//! - `vendor.rs` - Gmail vendor attribute fetch

mod client;
mod vendor;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

use crate::config::{AccountConfig, ImapConfig};
use crate::credentials::{CredentialProvider, Secret};
use crate::mail::session::SessionFactory;

/// XOAUTH2 authenticator for IMAP
pub(crate) struct XOAuth2Authenticator {
    pub user: String,
    pub access_token: String,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        // XOAUTH2 format: "user=" + user + "\x01auth=Bearer " + token + "\x01\x01"
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

pub(crate) type ImapSession = async_imap::Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

pub struct ImapClient {
    pub(crate) session: Option<ImapSession>,
    pub config: ImapConfig,
    pub username: String,
    pub(crate) secret: Secret,
    /// Mailbox currently selected on `session`
    pub(crate) selected: Option<String>,
}

impl ImapClient {
    pub fn new(config: ImapConfig, username: String, secret: Secret) -> Self {
        Self {
            session: None,
            config,
            username,
            secret,
            selected: None,
        }
    }
}

/// Opens authenticated [`ImapClient`]s, fetching a fresh credential for
/// each connection.
pub struct ImapConnector<C> {
    account: AccountConfig,
    credentials: Arc<C>,
}

impl<C> ImapConnector<C> {
    pub fn new(account: AccountConfig, credentials: Arc<C>) -> Self {
        Self {
            account,
            credentials,
        }
    }
}

impl<C: CredentialProvider + 'static> SessionFactory for ImapConnector<C> {
    type Session = ImapClient;

    async fn connect(&self) -> Result<ImapClient> {
        let secret = self.credentials.access_token(&self.account).await?;
        let mut client = ImapClient::new(
            self.account.imap.clone(),
            self.account.email.clone(),
            secret,
        );
        client.connect().await?;
        Ok(client)
    }
}
