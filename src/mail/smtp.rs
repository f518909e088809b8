use anyhow::{Context, Result};
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::AccountConfig;
use crate::credentials::Secret;

use super::types::ComposeEmail;

pub struct SmtpClient {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: Option<String>,
}

impl SmtpClient {
    pub fn new(account: &AccountConfig, secret: &Secret) -> Result<Self> {
        let creds = Credentials::new(account.email.clone(), secret.expose().to_string());

        // Select authentication mechanism based on the credential kind
        let mechanisms = match secret {
            Secret::Password(_) => vec![Mechanism::Plain, Mechanism::Login],
            Secret::AccessToken(_) => vec![Mechanism::Xoauth2],
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&account.smtp.server)
            .context("Failed to create SMTP transport")?
            .port(account.smtp.port)
            .credentials(creds)
            .authentication(mechanisms)
            .build();

        Ok(Self {
            transport,
            from_email: account.email.clone(),
            from_name: account.display_name.clone(),
        })
    }

    pub async fn send(&self, compose: &ComposeEmail) -> Result<()> {
        let raw = compose.to_raw(&self.from_email, self.from_name.as_deref())?;
        self.send_raw(&self.from_email, &compose.to, &raw).await
    }

    /// Hand already-rendered message bytes to the relay.
    pub async fn send_raw(&self, from: &str, to: &[String], raw: &[u8]) -> Result<()> {
        let envelope = envelope(from, to)?;

        self.transport
            .send_raw(&envelope, raw)
            .await
            .context("Failed to send email")?;

        tracing::info!("Email sent to {}", to.join(", "));
        Ok(())
    }
}

fn envelope(from: &str, to: &[String]) -> Result<Envelope> {
    let from: Address = from.parse().context("Invalid from address")?;

    let mut recipients = Vec::with_capacity(to.len());
    for to_addr in to {
        let to_addr = to_addr.trim();
        if to_addr.is_empty() {
            continue;
        }
        recipients.push(
            to_addr
                .parse::<Address>()
                .with_context(|| format!("Invalid recipient address: {}", to_addr))?,
        );
    }

    Envelope::new(Some(from), recipients).context("Message has no recipients")
}
