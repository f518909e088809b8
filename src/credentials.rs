use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::config::{AccountConfig, AuthMethod, Config};

const ENV_PASSWORD: &str = "GMIRROR_PASSWORD";
const KEYRING_SERVICE: &str = "gmirror";

/// A credential ready to present to IMAP or SMTP.
#[derive(Clone)]
pub enum Secret {
    Password(String),
    AccessToken(String),
}

impl Secret {
    pub fn expose(&self) -> &str {
        match self {
            Secret::Password(s) | Secret::AccessToken(s) => s,
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::Password(_) => f.write_str("Password(***)"),
            Secret::AccessToken(_) => f.write_str("AccessToken(***)"),
        }
    }
}

/// Supplies a valid credential for an account. May hit the network to
/// refresh a token.
pub trait CredentialProvider: Send + Sync {
    fn access_token(&self, account: &AccountConfig) -> impl Future<Output = Result<Secret>> + Send;
}

/// Write a file readable only by the owner.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create file with restricted permissions atomically to avoid TOCTOU
    #[cfg(unix)]
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents)?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)?;
    }

    Ok(())
}

pub struct CredentialStore {
    email: String,
    password_file: PathBuf,
}

impl CredentialStore {
    pub fn new(email: &str) -> Self {
        let safe_email = email.replace(['@', '.', '/', '\\', ':'], "_");
        let password_file = Config::config_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(format!(".password_{}", safe_email));

        Self {
            email: email.to_string(),
            password_file,
        }
    }

    fn keyring_key(&self) -> String {
        format!("imap:{}", self.email)
    }

    /// Check for password in environment variable first
    fn env_password() -> Option<String> {
        env::var(ENV_PASSWORD).ok().filter(|s| !s.is_empty())
    }

    fn keyring_get(&self) -> Option<String> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, &self.keyring_key()).ok()?;
        entry.get_password().ok()
    }

    fn keyring_set(&self, password: &str) -> bool {
        keyring::Entry::new(KEYRING_SERVICE, &self.keyring_key())
            .map(|entry| entry.set_password(password).is_ok())
            .unwrap_or(false)
    }

    fn file_get(&self) -> Option<String> {
        fs::read_to_string(&self.password_file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn file_set(&self, password: &str) -> Result<()> {
        write_private(&self.password_file, password.as_bytes())
    }

    /// Environment, then keyring, then the private file.
    pub fn get_password(&self) -> Result<String> {
        if let Some(pwd) = Self::env_password() {
            return Ok(pwd);
        }

        if let Some(pwd) = self.keyring_get() {
            return Ok(pwd);
        }

        if let Some(pwd) = self.file_get() {
            return Ok(pwd);
        }

        anyhow::bail!(
            "Password not found. Set {} or run 'gmirror password'.",
            ENV_PASSWORD
        )
    }

    pub fn set_password(&self, password: &str) -> Result<()> {
        if self.keyring_set(password) && self.keyring_get().is_some() {
            tracing::info!("Stored password in keyring for {}", self.email);
            return Ok(());
        }

        tracing::warn!("Keyring unavailable, using file-based storage");
        self.file_set(password)
            .with_context(|| format!("Failed to write {}", self.password_file.display()))
    }
}

/// Resolves credentials according to the account's auth method.
pub struct AccountCredentials;

impl CredentialProvider for AccountCredentials {
    async fn access_token(&self, account: &AccountConfig) -> Result<Secret> {
        match &account.auth {
            AuthMethod::Password => CredentialStore::new(&account.email)
                .get_password()
                .map(Secret::Password),
            AuthMethod::OAuth2 {
                client_id,
                token_file,
            } => {
                let path = match token_file {
                    Some(path) => path.clone(),
                    None => crate::oauth2::default_token_file()?,
                };
                crate::oauth2::get_access_token(client_id, &path)
                    .await
                    .map(Secret::AccessToken)
            }
        }
    }
}
