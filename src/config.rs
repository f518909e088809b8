use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub view: ViewConfig,
}

/// Authentication method for the account
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthMethod {
    /// App password stored in the keyring
    #[default]
    Password,
    /// OAuth2 with a refresh token kept on disk
    OAuth2 {
        client_id: String,
        /// Token file (default: `<config_dir>/oauth2_token.json`)
        #[serde(default)]
        token_file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub auth: AuthMethod,
}

impl AccountConfig {
    /// Get the display name or fall back to email
    pub fn display_name_or_email(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    pub server: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Mailbox kept in sync and shown by default
    #[serde(default = "default_label")]
    pub label: String,
    /// Cap on messages listed per pass
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    /// Upper bound on a single IDLE wait
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Pause between reconnect attempts (0 = reconnect immediately)
    #[serde(default)]
    pub reconnect_delay_secs: u64,
    /// Let header-only discovery create rows before the body arrives
    #[serde(default)]
    pub header_stubs: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            fetch_limit: default_fetch_limit(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reconnect_delay_secs: 0,
            header_stubs: false,
        }
    }
}

impl SyncConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            refresh_interval_ms: default_refresh_interval_ms(),
            date_format: default_date_format(),
        }
    }
}

impl ViewConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_port() -> u16 {
    587
}

fn default_label() -> String {
    "INBOX".to_string()
}

fn default_fetch_limit() -> usize {
    500
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_page_size() -> usize {
    50
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_date_format() -> String {
    "%b %d".to_string()
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("gmirror");
        Ok(dir)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Could not find data directory")?
            .join("gmirror");
        Ok(dir)
    }

    pub fn db_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("cache.db"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            anyhow::bail!(
                "Configuration file not found at {}\n\
                 Please create a config file. Example:\n\n\
                 [account]\n\
                 email = \"you@gmail.com\"\n\n\
                 [account.imap]\n\
                 server = \"imap.gmail.com\"\n\n\
                 [account.smtp]\n\
                 server = \"smtp.gmail.com\"\n\n\
                 [sync]\n\
                 label = \"INBOX\"",
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        if config.sync.fetch_limit == 0 {
            anyhow::bail!("sync.fetch_limit must be at least 1");
        }
        if config.view.page_size == 0 {
            anyhow::bail!("view.page_size must be at least 1");
        }
        Ok(config)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(Self::config_dir()?)?;
        fs::create_dir_all(Self::data_dir()?)?;
        Ok(())
    }
}
