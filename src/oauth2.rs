//! OAuth2 access tokens for Gmail IMAP/SMTP.
//!
//! The refresh token is obtained out of band and kept in a JSON token file
//! next to the config. Access tokens are refreshed against Google's token
//! endpoint when expired and the file is rewritten.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::credentials::write_private;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this many seconds before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Get the OAuth2 client secret from environment variable (GMIRROR_OAUTH_CLIENT_SECRET)
pub fn get_client_secret() -> Option<String> {
    std::env::var("GMIRROR_OAUTH_CLIENT_SECRET").ok()
}

pub fn default_token_file() -> Result<PathBuf> {
    Ok(Config::config_dir()?.join("oauth2_token.json"))
}

/// Tokens returned by the refresh endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// On-disk token state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFile {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp after which `access_token` is no longer valid
    #[serde(default)]
    pub expires_at: i64,
}

impl TokenFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read token file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self).context("Failed to serialize tokens")?;
        write_private(path, &content)
            .with_context(|| format!("Failed to write token file: {}", path.display()))
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        !self.access_token.is_empty() && now + EXPIRY_MARGIN_SECS < self.expires_at
    }

    /// Fold a refresh response into the stored state.
    pub fn apply(&mut self, tokens: OAuth2Tokens, now: i64) {
        self.access_token = tokens.access_token;
        if let Some(refresh) = tokens.refresh_token {
            self.refresh_token = refresh;
        }
        self.expires_at = now + tokens.expires_in.unwrap_or(3600) as i64;
    }
}

/// Error response from Google
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct GmailOAuth2 {
    client_id: String,
    client_secret: Option<String>,
    http_client: reqwest::Client,
}

impl GmailOAuth2 {
    pub fn new(client_id: &str, client_secret: Option<&str>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.map(|s| s.to_string()),
            http_client,
        })
    }

    /// Refresh an access token using a refresh token
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<OAuth2Tokens> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        if let Some(secret) = self.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        let response = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .context("Failed to refresh token")?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await.unwrap_or(ErrorResponse {
                error: "unknown_error".to_string(),
                error_description: None,
            });
            bail!(
                "Token refresh failed: {} {}",
                error.error,
                error.error_description.unwrap_or_default()
            );
        }

        response
            .json()
            .await
            .context("Failed to parse refresh token response")
    }
}

/// Return a valid access token from `token_path`, refreshing and
/// persisting it when expired.
pub async fn get_access_token(client_id: &str, token_path: &Path) -> Result<String> {
    let mut tokens = TokenFile::load(token_path)?;
    let now = chrono::Utc::now().timestamp();

    if tokens.is_valid_at(now) {
        tracing::debug!("Access token still valid");
        return Ok(tokens.access_token);
    }

    tracing::info!("Refreshing OAuth2 access token");
    let client_secret = get_client_secret();
    let oauth = GmailOAuth2::new(client_id, client_secret.as_deref())?;
    let refreshed = oauth.refresh_access_token(&tokens.refresh_token).await?;
    tokens.apply(refreshed, now);
    tokens.save(token_path)?;

    Ok(tokens.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validity_margin() {
        let tokens = TokenFile {
            access_token: "ya29.a".to_string(),
            refresh_token: "1//r".to_string(),
            expires_at: 1_000,
        };
        assert!(tokens.is_valid_at(900));
        assert!(!tokens.is_valid_at(950));
        assert!(!tokens.is_valid_at(2_000));
    }

    #[test]
    fn test_apply_refresh_keeps_refresh_token() {
        let mut tokens = TokenFile {
            access_token: "old".to_string(),
            refresh_token: "1//r".to_string(),
            expires_at: 0,
        };
        tokens.apply(
            OAuth2Tokens {
                access_token: "new".to_string(),
                refresh_token: None,
                expires_in: Some(3599),
                token_type: Some("Bearer".to_string()),
            },
            100,
        );
        assert_eq!(tokens.access_token, "new");
        assert_eq!(tokens.refresh_token, "1//r");
        assert_eq!(tokens.expires_at, 3699);
    }

    #[test]
    fn test_token_file_round_trip_on_disk() {
        let path = std::env::temp_dir().join(format!("gmirror_token_{}.json", std::process::id()));
        let tokens = TokenFile {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: 42,
        };
        tokens.save(&path).unwrap();
        assert_eq!(TokenFile::load(&path).unwrap(), tokens);
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_valid_token_needs_no_network() {
        let path = std::env::temp_dir().join(format!("gmirror_valid_{}.json", std::process::id()));
        let tokens = TokenFile {
            access_token: "still-good".to_string(),
            refresh_token: "r".to_string(),
            expires_at: chrono::Utc::now().timestamp() + 3600,
        };
        tokens.save(&path).unwrap();
        assert_eq!(get_access_token("client", &path).await.unwrap(), "still-good");
        let _ = fs::remove_file(&path);
    }
}
