//! Backoff retry for storage writes that hit lock contention.
//!
//! The database runs in WAL mode with one writer at a time, so a write can
//! fail with `SQLITE_BUSY` while another connection commits. Those errors
//! are retried here; anything else is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }
}

/// True when the error chain contains a SQLite busy/locked condition.
pub fn is_lock_contention(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        match cause.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::Database(db)) => {
                // SQLITE_BUSY = 5, SQLITE_LOCKED = 6 (extended codes keep the low byte)
                let busy_code = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, 5 | 6));
                busy_code || db.message().contains("database is locked")
            }
            Some(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    })
}

/// Execute a storage operation, retrying lock contention with exponential
/// backoff.
///
/// Returns the first success, the first non-contention error, or the last
/// contention error once `config.max_retries` is exhausted.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts > config.max_retries || !is_lock_contention(&e) {
                    return Err(e);
                }

                tracing::warn!(
                    "Storage busy (attempt {}/{}): {}. Retrying in {:?}...",
                    attempts,
                    config.max_retries + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;

                // Exponential backoff with cap
                delay = (delay * 2).min(config.max_delay);
            }
        }
    }
}
