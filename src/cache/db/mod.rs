//! SQLite mirror of Gmail messages, labels and their associations.
//!
//! This module is split into:
//! - `mod.rs` - Cache struct, connection pool, delegating API
//! - `schema.rs` - Database schema initialization
//! - `message.rs` - Message rows and the tri-mode write
//! - `label.rs` - Labels, associations and pruning sweeps
//! - `page.rs` - The threaded page query
//!
//! The cache performs no retries; callers wrap writes with
//! [`crate::retry::with_retry`] where lock contention is expected.

mod label;
mod message;
mod page;
mod schema;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::constants::DB_MAX_CONNECTIONS;

pub use message::{NewMessage, WriteMode, WriteOutcome};
pub use page::PageRow;

/// Gmail ids are unsigned 64-bit but always below 2^63 in practice; the
/// conversion fails loudly rather than wrapping and breaking ordering.
fn to_db_id(id: u64) -> Result<i64> {
    i64::try_from(id).with_context(|| format!("message id {} does not fit in INTEGER", id))
}

pub struct Cache {
    pool: SqlitePool,
}

impl Cache {
    /// Get a reference to the connection pool (for tests and advanced usage).
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Cache {
    pub async fn open(path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", path.display());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(DB_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("Failed to create connection pool")?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to create in-memory connection pool")?;

        schema::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    //
    // Message Operations (delegated to message module)
    //

    pub async fn upsert_message(&self, msg: &NewMessage<'_>, mode: WriteMode) -> Result<WriteOutcome> {
        message::upsert_message(&self.pool, msg, mode).await
    }

    pub async fn message_exists(&self, stable_id: u64) -> Result<bool> {
        message::message_exists(&self.pool, stable_id).await
    }

    #[cfg(test)]
    pub async fn get_message(&self, stable_id: u64) -> Result<Option<message::CachedMessage>> {
        message::get_message(&self.pool, stable_id).await
    }

    pub async fn needs_body(&self, stable_id: u64) -> Result<bool> {
        message::needs_body(&self.pool, stable_id).await
    }

    //
    // Label Operations (delegated to label module)
    //

    pub async fn upsert_label(&self, name: &str) -> Result<i64> {
        label::upsert_label(&self.pool, name).await
    }

    pub async fn link_label(&self, stable_id: u64, label: &str, uid: Option<u32>) -> Result<bool> {
        label::link_label(&self.pool, stable_id, label, uid).await
    }

    pub async fn prune_label_associations(&self, label: &str, keep: &[u32]) -> Result<u64> {
        label::prune_label_associations(&self.pool, label, keep).await
    }

    pub async fn prune_in_window(
        &self,
        label: &str,
        min_uid: u32,
        max_uid: u32,
        keep: &[u32],
    ) -> Result<u64> {
        label::prune_in_window(&self.pool, label, min_uid, max_uid, keep).await
    }

    pub async fn prune_unreported_labels(
        &self,
        stable_id: u64,
        reported: &[String],
        target: &str,
    ) -> Result<u64> {
        label::prune_unreported_labels(&self.pool, stable_id, reported, target).await
    }

    #[cfg(test)]
    pub async fn labels_for_message(&self, stable_id: u64) -> Result<Vec<(String, Option<u32>)>> {
        label::labels_for_message(&self.pool, stable_id).await
    }

    pub async fn list_labels(&self) -> Result<Vec<String>> {
        label::list_labels(&self.pool).await
    }

    //
    // View Operations (delegated to page module)
    //

    pub async fn threaded_page(
        &self,
        label: &str,
        skip: usize,
        page_size: usize,
    ) -> Result<Vec<PageRow>> {
        page::threaded_page(&self.pool, label, skip, page_size).await
    }

    pub async fn thread_count(&self, label: &str) -> Result<usize> {
        page::thread_count(&self.pool, label).await
    }
}
