//! Message row writes and lookups.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::to_db_id;

/// How [`upsert_message`] treats existing and missing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create the row; an existing row is left alone.
    InsertOnly,
    /// Refresh an existing row; a missing row is not created.
    UpdateOnly,
    /// Create or refresh.
    Upsert,
}

/// What a write actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// The mode did not allow a write for this row.
    Skipped,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        matches!(self, WriteOutcome::Inserted | WriteOutcome::Updated)
    }
}

/// Incoming message state as observed on the server.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub stable_id: u64,
    pub thread_id: Option<u64>,
    pub content: Option<&'a [u8]>,
    /// `content` holds only the header block.
    pub headers_only: bool,
    pub unread: bool,
    pub starred: bool,
}

/// A message row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub stable_id: u64,
    pub thread_id: Option<u64>,
    pub content: Option<Vec<u8>>,
    pub headers_only: bool,
    pub unread: bool,
    pub starred: bool,
}

impl CachedMessage {
    /// True until full content has been stored.
    #[cfg(test)]
    pub fn needs_body(&self) -> bool {
        self.content.is_none() || self.headers_only
    }
}

pub(super) fn row_to_message(row: &SqliteRow) -> CachedMessage {
    CachedMessage {
        stable_id: row.get::<i64, _>("stable_id") as u64,
        thread_id: row.get::<Option<i64>, _>("thread_id").map(|t| t as u64),
        content: row.get("content"),
        headers_only: row.get("headers_only"),
        unread: row.get("unread"),
        starred: row.get("starred"),
    }
}

/// Write a message according to `mode`, touching the row only when
/// something differs. Full content replaces missing or header-only content;
/// stored full content is never downgraded.
pub async fn upsert_message(
    pool: &SqlitePool,
    msg: &NewMessage<'_>,
    mode: WriteMode,
) -> Result<WriteOutcome> {
    let stable_id = to_db_id(msg.stable_id)?;
    let thread_id = msg.thread_id.map(to_db_id).transpose()?;

    let mut tx = pool.begin().await?;

    let existing = sqlx::query(
        "SELECT id, stable_id, thread_id, NULL AS content, content IS NOT NULL AS has_content, \
         headers_only, unread, starred FROM messages WHERE stable_id = ?",
    )
    .bind(stable_id)
    .fetch_optional(&mut *tx)
    .await?;

    let outcome = match (existing, mode) {
        (None, WriteMode::UpdateOnly) => WriteOutcome::Skipped,
        (Some(_), WriteMode::InsertOnly) => WriteOutcome::Skipped,
        (None, _) => {
            sqlx::query(
                r#"
                INSERT INTO messages (stable_id, thread_id, content, headers_only, unread, starred)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(stable_id)
            .bind(thread_id)
            .bind(msg.content)
            .bind(msg.content.is_some() && msg.headers_only)
            .bind(msg.unread)
            .bind(msg.starred)
            .execute(&mut *tx)
            .await?;
            WriteOutcome::Inserted
        }
        (Some(row), _) => {
            let id: i64 = row.get("id");
            let has_content: bool = row.get("has_content");
            let current = row_to_message(&row);

            let replace_content = match msg.content {
                Some(_) => !has_content || (current.headers_only && !msg.headers_only),
                None => false,
            };
            let thread_changed = thread_id.is_some() && msg.thread_id != current.thread_id;
            let flags_changed = msg.unread != current.unread || msg.starred != current.starred;

            if !replace_content && !thread_changed && !flags_changed {
                WriteOutcome::Unchanged
            } else {
                sqlx::query(
                    "UPDATE messages SET thread_id = COALESCE(?, thread_id), unread = ?, starred = ? WHERE id = ?",
                )
                .bind(thread_id)
                .bind(msg.unread)
                .bind(msg.starred)
                .bind(id)
                .execute(&mut *tx)
                .await?;

                if replace_content {
                    sqlx::query("UPDATE messages SET content = ?, headers_only = ? WHERE id = ?")
                        .bind(msg.content)
                        .bind(msg.headers_only)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOutcome::Updated
            }
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

pub async fn message_exists(pool: &SqlitePool, stable_id: u64) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE stable_id = ?)")
        .bind(to_db_id(stable_id)?)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

#[cfg(test)]
pub async fn get_message(pool: &SqlitePool, stable_id: u64) -> Result<Option<CachedMessage>> {
    let row = sqlx::query(
        "SELECT stable_id, thread_id, content, headers_only, unread, starred \
         FROM messages WHERE stable_id = ?",
    )
    .bind(to_db_id(stable_id)?)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_message))
}

/// True when the message is missing or holds no full content yet.
pub async fn needs_body(pool: &SqlitePool, stable_id: u64) -> Result<bool> {
    let has_body: Option<bool> = sqlx::query_scalar(
        "SELECT content IS NOT NULL AND headers_only = 0 FROM messages WHERE stable_id = ?",
    )
    .bind(to_db_id(stable_id)?)
    .fetch_optional(pool)
    .await?;
    Ok(!has_body.unwrap_or(false))
}
