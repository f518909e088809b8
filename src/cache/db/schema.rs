//! Database schema initialization.

use anyhow::Result;
use sqlx::SqlitePool;

/// Initialize the message, label and association tables with their indexes.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- One row per Gmail message, keyed by X-GM-MSGID
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stable_id INTEGER NOT NULL,
            thread_id INTEGER,
            content BLOB,
            headers_only INTEGER NOT NULL DEFAULT 0,
            unread INTEGER NOT NULL DEFAULT 1,
            starred INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_stable_id ON messages(stable_id);
        CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, stable_id DESC);

        CREATE TABLE IF NOT EXISTS labels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_labels_name ON labels(name);

        -- uid is the per-label UID; NULL for labels only seen in X-GM-LABELS
        CREATE TABLE IF NOT EXISTS message_labels (
            message_id INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            label_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
            uid INTEGER,
            PRIMARY KEY (message_id, label_id)
        );

        CREATE INDEX IF NOT EXISTS idx_message_labels_label_uid ON message_labels(label_id, uid);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (1)")
        .execute(pool)
        .await?;

    Ok(())
}
