//! Labels and message-label associations.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use super::to_db_id;

/// Get or create a label, returning its row id.
pub async fn upsert_label(pool: &SqlitePool, name: &str) -> Result<i64> {
    sqlx::query("INSERT INTO labels (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;

    let id: i64 = sqlx::query_scalar("SELECT id FROM labels WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Associate a message with a label. An existing association keeps its UID;
/// only a missing UID may be filled in. Returns whether a row changed.
pub async fn link_label(
    pool: &SqlitePool,
    stable_id: u64,
    label: &str,
    uid: Option<u32>,
) -> Result<bool> {
    let label_id = upsert_label(pool, label).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO message_labels (message_id, label_id, uid)
        SELECT id, ?, ? FROM messages WHERE stable_id = ?
        ON CONFLICT(message_id, label_id) DO UPDATE SET uid = excluded.uid
        WHERE message_labels.uid IS NULL AND excluded.uid IS NOT NULL
        "#,
    )
    .bind(label_id)
    .bind(uid.map(i64::from))
    .bind(to_db_id(stable_id)?)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn uid_json(uids: &[u32]) -> Result<String> {
    Ok(serde_json::to_string(uids)?)
}

/// Delete every association of `label` whose UID is not in `keep`.
/// Associations without a UID are left alone.
pub async fn prune_label_associations(pool: &SqlitePool, label: &str, keep: &[u32]) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM message_labels
        WHERE label_id = (SELECT id FROM labels WHERE name = ?)
          AND uid IS NOT NULL
          AND uid NOT IN (SELECT value FROM json_each(?))
        "#,
    )
    .bind(label)
    .bind(uid_json(keep)?)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Like [`prune_label_associations`] but only for UIDs within
/// `min_uid..=max_uid`.
pub async fn prune_in_window(
    pool: &SqlitePool,
    label: &str,
    min_uid: u32,
    max_uid: u32,
    keep: &[u32],
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM message_labels
        WHERE label_id = (SELECT id FROM labels WHERE name = ?)
          AND uid BETWEEN ? AND ?
          AND uid NOT IN (SELECT value FROM json_each(?))
        "#,
    )
    .bind(label)
    .bind(i64::from(min_uid))
    .bind(i64::from(max_uid))
    .bind(uid_json(keep)?)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Drop a message's UID-less associations whose label the server no longer
/// reports. `target` is never pruned here.
pub async fn prune_unreported_labels(
    pool: &SqlitePool,
    stable_id: u64,
    reported: &[String],
    target: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM message_labels
        WHERE message_id = (SELECT id FROM messages WHERE stable_id = ?)
          AND uid IS NULL
          AND label_id IN (
              SELECT id FROM labels
              WHERE name <> ? COLLATE NOCASE
                AND name NOT IN (SELECT value FROM json_each(?))
          )
        "#,
    )
    .bind(to_db_id(stable_id)?)
    .bind(target)
    .bind(serde_json::to_string(reported)?)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Labels currently associated with a message, with their UIDs.
pub async fn labels_for_message(pool: &SqlitePool, stable_id: u64) -> Result<Vec<(String, Option<u32>)>> {
    let rows = sqlx::query(
        r#"
        SELECT l.name, ml.uid FROM message_labels ml
        JOIN labels l ON l.id = ml.label_id
        JOIN messages m ON m.id = ml.message_id
        WHERE m.stable_id = ?
        ORDER BY l.name
        "#,
    )
    .bind(to_db_id(stable_id)?)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get::<String, _>("name"),
                row.get::<Option<i64>, _>("uid").map(|u| u as u32),
            )
        })
        .collect())
}

/// Names of all labels known to the cache.
pub async fn list_labels(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM labels ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(names)
}
