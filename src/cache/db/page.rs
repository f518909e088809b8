//! Threaded, paginated view over one label.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use super::message::{CachedMessage, row_to_message};

/// One row of a threaded page: the newest labelled message of a thread and
/// its UID in that label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRow {
    pub uid: Option<u32>,
    pub message: CachedMessage,
}

/// One row per thread among messages carrying `label`, represented by the
/// numerically greatest stable id and ordered newest thread first.
pub async fn threaded_page(
    pool: &SqlitePool,
    label: &str,
    skip: usize,
    page_size: usize,
) -> Result<Vec<PageRow>> {
    let rows = sqlx::query(
        r#"
        WITH eligible AS (
            SELECT m.stable_id, m.thread_id, m.content, m.headers_only, m.unread, m.starred,
                   ml.uid,
                   ROW_NUMBER() OVER (
                       PARTITION BY COALESCE(m.thread_id, m.stable_id)
                       ORDER BY m.stable_id DESC
                   ) AS rn
            FROM messages m
            JOIN message_labels ml ON ml.message_id = m.id
            JOIN labels l ON l.id = ml.label_id
            WHERE l.name = ?
        )
        SELECT stable_id, thread_id, content, headers_only, unread, starred, uid
        FROM eligible
        WHERE rn = 1
        ORDER BY stable_id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(label)
    .bind(page_size as i64)
    .bind(skip as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PageRow {
            uid: row.get::<Option<i64>, _>("uid").map(|u| u as u32),
            message: row_to_message(row),
        })
        .collect())
}

/// Number of distinct threads carrying `label`.
pub async fn thread_count(pool: &SqlitePool, label: &str) -> Result<usize> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(DISTINCT COALESCE(m.thread_id, m.stable_id))
        FROM messages m
        JOIN message_labels ml ON ml.message_id = m.id
        JOIN labels l ON l.id = ml.label_id
        WHERE l.name = ?
        "#,
    )
    .bind(label)
    .fetch_one(pool)
    .await?;
    Ok(count as usize)
}
