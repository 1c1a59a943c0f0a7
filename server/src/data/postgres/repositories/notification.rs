//! Notification repository
//!
//! Notifications are emitted by the processor after the triggering row is
//! durably written, so a notification never references a row that was
//! not indexed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Why a notification was created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationReason {
    Reply,
    Mention,
    Like,
    Repost,
    Follow,
}

impl NotificationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationReason::Reply => "reply",
            NotificationReason::Mention => "mention",
            NotificationReason::Like => "like",
            NotificationReason::Repost => "repost",
            NotificationReason::Follow => "follow",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_did: String,
    pub author_did: String,
    pub reason: String,
    pub subject_uri: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_notification(
    pool: &PgPool,
    recipient_did: &str,
    author_did: &str,
    reason: NotificationReason,
    subject_uri: Option<&str>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO notifications (recipient_did, author_did, reason, subject_uri)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(recipient_did)
    .bind(author_did)
    .bind(reason.as_str())
    .bind(subject_uri)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest notifications for a recipient
pub async fn list_for_recipient(
    pool: &PgPool,
    recipient_did: &str,
    limit: i64,
) -> Result<Vec<NotificationRow>, PostgresError> {
    let rows = sqlx::query_as::<_, NotificationRow>(
        r#"
        SELECT id, recipient_did, author_did, reason, subject_uri, seen, created_at
        FROM notifications
        WHERE recipient_did = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(recipient_did)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn unseen_count(pool: &PgPool, recipient_did: &str) -> Result<i64, PostgresError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE recipient_did = $1 AND NOT seen",
    )
    .bind(recipient_did)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Mark everything up to `before` as seen
pub async fn mark_seen(
    pool: &PgPool,
    recipient_did: &str,
    before: DateTime<Utc>,
) -> Result<u64, PostgresError> {
    let result = sqlx::query(
        "UPDATE notifications SET seen = TRUE WHERE recipient_did = $1 AND created_at <= $2",
    )
    .bind(recipient_did)
    .bind(before)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Drop notifications that reference a deleted subject
pub async fn delete_for_subject(pool: &PgPool, subject_uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM notifications WHERE subject_uri = $1")
        .bind(subject_uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings() {
        assert_eq!(NotificationReason::Reply.as_str(), "reply");
        assert_eq!(NotificationReason::Mention.as_str(), "mention");
        assert_eq!(NotificationReason::Like.as_str(), "like");
        assert_eq!(NotificationReason::Repost.as_str(), "repost");
        assert_eq!(NotificationReason::Follow.as_str(), "follow");
    }
}
