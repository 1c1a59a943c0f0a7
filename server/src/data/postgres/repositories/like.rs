//! Like repository
//!
//! A like row existing implies its subject post row exists: the foreign key
//! enforces it, and insertion order is the processor's job via the pending
//! buffer.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Insert a like; returns true if newly inserted, false on a duplicate
/// (same URI or same (actor, subject) pair). A missing subject surfaces as
/// a foreign-key violation for the caller to buffer.
pub async fn insert_like(
    pool: &PgPool,
    uri: &str,
    actor_did: &str,
    subject_uri: &str,
    created_at: Option<DateTime<Utc>>,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO likes (uri, actor_did, subject_uri, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(uri)
    .bind(actor_did)
    .bind(subject_uri)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete a like; returns (actor, subject) of the removed row for
/// aggregate upkeep.
pub async fn delete_like(
    pool: &PgPool,
    uri: &str,
) -> Result<Option<(String, String)>, PostgresError> {
    let row: Option<(String, String)> =
        sqlx::query_as("DELETE FROM likes WHERE uri = $1 RETURNING actor_did, subject_uri")
            .bind(uri)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

/// Remove every like of a subject (processor-side cascade on post delete)
pub async fn delete_for_subject(pool: &PgPool, subject_uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM likes WHERE subject_uri = $1")
        .bind(subject_uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
