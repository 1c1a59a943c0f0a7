//! Repost repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Insert a repost; returns true if newly inserted, false on a duplicate.
/// A missing subject surfaces as a foreign-key violation.
pub async fn insert_repost(
    pool: &PgPool,
    uri: &str,
    actor_did: &str,
    subject_uri: &str,
    created_at: Option<DateTime<Utc>>,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO reposts (uri, actor_did, subject_uri, created_at)
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

/// Delete a repost; returns (actor, subject) of the removed row.
pub async fn delete_repost(
    pool: &PgPool,
    uri: &str,
) -> Result<Option<(String, String)>, PostgresError> {
    let row: Option<(String, String)> =
        sqlx::query_as("DELETE FROM reposts WHERE uri = $1 RETURNING actor_did, subject_uri")
            .bind(uri)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

/// Remove every repost of a subject (processor-side cascade on post delete)
pub async fn delete_for_subject(pool: &PgPool, subject_uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM reposts WHERE subject_uri = $1")
        .bind(subject_uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
