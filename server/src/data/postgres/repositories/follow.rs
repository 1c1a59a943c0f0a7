//! Follow repository

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Insert a follow edge; at most one directed edge per (actor, subject).
/// Returns true if newly inserted.
pub async fn insert_follow(
    pool: &PgPool,
    uri: &str,
    actor_did: &str,
    subject_did: &str,
    created_at: Option<DateTime<Utc>>,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO follows (uri, actor_did, subject_did, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(uri)
    .bind(actor_did)
    .bind(subject_did)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_follow(
    pool: &PgPool,
    uri: &str,
) -> Result<Option<(String, String)>, PostgresError> {
    let row: Option<(String, String)> =
        sqlx::query_as("DELETE FROM follows WHERE uri = $1 RETURNING actor_did, subject_did")
            .bind(uri)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

/// DIDs the given actor follows, as a hash set for O(1) membership checks
pub async fn following_set(pool: &PgPool, actor_did: &str) -> Result<HashSet<String>, PostgresError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT subject_did FROM follows WHERE actor_did = $1")
            .bind(actor_did)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(did,)| did).collect())
}
