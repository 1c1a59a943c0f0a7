//! Block and mute repository
//!
//! Blocks are firehose records; mutes are private state written through the
//! external surface. Both feed the viewer filter on the read path.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Insert a block edge; at most one directed edge per (actor, subject).
/// Returns true if newly inserted.
pub async fn insert_block(
    pool: &PgPool,
    uri: &str,
    actor_did: &str,
    subject_did: &str,
    created_at: Option<DateTime<Utc>>,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO blocks (uri, actor_did, subject_did, created_at)
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

pub async fn delete_block(
    pool: &PgPool,
    uri: &str,
) -> Result<Option<(String, String)>, PostgresError> {
    let row: Option<(String, String)> =
        sqlx::query_as("DELETE FROM blocks WHERE uri = $1 RETURNING actor_did, subject_did")
            .bind(uri)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

/// DIDs the viewer has blocked
pub async fn blocked_set(pool: &PgPool, actor_did: &str) -> Result<HashSet<String>, PostgresError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT subject_did FROM blocks WHERE actor_did = $1")
            .bind(actor_did)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(did,)| did).collect())
}

/// Record a mute (idempotent)
pub async fn add_mute(
    pool: &PgPool,
    actor_did: &str,
    subject_did: &str,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO mutes (actor_did, subject_did)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(actor_did)
    .bind(subject_did)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove a mute (idempotent)
pub async fn remove_mute(
    pool: &PgPool,
    actor_did: &str,
    subject_did: &str,
) -> Result<bool, PostgresError> {
    let result = sqlx::query("DELETE FROM mutes WHERE actor_did = $1 AND subject_did = $2")
        .bind(actor_did)
        .bind(subject_did)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// DIDs the viewer has muted
pub async fn muted_set(pool: &PgPool, actor_did: &str) -> Result<HashSet<String>, PostgresError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT subject_did FROM mutes WHERE actor_did = $1")
            .bind(actor_did)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(did,)| did).collect())
}
