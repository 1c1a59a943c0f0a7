//! List and list-item repository

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Upsert a list; returns true if newly inserted.
pub async fn upsert_list(
    pool: &PgPool,
    uri: &str,
    creator_did: &str,
    purpose: &str,
    name: &str,
    description: Option<&str>,
    created_at: Option<DateTime<Utc>>,
) -> Result<bool, PostgresError> {
    let (inserted,): (bool,) = sqlx::query_as(
        r#"
        INSERT INTO lists (uri, creator_did, purpose, name, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (uri) DO UPDATE
            SET purpose = $3, name = $4, description = $5, indexed_at = now()
        RETURNING (xmax = 0)
        "#,
    )
    .bind(uri)
    .bind(creator_did)
    .bind(purpose)
    .bind(name)
    .bind(description)
    .bind(created_at)
    .fetch_one(pool)
    .await?;
    Ok(inserted)
}

pub async fn delete_list(pool: &PgPool, uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM lists WHERE uri = $1")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn list_exists(pool: &PgPool, uri: &str) -> Result<bool, PostgresError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM lists WHERE uri = $1)")
        .bind(uri)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Which of the given list URIs exist in the index (pending-buffer retry scan)
pub async fn existing_lists(
    pool: &PgPool,
    uris: &[String],
) -> Result<Vec<String>, PostgresError> {
    if uris.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(String,)> = sqlx::query_as("SELECT uri FROM lists WHERE uri = ANY($1)")
        .bind(uris)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(uri,)| uri).collect())
}

/// Insert a list item; the list must already exist, otherwise a foreign-key
/// violation surfaces for the caller to buffer. Returns true if newly inserted.
pub async fn insert_list_item(
    pool: &PgPool,
    uri: &str,
    list_uri: &str,
    subject_did: &str,
    created_at: Option<DateTime<Utc>>,
) -> Result<bool, PostgresError> {
    let result = sqlx::query(
        r#"
        INSERT INTO list_items (uri, list_uri, subject_did, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(uri)
    .bind(list_uri)
    .bind(subject_did)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_list_item(pool: &PgPool, uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM list_items WHERE uri = $1")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Remove every item of a list (processor-side cascade on list delete)
pub async fn delete_items_of_list(pool: &PgPool, list_uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM list_items WHERE list_uri = $1")
        .bind(list_uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Union of members of all given lists, as a hash set
pub async fn members_of_lists(
    pool: &PgPool,
    list_uris: &[String],
) -> Result<HashSet<String>, PostgresError> {
    if list_uris.is_empty() {
        return Ok(HashSet::new());
    }
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT subject_did FROM list_items WHERE list_uri = ANY($1)")
            .bind(list_uris)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(did,)| did).collect())
}
