//! Feed generator, starter pack, and labeler service repositories.
//! All three are plain URI-keyed upserts.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

pub async fn upsert_feed_generator(
    pool: &PgPool,
    uri: &str,
    creator_did: &str,
    did: &str,
    display_name: &str,
    description: Option<&str>,
    created_at: Option<DateTime<Utc>>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO feed_generators (uri, creator_did, did, display_name, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (uri) DO UPDATE
            SET did = $3, display_name = $4, description = $5, indexed_at = now()
        "#,
    )
    .bind(uri)
    .bind(creator_did)
    .bind(did)
    .bind(display_name)
    .bind(description)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_feed_generator(pool: &PgPool, uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM feed_generators WHERE uri = $1")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn upsert_starter_pack(
    pool: &PgPool,
    uri: &str,
    creator_did: &str,
    name: &str,
    description: Option<&str>,
    list_uri: Option<&str>,
    created_at: Option<DateTime<Utc>>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO starter_packs (uri, creator_did, name, description, list_uri, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (uri) DO UPDATE
            SET name = $3, description = $4, list_uri = $5, indexed_at = now()
        "#,
    )
    .bind(uri)
    .bind(creator_did)
    .bind(name)
    .bind(description)
    .bind(list_uri)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_starter_pack(pool: &PgPool, uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM starter_packs WHERE uri = $1")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn upsert_labeler_service(
    pool: &PgPool,
    uri: &str,
    creator_did: &str,
    policies: Option<&serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO labeler_services (uri, creator_did, policies, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (uri) DO UPDATE SET policies = $3, indexed_at = now()
        "#,
    )
    .bind(uri)
    .bind(creator_did)
    .bind(policies)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_labeler_service(pool: &PgPool, uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM labeler_services WHERE uri = $1")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
