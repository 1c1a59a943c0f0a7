//! Actor repository
//!
//! Actors are created on first sighting with a placeholder handle and
//! updated by identity events and profile records. They are never deleted
//! by ordinary traffic; account deactivation is a flag. Full deletion only
//! happens for accounts reported as `deleted` upstream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

/// Placeholder until an identity event supplies the real handle
pub const PLACEHOLDER_HANDLE: &str = "handle.invalid";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActorRow {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar_cid: Option<String>,
    pub active: bool,
    pub status: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

/// Create the actor row if it does not exist yet
pub async fn ensure_actor(pool: &PgPool, did: &str) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO actors (did, handle)
        VALUES ($1, $2)
        ON CONFLICT (did) DO NOTHING
        "#,
    )
    .bind(did)
    .bind(PLACEHOLDER_HANDLE)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert the handle for a DID (identity event)
pub async fn upsert_handle(pool: &PgPool, did: &str, handle: &str) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO actors (did, handle, indexed_at)
        VALUES ($1, $2, now())
        ON CONFLICT (did) DO UPDATE SET handle = $2, indexed_at = now()
        "#,
    )
    .bind(did)
    .bind(handle)
    .execute(pool)
    .await?;
    Ok(())
}

/// Upsert profile fields for a DID (profile record)
pub async fn upsert_profile(
    pool: &PgPool,
    did: &str,
    display_name: Option<&str>,
    description: Option<&str>,
    avatar_cid: Option<&str>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO actors (did, handle, display_name, description, avatar_cid)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (did) DO UPDATE
            SET display_name = $3, description = $4, avatar_cid = $5, indexed_at = now()
        "#,
    )
    .bind(did)
    .bind(PLACEHOLDER_HANDLE)
    .bind(display_name)
    .bind(description)
    .bind(avatar_cid)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear profile fields (profile record deleted)
pub async fn clear_profile(pool: &PgPool, did: &str) -> Result<(), PostgresError> {
    sqlx::query(
        "UPDATE actors SET display_name = NULL, description = NULL, avatar_cid = NULL WHERE did = $1",
    )
    .bind(did)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flip the account state (account event)
pub async fn set_account_status(
    pool: &PgPool,
    did: &str,
    active: bool,
    status: Option<&str>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO actors (did, handle, active, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (did) DO UPDATE SET active = $3, status = $4, indexed_at = now()
        "#,
    )
    .bind(did)
    .bind(PLACEHOLDER_HANDLE)
    .bind(active)
    .bind(status)
    .execute(pool)
    .await?;
    Ok(())
}

/// Remove the actor row entirely (account reported deleted upstream)
pub async fn delete_actor(pool: &PgPool, did: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM actors WHERE did = $1")
        .bind(did)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn get_actor(pool: &PgPool, did: &str) -> Result<Option<ActorRow>, PostgresError> {
    let row = sqlx::query_as::<_, ActorRow>(
        r#"
        SELECT did, handle, display_name, description, avatar_cid, active, status, indexed_at
        FROM actors WHERE did = $1
        "#,
    )
    .bind(did)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Resolve handles to DIDs (for mention notifications).
/// Unknown handles are simply absent from the result.
pub async fn dids_for_handles(
    pool: &PgPool,
    handles: &[String],
) -> Result<HashMap<String, String>, PostgresError> {
    if handles.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT handle, did FROM actors WHERE handle = ANY($1)")
            .bind(handles)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}
