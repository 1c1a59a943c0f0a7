//! Cursor repository
//!
//! Per-ingestion-stream resume positions. Writes are monotone
//! non-decreasing at the SQL level so a late flush can never move a
//! cursor backwards.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

pub async fn get_cursor(
    pool: &PgPool,
    name: &str,
) -> Result<Option<(i64, DateTime<Utc>)>, PostgresError> {
    let row: Option<(i64, DateTime<Utc>)> =
        sqlx::query_as("SELECT seq, updated_at FROM cursors WHERE name = $1")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

pub async fn set_cursor(pool: &PgPool, name: &str, seq: i64) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO cursors (name, seq, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (name) DO UPDATE
            SET seq = GREATEST(cursors.seq, EXCLUDED.seq), updated_at = now()
        "#,
    )
    .bind(name)
    .bind(seq)
    .execute(pool)
    .await?;
    Ok(())
}
