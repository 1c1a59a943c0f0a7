//! Label repository
//!
//! Label rows are append-only; the effective set for a subject is derived
//! by replaying them in timestamp order (see `domain::labels`).

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LabelRow {
    pub src: String,
    pub subject: String,
    pub val: String,
    pub neg: bool,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_label(
    pool: &PgPool,
    src: &str,
    subject: &str,
    val: &str,
    neg: bool,
    created_at: Option<DateTime<Utc>>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO labels (src, subject, val, neg, created_at)
        VALUES ($1, $2, $3, $4, coalesce($5, now()))
        "#,
    )
    .bind(src)
    .bind(subject)
    .bind(val)
    .bind(neg)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// All label records for a subject in replay order
pub async fn labels_for_subject(
    pool: &PgPool,
    subject: &str,
) -> Result<Vec<LabelRow>, PostgresError> {
    let rows = sqlx::query_as::<_, LabelRow>(
        r#"
        SELECT src, subject, val, neg, created_at
        FROM labels
        WHERE subject = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(subject)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All label records for any of the subjects, in replay order per subject
pub async fn labels_for_subjects(
    pool: &PgPool,
    subjects: &[String],
) -> Result<Vec<LabelRow>, PostgresError> {
    if subjects.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, LabelRow>(
        r#"
        SELECT src, subject, val, neg, created_at
        FROM labels
        WHERE subject = ANY($1)
        ORDER BY subject, created_at ASC, id ASC
        "#,
    )
    .bind(subjects)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
