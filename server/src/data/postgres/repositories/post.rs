//! Post repository
//!
//! Posts carry denormalized aggregate counts maintained by the processor.
//! Reply references are plain URI strings; a reply may be indexed before
//! its parent, so there is deliberately no foreign key on them.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct PostRow {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub text: String,
    pub reply_parent: Option<String>,
    pub reply_root: Option<String>,
    pub embed: Option<serde_json::Value>,
    pub facets: Option<serde_json::Value>,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

const POST_COLUMNS: &str = "uri, cid, author_did, text, reply_parent, reply_root, embed, facets, \
     like_count, repost_count, reply_count, created_at, indexed_at";

/// New post values for insertion
#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub uri: &'a str,
    pub cid: &'a str,
    pub author_did: &'a str,
    pub text: &'a str,
    pub reply_parent: Option<&'a str>,
    pub reply_root: Option<&'a str>,
    pub embed: Option<&'a serde_json::Value>,
    pub facets: Option<&'a serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Upsert a post; returns true if the row was newly inserted.
///
/// An identically-keyed replace updates content but keeps the aggregate
/// counts, which belong to the dependent rows rather than the record.
pub async fn upsert_post(pool: &PgPool, post: &NewPost<'_>) -> Result<bool, PostgresError> {
    // xmax = 0 distinguishes a fresh insert from a conflict-update
    let (inserted,): (bool,) = sqlx::query_as(
        r#"
        INSERT INTO posts (uri, cid, author_did, text, reply_parent, reply_root, embed, facets, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (uri) DO UPDATE
            SET cid = $2, text = $4, reply_parent = $5, reply_root = $6,
                embed = $7, facets = $8, indexed_at = now()
        RETURNING (xmax = 0)
        "#,
    )
    .bind(post.uri)
    .bind(post.cid)
    .bind(post.author_did)
    .bind(post.text)
    .bind(post.reply_parent)
    .bind(post.reply_root)
    .bind(post.embed)
    .bind(post.facets)
    .bind(post.created_at)
    .fetch_one(pool)
    .await?;
    Ok(inserted)
}

/// Delete a post row; returns the deleted row so the processor can cascade.
pub async fn delete_post(pool: &PgPool, uri: &str) -> Result<Option<PostRow>, PostgresError> {
    let row = sqlx::query_as::<_, PostRow>(&format!(
        "DELETE FROM posts WHERE uri = $1 RETURNING {}",
        POST_COLUMNS
    ))
    .bind(uri)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn post_exists(pool: &PgPool, uri: &str) -> Result<bool, PostgresError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM posts WHERE uri = $1)")
        .bind(uri)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Which of the given parents exist in the index (pending-buffer retry scan)
pub async fn existing_posts(
    pool: &PgPool,
    uris: &[String],
) -> Result<Vec<String>, PostgresError> {
    if uris.is_empty() {
        return Ok(Vec::new());
    }
    let rows: Vec<(String,)> = sqlx::query_as("SELECT uri FROM posts WHERE uri = ANY($1)")
        .bind(uris)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(uri,)| uri).collect())
}

pub async fn get_post(pool: &PgPool, uri: &str) -> Result<Option<PostRow>, PostgresError> {
    let row = sqlx::query_as::<_, PostRow>(&format!(
        "SELECT {} FROM posts WHERE uri = $1",
        POST_COLUMNS
    ))
    .bind(uri)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_posts(pool: &PgPool, uris: &[String]) -> Result<Vec<PostRow>, PostgresError> {
    if uris.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, PostRow>(&format!(
        "SELECT {} FROM posts WHERE uri = ANY($1)",
        POST_COLUMNS
    ))
    .bind(uris)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All direct replies to any of the given parents, oldest first
pub async fn children_of(
    pool: &PgPool,
    parents: &[String],
) -> Result<Vec<PostRow>, PostgresError> {
    if parents.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, PostRow>(&format!(
        "SELECT {} FROM posts WHERE reply_parent = ANY($1) ORDER BY created_at ASC NULLS LAST, uri",
        POST_COLUMNS
    ))
    .bind(parents)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Adjust denormalized aggregate counts, clamped at zero
pub async fn adjust_counts(
    pool: &PgPool,
    uri: &str,
    like_delta: i64,
    repost_delta: i64,
    reply_delta: i64,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        UPDATE posts
        SET like_count = GREATEST(like_count + $2, 0),
            repost_count = GREATEST(repost_count + $3, 0),
            reply_count = GREATEST(reply_count + $4, 0)
        WHERE uri = $1
        "#,
    )
    .bind(uri)
    .bind(like_delta)
    .bind(repost_delta)
    .bind(reply_delta)
    .execute(pool)
    .await?;
    Ok(())
}
