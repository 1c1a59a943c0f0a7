//! Full-text search repository
//!
//! Posts rank by `ts_rank` over the generated lexeme column; actors rank by
//! the maximum of a trigram similarity on the handle and a lexeme match on
//! handle/display-name/description. Typeahead is a case-folded prefix match
//! with LIKE-metacharacter escaping done by the caller.

use sqlx::PgPool;

use super::post::PostRow;
use crate::data::postgres::PostgresError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RankedPostRow {
    #[sqlx(flatten)]
    pub post: PostRow,
    pub rank: f32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RankedActorRow {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub rank: f32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TypeaheadActorRow {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
}

/// Rank posts for a plain-text query, descending. `max_rank` is the
/// pagination cursor: only rows ranked strictly below it are returned.
pub async fn search_posts(
    pool: &PgPool,
    query: &str,
    limit: i64,
    max_rank: Option<f32>,
) -> Result<Vec<RankedPostRow>, PostgresError> {
    let rows = sqlx::query_as::<_, RankedPostRow>(
        r#"
        SELECT uri, cid, author_did, text, reply_parent, reply_root, embed, facets,
               like_count, repost_count, reply_count, created_at, indexed_at,
               ts_rank(text_search, q)::float4 AS rank
        FROM posts, plainto_tsquery('simple', $1) q
        WHERE text_search @@ q
          AND ($3::float4 IS NULL OR ts_rank(text_search, q)::float4 < $3)
        ORDER BY rank DESC, uri
        LIMIT $2
        "#,
    )
    .bind(query)
    .bind(limit)
    .bind(max_rank)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Rank actors by the union of trigram similarity on handle and lexeme
/// match over profile fields.
pub async fn search_actors(
    pool: &PgPool,
    query: &str,
    limit: i64,
) -> Result<Vec<RankedActorRow>, PostgresError> {
    let rows = sqlx::query_as::<_, RankedActorRow>(
        r#"
        SELECT did, handle, display_name, description,
               GREATEST(
                   similarity(handle, $1),
                   ts_rank(search, plainto_tsquery('simple', $1))
               )::float4 AS rank
        FROM actors
        WHERE handle % $1
           OR search @@ plainto_tsquery('simple', $1)
        ORDER BY rank DESC, did
        LIMIT $2
        "#,
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Case-folded prefix match on handle. `pattern` must already be
/// LIKE-escaped and end with `%`.
pub async fn typeahead_actors(
    pool: &PgPool,
    pattern: &str,
    limit: i64,
) -> Result<Vec<TypeaheadActorRow>, PostgresError> {
    let rows = sqlx::query_as::<_, TypeaheadActorRow>(
        r#"
        SELECT did, handle, display_name
        FROM actors
        WHERE LOWER(handle) LIKE LOWER($1) ESCAPE '\'
        ORDER BY handle
        LIMIT $2
        "#,
    )
    .bind(pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
