//! Reply-gate repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::postgres::PostgresError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ThreadGateRow {
    pub uri: String,
    pub post_uri: String,
    pub creator_did: String,
    pub allow_mentions: bool,
    pub allow_following: bool,
    pub allow_list_members: bool,
    pub list_uris: Option<serde_json::Value>,
}

impl ThreadGateRow {
    /// List URIs whose members are allowed to reply
    pub fn allowed_lists(&self) -> Vec<String> {
        self.list_uris
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_gate(
    pool: &PgPool,
    uri: &str,
    post_uri: &str,
    creator_did: &str,
    allow_mentions: bool,
    allow_following: bool,
    allow_list_members: bool,
    list_uris: Option<&serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
) -> Result<(), PostgresError> {
    sqlx::query(
        r#"
        INSERT INTO thread_gates
            (uri, post_uri, creator_did, allow_mentions, allow_following,
             allow_list_members, list_uris, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (post_uri) DO UPDATE
            SET uri = $1, allow_mentions = $4, allow_following = $5,
                allow_list_members = $6, list_uris = $7, indexed_at = now()
        "#,
    )
    .bind(uri)
    .bind(post_uri)
    .bind(creator_did)
    .bind(allow_mentions)
    .bind(allow_following)
    .bind(allow_list_members)
    .bind(list_uris)
    .bind(created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_gate(pool: &PgPool, uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM thread_gates WHERE uri = $1")
        .bind(uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Drop the gate attached to a post (processor cascade on post delete)
pub async fn delete_gate_for_post(pool: &PgPool, post_uri: &str) -> Result<u64, PostgresError> {
    let result = sqlx::query("DELETE FROM thread_gates WHERE post_uri = $1")
        .bind(post_uri)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn gate_for_post(
    pool: &PgPool,
    post_uri: &str,
) -> Result<Option<ThreadGateRow>, PostgresError> {
    let row = sqlx::query_as::<_, ThreadGateRow>(
        r#"
        SELECT uri, post_uri, creator_did, allow_mentions, allow_following,
               allow_list_members, list_uris
        FROM thread_gates
        WHERE post_uri = $1
        "#,
    )
    .bind(post_uri)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_lists_parses_json_array() {
        let row = ThreadGateRow {
            uri: "at://did:plc:a/app.bsky.feed.threadgate/1".into(),
            post_uri: "at://did:plc:a/app.bsky.feed.post/1".into(),
            creator_did: "did:plc:a".into(),
            allow_mentions: true,
            allow_following: false,
            allow_list_members: true,
            list_uris: Some(serde_json::json!(["at://l/1", "at://l/2"])),
        };
        assert_eq!(row.allowed_lists(), vec!["at://l/1", "at://l/2"]);
    }

    #[test]
    fn test_allowed_lists_empty_when_absent() {
        let row = ThreadGateRow {
            uri: "u".into(),
            post_uri: "p".into(),
            creator_did: "d".into(),
            allow_mentions: false,
            allow_following: false,
            allow_list_members: false,
            list_uris: None,
        };
        assert!(row.allowed_lists().is_empty());
    }
}
