//! Search reads
//!
//! Thin service over the full-text repositories. Post search paginates by
//! trailing rank; actor search unions trigram and lexeme matches; typeahead
//! is a case-folded prefix match with LIKE metacharacters escaped.

use std::sync::Arc;

use crate::data::postgres::repositories::search::{
    self, RankedActorRow, RankedPostRow, TypeaheadActorRow,
};
use crate::data::postgres::{PostgresError, PostgresService};
use crate::utils::text::escape_like;

/// Page of ranked posts plus the cursor for the next page
#[derive(Debug)]
pub struct PostSearchPage {
    pub posts: Vec<RankedPostRow>,
    /// Trailing rank value; None marks the end of pagination
    pub cursor: Option<String>,
}

pub struct SearchService {
    postgres: Arc<PostgresService>,
}

impl SearchService {
    pub fn new(postgres: Arc<PostgresService>) -> Self {
        Self { postgres }
    }

    /// Full-text post search. An empty query yields an empty page; a
    /// cursor that does not parse is treated as pagination end.
    pub async fn search_posts(
        &self,
        query: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PostSearchPage, PostgresError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(PostSearchPage {
                posts: Vec::new(),
                cursor: None,
            });
        }

        let max_rank = match cursor {
            None => None,
            Some(raw) => match raw.parse::<f32>() {
                Ok(rank) => Some(rank),
                Err(_) => {
                    return Ok(PostSearchPage {
                        posts: Vec::new(),
                        cursor: None,
                    });
                }
            },
        };

        let posts = search::search_posts(self.postgres.pool(), query, limit, max_rank).await?;
        let cursor = if posts.len() as i64 == limit {
            posts.last().map(|row| row.rank.to_string())
        } else {
            None
        };

        Ok(PostSearchPage { posts, cursor })
    }

    /// Actor search; rank is the maximum of the trigram and lexeme scores
    pub async fn search_actors(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<RankedActorRow>, PostgresError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        search::search_actors(self.postgres.pool(), query, limit).await
    }

    /// Handle prefix typeahead
    pub async fn typeahead(
        &self,
        prefix: &str,
        limit: i64,
    ) -> Result<Vec<TypeaheadActorRow>, PostgresError> {
        let prefix = prefix.trim().trim_start_matches('@');
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("{}%", escape_like(prefix));
        search::typeahead_actors(self.postgres.pool(), &pattern, limit).await
    }
}
