//! Thread assembly
//!
//! Walks ancestors from the anchor up to the root, then descendants
//! breadth-first to a bounded depth, enforcing the root's reply gate and
//! the viewer's blocks, mutes, and label hide-set. The anchor and all
//! reachable ancestors are always returned; filtering applies only to
//! descendants, and a rejected reply removes its entire subtree (its
//! children are never even fetched).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::constants::{THREAD_DEFAULT_DEPTH, THREAD_DEFAULT_PARENT_HEIGHT};
use crate::data::cache::{CacheKey, CacheService, TTL_MUTES_BLOCKS, TTL_THREAD_CONTEXT};
use crate::data::postgres::repositories::post::{self, PostRow};
use crate::data::postgres::repositories::{block, label, thread_gate};
use crate::data::postgres::{PostgresError, PostgresService};
use crate::domain::labels::effective_labels;
use crate::domain::metrics::{Metrics, keys};
use crate::domain::thread::gate::{self, AllowSets, GateConfig};

/// One post and its accepted replies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadNode {
    pub post: PostRow,
    pub replies: Vec<ThreadNode>,
}

/// An assembled thread view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    /// The anchor with its descendant tree attached
    pub anchor: ThreadNode,
    /// Ancestors from the anchor's parent up to the topmost reachable post
    pub ancestors: Vec<PostRow>,
}

/// Who is looking, and which label values they hide
#[derive(Debug, Clone, Default)]
pub struct ViewerContext {
    pub did: String,
    pub hidden_labels: HashSet<String>,
}

/// Cached mute/block sets for a viewer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ViewerGraph {
    blocked: Vec<String>,
    muted: Vec<String>,
}

pub struct ThreadAssembler {
    postgres: Arc<PostgresService>,
    cache: Arc<CacheService>,
    metrics: Arc<Metrics>,
}

impl ThreadAssembler {
    pub fn new(
        postgres: Arc<PostgresService>,
        cache: Arc<CacheService>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            postgres,
            cache,
            metrics,
        }
    }

    /// Assemble the thread around `anchor_uri` with default depths
    pub async fn assemble(
        &self,
        anchor_uri: &str,
        viewer: Option<&ViewerContext>,
    ) -> Result<Option<Thread>, PostgresError> {
        self.assemble_with_depths(
            anchor_uri,
            THREAD_DEFAULT_PARENT_HEIGHT,
            THREAD_DEFAULT_DEPTH,
            viewer,
        )
        .await
    }

    /// Assemble with explicit ancestor height and descendant depth.
    /// An unknown anchor yields an empty result.
    pub async fn assemble_with_depths(
        &self,
        anchor_uri: &str,
        parent_height: usize,
        depth: usize,
        viewer: Option<&ViewerContext>,
    ) -> Result<Option<Thread>, PostgresError> {
        let pool = self.postgres.pool();

        let Some(anchor) = post::get_post(pool, anchor_uri).await? else {
            return Ok(None);
        };

        // A root-anchored, viewer-free assembly is cacheable under the
        // root's thread-context key (the processor invalidates that key)
        let cacheable = viewer.is_none()
            && anchor.reply_parent.is_none()
            && parent_height == THREAD_DEFAULT_PARENT_HEIGHT
            && depth == THREAD_DEFAULT_DEPTH;
        let cache_key = CacheKey::thread_context(anchor_uri);
        if cacheable && let Some(cached) = self.cache.get::<Thread>(&cache_key).await {
            return Ok(Some(cached));
        }

        // 1. Ancestor walk: parent URIs up to the root or the height bound
        let mut ancestors: Vec<PostRow> = Vec::new();
        let mut next_parent = anchor.reply_parent.clone();
        let mut seen: HashSet<String> = HashSet::from([anchor.uri.clone()]);
        while ancestors.len() < parent_height {
            let Some(parent_uri) = next_parent.take() else {
                break;
            };
            if !seen.insert(parent_uri.clone()) {
                break; // reference cycle; traversal is explicit and bounded
            }
            let Some(parent) = post::get_post(pool, &parent_uri).await? else {
                break;
            };
            next_parent = parent.reply_parent.clone();
            ancestors.push(parent);
        }

        // The root is the topmost reachable post
        let root = ancestors.last().unwrap_or(&anchor);

        // 2. Gate configuration and the allow-sets it needs
        let gate_ctx: Option<(GateConfig, AllowSets, String)> =
            match thread_gate::gate_for_post(pool, &root.uri).await? {
                Some(row) => {
                    let config = GateConfig::from(&row);
                    let sets = gate::load_allow_sets(
                        pool,
                        &root.author_did,
                        root.facets.as_ref(),
                        &config,
                    )
                    .await?;
                    Some((config, sets, root.author_did.clone()))
                }
                None => None,
            };

        // Viewer graph, loaded once per assembly
        let viewer_graph = match viewer {
            Some(ctx) => Some(self.viewer_graph(&ctx.did).await?),
            None => None,
        };

        // 3. Descendant BFS; rejected nodes prune their whole subtree
        let mut children: HashMap<String, Vec<PostRow>> = HashMap::new();
        let mut frontier = vec![anchor.uri.clone()];
        let mut visited: HashSet<String> = HashSet::from([anchor.uri.clone()]);

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let rows = post::children_of(pool, &frontier).await?;
            let candidate_labels = self.labels_for(viewer, &rows).await?;

            let mut next = Vec::new();
            for row in rows {
                if !visited.insert(row.uri.clone()) {
                    continue;
                }

                if let Some((config, sets, root_author)) = gate_ctx.as_ref()
                    && !gate::reply_allowed(root_author, config, sets, &row.author_did)
                {
                    self.metrics.incr(keys::GATE_VIOLATIONS);
                    continue;
                }

                if let Some(ctx) = viewer
                    && Self::hidden_for_viewer(ctx, viewer_graph.as_ref(), &candidate_labels, &row)
                {
                    continue;
                }

                let Some(parent) = row.reply_parent.clone() else {
                    continue;
                };
                next.push(row.uri.clone());
                children.entry(parent).or_default().push(row);
            }
            frontier = next;
        }

        let thread = Thread {
            anchor: ThreadNode {
                replies: attach_children(&anchor.uri, &mut children),
                post: anchor,
            },
            ancestors,
        };

        if cacheable {
            self.cache.set(&cache_key, &thread, TTL_THREAD_CONTEXT).await;
        }

        Ok(Some(thread))
    }

    /// Viewer block/mute sets, cached under the mutes-blocks key
    async fn viewer_graph(&self, viewer_did: &str) -> Result<ViewerGraph, PostgresError> {
        let cache_key = CacheKey::mutes_blocks(viewer_did);
        if let Some(cached) = self.cache.get::<ViewerGraph>(&cache_key).await {
            return Ok(cached);
        }

        let pool = self.postgres.pool();
        let (blocked, muted) = tokio::try_join!(
            block::blocked_set(pool, viewer_did),
            block::muted_set(pool, viewer_did),
        )?;

        let graph = ViewerGraph {
            blocked: blocked.into_iter().collect(),
            muted: muted.into_iter().collect(),
        };
        self.cache.set(&cache_key, &graph, TTL_MUTES_BLOCKS).await;
        Ok(graph)
    }

    /// Effective labels for a level of candidate replies (posts and their
    /// authors), fetched in one round trip. Empty when no viewer asked for
    /// label filtering.
    async fn labels_for(
        &self,
        viewer: Option<&ViewerContext>,
        rows: &[PostRow],
    ) -> Result<HashMap<String, HashSet<(String, String)>>, PostgresError> {
        let needs_labels = viewer.is_some_and(|ctx| !ctx.hidden_labels.is_empty());
        if !needs_labels || rows.is_empty() {
            return Ok(HashMap::new());
        }

        let mut subjects: Vec<String> = Vec::with_capacity(rows.len() * 2);
        for row in rows {
            subjects.push(row.uri.clone());
            subjects.push(row.author_did.clone());
        }
        subjects.sort_unstable();
        subjects.dedup();

        let records = label::labels_for_subjects(self.postgres.pool(), &subjects).await?;
        let mut by_subject: HashMap<String, Vec<_>> = HashMap::new();
        for record in records {
            by_subject.entry(record.subject.clone()).or_default().push(record);
        }

        Ok(by_subject
            .into_iter()
            .map(|(subject, records)| (subject, effective_labels(&records)))
            .collect())
    }

    fn hidden_for_viewer(
        viewer: &ViewerContext,
        graph: Option<&ViewerGraph>,
        labels: &HashMap<String, HashSet<(String, String)>>,
        row: &PostRow,
    ) -> bool {
        if let Some(graph) = graph
            && (graph.blocked.iter().any(|did| did == &row.author_did)
                || graph.muted.iter().any(|did| did == &row.author_did))
        {
            return true;
        }

        if viewer.hidden_labels.is_empty() {
            return false;
        }
        [row.uri.as_str(), row.author_did.as_str()]
            .iter()
            .filter_map(|subject| labels.get(*subject))
            .flatten()
            .any(|(_, val)| viewer.hidden_labels.contains(val))
    }
}

/// Turn the accepted children map into a tree rooted at `uri`
fn attach_children(uri: &str, children: &mut HashMap<String, Vec<PostRow>>) -> Vec<ThreadNode> {
    let Some(rows) = children.remove(uri) else {
        return Vec::new();
    };
    rows.into_iter()
        .map(|post| ThreadNode {
            replies: attach_children(&post.uri.clone(), children),
            post,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post(uri: &str, author: &str, parent: Option<&str>) -> PostRow {
        PostRow {
            uri: uri.into(),
            cid: "bafy".into(),
            author_did: author.into(),
            text: String::new(),
            reply_parent: parent.map(String::from),
            reply_root: None,
            embed: None,
            facets: None,
            like_count: 0,
            repost_count: 0,
            reply_count: 0,
            created_at: None,
            indexed_at: Utc::now(),
        }
    }

    #[test]
    fn test_attach_children_builds_tree() {
        let mut children: HashMap<String, Vec<PostRow>> = HashMap::new();
        children.insert(
            "root".into(),
            vec![post("r1", "did:plc:b", Some("root")), post("r2", "did:plc:c", Some("root"))],
        );
        children.insert("r1".into(), vec![post("r1a", "did:plc:d", Some("r1"))]);

        let tree = attach_children("root", &mut children);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].post.uri, "r1");
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].post.uri, "r1a");
        assert!(tree[1].replies.is_empty());
    }

    #[test]
    fn test_attach_children_unknown_parent_is_empty() {
        let mut children: HashMap<String, Vec<PostRow>> = HashMap::new();
        assert!(attach_children("missing", &mut children).is_empty());
    }

    #[test]
    fn test_pruned_subtree_stays_detached() {
        // r2 was rejected during BFS, so its child never entered the map;
        // the tree must not contain either
        let mut children: HashMap<String, Vec<PostRow>> = HashMap::new();
        children.insert("root".into(), vec![post("r1", "did:plc:b", Some("root"))]);

        let tree = attach_children("root", &mut children);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].post.uri, "r1");
    }
}
