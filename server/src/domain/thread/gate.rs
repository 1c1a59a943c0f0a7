//! Reply-gate evaluation
//!
//! A gate on a thread root restricts who may reply. The allow-sets it needs
//! (mentioned DIDs, the root author's follow set, allowed-list members) are
//! loaded once per assembly, and only the sets the gate actually enables.
//! Acceptance is then O(1) per candidate reply.

use std::collections::HashSet;

use sqlx::PgPool;

use crate::data::postgres::PostgresError;
use crate::data::postgres::repositories::thread_gate::ThreadGateRow;
use crate::data::postgres::repositories::{follow, list};

/// Gate switches plus the lists whose members may reply
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub allow_mentions: bool,
    pub allow_following: bool,
    pub allow_list_members: bool,
    pub list_uris: Vec<String>,
}

impl From<&ThreadGateRow> for GateConfig {
    fn from(row: &ThreadGateRow) -> Self {
        Self {
            allow_mentions: row.allow_mentions,
            allow_following: row.allow_following,
            allow_list_members: row.allow_list_members,
            list_uris: row.allowed_lists(),
        }
    }
}

/// Pre-loaded allow-sets for one assembly
#[derive(Debug, Clone, Default)]
pub struct AllowSets {
    pub mentioned: HashSet<String>,
    pub following: HashSet<String>,
    pub list_members: HashSet<String>,
}

/// Whether `author` may reply under the gate.
///
/// The root author always may; otherwise any enabled rule that matches is
/// enough.
pub fn reply_allowed(
    root_author: &str,
    config: &GateConfig,
    sets: &AllowSets,
    author: &str,
) -> bool {
    author == root_author
        || (config.allow_mentions && sets.mentioned.contains(author))
        || (config.allow_following && sets.following.contains(author))
        || (config.allow_list_members && sets.list_members.contains(author))
}

/// DIDs mentioned in a post's rich-text facets
pub fn mentioned_dids_from_facets(facets: Option<&serde_json::Value>) -> HashSet<String> {
    let mut dids = HashSet::new();
    let Some(facet_list) = facets.and_then(|v| v.as_array()) else {
        return dids;
    };
    for facet in facet_list {
        let Some(features) = facet.get("features").and_then(|v| v.as_array()) else {
            continue;
        };
        for feature in features {
            if feature.get("$type").and_then(|v| v.as_str())
                == Some("app.bsky.richtext.facet#mention")
                && let Some(did) = feature.get("did").and_then(|v| v.as_str())
            {
                dids.insert(did.to_string());
            }
        }
    }
    dids
}

/// Load the allow-sets a gate needs, in parallel, skipping disabled rules
pub async fn load_allow_sets(
    pool: &PgPool,
    root_author: &str,
    root_facets: Option<&serde_json::Value>,
    config: &GateConfig,
) -> Result<AllowSets, PostgresError> {
    let mentioned = if config.allow_mentions {
        mentioned_dids_from_facets(root_facets)
    } else {
        HashSet::new()
    };

    let (following, list_members) = tokio::try_join!(
        async {
            if config.allow_following {
                follow::following_set(pool, root_author).await
            } else {
                Ok(HashSet::new())
            }
        },
        async {
            if config.allow_list_members {
                list::members_of_lists(pool, &config.list_uris).await
            } else {
                Ok(HashSet::new())
            }
        },
    )?;

    Ok(AllowSets {
        mentioned,
        following,
        list_members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mentions: bool, following: bool, lists: bool) -> GateConfig {
        GateConfig {
            allow_mentions: mentions,
            allow_following: following,
            allow_list_members: lists,
            list_uris: vec![],
        }
    }

    fn sets(mentioned: &[&str], following: &[&str], members: &[&str]) -> AllowSets {
        AllowSets {
            mentioned: mentioned.iter().map(|s| s.to_string()).collect(),
            following: following.iter().map(|s| s.to_string()).collect(),
            list_members: members.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_root_author_always_allowed() {
        let cfg = config(false, false, false);
        let sets = sets(&[], &[], &[]);
        assert!(reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:alice"));
        assert!(!reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:bob"));
    }

    #[test]
    fn test_mention_rule() {
        let cfg = config(true, false, false);
        let sets = sets(&["did:plc:bob"], &[], &[]);
        assert!(reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:bob"));
        assert!(!reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:carol"));
    }

    #[test]
    fn test_disabled_rule_does_not_match() {
        // bob is in the mentioned set but the mention rule is off
        let cfg = config(false, true, false);
        let sets = sets(&["did:plc:bob"], &[], &[]);
        assert!(!reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:bob"));
    }

    #[test]
    fn test_any_enabled_rule_suffices() {
        let cfg = config(true, true, true);
        let sets = sets(&[], &["did:plc:f"], &["did:plc:m"]);
        assert!(reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:f"));
        assert!(reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:m"));
        assert!(!reply_allowed("did:plc:alice", &cfg, &sets, "did:plc:x"));
    }

    #[test]
    fn test_mentioned_dids_from_facets() {
        let facets = serde_json::json!([
            {
                "index": {"byteStart": 0, "byteEnd": 4},
                "features": [
                    {"$type": "app.bsky.richtext.facet#mention", "did": "did:plc:bob"}
                ]
            },
            {
                "index": {"byteStart": 5, "byteEnd": 30},
                "features": [
                    {"$type": "app.bsky.richtext.facet#link", "uri": "https://example.com"}
                ]
            }
        ]);
        let dids = mentioned_dids_from_facets(Some(&facets));
        assert_eq!(dids.len(), 1);
        assert!(dids.contains("did:plc:bob"));
    }

    #[test]
    fn test_mentioned_dids_empty_without_facets() {
        assert!(mentioned_dids_from_facets(None).is_empty());
        let not_array = serde_json::json!({"features": []});
        assert!(mentioned_dids_from_facets(Some(&not_array)).is_empty());
    }
}
