//! Type-safe cache key builder with versioning and named TTLs

use std::time::Duration;

/// All keys are prefixed with a version (e.g. "v1:") so a schema change can
/// invalidate every cached value at once.
const CACHE_KEY_VERSION: &str = "v1";

/// TTL for post aggregate counts
pub const TTL_POST_AGGREGATES: Duration = Duration::from_secs(5 * 60);

/// TTL for per-(viewer, post) state
pub const TTL_VIEWER_STATE: Duration = Duration::from_secs(10 * 60);

/// TTL for assembled thread contexts
pub const TTL_THREAD_CONTEXT: Duration = Duration::from_secs(30 * 60);

/// TTL for effective label sets
pub const TTL_LABELS: Duration = Duration::from_secs(60 * 60);

/// TTL for viewer mute/block sets
pub const TTL_MUTES_BLOCKS: Duration = Duration::from_secs(30 * 60);

/// Type-safe cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Aggregate counts for a post
    pub fn post_aggregates(uri: &str) -> String {
        format!("{}:agg:{}", CACHE_KEY_VERSION, uri)
    }

    /// Pattern matching every aggregate entry for bulk invalidation
    pub fn post_aggregates_pattern() -> String {
        format!("{}:agg:*", CACHE_KEY_VERSION)
    }

    /// Viewer state for one (viewer, post) pair
    pub fn viewer_state(viewer: &str, post_uri: &str) -> String {
        format!("{}:viewer:{}:{}", CACHE_KEY_VERSION, viewer, post_uri)
    }

    /// Pattern matching every viewer-state entry for one post
    pub fn viewer_state_pattern(post_uri: &str) -> String {
        format!("{}:viewer:*:{}", CACHE_KEY_VERSION, post_uri)
    }

    /// Assembled thread context anchored at a root post
    pub fn thread_context(root_uri: &str) -> String {
        format!("{}:thread:{}", CACHE_KEY_VERSION, root_uri)
    }

    /// Effective labels for a subject (URI or DID)
    pub fn labels(subject: &str) -> String {
        format!("{}:labels:{}", CACHE_KEY_VERSION, subject)
    }

    /// Combined mute/block sets for a viewer
    pub fn mutes_blocks(viewer: &str) -> String {
        format!("{}:mutes:{}", CACHE_KEY_VERSION, viewer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_aggregate_keys() {
        let uri = "at://did:plc:a/app.bsky.feed.post/1";
        assert_eq!(
            CacheKey::post_aggregates(uri),
            format!("v1:agg:{}", uri)
        );
        assert_eq!(CacheKey::post_aggregates_pattern(), "v1:agg:*");
    }

    #[test]
    fn test_viewer_state_keys() {
        let key = CacheKey::viewer_state("did:plc:v", "at://did:plc:a/app.bsky.feed.post/1");
        assert!(key.starts_with("v1:viewer:did:plc:v:"));
        assert_eq!(
            CacheKey::viewer_state_pattern("at://x/y/z"),
            "v1:viewer:*:at://x/y/z"
        );
    }

    #[test]
    fn test_labels_and_mutes_keys() {
        assert_eq!(CacheKey::labels("did:plc:s"), "v1:labels:did:plc:s");
        assert_eq!(CacheKey::mutes_blocks("did:plc:v"), "v1:mutes:did:plc:v");
    }
}
