//! Known record shapes and collection NSIDs
//!
//! Records arrive as loosely-typed JSON; these structs capture the fields the
//! indexer cares about. Unknown extra fields are ignored on deserialization.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Collection NSIDs for known record types
pub mod collections {
    pub const POST: &str = "app.bsky.feed.post";
    pub const LIKE: &str = "app.bsky.feed.like";
    pub const REPOST: &str = "app.bsky.feed.repost";
    pub const FOLLOW: &str = "app.bsky.graph.follow";
    pub const BLOCK: &str = "app.bsky.graph.block";
    pub const LIST: &str = "app.bsky.graph.list";
    pub const LIST_ITEM: &str = "app.bsky.graph.listitem";
    pub const PROFILE: &str = "app.bsky.actor.profile";
    pub const FEED_GENERATOR: &str = "app.bsky.feed.generator";
    pub const STARTER_PACK: &str = "app.bsky.graph.starterpack";
    pub const LABELER_SERVICE: &str = "app.bsky.labeler.service";
    pub const THREAD_GATE: &str = "app.bsky.feed.threadgate";
    pub const LABEL: &str = "com.atproto.label.label";
}

/// Reference to another record by URI and content hash
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
}

/// Reply references; parent and root must be present together
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplyRef {
    pub parent: StrongRef,
    pub root: StrongRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub embed: Option<serde_json::Value>,
    #[serde(default)]
    pub facets: Option<serde_json::Value>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LikeRecord {
    pub subject: StrongRef,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepostRecord {
    pub subject: StrongRef,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FollowRecord {
    /// Target DID
    pub subject: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockRecord {
    /// Target DID
    pub subject: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListRecord {
    pub purpose: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListItemRecord {
    /// URI of the containing list
    pub list: String,
    /// DID bound into the list
    pub subject: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRecord {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedGeneratorRecord {
    pub did: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StarterPackRecord {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub list: Option<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelerServiceRecord {
    #[serde(default)]
    pub policies: Option<serde_json::Value>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadGateRecord {
    /// URI of the thread root post
    pub post: String,
    /// Allow rules; an absent list means nobody but the author may reply
    #[serde(default)]
    pub allow: Option<Vec<GateRule>>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
}

/// One allow rule on a reply gate
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "$type")]
pub enum GateRule {
    #[serde(rename = "app.bsky.feed.threadgate#mentionRule")]
    Mention,
    #[serde(rename = "app.bsky.feed.threadgate#followingRule")]
    Following,
    #[serde(rename = "app.bsky.feed.threadgate#listRule")]
    List { list: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelRecord {
    /// Labeler DID; defaults to the repo that emitted the record
    #[serde(default)]
    pub src: Option<String>,
    /// Subject URI or DID
    #[serde(alias = "subject")]
    pub uri: String,
    pub val: String,
    #[serde(default)]
    pub neg: bool,
    #[serde(rename = "cts", default)]
    pub created_at: Option<String>,
}

/// Parse a record's self-reported timestamp, tolerating absent or
/// malformed values.
pub fn parse_created_at(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Split an `at://` URI into (did, collection, rkey)
pub fn parse_at_uri(uri: &str) -> Option<(&str, &str, &str)> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let did = parts.next()?;
    let collection = parts.next()?;
    let rkey = parts.next()?;
    if did.is_empty() || collection.is_empty() || rkey.is_empty() {
        return None;
    }
    Some((did, collection, rkey))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_record_with_reply() {
        let json = serde_json::json!({
            "$type": "app.bsky.feed.post",
            "text": "hello",
            "reply": {
                "parent": {"uri": "at://did:plc:a/app.bsky.feed.post/1", "cid": "bafy1"},
                "root": {"uri": "at://did:plc:a/app.bsky.feed.post/0", "cid": "bafy0"}
            },
            "createdAt": "2024-05-01T12:00:00Z"
        });
        let record: PostRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.text, "hello");
        let reply = record.reply.unwrap();
        assert_eq!(reply.root.uri, "at://did:plc:a/app.bsky.feed.post/0");
        assert!(parse_created_at(record.created_at.as_deref()).is_some());
    }

    #[test]
    fn test_gate_rules_decode() {
        let json = serde_json::json!({
            "post": "at://did:plc:a/app.bsky.feed.post/root",
            "allow": [
                {"$type": "app.bsky.feed.threadgate#mentionRule"},
                {"$type": "app.bsky.feed.threadgate#listRule", "list": "at://did:plc:a/app.bsky.graph.list/l1"}
            ]
        });
        let record: ThreadGateRecord = serde_json::from_value(json).unwrap();
        let allow = record.allow.unwrap();
        assert_eq!(allow.len(), 2);
        assert_eq!(allow[0], GateRule::Mention);
        assert!(matches!(allow[1], GateRule::List { ref list } if list.ends_with("l1")));
    }

    #[test]
    fn test_parse_at_uri() {
        let (did, collection, rkey) =
            parse_at_uri("at://did:plc:abc/app.bsky.feed.post/3k2a").unwrap();
        assert_eq!(did, "did:plc:abc");
        assert_eq!(collection, "app.bsky.feed.post");
        assert_eq!(rkey, "3k2a");

        assert!(parse_at_uri("https://example.com").is_none());
        assert!(parse_at_uri("at://did:plc:abc").is_none());
    }

    #[test]
    fn test_parse_created_at_lenient() {
        assert!(parse_created_at(Some("2024-05-01T12:00:00.123Z")).is_some());
        assert!(parse_created_at(Some("not a date")).is_none());
        assert!(parse_created_at(None).is_none());
    }
}
