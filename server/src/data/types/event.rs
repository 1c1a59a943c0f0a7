//! Queue event envelope
//!
//! The shape on the wire is exactly `{type, data, seq}`:
//! - `type ∈ {commit, identity, account}`
//! - `data`: JSON payload per type
//! - `seq`: optional string sequence for cursor tracking

use serde::{Deserialize, Serialize};

/// One event on the ingest stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEvent {
    #[serde(flatten)]
    pub body: EventBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<String>,
}

impl IngestEvent {
    pub fn commit(data: CommitData, seq: Option<String>) -> Self {
        Self {
            body: EventBody::Commit(data),
            seq,
        }
    }

    pub fn identity(data: IdentityData, seq: Option<String>) -> Self {
        Self {
            body: EventBody::Identity(data),
            seq,
        }
    }

    pub fn account(data: AccountData, seq: Option<String>) -> Self {
        Self {
            body: EventBody::Account(data),
            seq,
        }
    }

    /// Event kind as a static string (for counters)
    pub fn kind(&self) -> &'static str {
        match self.body {
            EventBody::Commit(_) => "commit",
            EventBody::Identity(_) => "identity",
            EventBody::Account(_) => "account",
        }
    }
}

/// Tagged event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventBody {
    Commit(CommitData),
    Identity(IdentityData),
    Account(AccountData),
}

/// An atomic set of record operations against one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitData {
    pub repo: String,
    pub ops: Vec<RepoOp>,
}

/// One create/update/delete against a `<collection>/<rkey>` path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoOp {
    pub action: OpAction,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
}

impl RepoOp {
    /// First path segment (the collection NSID)
    pub fn collection(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }

    /// Full `at://` URI for this op under the given repo DID
    pub fn uri(&self, repo: &str) -> String {
        format!("at://{}/{}", repo, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    Create,
    Update,
    Delete,
}

/// A handle change for a DID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityData {
    pub did: String,
    pub handle: String,
}

/// An account state change for a DID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountData {
    pub did: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_event_round_trips_with_exact_shape() {
        let event = IngestEvent::commit(
            CommitData {
                repo: "did:plc:alice".into(),
                ops: vec![RepoOp {
                    action: OpAction::Create,
                    path: "app.bsky.feed.post/3kabc".into(),
                    cid: Some("bafyreia".into()),
                    record: Some(serde_json::json!({"text": "hi"})),
                }],
            },
            Some("42".into()),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "commit");
        assert_eq!(json["seq"], "42");
        assert_eq!(json["data"]["repo"], "did:plc:alice");
        assert_eq!(json["data"]["ops"][0]["action"], "create");

        let back: IngestEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_identity_event_shape() {
        let json = serde_json::json!({
            "type": "identity",
            "data": {"did": "did:plc:bob", "handle": "bob.example"}
        });
        let event: IngestEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event.kind(), "identity");
        assert!(event.seq.is_none());
        match event.body {
            EventBody::Identity(d) => assert_eq!(d.handle, "bob.example"),
            other => panic!("Expected identity, got {:?}", other),
        }
    }

    #[test]
    fn test_account_event_shape() {
        let json = serde_json::json!({
            "type": "account",
            "data": {"did": "did:plc:carol", "active": false, "status": "deleted"},
            "seq": "7"
        });
        let event: IngestEvent = serde_json::from_value(json).unwrap();
        match event.body {
            EventBody::Account(d) => {
                assert!(!d.active);
                assert_eq!(d.status.as_deref(), Some("deleted"));
            }
            other => panic!("Expected account, got {:?}", other),
        }
    }

    #[test]
    fn test_op_collection_and_uri() {
        let op = RepoOp {
            action: OpAction::Delete,
            path: "app.bsky.feed.like/3xyz".into(),
            cid: None,
            record: None,
        };
        assert_eq!(op.collection(), "app.bsky.feed.like");
        assert_eq!(
            op.uri("did:plc:alice"),
            "at://did:plc:alice/app.bsky.feed.like/3xyz"
        );
    }
}
