//! Relay wire frames
//!
//! The relay sends JSON text frames of three kinds: commit, identity, and
//! account. Frames decode into the queue event envelope; anything else is
//! counted and skipped rather than treated as an error, since relays add
//! frame kinds over time.

use serde::Deserialize;

use crate::data::types::{AccountData, CommitData, IdentityData, IngestEvent};

/// One frame as read off the relay socket
#[derive(Debug, Clone, Deserialize)]
pub struct WireFrame {
    pub kind: String,
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub commit: Option<CommitData>,
    #[serde(default)]
    pub identity: Option<IdentityData>,
    #[serde(default)]
    pub account: Option<AccountData>,
}

/// Why a frame could not be turned into an event
#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Frame kind this consumer does not understand
    UnknownKind(String),
    /// Frame kind present but its payload was missing
    MissingPayload(&'static str),
    /// Not valid JSON
    Malformed(String),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::UnknownKind(kind) => write!(f, "unknown frame kind '{}'", kind),
            FrameError::MissingPayload(kind) => write!(f, "{} frame without payload", kind),
            FrameError::Malformed(e) => write!(f, "malformed frame: {}", e),
        }
    }
}

/// Decode a raw text frame into a queue event
pub fn decode_frame(raw: &str) -> Result<IngestEvent, FrameError> {
    let frame: WireFrame =
        serde_json::from_str(raw).map_err(|e| FrameError::Malformed(e.to_string()))?;

    let seq = frame.seq.map(|s| s.to_string());
    match frame.kind.as_str() {
        "commit" => frame
            .commit
            .map(|data| IngestEvent::commit(data, seq))
            .ok_or(FrameError::MissingPayload("commit")),
        "identity" => frame
            .identity
            .map(|data| IngestEvent::identity(data, seq))
            .ok_or(FrameError::MissingPayload("identity")),
        "account" => frame
            .account
            .map(|data| IngestEvent::account(data, seq))
            .ok_or(FrameError::MissingPayload("account")),
        other => Err(FrameError::UnknownKind(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{EventBody, OpAction};

    #[test]
    fn test_decode_commit_frame() {
        let raw = r#"{
            "kind": "commit",
            "seq": 42,
            "commit": {
                "repo": "did:plc:alice",
                "ops": [
                    {"action": "create", "path": "app.bsky.feed.post/3k1",
                     "cid": "bafy1", "record": {"text": "hi"}}
                ]
            }
        }"#;
        let event = decode_frame(raw).unwrap();
        assert_eq!(event.seq.as_deref(), Some("42"));
        match event.body {
            EventBody::Commit(data) => {
                assert_eq!(data.repo, "did:plc:alice");
                assert_eq!(data.ops.len(), 1);
                assert_eq!(data.ops[0].action, OpAction::Create);
            }
            other => panic!("Expected commit, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_identity_frame() {
        let raw = r#"{"kind": "identity", "seq": 7,
                      "identity": {"did": "did:plc:bob", "handle": "bob.example"}}"#;
        let event = decode_frame(raw).unwrap();
        assert_eq!(event.kind(), "identity");
    }

    #[test]
    fn test_decode_account_frame_without_seq() {
        let raw = r#"{"kind": "account", "account": {"did": "did:plc:c", "active": true}}"#;
        let event = decode_frame(raw).unwrap();
        assert!(event.seq.is_none());
    }

    #[test]
    fn test_unknown_kind_is_reported_not_fatal() {
        let raw = r#"{"kind": "info", "seq": 1}"#;
        assert_eq!(
            decode_frame(raw),
            Err(FrameError::UnknownKind("info".to_string()))
        );
    }

    #[test]
    fn test_missing_payload() {
        let raw = r#"{"kind": "commit", "seq": 1}"#;
        assert_eq!(decode_frame(raw), Err(FrameError::MissingPayload("commit")));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(decode_frame("{nope"), Err(FrameError::Malformed(_))));
    }
}
