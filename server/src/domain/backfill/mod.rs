//! Per-user repository backfill
//!
//! Fetches a single repository archive from the relay host and replays its
//! records through the same processor dispatch as live commits. The archive
//! is a content-addressed block store; record paths come from walking the
//! merkle search tree under the commit root.
//!
//! `BACKFILL_DAYS` bounds what gets indexed: 0 disables backfill, -1 takes
//! everything, and a positive value cuts off records whose self-reported
//! `createdAt` is older. That timestamp is under the author's control; the
//! cutoff is best-effort by design.

pub mod car;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use thiserror::Error;

use crate::core::config::IngestConfig;
use crate::data::postgres::PostgresError;
use crate::data::types::records::parse_created_at;
use crate::data::types::{OpAction, RepoOp};
use crate::domain::backfill::car::{CarError, CarReader, ipld_to_json};
use crate::domain::ingest::CommitProcessor;

/// HTTP timeout for repository fetches
const FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error("Backfill is disabled (BACKFILL_DAYS = 0)")]
    Disabled,

    #[error("Repository fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Car(#[from] CarError),

    #[error("Archive is not a repository: {0}")]
    Archive(String),

    #[error(transparent)]
    Postgres(#[from] PostgresError),
}

/// What one backfill pass did
#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillSummary {
    pub indexed: usize,
    pub skipped: usize,
}

pub struct Backfiller {
    http: reqwest::Client,
    processor: Arc<CommitProcessor>,
    config: IngestConfig,
}

impl Backfiller {
    pub fn new(
        processor: Arc<CommitProcessor>,
        config: IngestConfig,
    ) -> Result<Self, BackfillError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            processor,
            config,
        })
    }

    /// Fetch one repository and index its records
    pub async fn backfill_actor(&self, did: &str) -> Result<BackfillSummary, BackfillError> {
        if self.config.backfill_days == 0 {
            return Err(BackfillError::Disabled);
        }

        let base = http_base(&self.config.relay_url);
        let url = format!("{}/xrpc/com.atproto.sync.getRepo?did={}", base, did);
        tracing::info!(did = %did, "Fetching repository archive");

        let bytes = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        let reader = CarReader::parse(&bytes)?;
        let root = *reader
            .roots
            .first()
            .ok_or_else(|| BackfillError::Archive("archive has no roots".into()))?;
        let records = collect_records(&reader, root)?;

        let cutoff = cutoff_time(self.config.backfill_days);
        let mut summary = BackfillSummary::default();

        for (path, cid) in records {
            let Some(block) = reader.decode_block(&cid)? else {
                summary.skipped += 1;
                continue;
            };
            let record = ipld_to_json(&block);

            if let Some(cutoff) = cutoff
                && let Some(created_at) = record_created_at(&record)
                && created_at < cutoff
            {
                summary.skipped += 1;
                continue;
            }

            let op = RepoOp {
                action: OpAction::Create,
                path,
                cid: Some(cid.to_string()),
                record: Some(record),
            };
            self.processor.process_op(did, &op).await?;
            summary.indexed += 1;
        }

        tracing::info!(
            did = %did,
            indexed = summary.indexed,
            skipped = summary.skipped,
            "Backfill complete"
        );
        Ok(summary)
    }
}

fn cutoff_time(backfill_days: i64) -> Option<DateTime<Utc>> {
    if backfill_days > 0 {
        Some(Utc::now() - chrono::Duration::days(backfill_days))
    } else {
        None
    }
}

fn record_created_at(record: &serde_json::Value) -> Option<DateTime<Utc>> {
    parse_created_at(record.get("createdAt").and_then(|v| v.as_str()))
}

/// HTTP endpoint for the host behind a ws:// or wss:// relay URL
fn http_base(relay_url: &str) -> String {
    let (scheme, rest) = match relay_url.split_once("://") {
        Some(("wss", rest)) => ("https", rest),
        Some(("ws", rest)) => ("http", rest),
        Some((scheme, rest)) => (scheme, rest),
        None => ("https", relay_url),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    format!("{}://{}", scheme, host)
}

/// Walk the repository's merkle search tree, yielding
/// (collection/rkey path, record CID) pairs.
fn collect_records(
    reader: &CarReader,
    commit_cid: Cid,
) -> Result<Vec<(String, Cid)>, BackfillError> {
    let commit = reader
        .decode_block(&commit_cid)?
        .ok_or_else(|| BackfillError::Archive("missing commit block".into()))?;
    let Ipld::Map(commit_map) = commit else {
        return Err(BackfillError::Archive("commit is not a map".into()));
    };
    let Some(Ipld::Link(data_cid)) = commit_map.get("data") else {
        return Err(BackfillError::Archive("commit has no data link".into()));
    };

    let mut out = Vec::new();
    walk_mst(reader, *data_cid, &mut out)?;
    Ok(out)
}

/// Depth-first, in-order walk of one tree node. Keys use prefix
/// compression relative to the previous entry in the same node. Missing
/// subtree blocks are tolerated (partial archives).
fn walk_mst(
    reader: &CarReader,
    node_cid: Cid,
    out: &mut Vec<(String, Cid)>,
) -> Result<(), BackfillError> {
    let Some(node) = reader.decode_block(&node_cid)? else {
        return Ok(());
    };
    let Ipld::Map(map) = node else {
        return Ok(());
    };

    if let Some(Ipld::Link(left)) = map.get("l") {
        walk_mst(reader, *left, out)?;
    }

    let Some(Ipld::List(entries)) = map.get("e") else {
        return Ok(());
    };

    let mut prev_key: Vec<u8> = Vec::new();
    for entry in entries {
        let Ipld::Map(entry_map) = entry else {
            continue;
        };

        let prefix_len = match entry_map.get("p") {
            Some(Ipld::Integer(p)) => usize::try_from(*p).unwrap_or(0),
            _ => 0,
        };
        let suffix = match entry_map.get("k") {
            Some(Ipld::Bytes(k)) => k.as_slice(),
            _ => continue,
        };

        let mut key = Vec::with_capacity(prefix_len + suffix.len());
        key.extend_from_slice(&prev_key[..prefix_len.min(prev_key.len())]);
        key.extend_from_slice(suffix);
        prev_key = key.clone();

        if let Some(Ipld::Link(value)) = entry_map.get("v")
            && let Ok(path) = String::from_utf8(key)
        {
            out.push((path, *value));
        }

        if let Some(Ipld::Link(subtree)) = entry_map.get("t") {
            walk_mst(reader, *subtree, out)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_from_relay_url() {
        assert_eq!(
            http_base("wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos"),
            "https://bsky.network"
        );
        assert_eq!(http_base("ws://localhost:2470/stream"), "http://localhost:2470");
        assert_eq!(http_base("wss://relay.example"), "https://relay.example");
    }

    #[test]
    fn test_cutoff_time_modes() {
        assert!(cutoff_time(-1).is_none(), "-1 means take everything");
        assert!(cutoff_time(0).is_none(), "0 is handled before the cutoff");
        let cutoff = cutoff_time(7).unwrap();
        assert!(cutoff < Utc::now());
    }

    #[test]
    fn test_record_created_at() {
        let record = serde_json::json!({"createdAt": "2024-05-01T00:00:00Z"});
        assert!(record_created_at(&record).is_some());
        assert!(record_created_at(&serde_json::json!({})).is_none());
    }

    #[test]
    fn test_mst_key_prefix_compression() {
        use ipld_core::cid::multihash::Multihash;

        fn cid_for(tag: u8) -> Cid {
            let digest = [tag; 32];
            let mh = Multihash::<64>::wrap(0x12, &digest).unwrap();
            Cid::new_v1(0x71, mh)
        }

        let rec_a = cid_for(1);
        let rec_b = cid_for(2);
        let node_cid = cid_for(3);

        // Two entries: the second shares "app.bsky.feed.post/" with the first
        let node = Ipld::Map(
            [(
                "e".to_string(),
                Ipld::List(vec![
                    Ipld::Map(
                        [
                            ("p".to_string(), Ipld::Integer(0)),
                            (
                                "k".to_string(),
                                Ipld::Bytes(b"app.bsky.feed.post/3aaa".to_vec()),
                            ),
                            ("v".to_string(), Ipld::Link(rec_a)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    Ipld::Map(
                        [
                            ("p".to_string(), Ipld::Integer(19)),
                            ("k".to_string(), Ipld::Bytes(b"3bbb".to_vec())),
                            ("v".to_string(), Ipld::Link(rec_b)),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                ]),
            )]
            .into_iter()
            .collect(),
        );

        let mut blocks = std::collections::HashMap::new();
        blocks.insert(node_cid, serde_ipld_dagcbor::to_vec(&node).unwrap());
        let reader = CarReader {
            roots: vec![],
            blocks,
        };

        let mut out = Vec::new();
        walk_mst(&reader, node_cid, &mut out).unwrap();
        assert_eq!(
            out,
            vec![
                ("app.bsky.feed.post/3aaa".to_string(), rec_a),
                ("app.bsky.feed.post/3bbb".to_string(), rec_b),
            ]
        );
    }
}
