//! Effective label derivation
//!
//! A subject's effective labels are derived by replaying all of its label
//! records in timestamp order; a negation record removes the matching
//! (source, value) pair. The result is order-insensitive for distinct,
//! monotone timestamps: the repository returns records already sorted, and
//! replay is a pure fold over them.

use std::collections::HashSet;
use std::sync::Arc;

use crate::data::cache::{CacheKey, CacheService, TTL_LABELS};
use crate::data::postgres::repositories::label::{self, LabelRow};
use crate::data::postgres::{PostgresError, PostgresService};

/// One (source, value) pair in a subject's effective label set
pub type EffectiveLabel = (String, String);

/// Replay label records (already in timestamp order) into the effective set
pub fn effective_labels(records: &[LabelRow]) -> HashSet<EffectiveLabel> {
    let mut set = HashSet::new();
    for record in records {
        let pair = (record.src.clone(), record.val.clone());
        if record.neg {
            set.remove(&pair);
        } else {
            set.insert(pair);
        }
    }
    set
}

/// Label reads with a cache in front of the index store
pub struct LabelService {
    postgres: Arc<PostgresService>,
    cache: Arc<CacheService>,
}

impl LabelService {
    pub fn new(postgres: Arc<PostgresService>, cache: Arc<CacheService>) -> Self {
        Self { postgres, cache }
    }

    /// Effective labels for one subject (URI or DID)
    pub async fn labels_for_subject(
        &self,
        subject: &str,
    ) -> Result<HashSet<EffectiveLabel>, PostgresError> {
        let cache_key = CacheKey::labels(subject);
        if let Some(cached) = self.cache.get::<Vec<EffectiveLabel>>(&cache_key).await {
            return Ok(cached.into_iter().collect());
        }

        let records = label::labels_for_subject(self.postgres.pool(), subject).await?;
        let effective = effective_labels(&records);

        let to_cache: Vec<EffectiveLabel> = effective.iter().cloned().collect();
        self.cache.set(&cache_key, &to_cache, TTL_LABELS).await;

        Ok(effective)
    }

    /// True when any effective label value for the subject is in the
    /// viewer's hide set
    pub async fn subject_is_hidden(
        &self,
        subject: &str,
        hide_values: &HashSet<String>,
    ) -> Result<bool, PostgresError> {
        if hide_values.is_empty() {
            return Ok(false);
        }
        let labels = self.labels_for_subject(subject).await?;
        Ok(labels.iter().any(|(_, val)| hide_values.contains(val)))
    }

    /// Drop the cached set after new label records for the subject arrive
    pub async fn invalidate(&self, subject: &str) {
        self.cache.delete(&CacheKey::labels(subject)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn row(src: &str, val: &str, neg: bool, offset_secs: i64) -> LabelRow {
        LabelRow {
            src: src.into(),
            subject: "at://did:plc:x/app.bsky.feed.post/1".into(),
            val: val.into(),
            neg,
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_negation_replay() {
        // (spam, false) -> (spam, true) -> (spam, false) leaves spam applied
        let records = vec![
            row("did:plc:s", "spam", false, 0),
            row("did:plc:s", "spam", true, 1),
            row("did:plc:s", "spam", false, 2),
        ];
        let effective = effective_labels(&records);
        assert_eq!(effective.len(), 1);
        assert!(effective.contains(&("did:plc:s".to_string(), "spam".to_string())));
    }

    #[test]
    fn test_negation_removes_pair() {
        let records = vec![
            row("did:plc:s", "spam", false, 0),
            row("did:plc:s", "spam", true, 1),
        ];
        assert!(effective_labels(&records).is_empty());
    }

    #[test]
    fn test_negation_only_matches_same_source() {
        let records = vec![
            row("did:plc:s1", "spam", false, 0),
            row("did:plc:s2", "spam", true, 1),
        ];
        let effective = effective_labels(&records);
        assert!(effective.contains(&("did:plc:s1".to_string(), "spam".to_string())));
    }

    #[test]
    fn test_permutation_of_non_negation_records_is_order_insensitive() {
        let a = row("did:plc:s", "spam", false, 0);
        let b = row("did:plc:s", "nsfw", false, 1);
        let c = row("did:plc:t", "rude", false, 2);

        let forward = effective_labels(&[a.clone(), b.clone(), c.clone()]);
        let reversed = effective_labels(&[c, b, a]);
        assert_eq!(forward, reversed);
        assert_eq!(forward.len(), 3);
    }

    #[test]
    fn test_duplicate_application_is_idempotent() {
        let records = vec![
            row("did:plc:s", "spam", false, 0),
            row("did:plc:s", "spam", false, 1),
        ];
        assert_eq!(effective_labels(&records).len(), 1);
    }
}
