//! Commit processor
//!
//! Decodes per-record operations, validates them against the schema
//! registry, maintains referential invariants via the pending buffer, and
//! writes denormalized rows to the index store.
//!
//! Error policy per operation:
//! - duplicate-key: success (acked)
//! - missing-parent (foreign key): buffered, success (acked)
//! - validation failure: dropped, counted, success (acked)
//! - anything else: propagated, so the message is not acked and the queue
//!   redelivers it
//!
//! Ordering: ops inside one commit run in upstream order; notifications for
//! a record are emitted only after its primary row is durably written.

use std::collections::HashSet;
use std::sync::Arc;

use crate::data::cache::{CacheKey, CacheService};
use crate::data::postgres::repositories::notification::NotificationReason;
use crate::data::postgres::repositories::{
    actor, block, feed, follow, label, like, list, notification, post, repost, thread_gate,
};
use crate::data::postgres::{PostgresError, PostgresService};
use crate::data::types::records::{
    self, BlockRecord, FeedGeneratorRecord, FollowRecord, GateRule, LabelRecord,
    LabelerServiceRecord, LikeRecord, ListItemRecord, ListRecord, PostRecord, ProfileRecord,
    RepostRecord, StarterPackRecord, ThreadGateRecord, collections, parse_created_at,
};
use crate::data::types::{
    AccountData, CommitData, EventBody, IdentityData, IngestEvent, OpAction, RepoOp,
};
use crate::domain::ingest::pending::{PendingBuffer, PendingRecord};
use crate::domain::lexicon::{Lexicon, Validation};
use crate::domain::metrics::{Metrics, keys};
use crate::utils::text::extract_mention_handles;

pub struct CommitProcessor {
    postgres: Arc<PostgresService>,
    cache: Arc<CacheService>,
    pending: Arc<PendingBuffer>,
    lexicon: Arc<Lexicon>,
    metrics: Arc<Metrics>,
}

impl CommitProcessor {
    pub fn new(
        postgres: Arc<PostgresService>,
        cache: Arc<CacheService>,
        pending: Arc<PendingBuffer>,
        lexicon: Arc<Lexicon>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            postgres,
            cache,
            pending,
            lexicon,
            metrics,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Process one queue event. Replaying the same event is idempotent.
    pub async fn process_event(&self, event: &IngestEvent) -> Result<(), PostgresError> {
        match &event.body {
            EventBody::Commit(data) => self.process_commit(data).await,
            EventBody::Identity(data) => self.process_identity(data).await,
            EventBody::Account(data) => self.process_account(data).await,
        }
    }

    async fn process_identity(&self, data: &IdentityData) -> Result<(), PostgresError> {
        actor::upsert_handle(self.postgres.pool(), &data.did, &data.handle).await
    }

    async fn process_account(&self, data: &AccountData) -> Result<(), PostgresError> {
        // Statuses may arrive capitalized
        let deleted = !data.active
            && data
                .status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("deleted"));
        if deleted {
            actor::delete_actor(self.postgres.pool(), &data.did).await?;
        } else {
            actor::set_account_status(
                self.postgres.pool(),
                &data.did,
                data.active,
                data.status.as_deref(),
            )
            .await?;
        }
        Ok(())
    }

    async fn process_commit(&self, commit: &CommitData) -> Result<(), PostgresError> {
        actor::ensure_actor(self.postgres.pool(), &commit.repo).await?;
        // Upstream order within a commit is preserved
        for op in &commit.ops {
            self.process_op(&commit.repo, op).await?;
        }
        Ok(())
    }

    pub async fn process_op(&self, repo: &str, op: &RepoOp) -> Result<(), PostgresError> {
        let collection = op.collection().to_string();
        let uri = op.uri(repo);

        match op.action {
            OpAction::Delete => self.process_delete(&collection, &uri).await,
            OpAction::Create | OpAction::Update => {
                self.process_write(repo, &collection, &uri, op).await
            }
        }
    }

    // =========================================================================
    // Deletes
    // =========================================================================

    async fn process_delete(&self, collection: &str, uri: &str) -> Result<(), PostgresError> {
        // A buffered child whose delete arrives before its parent simply
        // disappears; the row delete below is then a no-op
        self.pending.cancel(uri);

        match collection {
            collections::POST => self.delete_post(uri).await,
            collections::LIKE => {
                if let Some((actor_did, subject)) =
                    like::delete_like(self.postgres.pool(), uri).await?
                {
                    post::adjust_counts(self.postgres.pool(), &subject, -1, 0, 0).await?;
                    self.invalidate_subject_caches(&actor_did, &subject).await;
                }
                Ok(())
            }
            collections::REPOST => {
                if let Some((actor_did, subject)) =
                    repost::delete_repost(self.postgres.pool(), uri).await?
                {
                    post::adjust_counts(self.postgres.pool(), &subject, 0, -1, 0).await?;
                    self.invalidate_subject_caches(&actor_did, &subject).await;
                }
                Ok(())
            }
            collections::FOLLOW => {
                follow::delete_follow(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::BLOCK => {
                if let Some((actor_did, _)) = block::delete_block(self.postgres.pool(), uri).await?
                {
                    self.cache.delete(&CacheKey::mutes_blocks(&actor_did)).await;
                }
                Ok(())
            }
            collections::LIST => {
                // Items reference the list without cascade; clear them first
                list::delete_items_of_list(self.postgres.pool(), uri).await?;
                list::delete_list(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::LIST_ITEM => {
                list::delete_list_item(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::FEED_GENERATOR => {
                feed::delete_feed_generator(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::STARTER_PACK => {
                feed::delete_starter_pack(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::LABELER_SERVICE => {
                feed::delete_labeler_service(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::THREAD_GATE => {
                thread_gate::delete_gate(self.postgres.pool(), uri).await?;
                Ok(())
            }
            collections::PROFILE => {
                if let Some((did, _, _)) = records::parse_at_uri(uri) {
                    actor::clear_profile(self.postgres.pool(), did).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn delete_post(&self, uri: &str) -> Result<(), PostgresError> {
        // Pending children of a deleted post will never find their parent
        self.pending.purge_parent(uri);

        // Processor-side cascade: dependent rows first, since the schema
        // deliberately has no ON DELETE CASCADE
        like::delete_for_subject(self.postgres.pool(), uri).await?;
        repost::delete_for_subject(self.postgres.pool(), uri).await?;
        thread_gate::delete_gate_for_post(self.postgres.pool(), uri).await?;
        notification::delete_for_subject(self.postgres.pool(), uri).await?;

        if let Some(row) = post::delete_post(self.postgres.pool(), uri).await? {
            if let Some(parent) = row.reply_parent.as_deref() {
                post::adjust_counts(self.postgres.pool(), parent, 0, 0, -1).await?;
                self.cache.delete(&CacheKey::post_aggregates(parent)).await;
            }
            let root = row.reply_root.as_deref().unwrap_or(uri);
            self.cache.delete(&CacheKey::thread_context(root)).await;
        }

        self.cache.delete(&CacheKey::post_aggregates(uri)).await;
        self.cache
            .invalidate_pattern(&CacheKey::viewer_state_pattern(uri))
            .await;
        Ok(())
    }

    // =========================================================================
    // Creates / updates
    // =========================================================================

    async fn process_write(
        &self,
        repo: &str,
        collection: &str,
        uri: &str,
        op: &RepoOp,
    ) -> Result<(), PostgresError> {
        let Some(record) = op.record.as_ref() else {
            tracing::debug!(uri = %uri, "Write op without record payload; dropping");
            self.metrics.incr(keys::VALIDATION_INVALID);
            return Ok(());
        };

        match self.lexicon.validate(collection, uri, record) {
            Validation::Valid => {}
            Validation::Unknown => {
                // Forward compatibility: counted and passed through
                self.metrics.incr(keys::VALIDATION_UNKNOWN);
                return Ok(());
            }
            Validation::Invalid(error) => {
                tracing::debug!(uri = %uri, error = %error, "Record failed validation; dropping");
                self.metrics.incr(keys::VALIDATION_INVALID);
                return Ok(());
            }
        }

        let cid = op.cid.as_deref().unwrap_or_default();
        match collection {
            collections::POST => self.index_post(repo, uri, cid, record).await,
            collections::LIKE => self.index_like(repo, uri, record).await,
            collections::REPOST => self.index_repost(repo, uri, record).await,
            collections::FOLLOW => self.index_follow(repo, uri, record).await,
            collections::BLOCK => self.index_block(repo, uri, record).await,
            collections::LIST => self.index_list(repo, uri, record).await,
            collections::LIST_ITEM => self.index_list_item(repo, uri, record).await,
            collections::PROFILE => self.index_profile(repo, record).await,
            collections::FEED_GENERATOR => self.index_feed_generator(repo, uri, record).await,
            collections::STARTER_PACK => self.index_starter_pack(repo, uri, record).await,
            collections::LABELER_SERVICE => self.index_labeler_service(repo, uri, record).await,
            collections::THREAD_GATE => self.index_thread_gate(repo, uri, record).await,
            collections::LABEL => self.index_label(repo, record).await,
            _ => Ok(()),
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        uri: &str,
        record: &serde_json::Value,
    ) -> Option<T> {
        match serde_json::from_value(record.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::debug!(uri = %uri, error = %e, "Record shape mismatch; dropping");
                self.metrics.incr(keys::VALIDATION_INVALID);
                None
            }
        }
    }

    async fn index_post(
        &self,
        repo: &str,
        uri: &str,
        cid: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<PostRecord>(uri, record) else {
            return Ok(());
        };

        let reply_parent = rec.reply.as_ref().map(|r| r.parent.uri.as_str());
        let reply_root = rec.reply.as_ref().map(|r| r.root.uri.as_str());

        let inserted = post::upsert_post(
            self.postgres.pool(),
            &post::NewPost {
                uri,
                cid,
                author_did: repo,
                text: &rec.text,
                reply_parent,
                reply_root,
                embed: rec.embed.as_ref(),
                facets: rec.facets.as_ref(),
                created_at: parse_created_at(rec.created_at.as_deref()),
            },
        )
        .await?;

        if !inserted {
            return Ok(());
        }

        // The post now exists: flush children that were waiting for it
        self.flush_post_parent(uri).await?;

        if let Some(parent) = reply_parent {
            post::adjust_counts(self.postgres.pool(), parent, 0, 0, 1).await?;
            self.cache.delete(&CacheKey::post_aggregates(parent)).await;

            if let Some(parent_row) = post::get_post(self.postgres.pool(), parent).await?
                && parent_row.author_did != repo
            {
                notification::insert_notification(
                    self.postgres.pool(),
                    &parent_row.author_did,
                    repo,
                    NotificationReason::Reply,
                    Some(uri),
                )
                .await?;
                self.metrics.incr(keys::NOTIFICATIONS);
            }
        }

        self.notify_mentions(repo, uri, &rec.text).await?;

        let root = reply_root.unwrap_or(uri);
        self.cache.delete(&CacheKey::thread_context(root)).await;

        Ok(())
    }

    /// One mention notification per distinct mentioned account, deduped
    /// within the post; self-mentions are skipped.
    async fn notify_mentions(
        &self,
        author: &str,
        post_uri: &str,
        text: &str,
    ) -> Result<(), PostgresError> {
        let handles = extract_mention_handles(text);
        if handles.is_empty() {
            return Ok(());
        }

        let resolved = actor::dids_for_handles(self.postgres.pool(), &handles).await?;
        let mut notified: HashSet<&str> = HashSet::new();
        for handle in &handles {
            let Some(did) = resolved.get(handle) else {
                continue;
            };
            if did == author || !notified.insert(did.as_str()) {
                continue;
            }
            notification::insert_notification(
                self.postgres.pool(),
                did,
                author,
                NotificationReason::Mention,
                Some(post_uri),
            )
            .await?;
            self.metrics.incr(keys::NOTIFICATIONS);
        }
        Ok(())
    }

    async fn index_like(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<LikeRecord>(uri, record) else {
            return Ok(());
        };
        let created_at = parse_created_at(rec.created_at.as_deref());
        self.insert_child(PendingRecord::Like {
            uri: uri.to_string(),
            actor_did: repo.to_string(),
            subject_uri: rec.subject.uri,
            created_at,
        })
        .await
    }

    async fn index_repost(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<RepostRecord>(uri, record) else {
            return Ok(());
        };
        let created_at = parse_created_at(rec.created_at.as_deref());
        self.insert_child(PendingRecord::Repost {
            uri: uri.to_string(),
            actor_did: repo.to_string(),
            subject_uri: rec.subject.uri,
            created_at,
        })
        .await
    }

    /// Insert a like or repost whose subject is a post.
    ///
    /// A missing subject sends the op to the pending buffer; a foreign-key
    /// violation on insert (the subject vanished between check and insert)
    /// re-enqueues it the same way.
    async fn insert_child(&self, child: PendingRecord) -> Result<(), PostgresError> {
        let subject = child.parent_uri().to_string();
        if !post::post_exists(self.postgres.pool(), &subject).await? {
            self.metrics.incr(keys::PENDING_BUFFERED);
            self.pending.enqueue(child);
            return Ok(());
        }

        match self.try_insert_child(&child).await {
            Ok(true) => self.finish_child_insert(&child).await,
            Ok(false) => Ok(()), // duplicate: success for ack purposes
            Err(e) if e.is_foreign_key_violation() => {
                self.metrics.incr(keys::PENDING_BUFFERED);
                self.pending.enqueue(child);
                Ok(())
            }
            Err(e) if e.is_unique_violation() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn try_insert_child(&self, child: &PendingRecord) -> Result<bool, PostgresError> {
        match child {
            PendingRecord::Like {
                uri,
                actor_did,
                subject_uri,
                created_at,
            } => {
                like::insert_like(self.postgres.pool(), uri, actor_did, subject_uri, *created_at)
                    .await
            }
            PendingRecord::Repost {
                uri,
                actor_did,
                subject_uri,
                created_at,
            } => {
                repost::insert_repost(
                    self.postgres.pool(),
                    uri,
                    actor_did,
                    subject_uri,
                    *created_at,
                )
                .await
            }
            PendingRecord::ListItem {
                uri,
                list_uri,
                subject_did,
                created_at,
            } => {
                list::insert_list_item(
                    self.postgres.pool(),
                    uri,
                    list_uri,
                    subject_did,
                    *created_at,
                )
                .await
            }
        }
    }

    /// Aggregate counts, cache invalidation, and the notification that
    /// follows a successful like/repost insert
    async fn finish_child_insert(&self, child: &PendingRecord) -> Result<(), PostgresError> {
        let (actor_did, subject, like_delta, repost_delta, reason) = match child {
            PendingRecord::Like {
                actor_did,
                subject_uri,
                ..
            } => (actor_did, subject_uri, 1, 0, NotificationReason::Like),
            PendingRecord::Repost {
                actor_did,
                subject_uri,
                ..
            } => (actor_did, subject_uri, 0, 1, NotificationReason::Repost),
            PendingRecord::ListItem { .. } => return Ok(()),
        };

        post::adjust_counts(self.postgres.pool(), subject, like_delta, repost_delta, 0).await?;
        self.invalidate_subject_caches(actor_did, subject).await;

        if let Some(subject_row) = post::get_post(self.postgres.pool(), subject).await?
            && subject_row.author_did != *actor_did
        {
            notification::insert_notification(
                self.postgres.pool(),
                &subject_row.author_did,
                actor_did,
                reason,
                Some(subject),
            )
            .await?;
            self.metrics.incr(keys::NOTIFICATIONS);
        }
        Ok(())
    }

    async fn invalidate_subject_caches(&self, actor_did: &str, subject: &str) {
        self.cache.delete(&CacheKey::post_aggregates(subject)).await;
        self.cache
            .delete(&CacheKey::viewer_state(actor_did, subject))
            .await;
    }

    async fn index_follow(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<FollowRecord>(uri, record) else {
            return Ok(());
        };
        let created_at = parse_created_at(rec.created_at.as_deref());
        let inserted = match follow::insert_follow(
            self.postgres.pool(),
            uri,
            repo,
            &rec.subject,
            created_at,
        )
        .await
        {
            Ok(inserted) => inserted,
            Err(e) if e.is_unique_violation() => false,
            Err(e) => return Err(e),
        };

        if inserted && rec.subject != repo {
            notification::insert_notification(
                self.postgres.pool(),
                &rec.subject,
                repo,
                NotificationReason::Follow,
                None,
            )
            .await?;
            self.metrics.incr(keys::NOTIFICATIONS);
        }
        Ok(())
    }

    async fn index_block(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<BlockRecord>(uri, record) else {
            return Ok(());
        };
        let created_at = parse_created_at(rec.created_at.as_deref());
        match block::insert_block(self.postgres.pool(), uri, repo, &rec.subject, created_at).await
        {
            Ok(_) => {}
            Err(e) if e.is_unique_violation() => {}
            Err(e) => return Err(e),
        }
        self.cache.delete(&CacheKey::mutes_blocks(repo)).await;
        Ok(())
    }

    async fn index_list(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<ListRecord>(uri, record) else {
            return Ok(());
        };
        let inserted = list::upsert_list(
            self.postgres.pool(),
            uri,
            repo,
            &rec.purpose,
            &rec.name,
            rec.description.as_deref(),
            parse_created_at(rec.created_at.as_deref()),
        )
        .await?;

        if inserted {
            // The list now exists: flush items that were waiting for it
            self.flush_list_parent(uri).await?;
        }
        Ok(())
    }

    async fn index_list_item(
        &self,
        _repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<ListItemRecord>(uri, record) else {
            return Ok(());
        };
        let created_at = parse_created_at(rec.created_at.as_deref());

        if !list::list_exists(self.postgres.pool(), &rec.list).await? {
            self.metrics.incr(keys::PENDING_BUFFERED);
            self.pending.enqueue(PendingRecord::ListItem {
                uri: uri.to_string(),
                list_uri: rec.list,
                subject_did: rec.subject,
                created_at,
            });
            return Ok(());
        }

        match list::insert_list_item(self.postgres.pool(), uri, &rec.list, &rec.subject, created_at)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_foreign_key_violation() => {
                self.metrics.incr(keys::PENDING_BUFFERED);
                self.pending.enqueue(PendingRecord::ListItem {
                    uri: uri.to_string(),
                    list_uri: rec.list,
                    subject_did: rec.subject,
                    created_at,
                });
                Ok(())
            }
            Err(e) if e.is_unique_violation() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn index_profile(
        &self,
        repo: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<ProfileRecord>(repo, record) else {
            return Ok(());
        };
        let avatar_cid = rec
            .avatar
            .as_ref()
            .and_then(|blob| blob.pointer("/ref/$link"))
            .and_then(|v| v.as_str());
        actor::upsert_profile(
            self.postgres.pool(),
            repo,
            rec.display_name.as_deref(),
            rec.description.as_deref(),
            avatar_cid,
        )
        .await
    }

    async fn index_feed_generator(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<FeedGeneratorRecord>(uri, record) else {
            return Ok(());
        };
        feed::upsert_feed_generator(
            self.postgres.pool(),
            uri,
            repo,
            &rec.did,
            &rec.display_name,
            rec.description.as_deref(),
            parse_created_at(rec.created_at.as_deref()),
        )
        .await
    }

    async fn index_starter_pack(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<StarterPackRecord>(uri, record) else {
            return Ok(());
        };
        feed::upsert_starter_pack(
            self.postgres.pool(),
            uri,
            repo,
            &rec.name,
            rec.description.as_deref(),
            rec.list.as_deref(),
            parse_created_at(rec.created_at.as_deref()),
        )
        .await
    }

    async fn index_labeler_service(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<LabelerServiceRecord>(uri, record) else {
            return Ok(());
        };
        feed::upsert_labeler_service(
            self.postgres.pool(),
            uri,
            repo,
            rec.policies.as_ref(),
            parse_created_at(rec.created_at.as_deref()),
        )
        .await
    }

    async fn index_thread_gate(
        &self,
        repo: &str,
        uri: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<ThreadGateRecord>(uri, record) else {
            return Ok(());
        };

        let mut allow_mentions = false;
        let mut allow_following = false;
        let mut list_uris: Vec<String> = Vec::new();
        for rule in rec.allow.iter().flatten() {
            match rule {
                GateRule::Mention => allow_mentions = true,
                GateRule::Following => allow_following = true,
                GateRule::List { list } => list_uris.push(list.clone()),
            }
        }
        let allow_list_members = !list_uris.is_empty();
        let list_uris_json = allow_list_members.then(|| serde_json::json!(list_uris));

        thread_gate::upsert_gate(
            self.postgres.pool(),
            uri,
            &rec.post,
            repo,
            allow_mentions,
            allow_following,
            allow_list_members,
            list_uris_json.as_ref(),
            parse_created_at(rec.created_at.as_deref()),
        )
        .await?;

        self.cache.delete(&CacheKey::thread_context(&rec.post)).await;
        Ok(())
    }

    async fn index_label(
        &self,
        repo: &str,
        record: &serde_json::Value,
    ) -> Result<(), PostgresError> {
        let Some(rec) = self.decode::<LabelRecord>(repo, record) else {
            return Ok(());
        };
        let src = rec.src.as_deref().unwrap_or(repo);
        label::insert_label(
            self.postgres.pool(),
            src,
            &rec.uri,
            &rec.val,
            rec.neg,
            parse_created_at(rec.created_at.as_deref()),
        )
        .await?;
        // Effective labels for the subject changed
        self.cache.delete(&CacheKey::labels(&rec.uri)).await;
        Ok(())
    }

    // =========================================================================
    // Pending-buffer flushing
    // =========================================================================

    /// Flush buffered likes/reposts for a post that now exists.
    ///
    /// The queue is removed atomically before processing; on a transient
    /// error the unprocessed remainder goes back into the buffer.
    pub async fn flush_post_parent(&self, parent_uri: &str) -> Result<(), PostgresError> {
        let children = self.pending.take_parent(parent_uri);
        if children.is_empty() {
            return Ok(());
        }
        tracing::debug!(parent = %parent_uri, count = children.len(), "Flushing pending ops");

        let mut iter = children.into_iter();
        while let Some(child) = iter.next() {
            match self.try_insert_child(&child).await {
                Ok(true) => {
                    self.metrics.incr(keys::PENDING_FLUSHED);
                    self.finish_child_insert(&child).await?;
                }
                Ok(false) => {
                    self.metrics.incr(keys::PENDING_FLUSHED);
                }
                Err(e) if e.is_unique_violation() => {
                    self.metrics.incr(keys::PENDING_FLUSHED);
                }
                Err(e) if e.is_foreign_key_violation() => {
                    // Parent vanished again; back to the buffer
                    self.metrics.incr(keys::PENDING_BUFFERED);
                    self.pending.enqueue(child);
                }
                Err(e) => {
                    self.pending.enqueue(child);
                    for rest in iter {
                        self.pending.enqueue(rest);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Flush buffered list items for a list that now exists
    pub async fn flush_list_parent(&self, list_uri: &str) -> Result<(), PostgresError> {
        self.flush_post_parent(list_uri).await
    }

    /// One retry pass: flush every buffered parent that has become
    /// available in the index since its children arrived.
    pub async fn retry_pending(&self) -> Result<(), PostgresError> {
        let (post_parents, list_parents) = self.pending.parents_by_kind();
        if post_parents.is_empty() && list_parents.is_empty() {
            return Ok(());
        }

        let available_posts = post::existing_posts(self.postgres.pool(), &post_parents).await?;
        for parent in &available_posts {
            if let Err(e) = self.flush_post_parent(parent).await {
                tracing::warn!(parent = %parent, error = %e, "Pending flush failed");
            }
        }

        let available_lists = list::existing_lists(self.postgres.pool(), &list_parents).await?;
        for parent in &available_lists {
            if let Err(e) = self.flush_list_parent(parent).await {
                tracing::warn!(parent = %parent, error = %e, "Pending flush failed");
            }
        }

        Ok(())
    }
}
