//! PostgreSQL schema definition
//!
//! Cross-entity references are URI/DID strings, never surrogate keys, so the
//! index stays shardable and rebuildable from the stream. Likes, reposts,
//! and list items carry plain foreign keys WITHOUT cascading deletes: the
//! commit processor implements cascade semantics itself so that buffered
//! ops remain visible to it.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initial schema
pub const SCHEMA: &str = r#"
CREATE EXTENSION IF NOT EXISTS pg_trgm;

CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY,
    version INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    description TEXT
);

-- Actors are created on first sighting and never deleted outright;
-- deactivation is a flag.
CREATE TABLE IF NOT EXISTS actors (
    did TEXT PRIMARY KEY,
    handle TEXT NOT NULL,
    display_name TEXT,
    description TEXT,
    avatar_cid TEXT,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    status TEXT,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    search tsvector GENERATED ALWAYS AS (
        to_tsvector('simple',
            coalesce(handle, '') || ' ' ||
            coalesce(display_name, '') || ' ' ||
            coalesce(description, ''))
    ) STORED
);
CREATE INDEX IF NOT EXISTS actors_handle_idx ON actors (handle);
CREATE INDEX IF NOT EXISTS actors_handle_trgm_idx ON actors USING gin (handle gin_trgm_ops);
CREATE INDEX IF NOT EXISTS actors_search_idx ON actors USING gin (search);

CREATE TABLE IF NOT EXISTS posts (
    uri TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    author_did TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    reply_parent TEXT,
    reply_root TEXT,
    embed JSONB,
    facets JSONB,
    like_count BIGINT NOT NULL DEFAULT 0,
    repost_count BIGINT NOT NULL DEFAULT 0,
    reply_count BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    text_search tsvector GENERATED ALWAYS AS (to_tsvector('simple', text)) STORED
);
CREATE INDEX IF NOT EXISTS posts_author_idx ON posts (author_did);
CREATE INDEX IF NOT EXISTS posts_reply_parent_idx ON posts (reply_parent);
CREATE INDEX IF NOT EXISTS posts_reply_root_idx ON posts (reply_root);
CREATE INDEX IF NOT EXISTS posts_text_search_idx ON posts USING gin (text_search);

CREATE TABLE IF NOT EXISTS likes (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    subject_uri TEXT NOT NULL REFERENCES posts (uri),
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (actor_did, subject_uri)
);
CREATE INDEX IF NOT EXISTS likes_subject_idx ON likes (subject_uri);

CREATE TABLE IF NOT EXISTS reposts (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    subject_uri TEXT NOT NULL REFERENCES posts (uri),
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (actor_did, subject_uri)
);
CREATE INDEX IF NOT EXISTS reposts_subject_idx ON reposts (subject_uri);

CREATE TABLE IF NOT EXISTS follows (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    subject_did TEXT NOT NULL,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (actor_did, subject_did)
);
CREATE INDEX IF NOT EXISTS follows_actor_idx ON follows (actor_did);
CREATE INDEX IF NOT EXISTS follows_subject_idx ON follows (subject_did);

CREATE TABLE IF NOT EXISTS blocks (
    uri TEXT PRIMARY KEY,
    actor_did TEXT NOT NULL,
    subject_did TEXT NOT NULL,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (actor_did, subject_did)
);
CREATE INDEX IF NOT EXISTS blocks_actor_idx ON blocks (actor_did);
CREATE INDEX IF NOT EXISTS blocks_subject_idx ON blocks (subject_did);

CREATE TABLE IF NOT EXISTS mutes (
    actor_did TEXT NOT NULL,
    subject_did TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (actor_did, subject_did)
);

CREATE TABLE IF NOT EXISTS lists (
    uri TEXT PRIMARY KEY,
    creator_did TEXT NOT NULL,
    purpose TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS lists_creator_idx ON lists (creator_did);

CREATE TABLE IF NOT EXISTS list_items (
    uri TEXT PRIMARY KEY,
    list_uri TEXT NOT NULL REFERENCES lists (uri),
    subject_did TEXT NOT NULL,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (list_uri, subject_did)
);
CREATE INDEX IF NOT EXISTS list_items_list_idx ON list_items (list_uri);
CREATE INDEX IF NOT EXISTS list_items_subject_idx ON list_items (subject_did);

CREATE TABLE IF NOT EXISTS feed_generators (
    uri TEXT PRIMARY KEY,
    creator_did TEXT NOT NULL,
    did TEXT NOT NULL,
    display_name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS feed_generators_creator_idx ON feed_generators (creator_did);

CREATE TABLE IF NOT EXISTS starter_packs (
    uri TEXT PRIMARY KEY,
    creator_did TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    list_uri TEXT,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS labeler_services (
    uri TEXT PRIMARY KEY,
    creator_did TEXT NOT NULL,
    policies JSONB,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Label records are append-only; the effective set for a subject is derived
-- by replaying them in timestamp order.
CREATE TABLE IF NOT EXISTS labels (
    id BIGSERIAL PRIMARY KEY,
    src TEXT NOT NULL,
    subject TEXT NOT NULL,
    val TEXT NOT NULL,
    neg BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS labels_subject_idx ON labels (subject);

CREATE TABLE IF NOT EXISTS notifications (
    id BIGSERIAL PRIMARY KEY,
    recipient_did TEXT NOT NULL,
    author_did TEXT NOT NULL,
    reason TEXT NOT NULL,
    subject_uri TEXT,
    seen BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS notifications_recipient_idx
    ON notifications (recipient_did, created_at DESC);

CREATE TABLE IF NOT EXISTS thread_gates (
    uri TEXT PRIMARY KEY,
    post_uri TEXT NOT NULL UNIQUE,
    creator_did TEXT NOT NULL,
    allow_mentions BOOLEAN NOT NULL DEFAULT FALSE,
    allow_following BOOLEAN NOT NULL DEFAULT FALSE,
    allow_list_members BOOLEAN NOT NULL DEFAULT FALSE,
    list_uris JSONB,
    created_at TIMESTAMPTZ,
    indexed_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

-- Per-ingestion-stream resume positions; monotone non-decreasing.
CREATE TABLE IF NOT EXISTS cursors (
    name TEXT PRIMARY KEY,
    seq BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_has_all_index_tables() {
        for table in [
            "actors",
            "posts",
            "likes",
            "reposts",
            "follows",
            "blocks",
            "mutes",
            "lists",
            "list_items",
            "feed_generators",
            "starter_packs",
            "labeler_services",
            "labels",
            "notifications",
            "thread_gates",
            "cursors",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {} ", table))
                    || SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)),
                "schema is missing table {}",
                table
            );
        }
    }

    #[test]
    fn test_dependent_tables_have_plain_foreign_keys() {
        // Cascade semantics live in the processor, not the schema
        assert!(SCHEMA.contains("REFERENCES posts (uri)"));
        assert!(SCHEMA.contains("REFERENCES lists (uri)"));
        assert!(!SCHEMA.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_full_text_columns_present() {
        assert!(SCHEMA.contains("text_search tsvector"));
        assert!(SCHEMA.contains("gin_trgm_ops"));
    }
}
