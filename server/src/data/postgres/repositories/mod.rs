//! Index store repositories
//!
//! One module per entity. All functions take a `&PgPool` and return
//! `PostgresError`; callers decide how violation codes map to ack policy.

pub mod actor;
pub mod block;
pub mod cursor;
pub mod feed;
pub mod follow;
pub mod label;
pub mod list;
pub mod like;
pub mod notification;
pub mod post;
pub mod repost;
pub mod search;
pub mod thread_gate;
