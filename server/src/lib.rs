//! Skyline: an AT Protocol AppView indexer.
//!
//! Turns the relay firehose into a locally queryable, eventually-consistent
//! index: a durable queue buffers events, the commit processor writes
//! denormalized rows to PostgreSQL, and the thread/search services read
//! them back through a cache. The HTTP/XRPC surface lives outside this
//! crate and consumes the domain services directly.

pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
