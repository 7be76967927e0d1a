//! Durable spool-file log shipper.
//!
//! An external rolling writer appends newline-framed records to
//! `<base>*.json` spool files; barge tails them, ships complete lines to a
//! remote ingestion endpoint in bounded batches, tracks delivery progress in
//! a crash-safe bookmark, and deletes spool files once they are fully
//! shipped and no longer held by anyone. Delivery is at-least-once and in
//! file order: the bookmark only advances after the endpoint accepts a
//! batch, so restarts and remote failures replay rather than lose.

pub mod cli;
pub mod config;
pub mod ship;
pub mod spool;
