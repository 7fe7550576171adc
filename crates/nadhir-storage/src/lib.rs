//! Nadhir storage crate - SQLite-backed entity store.
//!
//! Durable keyed storage for the six entity/relation kinds (regions,
//! governorates, hazards, alerts, and the two alert join tables) with
//! idempotent upserts, enforced foreign keys, and persisted embedding
//! vectors so the in-memory index can be rebuilt on startup.

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use store::{EntityStore, PruneSummary, SnapshotIds, UpsertOutcome};
