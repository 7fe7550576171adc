//! Nadhir retrieval crate.
//!
//! Answers free-text questions over the knowledge store by combining
//! vector search with relational expansion: the query is embedded, its
//! nearest governorates and hazards are found, and the alerts attached
//! to those matches are ranked and returned with provenance.

pub mod engine;

pub use engine::{MatchSource, RankedAlert, RetrievalEngine, RetrievalFilters};
