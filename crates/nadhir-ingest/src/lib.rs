//! Nadhir ingestion crate.
//!
//! Parses upstream GeoJSON feed snapshots into typed source records and
//! drives the entity store and embedding index to convergence with them.
//! Ingestion is idempotent: re-running the same snapshot changes nothing
//! and performs no new embedding calls for unchanged text.

pub mod feed;
pub mod pipeline;

pub use feed::{parse_feed, ParsedFeed, SourceRecord};
pub use pipeline::{
    DeferredEmbedding, IngestPipeline, IngestReport, PipelineOptions, SkippedRecord,
};
