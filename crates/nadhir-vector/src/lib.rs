//! Nadhir vector crate - embedding index and provider boundary.
//!
//! Provides the per-kind in-memory vector index with deterministic cosine
//! nearest-neighbor search and pre-filtering, plus the embedding provider
//! trait with an OpenAI-backed implementation and a deterministic mock
//! for testing.

pub mod index;
pub mod provider;

pub use index::{Neighbor, VectorIndex};
pub use provider::{EmbeddingProvider, MockEmbedding, OpenAiEmbedding};
