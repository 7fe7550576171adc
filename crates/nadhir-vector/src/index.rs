//! In-memory vector index with brute-force cosine search.
//!
//! One vector per (entity kind, entity id). Search is exact k-NN over the
//! admissible candidates, O(n) per query, which is acceptable for the
//! corpus sizes involved (dozens of regions, hundreds of governorates and
//! hazards). Distance is cosine distance (1 - cosine similarity), ascending;
//! ties are broken by id ascending so repeated calls over a fixed index
//! state return the same ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use nadhir_core::error::{NadhirError, Result};
use nadhir_core::types::EntityKind;

/// A single hit returned from a nearest-neighbor search.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// The id of the matching entity.
    pub id: String,
    /// Cosine distance to the query (0.0 identical, 2.0 opposite).
    pub distance: f64,
}

/// Thread-safe vector index keyed by (entity kind, entity id).
///
/// The dimension is fixed at construction; vectors of any other length are
/// rejected with `Dimension` rather than truncated or padded. Entries are
/// kept in a BTreeMap per kind so iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    entries: Arc<RwLock<HashMap<EntityKind, BTreeMap<String, Vec<f32>>>>>,
}

impl VectorIndex {
    /// Create an empty index accepting vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The fixed vector dimension of this index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Insert or overwrite the vector for an entity. Idempotent.
    pub fn upsert(&self, kind: EntityKind, id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(NadhirError::Dimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|e| NadhirError::Storage(format!("Index lock poisoned: {}", e)))?;
        entries.entry(kind).or_default().insert(id.to_string(), vector);
        Ok(())
    }

    /// Remove an entity's vector. Removing an absent entry is a no-op.
    pub fn remove(&self, kind: EntityKind, id: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| NadhirError::Storage(format!("Index lock poisoned: {}", e)))?;
        if let Some(per_kind) = entries.get_mut(&kind) {
            per_kind.remove(id);
        }
        Ok(())
    }

    /// Up to k nearest neighbors of `query` among entities of `kind`,
    /// ordered by ascending cosine distance, ties by ascending id.
    ///
    /// When `filter` is given, only ids in the set are candidates; the
    /// filter is applied before scoring, so a small admissible set stays
    /// correct regardless of corpus size.
    pub fn nearest_neighbors(
        &self,
        kind: EntityKind,
        query: &[f32],
        k: usize,
        filter: Option<&HashSet<String>>,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(NadhirError::Dimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let entries = self
            .entries
            .read()
            .map_err(|e| NadhirError::Storage(format!("Index lock poisoned: {}", e)))?;

        let Some(per_kind) = entries.get(&kind) else {
            return Ok(Vec::new());
        };

        let mut neighbors: Vec<Neighbor> = per_kind
            .iter()
            .filter(|(id, _)| filter.map_or(true, |f| f.contains(id.as_str())))
            .map(|(id, vector)| Neighbor {
                id: id.clone(),
                distance: cosine_distance(query, vector),
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }

    /// Number of vectors stored for a kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.entries
            .read()
            .map(|e| e.get(&kind).map_or(0, |m| m.len()))
            .unwrap_or(0)
    }

    /// True if no vectors are stored for any kind.
    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .map(|e| e.values().all(|m| m.is_empty()))
            .unwrap_or(true)
    }
}

/// Cosine distance between two equal-length vectors.
///
/// Defined as 1 - cosine similarity. A zero-magnitude vector has similarity
/// 0 with everything, so its distance is 1.
fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (mag_a * mag_b)
}
