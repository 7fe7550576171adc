//! Retrieval engine: embed the query, match governorates and hazards by
//! vector similarity, then expand matches to alerts through the relation
//! tables and rank them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use nadhir_core::config::RetrievalConfig;
use nadhir_core::error::{NadhirError, Result};
use nadhir_core::types::{Alert, EntityKind};
use nadhir_storage::EntityStore;
use nadhir_vector::{EmbeddingProvider, Neighbor, VectorIndex};

/// Optional restrictions on the candidate space, applied before scoring.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilters {
    /// Restrict governorate matches to this region's governorates.
    pub region_id: Option<String>,
    /// Restrict governorate matches to these ids.
    pub governorate_ids: Option<HashSet<String>>,
    /// Restrict hazard matches to these ids.
    pub hazard_ids: Option<HashSet<String>>,
}

impl RetrievalFilters {
    pub fn is_empty(&self) -> bool {
        self.region_id.is_none() && self.governorate_ids.is_none() && self.hazard_ids.is_none()
    }
}

/// One semantic match that contributed an alert to the result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSource {
    pub kind: EntityKind,
    pub id: String,
    pub distance: f64,
}

/// An alert with the matches that reached it and its overall score.
#[derive(Debug, Clone, Serialize)]
pub struct RankedAlert {
    pub alert: Alert,
    /// Every governorate/hazard match this alert was reached through.
    pub matches: Vec<MatchSource>,
    /// Minimum distance among contributing matches; lower is better.
    pub score: f64,
}

/// Retrieval over the store and index with a live embedding provider.
pub struct RetrievalEngine<P: EmbeddingProvider> {
    store: Arc<EntityStore>,
    index: Arc<VectorIndex>,
    provider: P,
    config: RetrievalConfig,
}

impl<P: EmbeddingProvider> RetrievalEngine<P> {
    pub fn new(
        store: Arc<EntityStore>,
        index: Arc<VectorIndex>,
        provider: P,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            config,
        }
    }

    /// Answer a free-text query with up to k ranked alerts.
    ///
    /// The query embedding runs under the configured timeout; failure or
    /// timeout surfaces as `EmbeddingUnavailable` rather than an empty
    /// result, so callers can distinguish "nothing matched" from "could
    /// not search". An empty result set is a valid answer.
    pub async fn retrieve(
        &self,
        query_text: &str,
        filters: &RetrievalFilters,
        k: usize,
    ) -> Result<Vec<RankedAlert>> {
        // k = 0 means "use the configured default"; k is capped at max_k.
        let max_k = self.config.max_k.max(1);
        let k = if k == 0 { self.config.default_k } else { k }.clamp(1, max_k);
        let query = self.embed_query(query_text).await?;

        let gov_filter = self.governorate_filter(filters)?;
        let gov_hits =
            self.index
                .nearest_neighbors(EntityKind::Governorate, &query, k, gov_filter.as_ref())?;
        let hazard_hits = self.index.nearest_neighbors(
            EntityKind::Hazard,
            &query,
            k,
            filters.hazard_ids.as_ref(),
        )?;

        debug!(
            governorates = gov_hits.len(),
            hazards = hazard_hits.len(),
            "Query matched entities"
        );

        // Expand each match to its alerts, deduplicating alerts reachable
        // through several matches while keeping every contributing match.
        let mut by_alert: HashMap<i64, RankedAlert> = HashMap::new();
        for hit in &gov_hits {
            let alerts = self.store.alerts_for_governorate(&hit.id)?;
            collect(&mut by_alert, EntityKind::Governorate, hit, alerts);
        }
        for hit in &hazard_hits {
            let alerts = self.store.alerts_for_hazard(&hit.id)?;
            collect(&mut by_alert, EntityKind::Hazard, hit, alerts);
        }

        let mut ranked: Vec<RankedAlert> = by_alert.into_values().collect();
        ranked.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                // More recent alerts first among equal scores.
                .then_with(|| b.alert.from_date.cmp(&a.alert.from_date))
                .then_with(|| a.alert.alert_id.cmp(&b.alert.alert_id))
        });
        ranked.truncate(k);

        Ok(ranked)
    }

    /// Resolve the region filter to a governorate id set and intersect it
    /// with an explicit governorate filter if both are present.
    fn governorate_filter(&self, filters: &RetrievalFilters) -> Result<Option<HashSet<String>>> {
        let region_set = match &filters.region_id {
            Some(region_id) => {
                // Verify the region exists so a typo errors instead of
                // silently matching nothing.
                self.store.get_region(region_id)?;
                Some(
                    self.store
                        .governorates_in_region(region_id)?
                        .into_iter()
                        .collect::<HashSet<String>>(),
                )
            }
            None => None,
        };

        Ok(match (region_set, &filters.governorate_ids) {
            (Some(region), Some(explicit)) => {
                Some(region.intersection(explicit).cloned().collect())
            }
            (Some(region), None) => Some(region),
            (None, Some(explicit)) => Some(explicit.clone()),
            (None, None) => None,
        })
    }

    async fn embed_query(&self, query_text: &str) -> Result<Vec<f32>> {
        let timeout = Duration::from_secs(self.config.query_timeout_secs);
        match tokio::time::timeout(timeout, self.provider.embed(query_text)).await {
            Ok(Ok(vector)) => Ok(vector),
            Ok(Err(e)) => Err(NadhirError::EmbeddingUnavailable(e.to_string())),
            Err(_) => Err(NadhirError::EmbeddingUnavailable(format!(
                "Query embedding timed out after {}s",
                self.config.query_timeout_secs
            ))),
        }
    }
}

fn collect(
    by_alert: &mut HashMap<i64, RankedAlert>,
    kind: EntityKind,
    hit: &Neighbor,
    alerts: Vec<Alert>,
) {
    for alert in alerts {
        let source = MatchSource {
            kind,
            id: hit.id.clone(),
            distance: hit.distance,
        };
        by_alert
            .entry(alert.alert_id)
            .and_modify(|ranked| {
                ranked.score = ranked.score.min(hit.distance);
                ranked.matches.push(source.clone());
            })
            .or_insert_with(|| RankedAlert {
                alert,
                matches: vec![source],
                score: hit.distance,
            });
    }
}
