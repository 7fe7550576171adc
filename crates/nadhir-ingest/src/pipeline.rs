//! Ingestion pipeline.
//!
//! Drives a batch of parsed source records into the entity store and the
//! vector index. The pipeline is convergent: running the same snapshot
//! twice leaves the store unchanged and makes no new embedding calls, and
//! a snapshot that previously failed mid-embedding completes on re-run
//! because deferred entities stay marked pending.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use nadhir_core::config::{NadhirConfig, RetentionMode};
use nadhir_core::error::{NadhirError, Result};
use nadhir_core::types::EntityKind;
use nadhir_storage::{EntityStore, SnapshotIds, UpsertOutcome};
use nadhir_vector::{EmbeddingProvider, VectorIndex};

use crate::feed::SourceRecord;

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Attempts per embedding beyond the first is `max_retries`.
    pub max_retries: u32,
    /// Base backoff; attempt n sleeps `backoff_ms * 2^n` before retrying.
    pub backoff_ms: u64,
    /// What happens to stored entities absent from the snapshot.
    pub retention: RetentionMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1000,
            retention: RetentionMode::Retain,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(config: &NadhirConfig) -> Self {
        Self {
            max_retries: config.embedding.max_retries,
            backoff_ms: config.embedding.backoff_ms,
            retention: config.ingest.retention,
        }
    }
}

/// A record the pipeline could not apply.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRecord {
    pub description: String,
    pub error: String,
}

/// An entity stored without a current embedding.
///
/// Its text is persisted and its status stays pending, so the next run
/// picks it up again without requiring a text change.
#[derive(Debug, Clone, Serialize)]
pub struct DeferredEmbedding {
    pub kind: EntityKind,
    pub id: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Entities inserted or updated (unchanged upserts not counted).
    pub upserted: usize,
    /// Embeddings generated and stored.
    pub embedded: usize,
    /// Relation rows applied (idempotent re-links included).
    pub relations: usize,
    /// Records rejected by validation or integrity checks.
    pub skipped: Vec<SkippedRecord>,
    /// Entities whose embedding was deferred after retries were exhausted.
    pub deferred: Vec<DeferredEmbedding>,
    /// Entities deleted under the prune retention mode.
    pub pruned: usize,
}

/// Ingestion pipeline tying the store, the index, and a provider together.
pub struct IngestPipeline<P: EmbeddingProvider> {
    store: Arc<EntityStore>,
    index: Arc<VectorIndex>,
    provider: P,
    options: PipelineOptions,
}

impl<P: EmbeddingProvider> IngestPipeline<P> {
    pub fn new(
        store: Arc<EntityStore>,
        index: Arc<VectorIndex>,
        provider: P,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            index,
            provider,
            options,
        }
    }

    /// Apply one snapshot of source records.
    ///
    /// Entities are applied before relations, parents before children, so a
    /// well-formed snapshot never trips its own foreign keys. An integrity
    /// failure skips the offending record and the run continues; storage
    /// failures abort the run.
    pub async fn run(&self, records: &[SourceRecord]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let mut snapshot = SnapshotIds::default();

        // Regions before governorates: governorates carry a region FK.
        for record in records {
            if let SourceRecord::Region(region) = record {
                if region.region_id.is_empty() {
                    skip(&mut report, record, "empty region id");
                    continue;
                }
                snapshot.regions.insert(region.region_id.clone());
                let outcome = match self.store.upsert_region(region) {
                    Ok(o) => o,
                    Err(NadhirError::Integrity(msg)) => {
                        skip(&mut report, record, &msg);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                self.after_upsert(
                    &mut report,
                    EntityKind::Region,
                    &region.region_id,
                    &region.embedding_text(),
                    outcome,
                )
                .await?;
            }
        }

        for record in records {
            match record {
                SourceRecord::Governorate(gov) => {
                    if gov.gov_id.is_empty() {
                        skip(&mut report, record, "empty governorate id");
                        continue;
                    }
                    snapshot.governorates.insert(gov.gov_id.clone());
                    let outcome = match self.store.upsert_governorate(gov) {
                        Ok(o) => o,
                        Err(NadhirError::Integrity(msg)) => {
                            skip(&mut report, record, &msg);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    self.after_upsert(
                        &mut report,
                        EntityKind::Governorate,
                        &gov.gov_id,
                        &gov.embedding_text(),
                        outcome,
                    )
                    .await?;
                }
                SourceRecord::Hazard(hazard) => {
                    if hazard.hazard_id.is_empty() {
                        skip(&mut report, record, "empty hazard id");
                        continue;
                    }
                    snapshot.hazards.insert(hazard.hazard_id.clone());
                    let outcome = match self.store.upsert_hazard(hazard) {
                        Ok(o) => o,
                        Err(NadhirError::Integrity(msg)) => {
                            skip(&mut report, record, &msg);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    self.after_upsert(
                        &mut report,
                        EntityKind::Hazard,
                        &hazard.hazard_id,
                        &hazard.embedding_text(),
                        outcome,
                    )
                    .await?;
                }
                SourceRecord::Alert(alert) => {
                    snapshot.alerts.insert(alert.alert_id);
                    let outcome = match self.store.upsert_alert(alert) {
                        Ok(o) => o,
                        Err(NadhirError::Integrity(msg)) => {
                            skip(&mut report, record, &msg);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if outcome.inserted || outcome.text_changed {
                        report.upserted += 1;
                    }
                }
                _ => {}
            }
        }

        // Relations last, once both endpoints had their chance to exist.
        for record in records {
            let result = match record {
                SourceRecord::AlertHazard {
                    alert_id,
                    hazard_id,
                } => Some(self.store.link_alert_hazard(*alert_id, hazard_id)),
                SourceRecord::AlertGovernorate { alert_id, gov_id } => {
                    Some(self.store.link_alert_governorate(*alert_id, gov_id))
                }
                _ => None,
            };
            match result {
                None => {}
                Some(Ok(())) => report.relations += 1,
                Some(Err(NadhirError::Integrity(msg))) => skip(&mut report, record, &msg),
                Some(Err(e)) => return Err(e),
            }
        }

        if self.options.retention == RetentionMode::Prune {
            let pruned = self.store.prune_absent(&snapshot)?;
            for id in &pruned.regions {
                self.index.remove(EntityKind::Region, id)?;
            }
            for id in &pruned.governorates {
                self.index.remove(EntityKind::Governorate, id)?;
            }
            for id in &pruned.hazards {
                self.index.remove(EntityKind::Hazard, id)?;
            }
            report.pruned = pruned.regions.len()
                + pruned.governorates.len()
                + pruned.hazards.len()
                + pruned.alerts.len();
        }

        info!(
            upserted = report.upserted,
            embedded = report.embedded,
            relations = report.relations,
            skipped = report.skipped.len(),
            deferred = report.deferred.len(),
            pruned = report.pruned,
            "Ingest run complete"
        );
        Ok(report)
    }

    /// Bookkeeping after an entity upsert: count it and, when its embedding
    /// is stale, regenerate it.
    async fn after_upsert(
        &self,
        report: &mut IngestReport,
        kind: EntityKind,
        id: &str,
        text: &str,
        outcome: UpsertOutcome,
    ) -> Result<()> {
        if outcome.inserted || outcome.text_changed {
            report.upserted += 1;
        }
        if !outcome.embedding_pending {
            return Ok(());
        }

        match self.embed_with_retry(text).await {
            Ok(vector) => match self.index.upsert(kind, id, vector.clone()) {
                Ok(()) => {
                    self.store.put_embedding(kind, id, &vector)?;
                    report.embedded += 1;
                }
                Err(e @ NadhirError::Dimension { .. }) => {
                    // Entity stays stored and pending; only the vector is bad.
                    warn!(%kind, id, error = %e, "Rejected embedding");
                    report.skipped.push(SkippedRecord {
                        description: format!("{kind} {id} embedding"),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            },
            Err(e) => {
                warn!(%kind, id, error = %e, "Embedding deferred");
                report.deferred.push(DeferredEmbedding {
                    kind,
                    id: id.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Call the provider with bounded exponential backoff.
    async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt = 0;
        loop {
            match self.provider.embed(text).await {
                Ok(vector) => return Ok(vector),
                // Dimension errors are not transient; retrying cannot help.
                Err(e @ NadhirError::Dimension { .. }) => return Err(e),
                Err(e) if attempt < self.options.max_retries => {
                    let delay = self.options.backoff_ms * (1 << attempt);
                    debug!(attempt, delay_ms = delay, error = %e, "Retrying embedding");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn skip(report: &mut IngestReport, record: &SourceRecord, error: &str) {
    warn!(record = %record.describe(), error, "Skipped record");
    report.skipped.push(SkippedRecord {
        description: record.describe(),
        error: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nadhir_core::types::{Alert, EmbeddingStatus, Governorate, Hazard, Region};
    use nadhir_storage::Database;
    use nadhir_vector::MockEmbedding;

    const DIM: usize = 8;

    fn region(id: &str, name_en: &str) -> SourceRecord {
        SourceRecord::Region(Region {
            region_id: id.to_string(),
            name_ar: format!("{name_en}-ar"),
            name_en: name_en.to_string(),
        })
    }

    fn governorate(id: &str, region_id: &str, name_en: &str) -> SourceRecord {
        SourceRecord::Governorate(Governorate {
            gov_id: id.to_string(),
            region_id: region_id.to_string(),
            name_ar: format!("{name_en}-ar"),
            name_en: name_en.to_string(),
            latitude: None,
            longitude: None,
        })
    }

    fn hazard(id: &str, desc_en: &str) -> SourceRecord {
        SourceRecord::Hazard(Hazard {
            hazard_id: id.to_string(),
            description_ar: format!("{desc_en}-ar"),
            description_en: desc_en.to_string(),
        })
    }

    fn alert(id: i64, title: &str) -> SourceRecord {
        SourceRecord::Alert(Alert {
            alert_id: id,
            title: title.to_string(),
            hazard_type_ar: String::new(),
            hazard_type_en: "Rain".to_string(),
            from_date: None,
            to_date: None,
            status_ar: String::new(),
            status_en: "Active".to_string(),
        })
    }

    fn setup() -> (Arc<EntityStore>, Arc<VectorIndex>) {
        let db = Arc::new(Database::in_memory().unwrap());
        let store = Arc::new(EntityStore::new(db));
        let index = Arc::new(VectorIndex::new(DIM));
        (store, index)
    }

    fn pipeline(
        store: Arc<EntityStore>,
        index: Arc<VectorIndex>,
        provider: MockEmbedding,
    ) -> IngestPipeline<MockEmbedding> {
        let options = PipelineOptions {
            max_retries: 2,
            backoff_ms: 1,
            retention: RetentionMode::Retain,
        };
        IngestPipeline::new(store, index, provider, options)
    }

    fn snapshot_records() -> Vec<SourceRecord> {
        vec![
            region("R1", "North"),
            governorate("G1", "R1", "Alpha"),
            hazard("H1", "Flood"),
            alert(100, "Heavy rain"),
            SourceRecord::AlertHazard {
                alert_id: 100,
                hazard_id: "H1".to_string(),
            },
            SourceRecord::AlertGovernorate {
                alert_id: 100,
                gov_id: "G1".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_ingest_snapshot() {
        let (store, index) = setup();
        let p = pipeline(store.clone(), index.clone(), MockEmbedding::new(DIM));

        let report = p.run(&snapshot_records()).await.unwrap();
        assert_eq!(report.upserted, 4);
        assert_eq!(report.embedded, 3);
        assert_eq!(report.relations, 2);
        assert!(report.skipped.is_empty());
        assert!(report.deferred.is_empty());

        assert_eq!(store.get_region("R1").unwrap().name_en, "North");
        assert_eq!(store.get_alert(100).unwrap().title, "Heavy rain");
        assert_eq!(
            store.embedding_status(EntityKind::Governorate, "G1").unwrap(),
            EmbeddingStatus::Ready
        );
        assert_eq!(index.len(EntityKind::Hazard), 1);
        assert_eq!(store.alerts_for_hazard("H1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let (store, index) = setup();
        let provider = MockEmbedding::new(DIM);
        let p = pipeline(store.clone(), index.clone(), provider.clone());

        p.run(&snapshot_records()).await.unwrap();
        let calls_after_first = provider.call_count();

        let report = p.run(&snapshot_records()).await.unwrap();
        assert_eq!(report.upserted, 0);
        assert_eq!(report.embedded, 0);
        // Unchanged text makes no new provider calls.
        assert_eq!(provider.call_count(), calls_after_first);
        // Relations are re-applied without duplication.
        assert_eq!(store.alerts_for_hazard("H1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_text_change_triggers_reembed() {
        let (store, index) = setup();
        let provider = MockEmbedding::new(DIM);
        let p = pipeline(store.clone(), index.clone(), provider.clone());

        p.run(&[region("R1", "North")]).await.unwrap();
        let first = store.get_embedding(EntityKind::Region, "R1").unwrap();

        let report = p.run(&[region("R1", "Northern")]).await.unwrap();
        assert_eq!(report.upserted, 1);
        assert_eq!(report.embedded, 1);
        let second = store.get_embedding(EntityKind::Region, "R1").unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_dangling_relation_is_skipped() {
        let (store, index) = setup();
        let p = pipeline(store.clone(), index.clone(), MockEmbedding::new(DIM));

        let mut records = snapshot_records();
        records.push(SourceRecord::AlertHazard {
            alert_id: 999,
            hazard_id: "H1".to_string(),
        });

        let report = p.run(&records).await.unwrap();
        // The bad relation is reported; the valid snapshot still lands.
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.relations, 2);
        assert_eq!(store.get_alert(100).unwrap().alert_id, 100);
    }

    #[tokio::test]
    async fn test_governorate_with_unknown_region_is_skipped() {
        let (store, index) = setup();
        let p = pipeline(store.clone(), index.clone(), MockEmbedding::new(DIM));

        let report = p
            .run(&[governorate("G9", "NO_SUCH_REGION", "Orphan")])
            .await
            .unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert!(store.get_governorate("G9").is_err());
    }

    #[tokio::test]
    async fn test_empty_id_is_skipped() {
        let (store, index) = setup();
        let p = pipeline(store, index, MockEmbedding::new(DIM));

        let report = p.run(&[region("", "Nameless")]).await.unwrap();
        assert_eq!(report.upserted, 0);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].error.contains("empty region id"));
    }

    /// Provider that fails a configurable number of times before succeeding.
    #[derive(Clone)]
    struct FlakyProvider {
        inner: MockEmbedding,
        failures: Arc<AtomicUsize>,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                inner: MockEmbedding::new(DIM),
                failures: Arc::new(AtomicUsize::new(failures)),
            }
        }
    }

    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NadhirError::Provider("transient failure".to_string()));
            }
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            DIM
        }
    }

    #[tokio::test]
    async fn test_transient_provider_failure_is_retried() {
        let (store, index) = setup();
        let provider = FlakyProvider::new(2);
        let options = PipelineOptions {
            max_retries: 3,
            backoff_ms: 1,
            retention: RetentionMode::Retain,
        };
        let p = IngestPipeline::new(store.clone(), index, provider, options);

        let report = p.run(&[region("R1", "North")]).await.unwrap();
        assert_eq!(report.embedded, 1);
        assert!(report.deferred.is_empty());
        assert_eq!(
            store.embedding_status(EntityKind::Region, "R1").unwrap(),
            EmbeddingStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_exhausted_retries_defer_embedding() {
        let (store, index) = setup();
        // More failures than the retry budget allows.
        let provider = FlakyProvider::new(100);
        let options = PipelineOptions {
            max_retries: 2,
            backoff_ms: 1,
            retention: RetentionMode::Retain,
        };
        let p = IngestPipeline::new(store.clone(), index.clone(), provider, options);

        let report = p.run(&[region("R1", "North")]).await.unwrap();
        assert_eq!(report.embedded, 0);
        assert_eq!(report.deferred.len(), 1);
        assert_eq!(report.deferred[0].id, "R1");

        // The entity itself is stored and stays pending.
        assert_eq!(store.get_region("R1").unwrap().name_en, "North");
        assert_eq!(
            store.embedding_status(EntityKind::Region, "R1").unwrap(),
            EmbeddingStatus::Pending
        );
        assert_eq!(index.len(EntityKind::Region), 0);
    }

    #[tokio::test]
    async fn test_deferred_embedding_recovers_on_rerun() {
        let (store, index) = setup();
        let failing = FlakyProvider::new(100);
        let options = PipelineOptions {
            max_retries: 1,
            backoff_ms: 1,
            retention: RetentionMode::Retain,
        };
        let p = IngestPipeline::new(store.clone(), index.clone(), failing, options.clone());
        p.run(&[region("R1", "North")]).await.unwrap();

        // Same snapshot, healthy provider: the pending entity is picked up
        // even though its text did not change.
        let p = IngestPipeline::new(
            store.clone(),
            index.clone(),
            MockEmbedding::new(DIM),
            options,
        );
        let report = p.run(&[region("R1", "North")]).await.unwrap();
        assert_eq!(report.upserted, 0);
        assert_eq!(report.embedded, 1);
        assert_eq!(
            store.embedding_status(EntityKind::Region, "R1").unwrap(),
            EmbeddingStatus::Ready
        );
        assert_eq!(index.len(EntityKind::Region), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_absent_entities() {
        let (store, index) = setup();
        let options = PipelineOptions {
            max_retries: 1,
            backoff_ms: 1,
            retention: RetentionMode::Prune,
        };
        let p = IngestPipeline::new(
            store.clone(),
            index.clone(),
            MockEmbedding::new(DIM),
            options,
        );

        p.run(&snapshot_records()).await.unwrap();
        assert_eq!(index.len(EntityKind::Hazard), 1);

        // Next snapshot drops the hazard and the alert.
        let report = p
            .run(&[region("R1", "North"), governorate("G1", "R1", "Alpha")])
            .await
            .unwrap();
        assert_eq!(report.pruned, 2);
        assert!(store.get_hazard("H1").is_err());
        assert!(store.get_alert(100).is_err());
        assert_eq!(index.len(EntityKind::Hazard), 0);
        assert_eq!(index.len(EntityKind::Governorate), 1);
    }

    #[tokio::test]
    async fn test_retain_keeps_absent_entities() {
        let (store, index) = setup();
        let p = pipeline(store.clone(), index.clone(), MockEmbedding::new(DIM));

        p.run(&snapshot_records()).await.unwrap();
        let report = p.run(&[region("R1", "North")]).await.unwrap();
        assert_eq!(report.pruned, 0);
        assert!(store.get_hazard("H1").is_ok());
        assert!(store.get_alert(100).is_ok());
    }

}
