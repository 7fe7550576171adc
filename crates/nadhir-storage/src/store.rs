//! Entity store over the SQLite database.
//!
//! Upserts report whether textual fields changed so the ingestion pipeline
//! knows when to re-embed. Relation upserts are idempotent; foreign-key
//! violations surface as `Integrity` errors without partial commits.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use nadhir_core::error::{NadhirError, Result};
use nadhir_core::types::{Alert, EmbeddingStatus, EntityKind, Governorate, Hazard, Region};

use crate::db::Database;

/// Result of an entity upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// True if the key was absent and a new row was inserted.
    pub inserted: bool,
    /// True if the textual fields differ from what was stored before.
    pub text_changed: bool,
    /// True if the row's embedding no longer matches its text (new row,
    /// changed text, or a previously deferred embedding).
    pub embedding_pending: bool,
}

/// The full set of entity ids present in one feed snapshot.
///
/// Used by the `prune` retention mode to delete everything else.
#[derive(Debug, Clone, Default)]
pub struct SnapshotIds {
    pub regions: HashSet<String>,
    pub governorates: HashSet<String>,
    pub hazards: HashSet<String>,
    pub alerts: HashSet<i64>,
}

/// Entities removed by a prune pass.
///
/// Join rows and governorates orphaned by a pruned region follow the
/// schema's ON DELETE CASCADE rules and are not listed individually.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneSummary {
    pub regions: Vec<String>,
    pub governorates: Vec<String>,
    pub hazards: Vec<String>,
    pub alerts: Vec<i64>,
}

impl PruneSummary {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
            && self.governorates.is_empty()
            && self.hazards.is_empty()
            && self.alerts.is_empty()
    }
}

/// Keyed relational storage for regions, governorates, hazards, alerts,
/// and their many-to-many associations.
///
/// All writes go through the connection mutex, so each operation observes
/// and produces a consistent state; readers in other threads proceed via WAL.
#[derive(Debug, Clone)]
pub struct EntityStore {
    db: Arc<Database>,
}

impl EntityStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ========================================================================
    // Entity upserts
    // ========================================================================

    /// Insert or update a region.
    pub fn upsert_region(&self, region: &Region) -> Result<UpsertOutcome> {
        self.db.with_conn(|conn| {
            let existing: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT name_ar, name_en, embedding_status FROM regions WHERE region_id = ?1",
                    params![region.region_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| storage_err("query region", e))?;

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO regions (region_id, name_ar, name_en, embedding_status)
                         VALUES (?1, ?2, ?3, 'pending')",
                        params![region.region_id, region.name_ar, region.name_en],
                    )
                    .map_err(|e| upsert_err("insert region", e))?;
                    Ok(UpsertOutcome {
                        inserted: true,
                        text_changed: true,
                        embedding_pending: true,
                    })
                }
                Some((name_ar, name_en, status)) => {
                    let text_changed =
                        name_ar != region.name_ar || name_en != region.name_en;
                    if text_changed {
                        conn.execute(
                            "UPDATE regions
                             SET name_ar = ?2, name_en = ?3, embedding_status = 'pending'
                             WHERE region_id = ?1",
                            params![region.region_id, region.name_ar, region.name_en],
                        )
                        .map_err(|e| upsert_err("update region", e))?;
                    }
                    Ok(UpsertOutcome {
                        inserted: false,
                        text_changed,
                        embedding_pending: text_changed || status == "pending",
                    })
                }
            }
        })
    }

    /// Insert or update a governorate.
    ///
    /// Latitude/longitude follow COALESCE semantics: an absent value in the
    /// incoming record never clobbers a previously stored coordinate.
    /// Referencing an unknown region fails with `Integrity`.
    pub fn upsert_governorate(&self, gov: &Governorate) -> Result<UpsertOutcome> {
        self.db.with_conn(|conn| {
            let existing: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT name_ar, name_en, embedding_status
                     FROM governorates WHERE gov_id = ?1",
                    params![gov.gov_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| storage_err("query governorate", e))?;

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO governorates
                         (gov_id, region_id, name_ar, name_en, latitude, longitude, embedding_status)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
                        params![
                            gov.gov_id,
                            gov.region_id,
                            gov.name_ar,
                            gov.name_en,
                            gov.latitude,
                            gov.longitude,
                        ],
                    )
                    .map_err(|e| upsert_err("insert governorate", e))?;
                    Ok(UpsertOutcome {
                        inserted: true,
                        text_changed: true,
                        embedding_pending: true,
                    })
                }
                Some((name_ar, name_en, status)) => {
                    let text_changed = name_ar != gov.name_ar || name_en != gov.name_en;
                    conn.execute(
                        "UPDATE governorates
                         SET region_id = ?2,
                             name_ar = ?3,
                             name_en = ?4,
                             latitude = COALESCE(?5, latitude),
                             longitude = COALESCE(?6, longitude)
                         WHERE gov_id = ?1",
                        params![
                            gov.gov_id,
                            gov.region_id,
                            gov.name_ar,
                            gov.name_en,
                            gov.latitude,
                            gov.longitude,
                        ],
                    )
                    .map_err(|e| upsert_err("update governorate", e))?;
                    if text_changed {
                        conn.execute(
                            "UPDATE governorates SET embedding_status = 'pending' WHERE gov_id = ?1",
                            params![gov.gov_id],
                        )
                        .map_err(|e| upsert_err("update governorate status", e))?;
                    }
                    Ok(UpsertOutcome {
                        inserted: false,
                        text_changed,
                        embedding_pending: text_changed || status == "pending",
                    })
                }
            }
        })
    }

    /// Insert or update a hazard.
    pub fn upsert_hazard(&self, hazard: &Hazard) -> Result<UpsertOutcome> {
        self.db.with_conn(|conn| {
            let existing: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT description_ar, description_en, embedding_status
                     FROM hazards WHERE hazard_id = ?1",
                    params![hazard.hazard_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| storage_err("query hazard", e))?;

            match existing {
                None => {
                    conn.execute(
                        "INSERT INTO hazards (hazard_id, description_ar, description_en, embedding_status)
                         VALUES (?1, ?2, ?3, 'pending')",
                        params![hazard.hazard_id, hazard.description_ar, hazard.description_en],
                    )
                    .map_err(|e| upsert_err("insert hazard", e))?;
                    Ok(UpsertOutcome {
                        inserted: true,
                        text_changed: true,
                        embedding_pending: true,
                    })
                }
                Some((desc_ar, desc_en, status)) => {
                    let text_changed =
                        desc_ar != hazard.description_ar || desc_en != hazard.description_en;
                    if text_changed {
                        conn.execute(
                            "UPDATE hazards
                             SET description_ar = ?2, description_en = ?3, embedding_status = 'pending'
                             WHERE hazard_id = ?1",
                            params![hazard.hazard_id, hazard.description_ar, hazard.description_en],
                        )
                        .map_err(|e| upsert_err("update hazard", e))?;
                    }
                    Ok(UpsertOutcome {
                        inserted: false,
                        text_changed,
                        embedding_pending: text_changed || status == "pending",
                    })
                }
            }
        })
    }

    /// Insert or update an alert, keyed by the feed's integer identity.
    ///
    /// Alerts carry no embedding, so the outcome never reports a pending one.
    pub fn upsert_alert(&self, alert: &Alert) -> Result<UpsertOutcome> {
        self.db.with_conn(|conn| {
            let existing = conn
                .query_row(
                    "SELECT title, hazard_type_ar, hazard_type_en, from_date, to_date,
                            status_ar, status_en
                     FROM alerts WHERE alert_id = ?1",
                    params![alert.alert_id],
                    row_to_alert_fields,
                )
                .optional()
                .map_err(|e| storage_err("query alert", e))?;

            let inserted = existing.is_none();
            let text_changed = match &existing {
                None => true,
                Some(prev) => {
                    prev.0 != alert.title
                        || prev.1 != alert.hazard_type_ar
                        || prev.2 != alert.hazard_type_en
                        || prev.3 != alert.from_date.map(|d| d.timestamp())
                        || prev.4 != alert.to_date.map(|d| d.timestamp())
                        || prev.5 != alert.status_ar
                        || prev.6 != alert.status_en
                }
            };

            if inserted {
                conn.execute(
                    "INSERT INTO alerts
                     (alert_id, title, hazard_type_ar, hazard_type_en, from_date, to_date,
                      status_ar, status_en)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    alert_params(alert),
                )
                .map_err(|e| upsert_err("insert alert", e))?;
            } else if text_changed {
                conn.execute(
                    "UPDATE alerts
                     SET title = ?2, hazard_type_ar = ?3, hazard_type_en = ?4,
                         from_date = ?5, to_date = ?6, status_ar = ?7, status_en = ?8
                     WHERE alert_id = ?1",
                    alert_params(alert),
                )
                .map_err(|e| upsert_err("update alert", e))?;
            }

            Ok(UpsertOutcome {
                inserted,
                text_changed,
                embedding_pending: false,
            })
        })
    }

    // ========================================================================
    // Relation upserts
    // ========================================================================

    /// Link an alert to a hazard. Idempotent: re-inserting an existing pair
    /// is a no-op. A pair citing an unknown alert or hazard fails with
    /// `Integrity` and commits nothing.
    pub fn link_alert_hazard(&self, alert_id: i64, hazard_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO alert_hazards (alert_id, hazard_id) VALUES (?1, ?2)",
                params![alert_id, hazard_id],
            )
            .map_err(|e| upsert_err("link alert-hazard", e))?;
            Ok(())
        })
    }

    /// Link an alert to a governorate. Same contract as [`link_alert_hazard`].
    ///
    /// [`link_alert_hazard`]: EntityStore::link_alert_hazard
    pub fn link_alert_governorate(&self, alert_id: i64, gov_id: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO alert_governorates (alert_id, gov_id) VALUES (?1, ?2)",
                params![alert_id, gov_id],
            )
            .map_err(|e| upsert_err("link alert-governorate", e))?;
            Ok(())
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Fetch a region by id, failing with `NotFound` if absent.
    pub fn get_region(&self, region_id: &str) -> Result<Region> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT region_id, name_ar, name_en FROM regions WHERE region_id = ?1",
                params![region_id],
                |row| {
                    Ok(Region {
                        region_id: row.get(0)?,
                        name_ar: row.get(1)?,
                        name_en: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| storage_err("get region", e))?
            .ok_or_else(|| not_found(EntityKind::Region, region_id))
        })
    }

    /// Fetch a governorate by id, failing with `NotFound` if absent.
    pub fn get_governorate(&self, gov_id: &str) -> Result<Governorate> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT gov_id, region_id, name_ar, name_en, latitude, longitude
                 FROM governorates WHERE gov_id = ?1",
                params![gov_id],
                |row| {
                    Ok(Governorate {
                        gov_id: row.get(0)?,
                        region_id: row.get(1)?,
                        name_ar: row.get(2)?,
                        name_en: row.get(3)?,
                        latitude: row.get(4)?,
                        longitude: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| storage_err("get governorate", e))?
            .ok_or_else(|| not_found(EntityKind::Governorate, gov_id))
        })
    }

    /// Fetch a hazard by id, failing with `NotFound` if absent.
    pub fn get_hazard(&self, hazard_id: &str) -> Result<Hazard> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT hazard_id, description_ar, description_en
                 FROM hazards WHERE hazard_id = ?1",
                params![hazard_id],
                |row| {
                    Ok(Hazard {
                        hazard_id: row.get(0)?,
                        description_ar: row.get(1)?,
                        description_en: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| storage_err("get hazard", e))?
            .ok_or_else(|| not_found(EntityKind::Hazard, hazard_id))
        })
    }

    /// Fetch an alert by id, failing with `NotFound` if absent.
    pub fn get_alert(&self, alert_id: i64) -> Result<Alert> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT alert_id, title, hazard_type_ar, hazard_type_en, from_date, to_date,
                        status_ar, status_en
                 FROM alerts WHERE alert_id = ?1",
                params![alert_id],
                row_to_alert,
            )
            .optional()
            .map_err(|e| storage_err("get alert", e))?
            .ok_or_else(|| not_found(EntityKind::Alert, &alert_id.to_string()))
        })
    }

    /// All alerts linked to the given governorate, ascending by alert id.
    pub fn alerts_for_governorate(&self, gov_id: &str) -> Result<Vec<Alert>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT a.alert_id, a.title, a.hazard_type_ar, a.hazard_type_en,
                            a.from_date, a.to_date, a.status_ar, a.status_en
                     FROM alerts a
                     JOIN alert_governorates ag ON ag.alert_id = a.alert_id
                     WHERE ag.gov_id = ?1
                     ORDER BY a.alert_id ASC",
                )
                .map_err(|e| storage_err("prepare alerts_for_governorate", e))?;
            collect_alerts(&mut stmt, params![gov_id])
        })
    }

    /// All alerts linked to the given hazard, ascending by alert id.
    pub fn alerts_for_hazard(&self, hazard_id: &str) -> Result<Vec<Alert>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT a.alert_id, a.title, a.hazard_type_ar, a.hazard_type_en,
                            a.from_date, a.to_date, a.status_ar, a.status_en
                     FROM alerts a
                     JOIN alert_hazards ah ON ah.alert_id = a.alert_id
                     WHERE ah.hazard_id = ?1
                     ORDER BY a.alert_id ASC",
                )
                .map_err(|e| storage_err("prepare alerts_for_hazard", e))?;
            collect_alerts(&mut stmt, params![hazard_id])
        })
    }

    /// Ids of all governorates in a region, ascending. Used by retrieval to
    /// build the admissible set for pre-filtered nearest-neighbor search.
    pub fn governorates_in_region(&self, region_id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT gov_id FROM governorates WHERE region_id = ?1 ORDER BY gov_id ASC",
                )
                .map_err(|e| storage_err("prepare governorates_in_region", e))?;
            let rows = stmt
                .query_map(params![region_id], |row| row.get::<_, String>(0))
                .map_err(|e| storage_err("governorates_in_region", e))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.map_err(|e| storage_err("governorates_in_region row", e))?);
            }
            Ok(ids)
        })
    }

    // ========================================================================
    // Embedding persistence
    // ========================================================================

    /// Store an embedding for an entity and mark it ready.
    ///
    /// Fails with `NotFound` for an unknown id and with `Storage` for the
    /// alert kind, which carries no embedding.
    pub fn put_embedding(&self, kind: EntityKind, id: &str, vector: &[f32]) -> Result<()> {
        let (table, id_col) = embedded_table(kind)?;
        self.db.with_conn(|conn| {
            let sql = format!(
                "UPDATE {table} SET embedding = ?2, embedding_status = 'ready' WHERE {id_col} = ?1"
            );
            let changed = conn
                .execute(&sql, params![id, vector_to_blob(vector)])
                .map_err(|e| storage_err("put embedding", e))?;
            if changed == 0 {
                return Err(not_found(kind, id));
            }
            debug!(kind = %kind, id, "Embedding stored");
            Ok(())
        })
    }

    /// Flag an entity's embedding as pending (deferred provider call).
    pub fn mark_embedding_pending(&self, kind: EntityKind, id: &str) -> Result<()> {
        let (table, id_col) = embedded_table(kind)?;
        self.db.with_conn(|conn| {
            let sql =
                format!("UPDATE {table} SET embedding_status = 'pending' WHERE {id_col} = ?1");
            let changed = conn
                .execute(&sql, params![id])
                .map_err(|e| storage_err("mark embedding pending", e))?;
            if changed == 0 {
                return Err(not_found(kind, id));
            }
            Ok(())
        })
    }

    /// Current embedding status of an entity.
    pub fn embedding_status(&self, kind: EntityKind, id: &str) -> Result<EmbeddingStatus> {
        let (table, id_col) = embedded_table(kind)?;
        self.db.with_conn(|conn| {
            let sql = format!("SELECT embedding_status FROM {table} WHERE {id_col} = ?1");
            let status: Option<String> = conn
                .query_row(&sql, params![id], |row| row.get(0))
                .optional()
                .map_err(|e| storage_err("embedding status", e))?;
            let status = status.ok_or_else(|| not_found(kind, id))?;
            EmbeddingStatus::parse(&status)
                .ok_or_else(|| NadhirError::Storage(format!("Unknown embedding status: {status}")))
        })
    }

    /// Load all ready embeddings of a kind, ascending by id.
    ///
    /// Used to rebuild the in-memory vector index on startup.
    pub fn load_embeddings(&self, kind: EntityKind) -> Result<Vec<(String, Vec<f32>)>> {
        let (table, id_col) = embedded_table(kind)?;
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {id_col}, embedding FROM {table}
                 WHERE embedding_status = 'ready' AND embedding IS NOT NULL
                 ORDER BY {id_col} ASC"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| storage_err("prepare load_embeddings", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(|e| storage_err("load_embeddings", e))?;
            let mut out = Vec::new();
            for row in rows {
                let (id, blob) = row.map_err(|e| storage_err("load_embeddings row", e))?;
                out.push((id, blob_to_vector(&blob)));
            }
            Ok(out)
        })
    }

    /// Stored embedding for a single entity, if ready.
    pub fn get_embedding(&self, kind: EntityKind, id: &str) -> Result<Option<Vec<f32>>> {
        let (table, id_col) = embedded_table(kind)?;
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT embedding FROM {table}
                 WHERE {id_col} = ?1 AND embedding_status = 'ready'"
            );
            let blob: Option<Option<Vec<u8>>> = conn
                .query_row(&sql, params![id], |row| row.get(0))
                .optional()
                .map_err(|e| storage_err("get embedding", e))?;
            Ok(blob.flatten().map(|b| blob_to_vector(&b)))
        })
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete every entity absent from the given snapshot.
    ///
    /// Deletion order is alerts, hazards, governorates, regions; join rows
    /// and governorates under a pruned region follow the FK cascades.
    pub fn prune_absent(&self, snapshot: &SnapshotIds) -> Result<PruneSummary> {
        self.db.with_conn(|conn| {
            let mut summary = PruneSummary::default();

            let alert_ids: Vec<i64> = collect_ids(conn, "SELECT alert_id FROM alerts")?;
            for id in alert_ids {
                if !snapshot.alerts.contains(&id) {
                    conn.execute("DELETE FROM alerts WHERE alert_id = ?1", params![id])
                        .map_err(|e| storage_err("prune alert", e))?;
                    summary.alerts.push(id);
                }
            }

            let hazard_ids: Vec<String> = collect_ids(conn, "SELECT hazard_id FROM hazards")?;
            for id in hazard_ids {
                if !snapshot.hazards.contains(&id) {
                    conn.execute("DELETE FROM hazards WHERE hazard_id = ?1", params![id])
                        .map_err(|e| storage_err("prune hazard", e))?;
                    summary.hazards.push(id);
                }
            }

            let gov_ids: Vec<String> = collect_ids(conn, "SELECT gov_id FROM governorates")?;
            for id in gov_ids {
                if !snapshot.governorates.contains(&id) {
                    conn.execute("DELETE FROM governorates WHERE gov_id = ?1", params![id])
                        .map_err(|e| storage_err("prune governorate", e))?;
                    summary.governorates.push(id);
                }
            }

            let region_ids: Vec<String> = collect_ids(conn, "SELECT region_id FROM regions")?;
            for id in region_ids {
                if !snapshot.regions.contains(&id) {
                    conn.execute("DELETE FROM regions WHERE region_id = ?1", params![id])
                        .map_err(|e| storage_err("prune region", e))?;
                    summary.regions.push(id);
                }
            }

            if !summary.is_empty() {
                debug!(
                    regions = summary.regions.len(),
                    governorates = summary.governorates.len(),
                    hazards = summary.hazards.len(),
                    alerts = summary.alerts.len(),
                    "Pruned entities absent from snapshot"
                );
            }
            Ok(summary)
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn not_found(kind: EntityKind, id: &str) -> NadhirError {
    NadhirError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn storage_err(context: &str, e: rusqlite::Error) -> NadhirError {
    NadhirError::Storage(format!("{context}: {e}"))
}

/// Map write errors: constraint violations (dangling foreign keys) become
/// `Integrity`, everything else `Storage`.
fn upsert_err(context: &str, e: rusqlite::Error) -> NadhirError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            NadhirError::Integrity(format!("{context}: {e}"))
        }
        _ => NadhirError::Storage(format!("{context}: {e}")),
    }
}

/// (table, id column) for the kinds that carry an embedding.
fn embedded_table(kind: EntityKind) -> Result<(&'static str, &'static str)> {
    match kind {
        EntityKind::Region => Ok(("regions", "region_id")),
        EntityKind::Governorate => Ok(("governorates", "gov_id")),
        EntityKind::Hazard => Ok(("hazards", "hazard_id")),
        EntityKind::Alert => Err(NadhirError::Storage(
            "alert entities carry no embedding".to_string(),
        )),
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

type AlertFields = (
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    String,
    String,
);

fn row_to_alert_fields(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertFields> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

type AlertParams = (
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    String,
    String,
);

fn alert_params(alert: &Alert) -> AlertParams {
    (
        alert.alert_id,
        alert.title.clone(),
        alert.hazard_type_ar.clone(),
        alert.hazard_type_en.clone(),
        alert.from_date.map(|d| d.timestamp()),
        alert.to_date.map(|d| d.timestamp()),
        alert.status_ar.clone(),
        alert.status_en.clone(),
    )
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let from_ts: Option<i64> = row.get(4)?;
    let to_ts: Option<i64> = row.get(5)?;
    Ok(Alert {
        alert_id: row.get(0)?,
        title: row.get(1)?,
        hazard_type_ar: row.get(2)?,
        hazard_type_en: row.get(3)?,
        from_date: from_ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        to_date: to_ts.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        status_ar: row.get(6)?,
        status_en: row.get(7)?,
    })
}

fn collect_alerts(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<Alert>> {
    let rows = stmt
        .query_map(params, row_to_alert)
        .map_err(|e| storage_err("query alerts", e))?;
    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row.map_err(|e| storage_err("alert row", e))?);
    }
    Ok(alerts)
}

fn collect_ids<T: rusqlite::types::FromSql>(conn: &Connection, sql: &str) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql).map_err(|e| storage_err("prepare ids", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, T>(0))
        .map_err(|e| storage_err("query ids", e))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.map_err(|e| storage_err("id row", e))?);
    }
    Ok(ids)
}
