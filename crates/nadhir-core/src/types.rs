use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// The kind of a stored entity.
///
/// Regions, governorates, and hazards carry embeddings over their text;
/// alerts are reached only through their relations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Region,
    Governorate,
    Hazard,
    Alert,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Region => "region",
            EntityKind::Governorate => "governorate",
            EntityKind::Hazard => "hazard",
            EntityKind::Alert => "alert",
        };
        f.write_str(s)
    }
}

/// Whether an entity's stored embedding reflects its current text.
///
/// Text changes flip the status to `Pending`; only a successful provider
/// call flips it back to `Ready`. Pending entities are re-embedded on the
/// next ingestion run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Ready,
    Pending,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Ready => "ready",
            EmbeddingStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(EmbeddingStatus::Ready),
            "pending" => Some(EmbeddingStatus::Pending),
            _ => None,
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// Top of the geographic hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub region_id: String,
    pub name_ar: String,
    pub name_en: String,
}

impl Region {
    /// The canonical text that is embedded for this region.
    pub fn embedding_text(&self) -> String {
        format!("{} - {}", self.name_ar, self.name_en)
    }
}

/// A governorate belonging to exactly one region.
///
/// Latitude/longitude come and go in the upstream feed; their absence never
/// blocks any other field from being populated or queried.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Governorate {
    pub gov_id: String,
    pub region_id: String,
    pub name_ar: String,
    pub name_en: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Governorate {
    /// The canonical text that is embedded for this governorate.
    pub fn embedding_text(&self) -> String {
        format!("{} - {}", self.name_ar, self.name_en)
    }
}

/// A canonical hazard type with a bilingual description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub hazard_id: String,
    pub description_ar: String,
    pub description_en: String,
}

impl Hazard {
    /// The canonical text that is embedded for this hazard.
    pub fn embedding_text(&self) -> String {
        format!("{} | {}", self.description_ar, self.description_en)
    }
}

/// An alert from the upstream feed.
///
/// `alert_id` is the feed's own integer identity, not a generated surrogate:
/// re-ingesting the same id updates the row instead of duplicating it.
/// Alerts carry no embedding; their semantic relevance is derived through
/// their associated hazards and governorates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: i64,
    pub title: String,
    pub hazard_type_ar: String,
    pub hazard_type_en: String,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub status_ar: String,
    pub status_en: String,
}
