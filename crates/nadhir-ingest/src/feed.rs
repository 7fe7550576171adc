//! Upstream feed parsing.
//!
//! The source feed is a GeoJSON document whose features carry a flat
//! region/governorate pair in `properties` and a nested `alert` array with
//! `governorates` and `alertHazards` sub-arrays. Parsing flattens this into
//! typed source records, deduplicating entities that repeat across features.
//! Malformed features are reported, not fatal.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use nadhir_core::error::{NadhirError, Result};
use nadhir_core::types::{Alert, Governorate, Hazard, Region};

/// One typed record from a feed snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRecord {
    Region(Region),
    Governorate(Governorate),
    Hazard(Hazard),
    Alert(Alert),
    AlertHazard { alert_id: i64, hazard_id: String },
    AlertGovernorate { alert_id: i64, gov_id: String },
}

impl SourceRecord {
    /// Short human-readable description used in skip reports.
    pub fn describe(&self) -> String {
        match self {
            SourceRecord::Region(r) => format!("region {}", r.region_id),
            SourceRecord::Governorate(g) => format!("governorate {}", g.gov_id),
            SourceRecord::Hazard(h) => format!("hazard {}", h.hazard_id),
            SourceRecord::Alert(a) => format!("alert {}", a.alert_id),
            SourceRecord::AlertHazard {
                alert_id,
                hazard_id,
            } => format!("alert-hazard {alert_id}:{hazard_id}"),
            SourceRecord::AlertGovernorate { alert_id, gov_id } => {
                format!("alert-governorate {alert_id}:{gov_id}")
            }
        }
    }
}

/// Result of parsing one feed snapshot.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    /// Records in dependency order: regions first, relations last.
    pub records: Vec<SourceRecord>,
    /// Descriptions of features or sub-objects that could not be parsed.
    pub malformed: Vec<String>,
}

/// Parse a GeoJSON feed document into source records.
///
/// Fails only if the document has no `features` array at all; individual
/// malformed features are accumulated in `ParsedFeed::malformed`.
pub fn parse_feed(data: &Value) -> Result<ParsedFeed> {
    let features = data
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| NadhirError::Feed("document has no features array".to_string()))?;

    let mut regions = Vec::new();
    let mut governorates = Vec::new();
    let mut hazards = Vec::new();
    let mut alerts = Vec::new();
    let mut relations = Vec::new();
    let mut malformed = Vec::new();

    let mut regions_seen = HashSet::new();
    let mut govs_seen = HashSet::new();
    let mut alerts_seen = HashSet::new();
    let mut hazards_seen = HashSet::new();

    for (i, feature) in features.iter().enumerate() {
        let Some(props) = feature.get("properties").filter(|p| p.is_object()) else {
            malformed.push(format!("feature {i}: missing properties"));
            continue;
        };

        let region_id = opt_string(props, "Region_ID");
        if let Some(region_id) = &region_id {
            if regions_seen.insert(region_id.clone()) {
                regions.push(SourceRecord::Region(Region {
                    region_id: region_id.clone(),
                    name_ar: opt_string(props, "Region_Name_A").unwrap_or_default(),
                    name_en: opt_string(props, "Region_Name_E").unwrap_or_default(),
                }));
            }
        }

        let empty = Vec::new();
        let feature_alerts = props
            .get("alert")
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        let gov_id = opt_string(props, "GovID");
        if let Some(gov_id) = &gov_id {
            if govs_seen.insert(gov_id.clone()) {
                // Coordinates live on the nested alert governorate entries.
                let (latitude, longitude) = find_coordinates(feature_alerts, gov_id);
                governorates.push(SourceRecord::Governorate(Governorate {
                    gov_id: gov_id.clone(),
                    region_id: region_id.clone().unwrap_or_default(),
                    name_ar: opt_string(props, "Gov_Name_A").unwrap_or_default(),
                    name_en: opt_string(props, "Gov_Name_E").unwrap_or_default(),
                    latitude,
                    longitude,
                }));
            }
        }

        for al in feature_alerts {
            let Some(alert_id) = opt_i64(al, "id") else {
                malformed.push(format!("feature {i}: alert without id"));
                continue;
            };

            if alerts_seen.insert(alert_id) {
                alerts.push(SourceRecord::Alert(Alert {
                    alert_id,
                    title: opt_string(al, "title").unwrap_or_default(),
                    hazard_type_ar: opt_string(al, "alertTypeAr").unwrap_or_default(),
                    hazard_type_en: opt_string(al, "alertTypeEn").unwrap_or_default(),
                    from_date: opt_string(al, "fromDate").as_deref().and_then(parse_date),
                    to_date: opt_string(al, "toDate").as_deref().and_then(parse_date),
                    status_ar: opt_string(al, "alertStatusAr").unwrap_or_default(),
                    status_en: opt_string(al, "alertStatusEn").unwrap_or_default(),
                }));
            }

            if let Some(gov_id) = &gov_id {
                relations.push(SourceRecord::AlertGovernorate {
                    alert_id,
                    gov_id: gov_id.clone(),
                });
            }

            for hz in al
                .get("alertHazards")
                .and_then(Value::as_array)
                .unwrap_or(&empty)
            {
                let Some(hazard_id) = opt_string(hz, "id") else {
                    malformed.push(format!("feature {i}: hazard without id"));
                    continue;
                };
                if hazards_seen.insert(hazard_id.clone()) {
                    hazards.push(SourceRecord::Hazard(Hazard {
                        hazard_id: hazard_id.clone(),
                        description_ar: opt_string(hz, "descriptionAr").unwrap_or_default(),
                        description_en: opt_string(hz, "descriptionEn").unwrap_or_default(),
                    }));
                }
                relations.push(SourceRecord::AlertHazard {
                    alert_id,
                    hazard_id,
                });
            }
        }
    }

    for report in &malformed {
        warn!("Malformed feed entry: {report}");
    }

    let mut records = regions;
    records.append(&mut governorates);
    records.append(&mut hazards);
    records.append(&mut alerts);
    records.append(&mut relations);

    Ok(ParsedFeed { records, malformed })
}

/// Parse the feed's date strings, e.g. `1/21/2025 2:00:00 PM` or
/// `2025-01-21T14:00:00`. Unknown formats yield None.
fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    for fmt in ["%m/%d/%Y %I:%M:%S %p", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    warn!("Unknown date format: '{s}'");
    None
}

/// String field that may arrive as a JSON string or number.
fn opt_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer field that may arrive as a JSON number or numeric string.
fn opt_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Float field that may arrive as a JSON number or numeric string.
fn opt_f64(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Scan the nested alert governorate entries for this governorate's
/// coordinates.
fn find_coordinates(alerts: &[Value], gov_id: &str) -> (Option<f64>, Option<f64>) {
    for al in alerts {
        for g in al
            .get("governorates")
            .and_then(Value::as_array)
            .unwrap_or(&Vec::new())
        {
            if opt_string(g, "id").as_deref() == Some(gov_id) {
                return (opt_f64(g, "latitude"), opt_f64(g, "longitude"));
            }
        }
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_feed() -> Value {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "properties": {
                        "Region_ID": "R1",
                        "Region_Name_A": "الشمال",
                        "Region_Name_E": "North",
                        "GovID": "G1",
                        "Gov_Name_A": "ألفا",
                        "Gov_Name_E": "Alpha",
                        "alert": [
                            {
                                "id": 100,
                                "title": "Heavy rain over Alpha",
                                "alertTypeAr": "أمطار",
                                "alertTypeEn": "Rain",
                                "fromDate": "1/21/2025 2:00:00 PM",
                                "toDate": "2025-01-22T14:00:00",
                                "alertStatusAr": "نشط",
                                "alertStatusEn": "Active",
                                "governorates": [
                                    {"id": "G1", "latitude": "24.7", "longitude": "46.7"}
                                ],
                                "alertHazards": [
                                    {"id": "H1", "descriptionAr": "فيضان", "descriptionEn": "Flood"}
                                ]
                            }
                        ]
                    }
                },
                {
                    "properties": {
                        "Region_ID": "R1",
                        "Region_Name_A": "الشمال",
                        "Region_Name_E": "North",
                        "GovID": "G2",
                        "Gov_Name_E": "Beta",
                        "alert": [
                            {
                                "id": 100,
                                "title": "Heavy rain over Alpha",
                                "alertHazards": [
                                    {"id": "H1", "descriptionEn": "Flood"}
                                ]
                            }
                        ]
                    }
                }
            ]
        })
    }

    fn count_kind(records: &[SourceRecord], f: impl Fn(&SourceRecord) -> bool) -> usize {
        records.iter().filter(|r| f(r)).count()
    }

    #[test]
    fn test_parse_sample_feed() {
        let parsed = parse_feed(&sample_feed()).unwrap();
        assert!(parsed.malformed.is_empty());

        // Region and alert repeat across features but parse once.
        assert_eq!(
            count_kind(&parsed.records, |r| matches!(r, SourceRecord::Region(_))),
            1
        );
        assert_eq!(
            count_kind(&parsed.records, |r| matches!(
                r,
                SourceRecord::Governorate(_)
            )),
            2
        );
        assert_eq!(
            count_kind(&parsed.records, |r| matches!(r, SourceRecord::Hazard(_))),
            1
        );
        assert_eq!(
            count_kind(&parsed.records, |r| matches!(r, SourceRecord::Alert(_))),
            1
        );
        // One alert-governorate per feature plus one alert-hazard per feature.
        assert_eq!(
            count_kind(&parsed.records, |r| matches!(
                r,
                SourceRecord::AlertGovernorate { .. }
            )),
            2
        );
    }

    #[test]
    fn test_parse_governorate_coordinates() {
        let parsed = parse_feed(&sample_feed()).unwrap();
        let gov = parsed
            .records
            .iter()
            .find_map(|r| match r {
                SourceRecord::Governorate(g) if g.gov_id == "G1" => Some(g),
                _ => None,
            })
            .unwrap();
        assert_eq!(gov.latitude, Some(24.7));
        assert_eq!(gov.longitude, Some(46.7));
        assert_eq!(gov.region_id, "R1");
    }

    #[test]
    fn test_parse_governorate_without_coordinates() {
        let parsed = parse_feed(&sample_feed()).unwrap();
        let gov = parsed
            .records
            .iter()
            .find_map(|r| match r {
                SourceRecord::Governorate(g) if g.gov_id == "G2" => Some(g),
                _ => None,
            })
            .unwrap();
        assert_eq!(gov.latitude, None);
        assert_eq!(gov.longitude, None);
    }

    #[test]
    fn test_parse_alert_dates() {
        let parsed = parse_feed(&sample_feed()).unwrap();
        let alert = parsed
            .records
            .iter()
            .find_map(|r| match r {
                SourceRecord::Alert(a) => Some(a),
                _ => None,
            })
            .unwrap();
        // Both feed date formats resolve to the same instant.
        assert_eq!(
            alert.from_date.unwrap().to_rfc3339(),
            "2025-01-21T14:00:00+00:00"
        );
        assert_eq!(
            alert.to_date.unwrap().to_rfc3339(),
            "2025-01-22T14:00:00+00:00"
        );
    }

    #[test]
    fn test_malformed_feature_is_reported_not_fatal() {
        let data = json!({
            "features": [
                {"geometry": null},
                {"properties": {"Region_ID": "R1", "Region_Name_E": "North"}}
            ]
        });
        let parsed = parse_feed(&data).unwrap();
        assert_eq!(parsed.malformed.len(), 1);
        assert_eq!(
            count_kind(&parsed.records, |r| matches!(r, SourceRecord::Region(_))),
            1
        );
    }

    #[test]
    fn test_alert_without_id_is_reported() {
        let data = json!({
            "features": [{
                "properties": {
                    "Region_ID": "R1",
                    "alert": [{"title": "no id"}]
                }
            }]
        });
        let parsed = parse_feed(&data).unwrap();
        assert_eq!(parsed.malformed.len(), 1);
        assert!(parsed.malformed[0].contains("alert without id"));
    }

    #[test]
    fn test_missing_features_is_feed_error() {
        let result = parse_feed(&json!({"type": "FeatureCollection"}));
        assert!(matches!(result, Err(NadhirError::Feed(_))));
    }

    #[test]
    fn test_parse_date_unknown_format() {
        assert_eq!(parse_date("tomorrow"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_numeric_ids_become_strings() {
        let data = json!({
            "features": [{
                "properties": {"Region_ID": 7, "Region_Name_E": "Seven"}
            }]
        });
        let parsed = parse_feed(&data).unwrap();
        match &parsed.records[0] {
            SourceRecord::Region(r) => assert_eq!(r.region_id, "7"),
            other => panic!("Expected region, got {other:?}"),
        }
    }
}
