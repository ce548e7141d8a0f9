//! Node model and validation.
//!
//! The loader (see [`loader`]) turns heterogeneous input files into a flat
//! sequence of [`RawNodeRecord`]s; [`validate_records`] applies the
//! acceptance rules in a fixed order and produces the canonical node set
//! together with an ordered rejection trail.

pub mod loader;

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RejectReason;

pub use loader::load_nodes;

/// Height column candidates, probed in order.
const HEIGHT_COLUMNS: [&str; 4] = ["height_m", "height", "antenna_height_m", "observer_height_m"];

/// One untyped input row, as read from the source file. Kept verbatim for
/// the rejected-rows audit table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawNodeRecord {
    pub fields: BTreeMap<String, String>,
}

impl RawNodeRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }
}

/// A node that passed validation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedNode {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Height above ground declared in the input, when present and usable.
    pub declared_height_m: Option<f64>,
}

/// A rejected input row with its rejection reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedNode {
    pub record: RawNodeRecord,
    pub reason: RejectReason,
}

/// Loader output: ordered accepted and rejected sequences.
#[derive(Debug, Default)]
pub struct NodeLoadReport {
    pub accepted: Vec<ValidatedNode>,
    pub rejected: Vec<RejectedNode>,
    pub rows_input: usize,
}

impl NodeLoadReport {
    pub fn rejected_count(&self, reason: RejectReason) -> usize {
        self.rejected.iter().filter(|r| r.reason == reason).count()
    }
}

/// Apply the validation rules, in order, to each record:
///
/// 1. the record must carry an identifier and both coordinate fields
///    (`malformed_record`);
/// 2. coordinates must parse and lie within valid lat/lon ranges
///    (`invalid_coordinates`);
/// 3. the position must not be exactly (0, 0) (`zero_coordinates`);
/// 4. the identifier must not already be accepted (`duplicate_id`,
///    first occurrence wins).
///
/// Coordinate validity is checked before deduplication on purpose: a
/// malformed row must never occupy an identifier slot.
pub fn validate_records(records: Vec<RawNodeRecord>) -> NodeLoadReport {
    let mut report = NodeLoadReport {
        rows_input: records.len(),
        ..Default::default()
    };
    let mut seen_ids: HashSet<String> = HashSet::new();

    for record in records {
        match validate_one(&record, &seen_ids) {
            Ok(node) => {
                seen_ids.insert(node.id.clone());
                report.accepted.push(node);
            }
            Err(reason) => report.rejected.push(RejectedNode { record, reason }),
        }
    }

    report
}

fn validate_one(
    record: &RawNodeRecord,
    seen_ids: &HashSet<String>,
) -> Result<ValidatedNode, RejectReason> {
    let id = record
        .get("id")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(RejectReason::MalformedRecord)?;

    let lat_raw = record.get("lat").ok_or(RejectReason::MalformedRecord)?;
    let lon_raw = record.get("lon").ok_or(RejectReason::MalformedRecord)?;

    let lat = parse_coordinate(lat_raw).ok_or(RejectReason::InvalidCoordinates)?;
    let lon = parse_coordinate(lon_raw).ok_or(RejectReason::InvalidCoordinates)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(RejectReason::InvalidCoordinates);
    }

    if lat == 0.0 && lon == 0.0 {
        return Err(RejectReason::ZeroCoordinates);
    }

    if seen_ids.contains(id) {
        return Err(RejectReason::DuplicateId);
    }

    let name = record
        .get("name")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(id)
        .to_string();

    Ok(ValidatedNode {
        id: id.to_string(),
        name,
        lat,
        lon,
        declared_height_m: declared_height(record),
    })
}

fn parse_coordinate(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

/// First usable value among the known height columns. Unparseable or
/// negative values count as absent, not as rejection grounds.
fn declared_height(record: &RawNodeRecord) -> Option<f64> {
    for column in HEIGHT_COLUMNS {
        if let Some(raw) = record.get(column) {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(value) = trimmed.parse::<f64>() {
                if value.is_finite() && value >= 0.0 {
                    return Some(value);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> RawNodeRecord {
        RawNodeRecord {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_valid_nodes_round_trip() {
        let records = vec![
            record(&[("id", "a"), ("name", "Alpha"), ("lat", "47.1"), ("lon", "8.5")]),
            record(&[("id", "b"), ("name", "Bravo"), ("lat", "47.2"), ("lon", "8.6")]),
        ];
        let report = validate_records(records);
        assert_eq!(report.accepted.len(), 2);
        assert!(report.rejected.is_empty());
        assert_eq!(report.accepted[0].id, "a");
        assert_eq!(report.accepted[1].name, "Bravo");
    }

    #[test]
    fn test_zero_coordinates_always_rejected() {
        let records = vec![record(&[
            ("id", "nofix"),
            ("name", "Has a name"),
            ("lat", "0"),
            ("lon", "0.0"),
            ("height_m", "12"),
        ])];
        let report = validate_records(records);
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::ZeroCoordinates);
    }

    #[test]
    fn test_duplicate_id_first_wins() {
        let records = vec![
            record(&[("id", "x"), ("lat", "47.0"), ("lon", "8.0")]),
            record(&[("id", "x"), ("lat", "48.0"), ("lon", "9.0")]),
        ];
        let report = validate_records(records);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].lat, 47.0);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::DuplicateId);
    }

    #[test]
    fn test_invalid_coordinates_checked_before_dedup() {
        // The malformed row shares an id with a later valid row. It must be
        // rejected for its coordinates and must not block the valid row.
        let records = vec![
            record(&[("id", "x"), ("lat", "not-a-number"), ("lon", "8.0")]),
            record(&[("id", "x"), ("lat", "47.0"), ("lon", "8.0")]),
        ];
        let report = validate_records(records);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].lat, 47.0);
        assert_eq!(
            report.rejected[0].reason,
            RejectReason::InvalidCoordinates
        );
    }

    #[test]
    fn test_out_of_range_coordinates() {
        let records = vec![
            record(&[("id", "a"), ("lat", "91.0"), ("lon", "8.0")]),
            record(&[("id", "b"), ("lat", "47.0"), ("lon", "-180.5")]),
            record(&[("id", "c"), ("lat", "inf"), ("lon", "8.0")]),
        ];
        let report = validate_records(records);
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected_count(RejectReason::InvalidCoordinates), 3);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let records = vec![
            record(&[("lat", "47.0"), ("lon", "8.0")]),
            record(&[("id", ""), ("lat", "47.0"), ("lon", "8.0")]),
            record(&[("id", "a"), ("lon", "8.0")]),
        ];
        let report = validate_records(records);
        assert!(report.accepted.is_empty());
        assert_eq!(report.rejected_count(RejectReason::MalformedRecord), 3);
    }

    #[test]
    fn test_name_defaults_to_id() {
        let records = vec![
            record(&[("id", "bare"), ("lat", "47.0"), ("lon", "8.0")]),
            record(&[("id", "blank"), ("name", "  "), ("lat", "47.1"), ("lon", "8.1")]),
        ];
        let report = validate_records(records);
        assert_eq!(report.accepted[0].name, "bare");
        assert_eq!(report.accepted[1].name, "blank");
    }

    #[test]
    fn test_declared_height_column_precedence() {
        let records = vec![
            record(&[
                ("id", "a"),
                ("lat", "47.0"),
                ("lon", "8.0"),
                ("height_m", "15"),
                ("antenna_height_m", "99"),
            ]),
            record(&[("id", "b"), ("lat", "47.1"), ("lon", "8.1"), ("height", "8.5")]),
            record(&[("id", "c"), ("lat", "47.2"), ("lon", "8.2"), ("height_m", "-3")]),
            record(&[("id", "d"), ("lat", "47.3"), ("lon", "8.3"), ("height_m", "tall")]),
        ];
        let report = validate_records(records);
        assert_eq!(report.accepted[0].declared_height_m, Some(15.0));
        assert_eq!(report.accepted[1].declared_height_m, Some(8.5));
        assert_eq!(report.accepted[2].declared_height_m, None);
        assert_eq!(report.accepted[3].declared_height_m, None);
    }
}
