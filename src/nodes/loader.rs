//! Node input parsing.
//!
//! Three source shapes are accepted:
//! - CSV with a header line (detected when the first line mentions `id`,
//!   `lat` and `lon`);
//! - CSV without a header, using the positional schema of the upstream node
//!   export: `id,name,lat,lon,type,last_heard_at`;
//! - JSON with a top-level `nodes` array of objects.
//!
//! Parsing produces raw records only; acceptance rules live in
//! [`super::validate_records`].

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PipelineError, RejectReason};

use super::{validate_records, NodeLoadReport, RawNodeRecord, RejectedNode};

/// Positional schema for headerless exports.
const POSITIONAL_COLUMNS: [&str; 6] = ["id", "name", "lat", "lon", "type", "last_heard_at"];

/// Load and validate a node input file.
pub fn load_nodes(path: &Path) -> Result<NodeLoadReport, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::NodesFileMissing(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (records, unparseable) = if is_json {
        parse_json_records(path, &raw)?
    } else {
        parse_csv_records(&raw)
    };

    let mut report = validate_records(records);
    report.rows_input += unparseable.len();
    report.rejected.extend(unparseable);
    Ok(report)
}

/// Parse a JSON document with a `nodes` array. A document that cannot be
/// parsed at all is fatal (there is no record stream to salvage); individual
/// non-object elements are rejected as malformed.
fn parse_json_records(
    path: &Path,
    raw: &str,
) -> Result<(Vec<RawNodeRecord>, Vec<RejectedNode>), PipelineError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| PipelineError::NodesParse {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    let nodes = value
        .get("nodes")
        .and_then(|n| n.as_array())
        .ok_or_else(|| PipelineError::NodesParse {
            path: path.to_path_buf(),
            detail: "JSON nodes file must contain key `nodes` as array".to_string(),
        })?;

    let mut records = Vec::with_capacity(nodes.len());
    let mut unparseable = Vec::new();
    for node in nodes {
        match node.as_object() {
            Some(object) => {
                let fields = object
                    .iter()
                    .filter_map(|(k, v)| json_scalar(v).map(|s| (k.clone(), s)))
                    .collect::<BTreeMap<_, _>>();
                records.push(RawNodeRecord { fields });
            }
            None => unparseable.push(RejectedNode {
                record: RawNodeRecord {
                    fields: BTreeMap::from([("raw".to_string(), node.to_string())]),
                },
                reason: RejectReason::MalformedRecord,
            }),
        }
    }
    Ok((records, unparseable))
}

fn json_scalar(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse CSV content, detecting whether the first line is a header. Rows the
/// CSV reader cannot decode are rejected as malformed, never fatal.
fn parse_csv_records(raw: &str) -> (Vec<RawNodeRecord>, Vec<RejectedNode>) {
    let first_line = raw.lines().next().unwrap_or("").to_lowercase();
    let header_like = ["id", "lat", "lon"].iter().all(|k| first_line.contains(k));

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(header_like)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.as_bytes());

    let columns: Vec<String> = if header_like {
        reader
            .headers()
            .map(|h| h.iter().map(|c| c.to_lowercase()).collect())
            .unwrap_or_default()
    } else {
        POSITIONAL_COLUMNS.iter().map(|c| c.to_string()).collect()
    };

    let mut records = Vec::new();
    let mut unparseable = Vec::new();
    for row in reader.records() {
        match row {
            Ok(row) => {
                let fields = columns
                    .iter()
                    .zip(row.iter())
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| (k.clone(), v.to_string()))
                    .collect::<BTreeMap<_, _>>();
                records.push(RawNodeRecord { fields });
            }
            Err(e) => unparseable.push(RejectedNode {
                record: RawNodeRecord {
                    fields: BTreeMap::from([("error".to_string(), e.to_string())]),
                },
                reason: RejectReason::MalformedRecord,
            }),
        }
    }
    (records, unparseable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = load_nodes(Path::new("no/such/nodes.csv"));
        assert!(matches!(result, Err(PipelineError::NodesFileMissing(_))));
    }

    #[test]
    fn test_headered_csv() {
        let (_dir, path) = write_temp(
            "nodes.csv",
            "id,name,lat,lon,height_m\n\
             n1,North relay,47.10,8.50,12\n\
             n2,,47.20,8.60,\n",
        );
        let report = load_nodes(&path).unwrap();
        assert_eq!(report.rows_input, 2);
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.accepted[0].name, "North relay");
        assert_eq!(report.accepted[0].declared_height_m, Some(12.0));
        assert_eq!(report.accepted[1].name, "n2");
        assert_eq!(report.accepted[1].declared_height_m, None);
    }

    #[test]
    fn test_headerless_csv_uses_positional_schema() {
        let (_dir, path) = write_temp(
            "export.csv",
            "n1,North relay,47.10,8.50,router,2024-05-01\n\
             n2,South relay,47.20,8.60,client,2024-05-02\n",
        );
        let report = load_nodes(&path).unwrap();
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.accepted[0].id, "n1");
        assert_eq!(report.accepted[0].name, "North relay");
        assert_eq!(report.accepted[1].lat, 47.20);
    }

    #[test]
    fn test_headered_and_positional_agree() {
        let (_dir, headered) = write_temp(
            "a.csv",
            "id,name,lat,lon\nn1,Relay,47.10,8.50\n",
        );
        let (_dir2, positional) = write_temp("b.csv", "n1,Relay,47.10,8.50,router,x\n");

        let a = load_nodes(&headered).unwrap();
        let b = load_nodes(&positional).unwrap();
        assert_eq!(a.accepted, b.accepted);
    }

    #[test]
    fn test_json_nodes_array() {
        let (_dir, path) = write_temp(
            "nodes.json",
            r#"{"nodes": [
                {"id": "n1", "name": "Relay", "lat": 47.1, "lon": 8.5, "height_m": 10},
                {"id": "n2", "lat": 0, "lon": 0}
            ]}"#,
        );
        let report = load_nodes(&path).unwrap();
        assert_eq!(report.rows_input, 2);
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.accepted[0].declared_height_m, Some(10.0));
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::ZeroCoordinates);
    }

    #[test]
    fn test_json_without_nodes_key_is_fatal() {
        let (_dir, path) = write_temp("bad.json", r#"{"rows": []}"#);
        let result = load_nodes(&path);
        assert!(matches!(result, Err(PipelineError::NodesParse { .. })));
    }

    #[test]
    fn test_json_non_object_element_rejected() {
        let (_dir, path) = write_temp(
            "mixed.json",
            r#"{"nodes": [{"id": "n1", "lat": 47.1, "lon": 8.5}, "stray"]}"#,
        );
        let report = load_nodes(&path).unwrap();
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].reason, RejectReason::MalformedRecord);
    }
}
