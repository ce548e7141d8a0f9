//! Audit and hand-off artifact writers.
//!
//! Everything written here is derived and re-creatable from the run inputs:
//! the cleaned and rejected node tables, the run statistics and log, the
//! node GeoJSON for marker placement, and the bounds record that lets the
//! viewer place the rasters on a map.

use std::fs::File;
use std::path::Path;

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use serde_json::json;

use crate::error::PipelineError;
use crate::height::ResolvedNode;
use crate::nodes::RejectedNode;
use crate::raster::GridSpec;
use crate::report::{RunLog, RunStats};

/// Proj4 form keeps lon/lat axis order across GDAL versions.
const LONLAT_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";

fn ensure_parent(path: &Path) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Cleaned node table with resolved heights and ground elevations.
pub fn write_clean_nodes_csv(path: &Path, nodes: &[ResolvedNode]) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record([
        "id",
        "name",
        "lat",
        "lon",
        "height_input_m",
        "height_min_required_m",
        "height_fresnel_margin_m",
        "height_used_m",
        "ground_elev_m",
    ])?;
    for node in nodes {
        writer.write_record([
            node.node.id.as_str(),
            node.node.name.as_str(),
            &node.node.lat.to_string(),
            &node.node.lon.to_string(),
            &node
                .node
                .declared_height_m
                .map(|h| h.to_string())
                .unwrap_or_default(),
            &node.min_required_height_m.to_string(),
            &node.fresnel_margin_m.to_string(),
            &node.used_height_m.to_string(),
            &node.ground_elevation_m.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Rejected rows with their rejection reason, one line per dropped record.
pub fn write_rejected_nodes_csv(
    path: &Path,
    rejected: &[RejectedNode],
) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record(["id", "name", "lat", "lon", "reason"])?;
    for entry in rejected {
        writer.write_record([
            entry.record.get("id").unwrap_or(""),
            entry.record.get("name").unwrap_or(""),
            entry.record.get("lat").unwrap_or(""),
            entry.record.get("lon").unwrap_or(""),
            entry.reason.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_stats_json(path: &Path, stats: &RunStats) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(stats)?)?;
    Ok(())
}

pub fn write_run_log_json(path: &Path, log: &RunLog) -> Result<(), PipelineError> {
    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(&log.entries())?)?;
    Ok(())
}

/// Accepted nodes as a GeoJSON FeatureCollection for marker placement.
pub fn write_nodes_geojson(path: &Path, nodes: &[ResolvedNode]) -> Result<(), PipelineError> {
    let features: Vec<serde_json::Value> = nodes
        .iter()
        .map(|n| {
            json!({
                "type": "Feature",
                "properties": {
                    "id": n.node.id,
                    "name": n.node.name,
                    "height_m": n.used_height_m,
                    "height_input_m": n.node.declared_height_m,
                    "height_min_required_m": n.min_required_height_m,
                    "ground_elev_m": if n.ground_elevation_m.is_finite() {
                        Some(n.ground_elevation_m)
                    } else {
                        None
                    },
                },
                "geometry": {
                    "type": "Point",
                    "coordinates": [n.node.lon, n.node.lat],
                },
            })
        })
        .collect();

    let collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });

    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(&collection)?)?;
    Ok(())
}

/// Geographic bounding box of the accumulation grid plus its shape, enough
/// for the viewer to place the coverage rasters.
pub fn write_bounds_json(path: &Path, grid: &GridSpec) -> Result<(), PipelineError> {
    let (min_x, min_y, max_x, max_y) = grid.bounds();
    let corners_x = [min_x, min_x, max_x, max_x];
    let corners_y = [min_y, max_y, min_y, max_y];

    let (lons, lats) = if grid.crs_wkt.trim().is_empty() {
        (corners_x.to_vec(), corners_y.to_vec())
    } else {
        let src = SpatialRef::from_wkt(&grid.crs_wkt)?;
        let dst = SpatialRef::from_proj4(LONLAT_PROJ4)?;
        let transform = CoordTransform::new(&src, &dst)?;
        let mut xs = corners_x.to_vec();
        let mut ys = corners_y.to_vec();
        let mut zs = vec![0.0; 4];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        (xs, ys)
    };

    let fold = |values: &[f64], pick_min: bool| {
        values
            .iter()
            .copied()
            .fold(if pick_min { f64::INFINITY } else { f64::NEG_INFINITY }, |acc, v| {
                if pick_min {
                    acc.min(v)
                } else {
                    acc.max(v)
                }
            })
    };

    let record = json!({
        "min_lon": fold(&lons, true),
        "min_lat": fold(&lats, true),
        "max_lon": fold(&lons, false),
        "max_lat": fold(&lats, false),
        "width": grid.width,
        "height": grid.height,
        "pixel_width": grid.transform.pixel_width,
        "pixel_height": grid.transform.pixel_height,
    });

    ensure_parent(path)?;
    std::fs::write(path, serde_json::to_string_pretty(&record)?)?;
    Ok(())
}
