//! Coverage merge engine.
//!
//! Reduces the per-node binary rasters onto the shared accumulation grid.
//! Accumulating misaligned pixel grids is the principal correctness hazard
//! here, so every raster passes through an explicit alignment step
//! ([`node_mask`]) before any arithmetic: for each destination pixel center,
//! the source pixel containing it contributes, out-of-window pixels
//! contribute 0. Each node therefore adds at most 1 per pixel regardless of
//! resolution differences.
//!
//! The merge holds no incremental state: re-running over the full raster
//! set reproduces identical output, and adding or removing a node means
//! recomputing the sum, never patching a previous result.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::raster::io::read_band;
use crate::raster::GridSpec;

/// A binary visibility raster over its own window.
#[derive(Debug, Clone)]
pub struct BinaryRaster {
    pub data: Array2<u8>,
    pub spec: GridSpec,
}

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("raster CRS differs from the accumulation grid")]
    CrsMismatch,
}

/// A raster excluded from the merge, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRaster {
    pub node_id: String,
    pub detail: String,
}

/// Merge result: the count surface, its binary derivative, and an
/// accounting of what went in and what was skipped.
#[derive(Debug)]
pub struct MergeOutcome {
    pub counts: Array2<u32>,
    pub binary: Array2<u8>,
    pub merged: Vec<String>,
    pub skipped: Vec<SkippedRaster>,
}

impl MergeOutcome {
    pub fn max_count(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Number of pixels visible from at least one node.
    pub fn covered_pixels(&self) -> u64 {
        self.binary.iter().filter(|&&v| v > 0).count() as u64
    }
}

/// Align one source raster onto the accumulation grid as a 0/1 mask.
///
/// Destination-driven nearest-neighbor: the value of each destination pixel
/// is the source pixel its center falls into. Grids must share a CRS; the
/// source window may be smaller than (or partially outside) the grid.
pub fn node_mask(src: &BinaryRaster, grid: &GridSpec) -> Result<Array2<u8>, AlignmentError> {
    if !src.spec.same_crs(grid) {
        return Err(AlignmentError::CrsMismatch);
    }

    let mut mask = Array2::<u8>::zeros(grid.shape());

    // Restrict the scan to destination pixels covered by the source extent.
    let (min_x, min_y, max_x, max_y) = src.spec.bounds();
    let (ra, ca) = grid.transform.world_to_pixel(min_x, max_y);
    let (rb, cb) = grid.transform.world_to_pixel(max_x, min_y);
    let row_lo = ra.min(rb).floor().max(0.0) as usize;
    let row_hi = ((ra.max(rb).ceil().max(0.0) as usize) + 1).min(grid.height);
    let col_lo = ca.min(cb).floor().max(0.0) as usize;
    let col_hi = ((ca.max(cb).ceil().max(0.0) as usize) + 1).min(grid.width);

    for row in row_lo..row_hi {
        for col in col_lo..col_hi {
            let (x, y) = grid.transform.pixel_center(row, col);
            let (src_row, src_col) = src.spec.transform.world_to_pixel(x, y);
            if !src.spec.contains(src_row, src_col) {
                continue;
            }
            if src.data[[src_row as usize, src_col as usize]] > 0 {
                mask[[row, col]] = 1;
            }
        }
    }

    Ok(mask)
}

/// Accumulate binary rasters into the count surface.
///
/// Pixel-wise sum over all rasters, treating out-of-window pixels as 0. The
/// reduction is commutative and associative, so input order never matters.
/// Rasters that fail alignment are skipped and reported.
pub fn accumulate(
    rasters: impl IntoIterator<Item = (String, BinaryRaster)>,
    grid: &GridSpec,
) -> MergeOutcome {
    let mut counts = Array2::<u32>::zeros(grid.shape());
    let mut merged = Vec::new();
    let mut skipped = Vec::new();

    for (node_id, raster) in rasters {
        match node_mask(&raster, grid) {
            Ok(mask) => {
                Zip::from(&mut counts).and(&mask).for_each(|count, &m| {
                    *count += m as u32;
                });
                merged.push(node_id);
            }
            Err(e) => {
                warn!(node = %node_id, error = %e, "raster skipped during merge");
                skipped.push(SkippedRaster {
                    node_id,
                    detail: e.to_string(),
                });
            }
        }
    }

    let binary = counts.mapv(|count| u8::from(count >= 1));
    MergeOutcome {
        counts,
        binary,
        merged,
        skipped,
    }
}

/// Load the per-node raster files and accumulate them onto the grid.
///
/// Unreadable rasters are skipped with a warning and reported — a node that
/// made it this far must still never abort the batch.
pub fn merge_raster_files(rasters: &BTreeMap<String, PathBuf>, grid: &GridSpec) -> MergeOutcome {
    let mut loaded = Vec::with_capacity(rasters.len());
    let mut unreadable = Vec::new();

    for (node_id, path) in rasters {
        match read_band::<u8>(path) {
            Ok((data, spec, _nodata)) => {
                loaded.push((node_id.clone(), BinaryRaster { data, spec }));
            }
            Err(e) => {
                warn!(node = %node_id, path = %path.display(), error = %e, "unreadable raster skipped");
                unreadable.push(SkippedRaster {
                    node_id: node_id.clone(),
                    detail: e.to_string(),
                });
            }
        }
    }

    let mut outcome = accumulate(loaded, grid);
    outcome.skipped.extend(unreadable);
    outcome
}
