//! Immutable handle over the prepared elevation model.
//!
//! The grid is read fully into memory once and then shared read-only across
//! the height resolver, the job orchestrator and the merge engine. Synthetic
//! grids for tests are built with [`ElevationGrid::from_parts`]; an empty CRS
//! marks grid coordinates as already geographic lon/lat.

use std::path::{Path, PathBuf};

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::Array2;

use crate::error::PipelineError;

use super::grid::GridSpec;
use super::io;

/// Proj4 form keeps lon/lat axis order across GDAL versions.
const LONLAT_PROJ4: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Single-band elevation raster with its grid definition.
pub struct ElevationGrid {
    data: Array2<f32>,
    spec: GridSpec,
    nodata: Option<f64>,
    source_path: Option<PathBuf>,
}

impl ElevationGrid {
    /// Open a prepared elevation raster. Missing or unreadable files are
    /// fatal preconditions for the batch.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::DemMissing(path.to_path_buf()));
        }
        let (data, spec, nodata) = io::read_band::<f32>(path).map_err(|e| match e {
            PipelineError::Raster(source) => PipelineError::DemUnreadable {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(Self {
            data,
            spec,
            nodata,
            source_path: Some(path.to_path_buf()),
        })
    }

    /// Build a grid from in-memory parts (synthetic grids in tests).
    pub fn from_parts(data: Array2<f32>, spec: GridSpec, nodata: Option<f64>) -> Self {
        Self {
            data,
            spec,
            nodata,
            source_path: None,
        }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Project geographic lon/lat into this grid's CRS. Identity when the
    /// grid has no CRS (synthetic grids are already lon/lat).
    pub fn project_lonlat(&self, lon: f64, lat: f64) -> Result<(f64, f64), PipelineError> {
        if self.spec.crs_wkt.trim().is_empty() {
            return Ok((lon, lat));
        }
        let src = SpatialRef::from_proj4(LONLAT_PROJ4)?;
        let dst = SpatialRef::from_wkt(&self.spec.crs_wkt)?;
        let transform = CoordTransform::new(&src, &dst)?;
        let mut xs = [lon];
        let mut ys = [lat];
        let mut zs = [0.0];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        Ok((xs[0], ys[0]))
    }

    /// Elevation at world coordinates, `None` outside the grid. Nodata cells
    /// read as NaN so callers can carry "ground unknown" through audit
    /// records without conflating it with "outside coverage".
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (row, col) = self.spec.transform.world_to_pixel(x, y);
        if !self.spec.contains(row, col) {
            return None;
        }
        let value = self.data[[row as usize, col as usize]] as f64;
        if self.is_nodata(value) {
            Some(f64::NAN)
        } else {
            Some(value)
        }
    }

    /// Highest elevation within `radius_m` of the given world position.
    /// Nodata and non-finite cells are ignored; `None` when the window holds
    /// no usable samples or the center lies outside the grid.
    pub fn local_max(&self, x: f64, y: f64, radius_m: f64) -> Option<f64> {
        let (row_f, col_f) = self.spec.transform.world_to_pixel(x, y);
        if !self.spec.contains(row_f, col_f) {
            return None;
        }
        let row = row_f as usize;
        let col = col_f as usize;

        let pixel_size = self.spec.transform.pixel_size().max(1e-6);
        let px_radius = ((radius_m / pixel_size).ceil() as usize).max(1);

        let r0 = row.saturating_sub(px_radius);
        let r1 = (row + px_radius + 1).min(self.spec.height);
        let c0 = col.saturating_sub(px_radius);
        let c1 = (col + px_radius + 1).min(self.spec.width);

        let mut best: Option<f64> = None;
        for r in r0..r1 {
            for c in c0..c1 {
                let value = self.data[[r, c]] as f64;
                if !value.is_finite() || self.is_nodata(value) {
                    continue;
                }
                best = Some(best.map_or(value, |b: f64| b.max(value)));
            }
        }
        best
    }

    fn is_nodata(&self, value: f64) -> bool {
        match self.nodata {
            Some(nd) => value == nd || (nd.is_nan() && value.is_nan()),
            None => false,
        }
    }
}
