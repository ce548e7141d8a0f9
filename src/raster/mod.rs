//! Raster grid model and GeoTIFF access.
//!
//! [`grid`] defines the affine [`GeoTransform`] and the [`GridSpec`]
//! accumulation grid all per-node rasters are aligned onto. [`io`] reads and
//! writes single-band GeoTIFFs through GDAL. [`dem`] wraps the prepared
//! elevation model in an immutable, samplable handle.

pub mod dem;
pub mod grid;
pub mod io;

pub use dem::ElevationGrid;
pub use grid::{GeoTransform, GridSpec};
