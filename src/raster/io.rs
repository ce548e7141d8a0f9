//! Single-band GeoTIFF read/write through GDAL.

use std::path::Path;

use gdal::raster::{Buffer, GdalType, RasterCreationOption};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;

use crate::error::PipelineError;

use super::grid::{GeoTransform, GridSpec};

/// Read band 1 of a raster into an array plus its grid definition.
pub fn read_band<T: GdalType + Copy>(
    path: &Path,
) -> Result<(Array2<T>, GridSpec, Option<f64>), PipelineError> {
    let dataset = Dataset::open(path)?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    if !transform.is_axis_aligned() {
        return Err(PipelineError::RotatedGrid(path.to_path_buf()));
    }

    let (width, height) = dataset.raster_size();
    let band = dataset.rasterband(1)?;
    let nodata = band.no_data_value();
    let buffer = band.read_as::<T>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), buffer.data).map_err(|e| {
        PipelineError::MalformedRaster {
            path: path.to_path_buf(),
            detail: format!("band shape mismatch: {}", e),
        }
    })?;

    let spec = GridSpec::new(width, height, transform, dataset.projection());
    Ok((data, spec, nodata))
}

/// Write an array as a single-band DEFLATE-compressed GeoTIFF on `spec`.
pub fn write_band<T: GdalType + Copy>(
    path: &Path,
    data: &Array2<T>,
    spec: &GridSpec,
    nodata: Option<f64>,
) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let (height, width) = data.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = [
        RasterCreationOption {
            key: "COMPRESS",
            value: "DEFLATE",
        },
        RasterCreationOption {
            key: "PREDICTOR",
            value: "2",
        },
    ];
    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        path,
        width as isize,
        height as isize,
        1,
        &options,
    )?;

    dataset.set_geo_transform(&spec.transform.to_gdal())?;
    if !spec.crs_wkt.trim().is_empty() {
        dataset.set_projection(&spec.crs_wkt)?;
    }

    let mut band = dataset.rasterband(1)?;
    let flat: Vec<T> = data.iter().copied().collect();
    let buffer = Buffer::new((width, height), flat);
    band.write((0, 0), (width, height), &buffer)?;
    if nodata.is_some() {
        band.set_no_data_value(nodata)?;
    }

    Ok(())
}
