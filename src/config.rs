//! Run configuration loaded from a TOML file.
//!
//! Every section and field has a default, so a minimal configuration only
//! needs to name the paths that differ from the conventional layout:
//!
//! ```toml
//! [input]
//! nodes_path = "data/nodes.csv"
//!
//! [dem]
//! prepared_path = "data/dem/dem_prepared.tif"
//!
//! [input.height_strategy]
//! mode = "adaptive_min"
//! clearance_margin_m = 2.0
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Observer height strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeightMode {
    /// Use the declared height (or the configured default) as-is.
    InputOnly,
    /// Raise the observer until it clears the highest nearby terrain.
    AdaptiveMin,
}

impl HeightMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeightMode::InputOnly => "input_only",
            HeightMode::AdaptiveMin => "adaptive_min",
        }
    }
}

/// Parameters for the height resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeightStrategyConfig {
    pub mode: HeightMode,
    /// Floor for the used height in adaptive mode (meters above ground).
    pub min_height_m: f64,
    /// Mast-height ceiling; the used height never exceeds this.
    pub max_height_m: f64,
    /// Radius of the local terrain scan around the node (meters).
    pub local_radius_m: f64,
    /// Extra clearance above the highest nearby terrain point (meters).
    pub clearance_margin_m: f64,
    /// Inflate the required clearance by the first Fresnel-zone radius.
    pub use_fresnel: bool,
    /// Fraction of the Fresnel radius to keep clear (0.6 is the usual rule).
    pub fresnel_clearance_ratio: f64,
    /// Where along the path the Fresnel radius is sampled (0.5 = midpoint).
    pub fresnel_sample_ratio: f64,
}

impl Default for HeightStrategyConfig {
    fn default() -> Self {
        Self {
            mode: HeightMode::AdaptiveMin,
            min_height_m: 4.0,
            max_height_m: 120.0,
            local_radius_m: 300.0,
            clearance_margin_m: 2.0,
            use_fresnel: true,
            fresnel_clearance_ratio: 0.6,
            fresnel_sample_ratio: 0.5,
        }
    }
}

/// Node input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Node table: CSV (with or without header) or JSON with a `nodes` array.
    pub nodes_path: PathBuf,
    pub height_strategy: HeightStrategyConfig,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            nodes_path: PathBuf::from("data/nodes.csv"),
            height_strategy: HeightStrategyConfig::default(),
        }
    }
}

/// Elevation model settings. Acquisition and reprojection happen upstream;
/// the pipeline only consumes the prepared raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemConfig {
    pub prepared_path: PathBuf,
}

impl Default for DemConfig {
    fn default() -> Self {
        Self {
            prepared_path: PathBuf::from("data/dem/dem_prepared.tif"),
        }
    }
}

/// Parameters passed to the visibility evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewshedConfig {
    /// Observer height when a node declares none (meters above ground).
    pub observer_height_default_m: f64,
    /// Height of the target being seen (meters above ground).
    pub target_height_m: f64,
    /// Maximum visibility radius (meters).
    pub max_distance_m: f64,
    /// Apply earth-curvature correction in the evaluator.
    pub curvature_correction: bool,
    /// Atmospheric refraction coefficient used with curvature correction.
    pub refraction_coeff: f64,
    /// Evaluator executable; resolved against PATH when not absolute.
    pub evaluator_bin: PathBuf,
}

impl Default for ViewshedConfig {
    fn default() -> Self {
        Self {
            observer_height_default_m: 6.0,
            target_height_m: 0.0,
            max_distance_m: 20_000.0,
            curvature_correction: true,
            refraction_coeff: 0.13,
            evaluator_bin: PathBuf::from("gdal_viewshed"),
        }
    }
}

/// Job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Worker pool size; 1 degrades to strictly sequential execution.
    pub workers: usize,
    /// Per-job wall-clock limit on the evaluator (seconds).
    pub job_timeout_secs: u64,
    /// Root for per-job scratch directories.
    pub scratch_dir: PathBuf,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            job_timeout_secs: 600,
            scratch_dir: PathBuf::from("tmp/viewsheds"),
        }
    }
}

/// Radio link settings used by the Fresnel clearance heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub frequency_mhz: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 868.0,
        }
    }
}

/// Output artifact paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub coverage_tif: PathBuf,
    pub coverage_binary_tif: PathBuf,
    /// Directory where per-node rasters are persisted.
    pub raster_dir: PathBuf,
    pub nodes_geojson: PathBuf,
    pub nodes_clean_csv: PathBuf,
    pub nodes_rejected_csv: PathBuf,
    pub stats_json: PathBuf,
    pub run_log_json: PathBuf,
    pub bounds_json: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            coverage_tif: PathBuf::from("out/coverage.tif"),
            coverage_binary_tif: PathBuf::from("out/coverage_binary.tif"),
            raster_dir: PathBuf::from("out/viewsheds"),
            nodes_geojson: PathBuf::from("out/nodes.geojson"),
            nodes_clean_csv: PathBuf::from("out/nodes_clean.csv"),
            nodes_rejected_csv: PathBuf::from("out/nodes_rejected.csv"),
            stats_json: PathBuf::from("out/run_stats.json"),
            run_log_json: PathBuf::from("out/run_log.json"),
            bounds_json: PathBuf::from("out/bounds.json"),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub dem: DemConfig,
    pub viewshed: ViewshedConfig,
    pub compute: ComputeConfig,
    pub radio: RadioConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}
