//! End-to-end batch run.
//!
//! Wires the components together in stage order: load and validate nodes,
//! resolve observer heights, dispatch one visibility job per node, merge the
//! per-node rasters onto the accumulation grid, and persist the coverage
//! surfaces plus the audit artifacts.
//!
//! The elevation grid handle and the evaluator are passed in explicitly so
//! tests can run the whole pipeline against synthetic grids and a mock
//! evaluator; [`run_from_config`] wires the real ones.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{JobFailure, PipelineError, RejectReason};
use crate::export;
use crate::height::{self, ResolveFailure, ResolvedNode};
use crate::merge::{self, SkippedRaster};
use crate::nodes;
use crate::raster::{io as raster_io, ElevationGrid};
use crate::report::{file_checksum, RunLog, RunStats};
use crate::viewshed::{self, GdalViewshedCli, OrchestratorOptions, ViewshedEvaluator, VisibilityJob};

/// Result of one batch run: audit record plus the produced artifacts.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub stats: RunStats,
    pub rasters: BTreeMap<String, PathBuf>,
    pub failures: BTreeMap<String, JobFailure>,
    pub skipped_rasters: Vec<SkippedRaster>,
    pub merged_rasters: usize,
    pub max_count: u32,
    pub covered_pixels: u64,
    pub coverage_tif: PathBuf,
    pub coverage_binary_tif: PathBuf,
    pub nodes_geojson: PathBuf,
}

/// Open the configured elevation grid and run the batch with the
/// `gdal_viewshed` CLI evaluator.
pub async fn run_from_config(config: &PipelineConfig) -> Result<RunReport, PipelineError> {
    let dem = ElevationGrid::open(&config.dem.prepared_path)?;
    let evaluator: Arc<dyn ViewshedEvaluator> =
        Arc::new(GdalViewshedCli::new(&config.viewshed.evaluator_bin));
    run(config, &dem, evaluator).await
}

/// Run the batch against an explicit elevation grid and evaluator.
pub async fn run(
    config: &PipelineConfig,
    dem: &ElevationGrid,
    evaluator: Arc<dyn ViewshedEvaluator>,
) -> Result<RunReport, PipelineError> {
    let log = RunLog::new();
    let mut stats = RunStats {
        run_id: uuid::Uuid::new_v4().to_string(),
        started_at: Some(chrono::Utc::now()),
        height_mode: config.input.height_strategy.mode.as_str().to_string(),
        height_fresnel_enabled: config.input.height_strategy.use_fresnel,
        radio_frequency_mhz: config.radio.frequency_mhz,
        ..Default::default()
    };
    if let Some(path) = dem.source_path() {
        stats.dem_checksum_sha256 = file_checksum(path)?;
    }

    // Stage 1: load and validate nodes.
    log.info(format!(
        "loading nodes from {}",
        config.input.nodes_path.display()
    ));
    let load_report = nodes::load_nodes(&config.input.nodes_path)?;
    stats.rows_input = load_report.rows_input;
    stats.rows_malformed = load_report.rejected_count(RejectReason::MalformedRecord);
    stats.rows_invalid_coordinates =
        load_report.rejected_count(RejectReason::InvalidCoordinates);
    stats.rows_zero_coordinates = load_report.rejected_count(RejectReason::ZeroCoordinates);
    stats.rows_duplicate_id = load_report.rejected_count(RejectReason::DuplicateId);
    stats.rows_valid = load_report.accepted.len();
    info!(
        input = stats.rows_input,
        valid = stats.rows_valid,
        rejected = load_report.rejected.len(),
        "node validation finished"
    );
    log.info(format!(
        "validated {} of {} input rows",
        stats.rows_valid, stats.rows_input
    ));

    // The rejected table is written even when the batch aborts below;
    // dropped rows must always be accounted for.
    export::write_rejected_nodes_csv(&config.output.nodes_rejected_csv, &load_report.rejected)?;

    if load_report.accepted.is_empty() {
        log.error("no valid nodes after validation");
        export::write_run_log_json(&config.output.run_log_json, &log)?;
        return Err(PipelineError::NoValidNodes);
    }

    // Stage 2: resolve observer heights.
    let mut resolved: Vec<ResolvedNode> = Vec::with_capacity(load_report.accepted.len());
    for node in &load_report.accepted {
        match height::resolve(
            node,
            dem,
            &config.input.height_strategy,
            config.viewshed.observer_height_default_m,
            config.viewshed.max_distance_m,
            config.radio.frequency_mhz,
        ) {
            Ok(r) => resolved.push(r),
            Err(ResolveFailure::OutOfBounds) => {
                stats.nodes_out_of_bounds += 1;
                warn!(node = %node.id, "node outside elevation grid coverage");
                log.warning(format!(
                    "node {}: outside elevation grid coverage, excluded",
                    node.id
                ));
            }
        }
    }
    stats.record_heights(resolved.iter(), config.viewshed.observer_height_default_m);
    if let Some(first) = resolved.first() {
        stats.height_fresnel_margin_m = first.fresnel_margin_m;
    }
    log.info(format!(
        "resolved heights for {} nodes ({} adapted above declared input)",
        resolved.len(),
        stats.height_nodes_adapted
    ));

    if resolved.is_empty() {
        log.error("no nodes within elevation grid coverage");
        export::write_run_log_json(&config.output.run_log_json, &log)?;
        return Err(PipelineError::NoResolvableNodes);
    }

    // Stage 3: one visibility job per resolved node.
    let dem_path = dem
        .source_path()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| config.dem.prepared_path.clone());
    let jobs: Vec<VisibilityJob> = resolved
        .iter()
        .cloned()
        .map(|r| {
            VisibilityJob::new(
                r,
                &config.viewshed,
                &dem_path,
                &config.output.raster_dir,
            )
        })
        .collect();

    let options = OrchestratorOptions {
        workers: config.compute.workers,
        job_timeout: Duration::from_secs(config.compute.job_timeout_secs),
        scratch_dir: config.compute.scratch_dir.clone(),
    };
    let outcome = viewshed::run_jobs(jobs, evaluator, &options, &log).await?;
    stats.jobs_succeeded = outcome.rasters.len();
    stats.jobs_failed = outcome.failures.len();

    // Stage 4: merge onto the accumulation grid and persist the surfaces.
    log.info(format!(
        "merging {} viewshed rasters onto the accumulation grid",
        outcome.rasters.len()
    ));
    let grid = dem.spec().clone();
    let raster_map = outcome.rasters.clone();
    let coverage_path = config.output.coverage_tif.clone();
    let binary_path = config.output.coverage_binary_tif.clone();
    let merged = tokio::task::spawn_blocking(move || {
        let merged = merge::merge_raster_files(&raster_map, &grid);
        raster_io::write_band::<u32>(&coverage_path, &merged.counts, &grid, Some(0.0))?;
        raster_io::write_band::<u8>(&binary_path, &merged.binary, &grid, Some(0.0))?;
        Ok::<_, PipelineError>(merged)
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;

    for skipped in &merged.skipped {
        log.warning(format!(
            "node {}: raster skipped during merge ({})",
            skipped.node_id, skipped.detail
        ));
    }
    if merged.merged.is_empty() {
        log.error("no viewshed rasters merged; coverage surface is empty");
    } else {
        log.success(format!(
            "coverage surface ready (max overlap {}, {} covered pixels)",
            merged.max_count(),
            merged.covered_pixels()
        ));
    }

    // Stage 5: audit artifacts.
    export::write_clean_nodes_csv(&config.output.nodes_clean_csv, &resolved)?;
    export::write_nodes_geojson(&config.output.nodes_geojson, &resolved)?;
    export::write_bounds_json(&config.output.bounds_json, dem.spec())?;

    stats.finished_at = Some(chrono::Utc::now());
    export::write_stats_json(&config.output.stats_json, &stats)?;
    export::write_run_log_json(&config.output.run_log_json, &log)?;

    Ok(RunReport {
        merged_rasters: merged.merged.len(),
        max_count: merged.max_count(),
        covered_pixels: merged.covered_pixels(),
        skipped_rasters: merged.skipped,
        rasters: outcome.rasters,
        failures: outcome.failures,
        coverage_tif: config.output.coverage_tif.clone(),
        coverage_binary_tif: config.output.coverage_binary_tif.clone(),
        nodes_geojson: config.output.nodes_geojson.clone(),
        stats,
    })
}
