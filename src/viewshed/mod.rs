//! Visibility job model and the bounded-concurrency orchestrator.
//!
//! One [`VisibilityJob`] exists per resolved node. Jobs run against the
//! [`ViewshedEvaluator`] under a bounded worker pool; each job owns an
//! isolated scratch directory, and a failing job is recorded and skipped —
//! never allowed to abort the batch. Results are keyed by node identifier so
//! the downstream merge is deterministic regardless of completion order.

pub mod evaluator;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use crate::config::ViewshedConfig;
use crate::error::{JobFailure, PipelineError};
use crate::height::ResolvedNode;
use crate::report::RunLog;

pub use evaluator::{EvaluationRequest, GdalViewshedCli, ViewshedEvaluator};

/// One node's visibility computation request, bound to its output path.
#[derive(Debug, Clone)]
pub struct VisibilityJob {
    pub resolved: ResolvedNode,
    pub request: EvaluationRequest,
    pub output_path: PathBuf,
}

impl VisibilityJob {
    /// Bind a resolved node to execution parameters. The output raster is
    /// persisted as `viewshed_<id>.tif` under `raster_dir`.
    pub fn new(
        resolved: ResolvedNode,
        viewshed: &ViewshedConfig,
        dem_path: &Path,
        raster_dir: &Path,
    ) -> Self {
        let request = EvaluationRequest {
            node_id: resolved.node.id.clone(),
            observer_x: resolved.projected_x,
            observer_y: resolved.projected_y,
            observer_height_m: resolved.used_height_m,
            target_height_m: viewshed.target_height_m,
            max_distance_m: viewshed.max_distance_m,
            curvature_correction: viewshed.curvature_correction,
            refraction_coeff: viewshed.refraction_coeff,
            dem_path: dem_path.to_path_buf(),
        };
        let output_path = raster_dir.join(format!("viewshed_{}.tif", sanitize_id(&resolved.node.id)));
        Self {
            resolved,
            request,
            output_path,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.request.node_id
    }
}

/// Node identifiers come from arbitrary input files; keep file names tame.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Orchestrator execution policy.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Worker pool size; 1 degrades to strictly sequential execution.
    pub workers: usize,
    /// Wall-clock bound on each evaluator invocation.
    pub job_timeout: Duration,
    /// Root directory for per-job scratch areas.
    pub scratch_dir: PathBuf,
}

/// Batch outcome, keyed by node identifier.
#[derive(Debug, Default)]
pub struct JobBatchOutcome {
    pub rasters: BTreeMap<String, PathBuf>,
    pub failures: BTreeMap<String, JobFailure>,
}

/// Run all jobs under the bounded pool.
///
/// Jobs are dispatched in input order; completion order is unconstrained.
/// Per-job failures land in `failures` and the batch continues.
pub async fn run_jobs(
    jobs: Vec<VisibilityJob>,
    evaluator: Arc<dyn ViewshedEvaluator>,
    options: &OrchestratorOptions,
    log: &RunLog,
) -> Result<JobBatchOutcome, PipelineError> {
    tokio::fs::create_dir_all(&options.scratch_dir).await?;
    let workers = options.workers.max(1);
    let total = jobs.len();
    info!(jobs = total, workers, "dispatching visibility jobs");

    let results: Vec<(String, Result<PathBuf, JobFailure>)> =
        futures::stream::iter(jobs.into_iter().map(|job| {
            let evaluator = Arc::clone(&evaluator);
            let timeout = options.job_timeout;
            let scratch_root = options.scratch_dir.clone();
            let log = log.clone();
            async move {
                let node_id = job.node_id().to_string();
                let result = execute_job(&job, evaluator.as_ref(), timeout, &scratch_root).await;
                match &result {
                    Ok(path) => {
                        log.success(format!(
                            "node {}: viewshed raster at {}",
                            node_id,
                            path.display()
                        ));
                    }
                    Err(failure) => {
                        warn!(node = %node_id, %failure, "visibility job failed");
                        log.error(format!("node {}: {}", node_id, failure));
                    }
                }
                (node_id, result)
            }
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut outcome = JobBatchOutcome::default();
    for (node_id, result) in results {
        match result {
            Ok(path) => {
                outcome.rasters.insert(node_id, path);
            }
            Err(failure) => {
                outcome.failures.insert(node_id, failure);
            }
        }
    }

    info!(
        succeeded = outcome.rasters.len(),
        failed = outcome.failures.len(),
        "visibility batch finished"
    );
    Ok(outcome)
}

/// Execute one job in its own scratch directory, then persist the raster.
async fn execute_job(
    job: &VisibilityJob,
    evaluator: &dyn ViewshedEvaluator,
    timeout: Duration,
    scratch_root: &Path,
) -> Result<PathBuf, JobFailure> {
    let scratch = tempfile::Builder::new()
        .prefix(&format!("viewshed_{}_", sanitize_id(job.node_id())))
        .tempdir_in(scratch_root)
        .map_err(|e| JobFailure::Evaluator {
            detail: format!("failed to create scratch dir: {}", e),
        })?;
    let tmp_output = scratch.path().join("viewshed.tif");

    match tokio::time::timeout(timeout, evaluator.evaluate(&job.request, &tmp_output)).await {
        Err(_) => Err(JobFailure::Timeout {
            limit_secs: timeout.as_secs(),
        }),
        Ok(Err(e)) => Err(JobFailure::Evaluator {
            detail: e.to_string(),
        }),
        Ok(Ok(())) => {
            match tokio::fs::metadata(&tmp_output).await {
                Err(_) => Err(JobFailure::MissingOutput),
                Ok(meta) if meta.len() == 0 => Err(JobFailure::MissingOutput),
                Ok(_) => {
                    if let Some(parent) = job.output_path.parent() {
                        tokio::fs::create_dir_all(parent)
                            .await
                            .map_err(|e| JobFailure::Evaluator {
                                detail: format!("failed to create raster dir: {}", e),
                            })?;
                    }
                    // The scratch dir may live on another filesystem than the
                    // raster dir, so copy instead of rename.
                    tokio::fs::copy(&tmp_output, &job.output_path)
                        .await
                        .map_err(|e| JobFailure::Evaluator {
                            detail: format!("failed to persist raster: {}", e),
                        })?;
                    Ok(job.output_path.clone())
                }
            }
        }
    }
}
