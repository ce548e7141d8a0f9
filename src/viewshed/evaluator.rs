//! The external visibility evaluator seam.
//!
//! The orchestrator only knows the [`ViewshedEvaluator`] trait: one
//! capability, "evaluate visibility for one job into an output path". The
//! default implementation shells out to the `gdal_viewshed` CLI; an
//! in-process algorithm can replace it without touching the orchestrator.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::error::EvaluatorError;

/// Everything one evaluator invocation needs. Positions are in the
/// elevation grid's CRS.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub node_id: String,
    pub observer_x: f64,
    pub observer_y: f64,
    pub observer_height_m: f64,
    pub target_height_m: f64,
    pub max_distance_m: f64,
    pub curvature_correction: bool,
    pub refraction_coeff: f64,
    pub dem_path: PathBuf,
}

/// Computes a single-node binary visibility raster.
#[async_trait]
pub trait ViewshedEvaluator: Send + Sync {
    /// Evaluate one job, writing a single-band binary raster (1 = visible,
    /// 0 = not visible, nodata outside radius) to `output`.
    async fn evaluate(&self, request: &EvaluationRequest, output: &Path)
        -> Result<(), EvaluatorError>;
}

/// Adapter around the `gdal_viewshed` command-line tool.
pub struct GdalViewshedCli {
    binary: PathBuf,
}

impl GdalViewshedCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn build_args(request: &EvaluationRequest, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-b".to_string(),
            "1".to_string(),
            "-ox".to_string(),
            request.observer_x.to_string(),
            "-oy".to_string(),
            request.observer_y.to_string(),
            "-oz".to_string(),
            request.observer_height_m.to_string(),
            "-tz".to_string(),
            request.target_height_m.to_string(),
            "-md".to_string(),
            request.max_distance_m.to_string(),
            "-vv".to_string(),
            "1".to_string(),
            "-iv".to_string(),
            "0".to_string(),
            "-ov".to_string(),
            "0".to_string(),
        ];
        if request.curvature_correction {
            args.push("-cc".to_string());
            args.push(request.refraction_coeff.to_string());
        }
        args.push(request.dem_path.to_string_lossy().into_owned());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

impl Default for GdalViewshedCli {
    fn default() -> Self {
        Self::new("gdal_viewshed")
    }
}

#[async_trait]
impl ViewshedEvaluator for GdalViewshedCli {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
        output: &Path,
    ) -> Result<(), EvaluatorError> {
        let args = Self::build_args(request, output);
        // kill_on_drop bounds the child's lifetime to the job future, so a
        // timed-out job does not leave an orphan computation running.
        let result = tokio::process::Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(EvaluatorError::Launch)?;

        if !result.status.success() {
            return Err(EvaluatorError::Failed {
                status: result
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> EvaluationRequest {
        EvaluationRequest {
            node_id: "n1".to_string(),
            observer_x: 512_340.5,
            observer_y: 5_247_800.0,
            observer_height_m: 12.5,
            target_height_m: 0.0,
            max_distance_m: 20_000.0,
            curvature_correction: true,
            refraction_coeff: 0.13,
            dem_path: PathBuf::from("data/dem/dem_prepared.tif"),
        }
    }

    #[test]
    fn test_cli_args_with_curvature() {
        let args = GdalViewshedCli::build_args(&request(), Path::new("out/v.tif"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-b 1 -ox 512340.5 -oy 5247800 -oz 12.5"));
        assert!(joined.contains("-tz 0 -md 20000"));
        assert!(joined.contains("-vv 1 -iv 0 -ov 0"));
        assert!(joined.contains("-cc 0.13"));
        assert!(joined.ends_with("data/dem/dem_prepared.tif out/v.tif"));
    }

    #[test]
    fn test_cli_args_without_curvature() {
        let mut req = request();
        req.curvature_correction = false;
        let args = GdalViewshedCli::build_args(&req, Path::new("out/v.tif"));
        assert!(!args.contains(&"-cc".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let evaluator = GdalViewshedCli::new("definitely-not-a-real-binary");
        let dir = tempfile::tempdir().unwrap();
        let result = evaluator
            .evaluate(&request(), &dir.path().join("out.tif"))
            .await;
        assert!(matches!(result, Err(EvaluatorError::Launch(_))));
    }
}
