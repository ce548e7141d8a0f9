//! Error types for the coverage pipeline.
//!
//! The pipeline distinguishes two kinds of failure. Per-record and per-job
//! failures ([`RejectReason`], [`JobFailure`]) are ordinary values: they are
//! recorded in the run statistics and the run log, and the batch continues.
//! Only precondition failures that make the whole batch meaningless are
//! surfaced as [`PipelineError`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal pipeline errors. Anything here aborts the batch before jobs run
/// (or, for raster/IO variants, fails the current stage outright).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("elevation grid not found at {0}")]
    DemMissing(PathBuf),

    #[error("failed to open elevation grid {path}: {source}")]
    DemUnreadable {
        path: PathBuf,
        #[source]
        source: gdal::errors::GdalError,
    },

    #[error("raster {0} has a rotated geotransform; only axis-aligned grids are supported")]
    RotatedGrid(PathBuf),

    #[error("nodes file not found: {0}")]
    NodesFileMissing(PathBuf),

    #[error("failed to parse nodes input {path}: {detail}")]
    NodesParse { path: PathBuf, detail: String },

    #[error("malformed raster {path}: {detail}")]
    MalformedRaster { path: PathBuf, detail: String },

    #[error("no valid nodes after validation")]
    NoValidNodes,

    #[error("no nodes within elevation grid coverage")]
    NoResolvableNodes,

    #[error(transparent)]
    Raster(#[from] gdal::errors::GdalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Why a raw input record was dropped during validation.
///
/// Reasons are checked in declaration order: a record must parse, carry valid
/// coordinates and a non-sentinel position before deduplication is even
/// considered, so a malformed row never occupies an identifier slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Record is missing an identifier or position fields entirely.
    MalformedRecord,
    /// Latitude/longitude non-numeric or outside valid ranges.
    InvalidCoordinates,
    /// Position is exactly (0, 0), the common "no fix" sentinel.
    ZeroCoordinates,
    /// Identifier already accepted from an earlier record.
    DuplicateId,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedRecord => "malformed_record",
            RejectReason::InvalidCoordinates => "invalid_coordinates",
            RejectReason::ZeroCoordinates => "zero_coordinates",
            RejectReason::DuplicateId => "duplicate_id",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a dispatched visibility job produced no usable raster.
///
/// All variants map to the `job_failed` category: the node is excluded from
/// the merge and the batch continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    /// The external evaluator reported an error or could not be launched.
    Evaluator { detail: String },
    /// The evaluator did not finish within the configured timeout.
    Timeout { limit_secs: u64 },
    /// The evaluator exited cleanly but left no (or an empty) output raster.
    MissingOutput,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Evaluator { detail } => write!(f, "evaluator failed: {}", detail),
            JobFailure::Timeout { limit_secs } => {
                write!(f, "evaluator exceeded {}s timeout", limit_secs)
            }
            JobFailure::MissingOutput => write!(f, "evaluator produced no output raster"),
        }
    }
}

/// Errors from a single evaluator invocation.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("failed to launch evaluator: {0}")]
    Launch(#[source] std::io::Error),

    #[error("evaluator exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}
