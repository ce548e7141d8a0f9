//! Run statistics and the batch progress log.
//!
//! [`RunStats`] is the audit record of a batch: how many rows came in, what
//! was dropped and why, and which height-strategy parameters were actually
//! applied. It is never consumed computationally downstream.
//!
//! [`RunLog`] is a thread-safe, timestamped trail of progress and failure
//! messages, shared between the pipeline and the job orchestrator and
//! persisted next to the other audit outputs.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single log entry with timestamp and message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// In-memory, clone-shareable run log.
#[derive(Clone, Default)]
pub struct RunLog {
    entries: Arc<RwLock<Vec<LogEntry>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.entries.write().push(LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }
}

/// Audit record of one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: String,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,

    pub rows_input: usize,
    pub rows_malformed: usize,
    pub rows_invalid_coordinates: usize,
    pub rows_zero_coordinates: usize,
    pub rows_duplicate_id: usize,
    pub rows_valid: usize,

    pub nodes_out_of_bounds: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,

    pub height_mode: String,
    pub height_nodes_adapted: usize,
    pub height_input_min_m: f64,
    pub height_input_max_m: f64,
    pub height_used_min_m: f64,
    pub height_used_max_m: f64,
    pub height_fresnel_enabled: bool,
    pub height_fresnel_margin_m: f64,
    pub radio_frequency_mhz: f64,

    /// SHA-256 of the elevation raster bytes; empty for in-memory grids.
    pub dem_checksum_sha256: String,
}

impl RunStats {
    /// Fold height aggregates over the resolved nodes.
    pub fn record_heights<'a>(
        &mut self,
        resolved: impl IntoIterator<Item = &'a crate::height::ResolvedNode>,
        default_height_m: f64,
    ) {
        let mut input_min = f64::INFINITY;
        let mut input_max = f64::NEG_INFINITY;
        let mut used_min = f64::INFINITY;
        let mut used_max = f64::NEG_INFINITY;
        let mut adapted = 0usize;
        let mut any = false;

        for node in resolved {
            any = true;
            let declared = node.node.declared_height_m.unwrap_or(default_height_m);
            input_min = input_min.min(declared);
            input_max = input_max.max(declared);
            used_min = used_min.min(node.used_height_m);
            used_max = used_max.max(node.used_height_m);
            if node.was_adapted(declared) {
                adapted += 1;
            }
        }

        if any {
            self.height_input_min_m = input_min;
            self.height_input_max_m = input_max;
            self.height_used_min_m = used_min;
            self.height_used_max_m = used_max;
        }
        self.height_nodes_adapted = adapted;
    }
}

/// SHA-256 checksum of a file, hex encoded.
pub fn file_checksum(path: &std::path::Path) -> std::io::Result<String> {
    use sha2::{Digest, Sha256};
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
