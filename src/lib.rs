//! # Sightline
//!
//! Terrain line-of-sight ("viewshed") coverage pipeline for radio relay
//! site planning.
//!
//! Given a table of candidate observer locations and a prepared elevation
//! model, the crate validates and deduplicates the nodes, derives a
//! physically meaningful observer height per node from local terrain relief
//! (optionally honoring first-Fresnel-zone clearance), dispatches one
//! visibility computation per node against an external evaluator under a
//! bounded worker pool, and merges the per-node binary rasters into a
//! single spatially aligned coverage surface.
//!
//! ## Architecture
//!
//! The crate is organized into several logical modules:
//!
//! - [`config`]: TOML run configuration with defaults
//! - [`nodes`]: node loading, validation and deduplication
//! - [`height`]: observer height resolution strategies
//! - [`viewshed`]: visibility jobs, the evaluator seam and the orchestrator
//! - [`merge`]: raster alignment and coverage accumulation
//! - [`raster`]: grid model, GeoTIFF access and the elevation grid handle
//! - [`report`]: run statistics and the batch progress log
//! - [`export`]: audit and hand-off artifact writers
//! - [`pipeline`]: end-to-end batch wiring
//!
//! ## Failure policy
//!
//! Per-record and per-job failures are recovered locally and aggregated
//! into the audit record; only preconditions that make the batch
//! meaningless (missing elevation grid, zero valid nodes) are fatal. The
//! batch always reports coverage from whatever nodes succeeded together
//! with an explicit accounting of everything dropped and why.

pub mod config;
pub mod error;
pub mod export;
pub mod height;
pub mod merge;
pub mod nodes;
pub mod pipeline;
pub mod raster;
pub mod report;
pub mod viewshed;
