//! Observer height resolution.
//!
//! Turns a validated node into a [`ResolvedNode`] carrying the height that
//! is actually fed to the visibility evaluator. Resolution is pure with
//! respect to its inputs: the same node, elevation grid and strategy always
//! produce the same heights.
//!
//! Two strategies exist. `input_only` trusts the declared height (or the
//! configured default). `adaptive_min` raises the observer until a straight
//! line from it clears the highest terrain point within a local radius by
//! the configured margin, optionally inflated by first-Fresnel-zone
//! clearance for radio line-of-sight.

use serde::{Deserialize, Serialize};

use crate::config::{HeightMode, HeightStrategyConfig};
use crate::nodes::ValidatedNode;
use crate::raster::ElevationGrid;

/// A node enriched with resolved heights and its position in the grid CRS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedNode {
    pub node: ValidatedNode,
    /// Ground elevation at the node position (NaN when the cell is nodata).
    pub ground_elevation_m: f64,
    /// Minimum height-above-ground required to clear nearby terrain.
    pub min_required_height_m: f64,
    /// Fresnel clearance added on top of the terrain minimum (0 when off).
    pub fresnel_margin_m: f64,
    /// The height handed to the visibility evaluator.
    pub used_height_m: f64,
    /// Observer position projected into the elevation grid's CRS.
    pub projected_x: f64,
    pub projected_y: f64,
}

impl ResolvedNode {
    /// Whether resolution raised the height above the declared/default one.
    pub fn was_adapted(&self, declared_or_default: f64) -> bool {
        self.used_height_m > declared_or_default + 1e-9
    }
}

/// Why a node could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveFailure {
    /// Node position falls outside the elevation grid's coverage.
    OutOfBounds,
}

/// First Fresnel zone radius in meters.
///
/// `r = 17.32 * sqrt((d1_km * d2_km) / (f_GHz * D_km))`, with the path split
/// at `split_ratio`. Degenerate distances or frequencies yield 0.
pub fn fresnel_radius_m(distance_m: f64, frequency_mhz: f64, split_ratio: f64) -> f64 {
    if distance_m <= 0.0 || frequency_mhz <= 0.0 {
        return 0.0;
    }
    let d1_km = (distance_m * split_ratio) / 1000.0;
    let d2_km = (distance_m * (1.0 - split_ratio)) / 1000.0;
    let d_km = distance_m / 1000.0;
    let f_ghz = frequency_mhz / 1000.0;
    if d1_km <= 0.0 || d2_km <= 0.0 || d_km <= 0.0 || f_ghz <= 0.0 {
        return 0.0;
    }
    17.32 * ((d1_km * d2_km) / (f_ghz * d_km)).sqrt()
}

/// Resolve the observer height for one node.
///
/// The only I/O is elevation sampling on the provided grid handle. Fails
/// with [`ResolveFailure::OutOfBounds`] when the node lies outside the
/// grid's coverage; the caller excludes such nodes from job generation and
/// records them.
pub fn resolve(
    node: &ValidatedNode,
    dem: &ElevationGrid,
    strategy: &HeightStrategyConfig,
    default_height_m: f64,
    max_distance_m: f64,
    frequency_mhz: f64,
) -> Result<ResolvedNode, ResolveFailure> {
    let (x, y) = dem
        .project_lonlat(node.lon, node.lat)
        .map_err(|_| ResolveFailure::OutOfBounds)?;
    let ground = dem.sample(x, y).ok_or(ResolveFailure::OutOfBounds)?;

    let declared_or_default = node.declared_height_m.unwrap_or(default_height_m);

    match strategy.mode {
        HeightMode::InputOnly => Ok(ResolvedNode {
            node: node.clone(),
            ground_elevation_m: ground,
            min_required_height_m: 0.0,
            fresnel_margin_m: 0.0,
            used_height_m: declared_or_default.max(0.0),
            projected_x: x,
            projected_y: y,
        }),
        HeightMode::AdaptiveMin => {
            let min_required = min_required_height(dem, x, y, ground, strategy);

            let fresnel_margin = if strategy.use_fresnel {
                let radius = fresnel_radius_m(
                    max_distance_m,
                    frequency_mhz,
                    strategy.fresnel_sample_ratio,
                );
                (radius * strategy.fresnel_clearance_ratio).max(0.0)
            } else {
                0.0
            };

            let mut used = declared_or_default
                .max(strategy.min_height_m)
                .max(min_required)
                .max(min_required + fresnel_margin);
            used = used.min(strategy.max_height_m).max(0.0);

            Ok(ResolvedNode {
                node: node.clone(),
                ground_elevation_m: ground,
                min_required_height_m: min_required,
                fresnel_margin_m: fresnel_margin,
                used_height_m: used,
                projected_x: x,
                projected_y: y,
            })
        }
    }
}

/// Height above local ground needed to clear the highest terrain point
/// within the configured scan radius by the clearance margin. Unknown
/// ground (nodata) disables the terrain term rather than poisoning it.
fn min_required_height(
    dem: &ElevationGrid,
    x: f64,
    y: f64,
    ground: f64,
    strategy: &HeightStrategyConfig,
) -> f64 {
    if !ground.is_finite() {
        return 0.0;
    }
    match dem.local_max(x, y, strategy.local_radius_m) {
        Some(local_max) => (local_max - ground + strategy.clearance_margin_m).max(0.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GeoTransform, GridSpec};
    use ndarray::Array2;

    fn flat_grid_with_peak(peak: f32) -> ElevationGrid {
        // 20x20 grid, 10 m pixels, origin (0, 200), all ground at 100 m with
        // one peak two pixels east of the test node.
        let mut data = Array2::<f32>::from_elem((20, 20), 100.0);
        data[[10, 12]] = peak;
        let spec = GridSpec::new(
            20,
            20,
            GeoTransform {
                top_left_x: 0.0,
                pixel_width: 10.0,
                rotation_x: 0.0,
                top_left_y: 200.0,
                rotation_y: 0.0,
                pixel_height: -10.0,
            },
            String::new(),
        );
        ElevationGrid::from_parts(data, spec, None)
    }

    /// Node sitting at the center of pixel (10, 10): lon 105, lat 95.
    fn test_node(declared: Option<f64>) -> ValidatedNode {
        ValidatedNode {
            id: "n1".to_string(),
            name: "n1".to_string(),
            lat: 95.0,
            lon: 105.0,
            declared_height_m: declared,
        }
    }

    fn adaptive(clearance: f64, fresnel: bool) -> HeightStrategyConfig {
        HeightStrategyConfig {
            mode: HeightMode::AdaptiveMin,
            min_height_m: 0.0,
            max_height_m: 500.0,
            local_radius_m: 50.0,
            clearance_margin_m: clearance,
            use_fresnel: fresnel,
            fresnel_clearance_ratio: 0.6,
            fresnel_sample_ratio: 0.5,
        }
    }

    #[test]
    fn test_fresnel_radius_midpoint() {
        // 20 km path at 868 MHz, sampled at the midpoint:
        // 17.32 * sqrt((10 * 10) / (0.868 * 20)) = 41.57 m
        let r = fresnel_radius_m(20_000.0, 868.0, 0.5);
        assert!((r - 41.57).abs() < 0.01, "unexpected radius {}", r);
    }

    #[test]
    fn test_fresnel_radius_degenerate() {
        assert_eq!(fresnel_radius_m(0.0, 868.0, 0.5), 0.0);
        assert_eq!(fresnel_radius_m(20_000.0, 0.0, 0.5), 0.0);
        assert_eq!(fresnel_radius_m(20_000.0, 868.0, 0.0), 0.0);
        assert_eq!(fresnel_radius_m(20_000.0, 868.0, 1.0), 0.0);
    }

    #[test]
    fn test_input_only_ignores_terrain() {
        let dem = flat_grid_with_peak(180.0);
        let strategy = HeightStrategyConfig {
            mode: HeightMode::InputOnly,
            ..adaptive(2.0, true)
        };

        let resolved = resolve(&test_node(Some(10.0)), &dem, &strategy, 6.0, 20_000.0, 868.0)
            .unwrap();
        assert_eq!(resolved.used_height_m, 10.0);
        assert_eq!(resolved.min_required_height_m, 0.0);
        assert_eq!(resolved.fresnel_margin_m, 0.0);
        // Ground is still sampled for audit
        assert_eq!(resolved.ground_elevation_m, 100.0);

        let defaulted = resolve(&test_node(None), &dem, &strategy, 6.0, 20_000.0, 868.0).unwrap();
        assert_eq!(defaulted.used_height_m, 6.0);
    }

    #[test]
    fn test_adaptive_clears_local_peak() {
        let dem = flat_grid_with_peak(130.0);
        let strategy = adaptive(2.0, false);

        let resolved = resolve(&test_node(None), &dem, &strategy, 0.0, 20_000.0, 868.0).unwrap();
        // Peak is 30 m above ground, plus 2 m margin
        assert!((resolved.min_required_height_m - 32.0).abs() < 1e-9);
        assert!((resolved.used_height_m - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_keeps_higher_declared_height() {
        let dem = flat_grid_with_peak(110.0);
        let strategy = adaptive(2.0, false);

        let resolved = resolve(&test_node(Some(60.0)), &dem, &strategy, 0.0, 20_000.0, 868.0)
            .unwrap();
        assert_eq!(resolved.used_height_m, 60.0);
        assert!((resolved.min_required_height_m - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_monotone_in_clearance_margin() {
        let dem = flat_grid_with_peak(140.0);
        let mut previous = 0.0;
        for clearance in [0.0, 1.0, 2.0, 5.0, 10.0, 50.0] {
            let strategy = adaptive(clearance, false);
            let resolved =
                resolve(&test_node(None), &dem, &strategy, 0.0, 20_000.0, 868.0).unwrap();
            assert!(
                resolved.used_height_m >= previous,
                "used height decreased at clearance {}",
                clearance
            );
            previous = resolved.used_height_m;
        }
    }

    #[test]
    fn test_adaptive_fresnel_raises_requirement() {
        let dem = flat_grid_with_peak(130.0);
        let without = resolve(
            &test_node(None),
            &dem,
            &adaptive(2.0, false),
            0.0,
            20_000.0,
            868.0,
        )
        .unwrap();
        let with = resolve(
            &test_node(None),
            &dem,
            &adaptive(2.0, true),
            0.0,
            20_000.0,
            868.0,
        )
        .unwrap();

        assert!(with.fresnel_margin_m > 0.0);
        assert!(
            with.used_height_m > without.used_height_m,
            "fresnel clearance should raise the used height"
        );
        assert!(
            (with.used_height_m - (with.min_required_height_m + with.fresnel_margin_m)).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_adaptive_clamped_to_max_height() {
        let dem = flat_grid_with_peak(1_000.0);
        let mut strategy = adaptive(2.0, false);
        strategy.max_height_m = 120.0;

        let resolved = resolve(&test_node(None), &dem, &strategy, 0.0, 20_000.0, 868.0).unwrap();
        assert_eq!(resolved.used_height_m, 120.0);
        // The audit still records the true requirement
        assert!(resolved.min_required_height_m > 120.0);
    }

    #[test]
    fn test_out_of_bounds_node_fails() {
        let dem = flat_grid_with_peak(110.0);
        let node = ValidatedNode {
            id: "far".to_string(),
            name: "far".to_string(),
            lat: -45.0,
            lon: -120.0,
            declared_height_m: None,
        };
        let result = resolve(&node, &dem, &adaptive(2.0, false), 0.0, 20_000.0, 868.0);
        assert_eq!(result.unwrap_err(), ResolveFailure::OutOfBounds);
    }

    #[test]
    fn test_min_height_floor_applies() {
        let dem = flat_grid_with_peak(100.0); // no relief at all
        let mut strategy = adaptive(0.0, false);
        strategy.min_height_m = 4.0;

        let resolved = resolve(&test_node(None), &dem, &strategy, 0.0, 20_000.0, 868.0).unwrap();
        assert_eq!(resolved.used_height_m, 4.0);
    }
}
