// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Spatial grid sampling around a map center.
//!
//! The sampler produces a square lattice of points in row-major order
//! (latitude outer, longitude inner). Fetchers rely on that order: the
//! `i`-th point lines up with the `i`-th location in a batched response.

use serde::{Deserialize, Serialize};

/// Default spacing between grid points in degrees.
pub const DEFAULT_SPACING: f64 = 0.25;

/// Default distance from the center to the grid edge in degrees.
pub const DEFAULT_HALF_EXTENT: f64 = 2.0;

// Absorbs float error in extent/spacing so 4.0 / 0.1 still yields 41 steps.
const STEP_EPSILON: f64 = 1e-9;

/// A single sample location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Grid geometry used by fetchers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Distance between neighbouring points in degrees.
    pub spacing: f64,
    /// Distance from the center to the outermost row/column in degrees.
    pub half_extent: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            spacing: DEFAULT_SPACING,
            half_extent: DEFAULT_HALF_EXTENT,
        }
    }
}

impl GridSpec {
    /// Number of points along one axis.
    #[must_use]
    pub fn steps(&self) -> usize {
        axis_steps(self.spacing, self.half_extent)
    }

    /// Total number of points the grid produces.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.steps() * self.steps()
    }

    /// Generate the points for this geometry around a center.
    #[must_use]
    pub fn generate(&self, center_lat: f64, center_lon: f64) -> Vec<GridPoint> {
        generate(center_lat, center_lon, self.spacing, self.half_extent)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is finite, non-negative and floored before the cast"
)]
fn axis_steps(spacing: f64, half_extent: f64) -> usize {
    if !spacing.is_finite() || spacing <= 0.0 || !half_extent.is_finite() {
        return 0;
    }
    if half_extent <= 0.0 {
        return 1;
    }
    ((2.0 * half_extent / spacing) + STEP_EPSILON).floor() as usize + 1
}

/// Generate the grid around `(center_lat, center_lon)`.
///
/// Coordinates are computed as `start + i * spacing` rather than by
/// accumulating, so the last row and column are never lost to rounding.
/// A non-positive spacing yields an empty grid; a non-positive extent
/// yields just the center.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "grid axes are tiny")]
pub fn generate(center_lat: f64, center_lon: f64, spacing: f64, half_extent: f64) -> Vec<GridPoint> {
    let steps = axis_steps(spacing, half_extent);
    if steps == 1 {
        return vec![GridPoint {
            lat: center_lat,
            lon: center_lon,
        }];
    }

    let lat_start = center_lat - half_extent;
    let lon_start = center_lon - half_extent;

    let mut points = Vec::with_capacity(steps * steps);
    for i in 0..steps {
        let lat = lat_start + i as f64 * spacing;
        for j in 0..steps {
            points.push(GridPoint {
                lat,
                lon: lon_start + j as f64 * spacing,
            });
        }
    }
    points
}

/// Index of the grid point closest to `(lat, lon)`.
#[must_use]
pub fn nearest_index(points: &[GridPoint], lat: f64, lon: f64) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (a.lat - lat).powi(2) + (a.lon - lon).powi(2);
            let db = (b.lat - lat).powi(2) + (b.lon - lon).powi(2);
            da.total_cmp(&db)
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid_has_289_points() {
        let points = generate(35.0, -97.0, DEFAULT_SPACING, DEFAULT_HALF_EXTENT);
        assert_eq!(points.len(), 289);
        assert_eq!(GridSpec::default().point_count(), 289);
    }

    #[test]
    fn test_row_major_order() {
        let points = generate(10.0, 20.0, 1.0, 1.0);
        assert_eq!(points.len(), 9);
        assert_eq!(points[0], GridPoint { lat: 9.0, lon: 19.0 });
        assert_eq!(points[1], GridPoint { lat: 9.0, lon: 20.0 });
        assert_eq!(points[3], GridPoint { lat: 10.0, lon: 19.0 });
        assert_eq!(points[8], GridPoint { lat: 11.0, lon: 21.0 });
    }

    #[test]
    fn test_deterministic() {
        let a = generate(51.5, -0.12, 0.25, 2.0);
        let b = generate(51.5, -0.12, 0.25, 2.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_inexact_spacing_keeps_last_row() {
        // 4.0 / 0.1 is not exactly 40 in binary floating point
        let points = generate(0.0, 0.0, 0.1, 2.0);
        assert_eq!(points.len(), 41 * 41);
        let last = points.last().unwrap();
        assert!((last.lat - 2.0).abs() < 1e-9);
        assert!((last.lon - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_are_tolerated() {
        assert!(generate(0.0, 0.0, 0.0, 2.0).is_empty());
        assert!(generate(0.0, 0.0, -1.0, 2.0).is_empty());
        assert!(generate(0.0, 0.0, f64::NAN, 2.0).is_empty());
        assert_eq!(generate(5.0, 6.0, 0.25, 0.0), vec![GridPoint { lat: 5.0, lon: 6.0 }]);
    }

    #[test]
    fn test_nearest_index_finds_center() {
        let points = generate(35.0, -97.0, 0.25, 2.0);
        let idx = nearest_index(&points, 35.0, -97.0).unwrap();
        assert_eq!(idx, 144);
        assert!((points[idx].lat - 35.0).abs() < 1e-9);
        assert!((points[idx].lon + 97.0).abs() < 1e-9);
    }
}
