//! Sample-lattice planning and tiled reduction shared by the histogram and
//! zonal reducers.
//!
//! A plan samples every `stride`-th row and column (starting at
//! `stride / 2`) of the pixels inside the ROI. Along an axis shorter than the
//! stride a single line is sampled and stands for the whole axis. When the number of samples
//! at the requested scale exceeds the budget, the stride is doubled until it
//! fits and the plan is flagged approximate.

use crate::types::{FloodError, FloodResult, GridSpec};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Resource limits for region reductions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerBudget {
    /// Maximum number of samples an exact reduction may visit
    pub max_pixels: usize,
    /// Sampled rows per reduction tile
    pub tile_rows: usize,
    /// Reduce tiles on the rayon pool (requires the `parallel` feature)
    pub parallel: bool,
}

impl Default for ReducerBudget {
    fn default() -> Self {
        Self {
            max_pixels: 10_000_000,
            tile_rows: 64,
            parallel: true,
        }
    }
}

/// Sampling lattice for one reduction
#[derive(Debug, Clone)]
pub struct SamplingPlan {
    pub stride: usize,
    /// Number of ROI pixels on the lattice
    pub samples: usize,
    pub approximate: bool,
    /// Scale in metres actually used
    pub effective_scale: f64,
    row_axis: Axis,
    col_axis: Axis,
    rows: Vec<usize>,
    tile_rows: usize,
    parallel: bool,
}

/// Lattice along one grid axis. The step never exceeds the axis length and
/// the offset always lands inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    len: usize,
    step: usize,
    offset: usize,
}

impl Axis {
    fn new(len: usize, stride: usize) -> Self {
        let len = len.max(1);
        let step = stride.clamp(1, len);
        Self {
            len,
            step,
            offset: (stride / 2).min(len - 1),
        }
    }

    fn indices(self) -> impl Iterator<Item = usize> {
        (self.offset..self.len).step_by(self.step)
    }
}

impl SamplingPlan {
    pub fn new(
        grid: &GridSpec,
        roi_mask: &Array2<bool>,
        scale: f64,
        budget: &ReducerBudget,
    ) -> FloodResult<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(FloodError::InvalidInput {
                field: "scale".to_string(),
                value: scale.to_string(),
                reason: "sampling scale must be a positive number of metres".to_string(),
            });
        }
        if roi_mask.dim() != grid.shape() {
            return Err(FloodError::GridMismatch(format!(
                "ROI mask {:?} does not match grid {:?}",
                roi_mask.dim(),
                grid.shape()
            )));
        }

        let base_stride = ((scale / grid.nominal_scale()).round() as usize).max(1);
        let max_stride = grid.rows.max(grid.cols).max(1);
        let budget_pixels = budget.max_pixels.max(1);

        let mut stride = base_stride;
        let mut samples = count_lattice(roi_mask, stride);
        let requested = samples;

        while samples > budget_pixels && stride < max_stride {
            let next = (stride * 2).min(max_stride);
            let next_samples = count_lattice(roi_mask, next);
            if next_samples == 0 {
                log::warn!(
                    "Stride {} leaves no ROI pixel on the lattice; keeping stride {} ({} samples)",
                    next,
                    stride,
                    samples
                );
                break;
            }
            stride = next;
            samples = next_samples;
        }

        let approximate = stride != base_stride;
        if approximate {
            log::warn!(
                "{}; best-effort sampling at stride {} ({} samples)",
                FloodError::ResourceLimitExceeded { requested, budget: budget_pixels },
                stride,
                samples
            );
        }

        let row_axis = Axis::new(grid.rows, stride);
        let col_axis = Axis::new(grid.cols, stride);
        let rows: Vec<usize> = if grid.rows == 0 || grid.cols == 0 { Vec::new() } else { row_axis.indices().collect() };

        log::debug!(
            "Sampling plan: stride {}, {} samples over {} rows (scale {:.1} m)",
            stride,
            samples,
            rows.len(),
            grid.nominal_scale() * stride as f64
        );

        Ok(Self {
            stride,
            samples,
            approximate,
            effective_scale: grid.nominal_scale() * stride as f64,
            row_axis,
            col_axis,
            rows,
            tile_rows: budget.tile_rows.max(1),
            parallel: budget.parallel,
        })
    }

    /// Sampled column indices
    pub fn cols(&self) -> impl Iterator<Item = usize> {
        self.col_axis.indices()
    }

    /// Number of grid pixels each sample stands for
    pub fn weight(&self) -> f64 {
        (self.row_axis.step * self.col_axis.step) as f64
    }

    /// Map every tile of sampled rows to a partial result.
    ///
    /// Partials are returned in tile order regardless of how they were
    /// computed, so folding them left to right gives the same bits on the
    /// parallel and the sequential path.
    pub fn map_tiles<P, F>(&self, map: F) -> Vec<P>
    where
        P: Send,
        F: Fn(&[usize]) -> P + Sync + Send,
    {
        let tiles: Vec<&[usize]> = self.rows.chunks(self.tile_rows).collect();

        #[cfg(feature = "parallel")]
        {
            if self.parallel && tiles.len() > 1 {
                use rayon::prelude::*;
                return tiles.into_par_iter().map(|rows| map(rows)).collect();
            }
        }

        tiles.into_iter().map(map).collect()
    }
}

fn count_lattice(mask: &Array2<bool>, stride: usize) -> usize {
    let (rows, cols) = mask.dim();
    if rows == 0 || cols == 0 {
        return 0;
    }
    let col_axis = Axis::new(cols, stride);
    Axis::new(rows, stride)
        .indices()
        .map(|r| col_axis.indices().filter(|&c| mask[[r, c]]).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};

    fn grid(n: usize) -> GridSpec {
        GridSpec::new(
            n,
            n,
            GeoTransform::north_up(0.0, n as f64 * 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32636 },
        )
    }

    #[test]
    fn test_scale_sets_base_stride() {
        let g = grid(90);
        let mask = Array2::from_elem(g.shape(), true);
        let plan = SamplingPlan::new(&g, &mask, 30.0, &ReducerBudget::default()).unwrap();

        assert_eq!(plan.stride, 3);
        assert_eq!(plan.samples, 900);
        assert!(!plan.approximate);
        assert!((plan.effective_scale - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_doubles_stride() {
        let g = grid(100);
        let mask = Array2::from_elem(g.shape(), true);
        let budget = ReducerBudget { max_pixels: 1_000, ..ReducerBudget::default() };
        let plan = SamplingPlan::new(&g, &mask, 10.0, &budget).unwrap();

        assert!(plan.approximate);
        assert_eq!(plan.stride, 4);
        assert!(plan.samples <= 1_000);
    }

    #[test]
    fn test_tiles_preserve_order() {
        let g = grid(50);
        let mask = Array2::from_elem(g.shape(), true);
        let budget = ReducerBudget { tile_rows: 7, ..ReducerBudget::default() };
        let plan = SamplingPlan::new(&g, &mask, 10.0, &budget).unwrap();

        let firsts = plan.map_tiles(|rows| rows[0]);
        assert_eq!(firsts, vec![0, 7, 14, 21, 28, 35, 42, 49]);
    }

    #[test]
    fn test_narrow_grid_keeps_samples_on_the_short_axis() {
        let g = GridSpec::new(
            100,
            2,
            GeoTransform::north_up(0.0, 1000.0, 10.0),
            CoordinateSystem::Projected { epsg: 32636 },
        );
        let mask = Array2::from_elem(g.shape(), true);
        let budget = ReducerBudget { max_pixels: 10, ..ReducerBudget::default() };
        let plan = SamplingPlan::new(&g, &mask, 10.0, &budget).unwrap();

        assert!(plan.approximate);
        assert_eq!(plan.stride, 16);
        assert_eq!(plan.samples, 6);
        assert_eq!(plan.cols().collect::<Vec<_>>(), vec![1]);
        // 16 rows by the full 2-column width
        assert_eq!(plan.weight(), 32.0);
    }

    #[test]
    fn test_stride_that_empties_lattice_is_not_taken() {
        let g = grid(10);
        let mut mask = Array2::from_elem(g.shape(), false);
        mask[[0, 0]] = true;
        mask[[0, 1]] = true;
        let budget = ReducerBudget { max_pixels: 1, ..ReducerBudget::default() };
        let plan = SamplingPlan::new(&g, &mask, 10.0, &budget).unwrap();

        assert_eq!(plan.stride, 1);
        assert_eq!(plan.samples, 2);
    }

    #[test]
    fn test_stride_longer_than_grid_samples_one_line() {
        let g = GridSpec::new(
            1,
            9,
            GeoTransform::north_up(0.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32636 },
        );
        let mask = Array2::from_elem(g.shape(), true);
        let plan = SamplingPlan::new(&g, &mask, 30.0, &ReducerBudget::default()).unwrap();

        assert_eq!(plan.samples, 3);
        assert_eq!(plan.map_tiles(|rows| rows.to_vec()), vec![vec![0]]);
        assert_eq!(plan.weight(), 3.0);
    }

    #[test]
    fn test_rejects_non_positive_scale() {
        let g = grid(4);
        let mask = Array2::from_elem(g.shape(), true);
        assert!(SamplingPlan::new(&g, &mask, 0.0, &ReducerBudget::default()).is_err());
    }
}
