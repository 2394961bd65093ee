use crate::types::{FloodError, FloodResult, Raster};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Speckle filtering parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleFilterParams {
    /// Filter window size (must be odd)
    pub window_size: usize,
    /// Speckle noise coefficient of variation
    pub sigma_v: f64,
    /// Bands with at least this many pixels are filtered on the rayon pool
    pub parallel_min_pixels: usize,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            window_size: 3,
            sigma_v: 0.05,
            parallel_min_pixels: 1_000_000,
        }
    }
}

/// Local mean and sample variance of one window
#[derive(Debug, Clone, Copy, PartialEq)]
struct LocalStats {
    mean: f64,
    variance: f64,
}

/// Refined Lee speckle filter
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    /// Filter every band of `image`.
    ///
    /// Output has the same grid, band names and validity as the input.
    pub fn apply_filter(&self, image: &Raster) -> FloodResult<Raster> {
        self.validate()?;

        let (rows, cols) = image.grid().shape();
        log::info!(
            "Applying Refined Lee speckle filter to {} band(s) of {}x{}",
            image.band_count(),
            rows,
            cols
        );
        log::debug!("Filter parameters: {:?}", self.params);

        let mut data = Array3::<f32>::from_elem((image.band_count(), rows, cols), f32::NAN);
        let mut valid = Array3::<bool>::from_elem((image.band_count(), rows, cols), false);

        for (b, (mut out, mut out_valid)) in data
            .axis_iter_mut(Axis(0))
            .zip(valid.axis_iter_mut(Axis(0)))
            .enumerate()
        {
            let band = image.band(b);
            let band_valid = image.band_valid(b);
            out_valid.assign(&band_valid);

            let kernel = |(i, j): (usize, usize), o: &mut f32| {
                if band_valid[[i, j]] {
                    *o = self.filter_pixel(&band, &band_valid, i, j);
                }
            };

            if cfg!(feature = "parallel") && rows * cols >= self.params.parallel_min_pixels {
                log::debug!("Band {} filtered in parallel", image.band_names()[b]);
                Zip::indexed(&mut out).par_for_each(kernel);
            } else {
                Zip::indexed(&mut out).for_each(kernel);
            }
        }

        log::info!("Speckle filtering completed successfully");
        Raster::new(*image.grid(), image.band_names().to_vec(), data, valid)
    }

    /// Adaptive weight `b` for every pixel of one band; 0 where invalid
    pub fn adaptive_weights(
        &self,
        band: ArrayView2<'_, f32>,
        valid: ArrayView2<'_, bool>,
    ) -> FloodResult<Array2<f64>> {
        self.validate()?;
        if band.dim() != valid.dim() {
            return Err(FloodError::GridMismatch(format!(
                "band {:?} and validity {:?} differ",
                band.dim(),
                valid.dim()
            )));
        }
        let mut weights = Array2::<f64>::zeros(band.dim());
        Zip::indexed(&mut weights).for_each(|(i, j), w| {
            if valid[[i, j]] {
                let stats = self.local_statistics(&band, &valid, i, j);
                *w = self.weight(stats);
            }
        });
        Ok(weights)
    }

    fn validate(&self) -> FloodResult<()> {
        if self.params.window_size % 2 == 0 {
            return Err(FloodError::InvalidInput {
                field: "window_size".to_string(),
                value: self.params.window_size.to_string(),
                reason: "window size must be odd".to_string(),
            });
        }
        if !(self.params.sigma_v.is_finite() && self.params.sigma_v >= 0.0) {
            return Err(FloodError::InvalidInput {
                field: "sigma_v".to_string(),
                value: self.params.sigma_v.to_string(),
                reason: "noise coefficient must be a non-negative number".to_string(),
            });
        }
        Ok(())
    }

    fn filter_pixel(
        &self,
        band: &ArrayView2<'_, f32>,
        valid: &ArrayView2<'_, bool>,
        i: usize,
        j: usize,
    ) -> f32 {
        let stats = self.local_statistics(band, valid, i, j);
        let b = self.weight(stats);
        let original = band[[i, j]] as f64;
        (stats.mean + b * (original - stats.mean)) as f32
    }

    /// `b = clamp((r - σv) / (r (1 + σv)), 0, 1)` with `r = v / m²`
    fn weight(&self, stats: LocalStats) -> f64 {
        let sigma_v = self.params.sigma_v;
        let r = stats.variance / (stats.mean * stats.mean);
        if r.is_nan() || r == 0.0 {
            return 0.0;
        }
        if r.is_infinite() {
            return (1.0 / (1.0 + sigma_v)).clamp(0.0, 1.0);
        }
        ((r - sigma_v) / (r * (1.0 + sigma_v))).clamp(0.0, 1.0)
    }

    /// Mean and (n - 1) variance of the valid samples in the window,
    /// truncated at the raster border
    fn local_statistics(
        &self,
        band: &ArrayView2<'_, f32>,
        valid: &ArrayView2<'_, bool>,
        center_i: usize,
        center_j: usize,
    ) -> LocalStats {
        let (height, width) = band.dim();
        let half_window = self.params.window_size / 2;

        let i_start = center_i.saturating_sub(half_window);
        let i_end = (center_i + half_window + 1).min(height);
        let j_start = center_j.saturating_sub(half_window);
        let j_end = (center_j + half_window + 1).min(width);

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for i in i_start..i_end {
            for j in j_start..j_end {
                if valid[[i, j]] {
                    sum += band[[i, j]] as f64;
                    count += 1;
                }
            }
        }

        if count == 0 {
            return LocalStats { mean: 0.0, variance: 0.0 };
        }
        let mean = sum / count as f64;
        if count < 2 {
            return LocalStats { mean, variance: 0.0 };
        }

        let mut sum_sq = 0.0f64;
        for i in i_start..i_end {
            for j in j_start..j_end {
                if valid[[i, j]] {
                    let d = band[[i, j]] as f64 - mean;
                    sum_sq += d * d;
                }
            }
        }

        LocalStats { mean, variance: sum_sq / (count - 1) as f64 }
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};
    use approx::assert_abs_diff_eq;

    fn grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(0.0, rows as f64 * 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32636 },
        )
    }

    /// Step from -20 dB to -5 dB at column 6 with a ±0.5 checkerboard
    fn noisy_step() -> Array2<f32> {
        Array2::from_shape_fn((12, 12), |(i, j)| {
            let base = if j < 6 { -20.0 } else { -5.0 };
            let noise = if (i + j) % 2 == 0 { 0.5 } else { -0.5 };
            base + noise
        })
    }

    #[test]
    fn test_constant_input_is_identity() {
        let image = Raster::from_band(grid(8, 8), "VV", Array2::from_elem((8, 8), -13.7f32)).unwrap();
        let filtered = SpeckleFilter::new().apply_filter(&image).unwrap();

        assert_eq!(filtered.band(0), image.band(0));
        assert_eq!(filtered.band_names(), image.band_names());
    }

    #[test]
    fn test_all_zero_input_is_identity() {
        // m = 0 and v = 0 leave r undefined, so b = 0
        let image = Raster::from_band(grid(6, 6), "VV", Array2::zeros((6, 6))).unwrap();
        let filter = SpeckleFilter::new();
        let filtered = filter.apply_filter(&image).unwrap();

        assert_eq!(filtered.band(0), image.band(0));
        assert_eq!(filtered.valid_count(0), 36);
        let weights = filter
            .adaptive_weights(image.band(0), image.band_valid(0))
            .unwrap();
        assert!(weights.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_zero_mean_window_keeps_detail() {
        // Window sums to zero with nonzero spread: r is infinite
        let mut values = Array2::from_elem((3, 3), 1.0f32);
        values[[1, 1]] = -8.0;
        let valid = Array2::from_elem((3, 3), true);
        let filter = SpeckleFilter::new();

        let weights = filter.adaptive_weights(values.view(), valid.view()).unwrap();
        assert_abs_diff_eq!(weights[[1, 1]], 1.0 / 1.05, epsilon = 1e-12);

        let image = Raster::from_band(grid(3, 3), "VV", values).unwrap();
        let filtered = filter.apply_filter(&image).unwrap();
        let centre = filtered.value(0, 1, 1).unwrap();
        assert!(centre.is_finite());
        assert_abs_diff_eq!(centre, -8.0 / 1.05, epsilon = 1e-5);
    }

    #[test]
    fn test_weights_grow_at_edges() {
        let values = noisy_step();
        let valid = Array2::from_elem(values.dim(), true);
        let weights = SpeckleFilter::new()
            .adaptive_weights(values.view(), valid.view())
            .unwrap();

        // Flat interior is fully smoothed, the step keeps most of its detail
        assert_abs_diff_eq!(weights[[6, 2]], 0.0);
        assert!(weights[[6, 5]] > 0.5, "edge weight {}", weights[[6, 5]]);
        assert!(weights[[6, 6]] > weights[[6, 9]]);
    }

    #[test]
    fn test_flat_regions_are_smoothed() {
        let image = Raster::from_band(grid(12, 12), "VV", noisy_step()).unwrap();
        let filtered = SpeckleFilter::new().apply_filter(&image).unwrap();

        let before = (image.band(0)[[6, 2]] + 20.0).abs();
        let after = (filtered.band(0)[[6, 2]] + 20.0).abs();
        assert!(after < before);
        assert!(filtered.band(0)[[6, 10]] > -6.0);
    }

    #[test]
    fn test_nodata_is_preserved_and_ignored() {
        let mut values = Array2::from_elem((5, 5), -10.0f32);
        values[[2, 2]] = f32::NAN;
        values[[0, 0]] = f32::NAN;
        let image = Raster::from_band(grid(5, 5), "VV", values).unwrap();
        let filtered = SpeckleFilter::new().apply_filter(&image).unwrap();

        assert_eq!(filtered.value(0, 2, 2), None);
        assert_eq!(filtered.value(0, 0, 0), None);
        assert_eq!(filtered.value(0, 1, 1), Some(-10.0));
        assert_eq!(filtered.valid_count(0), 23);
    }

    #[test]
    fn test_even_window_rejected() {
        let image = Raster::from_band(grid(3, 3), "VV", Array2::from_elem((3, 3), -10.0f32)).unwrap();
        let filter = SpeckleFilter::with_params(SpeckleFilterParams {
            window_size: 4,
            ..SpeckleFilterParams::default()
        });
        assert!(matches!(filter.apply_filter(&image), Err(FloodError::InvalidInput { .. })));
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let image = Raster::from_band(grid(12, 12), "VV", noisy_step()).unwrap();
        let sequential = SpeckleFilter::new().apply_filter(&image).unwrap();
        let parallel = SpeckleFilter::with_params(SpeckleFilterParams {
            parallel_min_pixels: 1,
            ..SpeckleFilterParams::default()
        })
        .apply_filter(&image)
        .unwrap();

        assert_eq!(sequential.band(0), parallel.band(0));
    }
}
