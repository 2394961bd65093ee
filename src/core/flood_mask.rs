use crate::types::{FloodError, FloodResult, Mask, Raster};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Band name of derived flood masks
pub const FLOOD_BAND: &str = "flood";

/// Flood mask derivation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodMaskParams {
    /// Backscatter band compared against the threshold
    pub band: String,
    /// Radius in pixels of the circular majority kernel
    pub majority_radius: f64,
    /// Maximum number of majority filter passes
    pub majority_iterations: usize,
}

impl Default for FloodMaskParams {
    fn default() -> Self {
        Self {
            band: "VV".to_string(),
            majority_radius: 1.5,
            majority_iterations: 5,
        }
    }
}

/// Offsets (drow, dcol) of every pixel within `radius` of the origin
fn circle_offsets(radius: f64) -> Vec<(isize, isize)> {
    let reach = radius.floor().max(0.0) as isize;
    let r2 = radius * radius;
    let mut offsets = Vec::new();
    for di in -reach..=reach {
        for dj in -reach..=reach {
            if ((di * di + dj * dj) as f64) <= r2 {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

/// Derives flood masks from before/after backscatter, a threshold and slope
pub struct FloodMaskEngine {
    params: FloodMaskParams,
    kernel: Vec<(isize, isize)>,
}

impl FloodMaskEngine {
    pub fn new(params: FloodMaskParams) -> Self {
        let kernel = circle_offsets(params.majority_radius);
        Self { params, kernel }
    }

    pub fn params(&self) -> &FloodMaskParams {
        &self.params
    }

    /// Flood layer with non-flooded pixels masked out
    pub fn derive(
        &self,
        before: &Raster,
        after: &Raster,
        threshold: f64,
        slope: &Raster,
        slope_limit_deg: f64,
    ) -> FloodResult<Mask> {
        let flood = self.derive_unmasked(before, after, threshold, slope, slope_limit_deg)?;
        let flood = flood.self_mask();
        log::info!("Flood mask: {} flooded pixels", flood.true_count());
        Ok(flood)
    }

    /// {0, 1} flood layer before the final self-mask
    pub fn derive_unmasked(
        &self,
        before: &Raster,
        after: &Raster,
        threshold: f64,
        slope: &Raster,
        slope_limit_deg: f64,
    ) -> FloodResult<Mask> {
        before.grid().ensure_same(after.grid(), "before/after composites")?;
        before.grid().ensure_same(slope.grid(), "slope")?;

        let slope_band = slope
            .band_names()
            .first()
            .ok_or_else(|| FloodError::MissingBand { band: "slope".to_string() })?;

        log::debug!(
            "Deriving flood mask: band {}, threshold {:.3} dB, slope < {} deg",
            self.params.band,
            threshold,
            slope_limit_deg
        );

        let water_after = Mask::less_than(after, &self.params.band, threshold)?;
        let water_before = Mask::less_than(before, &self.params.band, threshold)?;
        let gentle = Mask::less_than(slope, slope_band, slope_limit_deg)?;

        let water_after = water_after.update_mask(&gentle)?;
        let cleaned = self.majority_filter(&water_after);

        let mut flood = cleaned.and(&water_before.not())?;
        flood.band_name = FLOOD_BAND.to_string();
        Ok(flood)
    }

    /// Iterated circular majority (mode) filter.
    ///
    /// Only valid neighbours vote; ties keep the centre value and invalid
    /// centres stay invalid. Stops early once a pass changes nothing.
    pub fn majority_filter(&self, mask: &Mask) -> Mask {
        let (rows, cols) = mask.data.dim();
        let mut current = mask.data.clone();

        for pass in 0..self.params.majority_iterations {
            let mut next = Array2::from_elem((rows, cols), false);
            let mut changed = 0usize;

            Zip::indexed(&mut next).and(&mask.valid).for_each(|(i, j), out, &ok| {
                if !ok {
                    return;
                }
                let (mut yes, mut no) = (0usize, 0usize);
                for &(di, dj) in &self.kernel {
                    let ii = i as isize + di;
                    let jj = j as isize + dj;
                    if ii < 0 || jj < 0 || ii >= rows as isize || jj >= cols as isize {
                        continue;
                    }
                    let (ii, jj) = (ii as usize, jj as usize);
                    if mask.valid[[ii, jj]] {
                        if current[[ii, jj]] {
                            yes += 1;
                        } else {
                            no += 1;
                        }
                    }
                }
                *out = if yes > no {
                    true
                } else if no > yes {
                    false
                } else {
                    current[[i, j]]
                };
            });

            Zip::from(&next).and(&current).for_each(|&a, &b| {
                if a != b {
                    changed += 1;
                }
            });
            current = next;

            log::debug!("Majority pass {}: {} pixel(s) changed", pass + 1, changed);
            if changed == 0 {
                break;
            }
        }

        Mask {
            band_name: mask.band_name.clone(),
            data: current,
            valid: mask.valid.clone(),
            grid: mask.grid,
        }
    }
}

impl Default for FloodMaskEngine {
    fn default() -> Self {
        Self::new(FloodMaskParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};

    fn grid(n: usize) -> GridSpec {
        GridSpec::new(
            n,
            n,
            GeoTransform::north_up(0.0, n as f64 * 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32636 },
        )
    }

    fn mask_from(values: Array2<bool>) -> Mask {
        let n = values.nrows();
        let valid = Array2::from_elem(values.dim(), true);
        Mask::new(grid(n), "VV", values, valid).unwrap()
    }

    #[test]
    fn test_circle_kernel_is_three_by_three() {
        assert_eq!(circle_offsets(1.5).len(), 9);
        assert_eq!(circle_offsets(1.0).len(), 5);
    }

    #[test]
    fn test_l_shape_mask_algebra() {
        let low = [(0, 0), (1, 0), (2, 0), (2, 1), (2, 2)];
        let after = Array2::from_shape_fn((3, 3), |p| if low.contains(&p) { -20.0f32 } else { -5.0 });
        let before = Array2::from_shape_fn((3, 3), |p| if p == (2, 2) { -20.0f32 } else { -5.0 });
        let slope = Array2::from_shape_fn((3, 3), |p| if p == (0, 0) { 10.0f32 } else { 1.0 });

        let g = grid(3);
        let after = Raster::from_band(g, "VV", after).unwrap();
        let before = Raster::from_band(g, "VV", before).unwrap();
        let slope = Raster::from_band(g, "slope", slope).unwrap();

        let flood = FloodMaskEngine::default()
            .derive(&before, &after, -15.0, &slope, 5.0)
            .unwrap();

        let flooded = [(1, 0), (2, 0), (2, 1)];
        for i in 0..3 {
            for j in 0..3 {
                let expected = flooded.contains(&(i, j));
                assert_eq!(flood.valid[[i, j]], expected, "pixel ({}, {})", i, j);
                assert_eq!(flood.data[[i, j]], expected);
            }
        }
        assert_eq!(flood.band_name, FLOOD_BAND);
    }

    #[test]
    fn test_unmasked_layer_keeps_zeros() {
        let g = grid(3);
        let after = Raster::from_band(g, "VV", Array2::from_elem((3, 3), -20.0f32)).unwrap();
        let before = Raster::from_band(g, "VV", Array2::from_elem((3, 3), -5.0f32)).unwrap();
        let mut slope = Array2::from_elem((3, 3), 0.0f32);
        slope[[0, 0]] = f32::NAN;
        let slope = Raster::from_band(g, "slope", slope).unwrap();

        let layer = FloodMaskEngine::default()
            .derive_unmasked(&before, &after, -15.0, &slope, 5.0)
            .unwrap();
        assert_eq!(layer.valid_count(), 8);
        assert_eq!(layer.true_count(), 8);

        let bytes = layer.to_raster().unwrap();
        assert_eq!(bytes.value(0, 1, 1), Some(1.0));
        assert_eq!(bytes.value(0, 0, 0), None);
    }

    #[test]
    fn test_majority_filter_removes_isolated_pixels() {
        let mut values = Array2::from_elem((7, 7), false);
        values[[3, 3]] = true;
        let cleaned = FloodMaskEngine::default().majority_filter(&mask_from(values));
        assert_eq!(cleaned.true_count(), 0);

        let mut holes = Array2::from_elem((7, 7), true);
        holes[[3, 3]] = false;
        let filled = FloodMaskEngine::default().majority_filter(&mask_from(holes));
        assert_eq!(filled.true_count(), 49);
    }

    #[test]
    fn test_majority_filter_keeps_large_regions() {
        let values = Array2::from_shape_fn((8, 8), |(_, j)| j < 4);
        let mask = mask_from(values.clone());
        let cleaned = FloodMaskEngine::default().majority_filter(&mask);
        assert_eq!(cleaned.data, values);
    }

    #[test]
    fn test_grid_mismatch_is_rejected() {
        let a = Raster::from_band(grid(3), "VV", Array2::from_elem((3, 3), -20.0f32)).unwrap();
        let b = Raster::from_band(grid(4), "VV", Array2::from_elem((4, 4), -20.0f32)).unwrap();
        let slope = Raster::from_band(grid(3), "slope", Array2::from_elem((3, 3), 0.0f32)).unwrap();
        assert!(matches!(
            FloodMaskEngine::default().derive(&a, &b, -15.0, &slope, 5.0),
            Err(FloodError::GridMismatch(_))
        ));
    }
}
