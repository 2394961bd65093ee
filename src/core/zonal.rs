use crate::core::roi::Roi;
use crate::core::sampling::{ReducerBudget, SamplingPlan};
use crate::types::{CoordinateSystem, FloodResult, GridSpec, Mask, Raster};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Mean Earth radius (IUGG) in metres
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Band name of pixel area rasters
pub const AREA_BAND: &str = "area";

/// Area of a masked region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaStatistic {
    pub area_m2: f64,
    /// Scale in metres the sum was computed at
    pub scale: f64,
    pub approximate: bool,
    /// Number of lattice samples that hit the mask
    pub samples: usize,
}

impl AreaStatistic {
    pub fn km2(&self) -> f64 {
        self.area_m2 / 1e6
    }
}

/// Area in square metres of one pixel in each row of `grid`
pub fn row_areas(grid: &GridSpec) -> Vec<f64> {
    let t = &grid.transform;
    match grid.crs {
        CoordinateSystem::Projected { .. } => {
            vec![(t.pixel_width * t.pixel_height).abs(); grid.rows]
        }
        CoordinateSystem::Geographic => {
            let d_lon = t.pixel_width.abs().to_radians();
            (0..grid.rows)
                .map(|r| {
                    let lat_top = t.top_left_y + r as f64 * t.pixel_height;
                    let lat_bottom = lat_top + t.pixel_height;
                    EARTH_RADIUS_M
                        * EARTH_RADIUS_M
                        * d_lon
                        * (lat_top.to_radians().sin() - lat_bottom.to_radians().sin()).abs()
                })
                .collect()
        }
    }
}

/// Pixel-area-weighted sums over a region of interest
pub struct ZonalStatistics {
    budget: ReducerBudget,
}

impl ZonalStatistics {
    pub fn new(budget: ReducerBudget) -> Self {
        Self { budget }
    }

    /// Per-pixel area raster (m²) on `grid`
    pub fn pixel_area_raster(grid: &GridSpec) -> FloodResult<Raster> {
        let areas = row_areas(grid);
        let band = Array2::from_shape_fn(grid.shape(), |(r, _)| areas[r] as f32);
        Raster::from_band(*grid, AREA_BAND, band)
    }

    /// Area covered by the valid `true` pixels of `mask` inside `roi`: the
    /// pixel area raster summed over the mask
    pub fn area(&self, mask: &Mask, roi: &Roi, scale: f64) -> FloodResult<AreaStatistic> {
        let grid = &mask.grid;
        let roi_mask = roi.rasterize(grid)?;
        let plan = SamplingPlan::new(grid, &roi_mask, scale, &self.budget)?;
        let area_raster = Self::pixel_area_raster(grid)?;
        let areas = area_raster.band(0);

        log::info!("Summing {} area at {:.1} m", mask.band_name, plan.effective_scale);

        let partials = plan.map_tiles(|rows| {
            let mut sum = 0.0f64;
            let mut hits = 0usize;
            for &r in rows {
                for c in plan.cols() {
                    if roi_mask[[r, c]] && mask.valid[[r, c]] && mask.data[[r, c]] {
                        sum += areas[[r, c]] as f64;
                        hits += 1;
                    }
                }
            }
            (sum, hits)
        });

        let (sum, samples) = partials
            .into_iter()
            .fold((0.0, 0), |(s, n), (ps, pn)| (s + ps, n + pn));

        let stat = AreaStatistic {
            area_m2: sum * plan.weight(),
            scale: plan.effective_scale,
            approximate: plan.approximate,
            samples,
        };
        log::debug!("{} area: {:.1} m2 from {} samples", mask.band_name, stat.area_m2, samples);
        Ok(stat)
    }

    /// ROI polygon area in m²: planar for projected, geodesic for geographic
    pub fn polygon_area(roi: &Roi) -> f64 {
        roi.area()
    }
}

impl Default for ZonalStatistics {
    fn default() -> Self {
        Self::new(ReducerBudget::default())
    }
}
