use crate::core::roi::Roi;
use crate::core::sampling::{ReducerBudget, SamplingPlan};
use crate::types::{FloodError, FloodResult, Raster};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Histogram reduction parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramParams {
    /// Maximum number of buckets
    pub bucket_count: usize,
    /// Minimum bucket width (dB); widths are this times a power of two
    pub min_bucket_width: f64,
    /// Sampling scale in metres
    pub scale: f64,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            bucket_count: 255,
            min_bucket_width: 0.1,
            scale: 30.0,
        }
    }
}

/// Binned intensity histogram of one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub band: String,
    /// Lower edge of the first bucket
    pub bucket_min: f64,
    pub bucket_width: f64,
    /// Mean of the samples in each bucket (midpoint for empty buckets)
    pub bucket_means: Vec<f64>,
    pub counts: Vec<u64>,
    /// True when the sample budget forced a coarser scale
    pub approximate: bool,
    /// Scale in metres the samples were drawn at
    pub scale: f64,
}

impl Histogram {
    pub fn empty(band: &str, scale: f64, approximate: bool) -> Self {
        Self {
            band: band.to_string(),
            bucket_min: 0.0,
            bucket_width: 0.0,
            bucket_means: Vec::new(),
            counts: Vec::new(),
            approximate,
            scale,
        }
    }

    /// Histogram from explicit (mean, count) pairs
    pub fn from_buckets(band: &str, bucket_means: Vec<f64>, counts: Vec<u64>) -> FloodResult<Self> {
        if bucket_means.len() != counts.len() {
            return Err(FloodError::InvalidInput {
                field: "histogram".to_string(),
                value: format!("{} means / {} counts", bucket_means.len(), counts.len()),
                reason: "bucket means and counts must pair up".to_string(),
            });
        }
        let bucket_width = if bucket_means.len() > 1 {
            bucket_means[1] - bucket_means[0]
        } else {
            0.0
        };
        Ok(Self {
            band: band.to_string(),
            bucket_min: bucket_means.first().copied().unwrap_or(0.0) - bucket_width / 2.0,
            bucket_width,
            bucket_means,
            counts,
            approximate: false,
            scale: 0.0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn populated_buckets(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }
}

/// Fixed bucket layout covering `[min, max]`
#[derive(Debug, Clone, Copy)]
struct BucketLayout {
    origin: f64,
    width: f64,
    buckets: usize,
}

impl BucketLayout {
    fn fit(min: f64, max: f64, bucket_count: usize, min_width: f64) -> Self {
        let bucket_count = bucket_count.max(1);
        let mut width = min_width;
        loop {
            if !width.is_finite() {
                return Self { origin: min, width: f64::MAX, buckets: 1 };
            }
            let origin = (min / width).floor() * width;
            // Bucket count stays in f64 until it is known to fit
            let span = ((max - origin) / width).floor() + 1.0;
            if span.is_finite() && span <= bucket_count as f64 {
                return Self { origin, width, buckets: (span as usize).max(1) };
            }
            width *= 2.0;
        }
    }

    fn index(&self, value: f64) -> usize {
        let i = ((value - self.origin) / self.width).floor();
        if i <= 0.0 {
            0
        } else {
            (i as usize).min(self.buckets - 1)
        }
    }
}

/// Per-tile accumulator for the binning pass
#[derive(Debug, Clone)]
struct BucketPartial {
    counts: Vec<u64>,
    sums: Vec<f64>,
}

impl BucketPartial {
    fn new(buckets: usize) -> Self {
        Self { counts: vec![0; buckets], sums: vec![0.0; buckets] }
    }

    fn merge(mut self, other: BucketPartial) -> Self {
        for (c, o) in self.counts.iter_mut().zip(other.counts) {
            *c += o;
        }
        for (s, o) in self.sums.iter_mut().zip(other.sums) {
            *s += o;
        }
        self
    }
}

/// Computes band histograms over a region of interest
pub struct HistogramReducer {
    params: HistogramParams,
    budget: ReducerBudget,
}

impl HistogramReducer {
    pub fn new(params: HistogramParams, budget: ReducerBudget) -> Self {
        Self { params, budget }
    }

    pub fn params(&self) -> &HistogramParams {
        &self.params
    }

    /// Histogram of `band` inside `roi`.
    ///
    /// Returns `HistogramMissingBand` if the raster has no such band and an
    /// empty histogram if the band has no valid samples in the region.
    pub fn histogram(&self, image: &Raster, band: &str, roi: &Roi) -> FloodResult<Histogram> {
        let roi_mask = roi.rasterize(image.grid())?;
        self.histogram_masked(image, band, &roi_mask)
    }

    /// Histogram over pixels where `roi_mask` is true
    pub fn histogram_masked(
        &self,
        image: &Raster,
        band: &str,
        roi_mask: &Array2<bool>,
    ) -> FloodResult<Histogram> {
        if self.params.bucket_count == 0 || !(self.params.min_bucket_width > 0.0) {
            return Err(FloodError::InvalidInput {
                field: "histogram".to_string(),
                value: format!("{:?}", self.params),
                reason: "bucket count and minimum bucket width must be positive".to_string(),
            });
        }

        let index = image
            .band_index(band)
            .ok_or_else(|| FloodError::HistogramMissingBand { band: band.to_string() })?;

        let grid = image.grid();
        let plan = SamplingPlan::new(grid, roi_mask, self.params.scale, &self.budget)?;
        let values = image.band(index);
        let valid = image.band_valid(index);

        log::info!(
            "Computing {} histogram ({} buckets, min width {})",
            band,
            self.params.bucket_count,
            self.params.min_bucket_width
        );

        // Pass 1: value range
        let ranges = plan.map_tiles(|rows| {
            let mut range: Option<(f64, f64)> = None;
            for &r in rows {
                for c in plan.cols() {
                    if roi_mask[[r, c]] && valid[[r, c]] {
                        let v = values[[r, c]] as f64;
                        range = Some(match range {
                            Some((lo, hi)) => (lo.min(v), hi.max(v)),
                            None => (v, v),
                        });
                    }
                }
            }
            range
        });

        let range = ranges.into_iter().flatten().reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)));
        let (min, max) = match range {
            Some(r) => r,
            None => {
                log::warn!("No valid {} samples inside the region of interest", band);
                return Ok(Histogram::empty(band, plan.effective_scale, plan.approximate));
            }
        };

        let layout = BucketLayout::fit(
            min,
            max,
            self.params.bucket_count,
            self.params.min_bucket_width,
        );
        log::debug!(
            "Histogram range [{:.3}, {:.3}] -> {} buckets of width {}",
            min,
            max,
            layout.buckets,
            layout.width
        );

        // Pass 2: counts and sums per bucket
        let partials = plan.map_tiles(|rows| {
            let mut partial = BucketPartial::new(layout.buckets);
            for &r in rows {
                for c in plan.cols() {
                    if roi_mask[[r, c]] && valid[[r, c]] {
                        let v = values[[r, c]] as f64;
                        let b = layout.index(v);
                        partial.counts[b] += 1;
                        partial.sums[b] += v;
                    }
                }
            }
            partial
        });

        let totals = partials
            .into_iter()
            .fold(BucketPartial::new(layout.buckets), BucketPartial::merge);

        let bucket_means = totals
            .counts
            .iter()
            .zip(&totals.sums)
            .enumerate()
            .map(|(i, (&count, &sum))| {
                if count > 0 {
                    sum / count as f64
                } else {
                    layout.origin + (i as f64 + 0.5) * layout.width
                }
            })
            .collect();

        Ok(Histogram {
            band: band.to_string(),
            bucket_min: layout.origin,
            bucket_width: layout.width,
            bucket_means,
            counts: totals.counts,
            approximate: plan.approximate,
            scale: plan.effective_scale,
        })
    }
}

impl Default for HistogramReducer {
    fn default() -> Self {
        Self::new(HistogramParams::default(), ReducerBudget::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform, GridSpec};

    const UTM: CoordinateSystem = CoordinateSystem::Projected { epsg: 32636 };

    fn raster(values: Array2<f32>) -> Raster {
        let (rows, cols) = values.dim();
        let grid = GridSpec::new(rows, cols, GeoTransform::north_up(0.0, rows as f64 * 10.0, 10.0), UTM);
        Raster::from_band(grid, "VV", values).unwrap()
    }

    fn full_roi(image: &Raster) -> Roi {
        let b = image.grid().bounds();
        Roi::from_bbox(b.min_x, b.min_y, b.max_x, b.max_y, UTM).unwrap()
    }

    fn native() -> HistogramReducer {
        HistogramReducer::new(
            HistogramParams { scale: 10.0, ..HistogramParams::default() },
            ReducerBudget::default(),
        )
    }

    #[test]
    fn test_bimodal_histogram_counts_and_means() {
        let mut values = Array2::from_elem((10, 10), -20.0f32);
        for r in 0..10 {
            for c in 5..10 {
                values[[r, c]] = -5.0;
            }
        }
        let image = raster(values);
        let hist = native().histogram(&image, "VV", &full_roi(&image)).unwrap();

        assert_eq!(hist.total(), 100);
        assert_eq!(hist.populated_buckets(), 2);
        assert!(hist.counts.len() <= 255);
        assert!((hist.bucket_width - 0.1).abs() < 1e-12);
        assert!((hist.bucket_means[0] + 20.0).abs() < 1e-9);
        assert!((hist.bucket_means.last().copied().unwrap() + 5.0).abs() < 1e-9);
        assert!(!hist.approximate);
    }

    #[test]
    fn test_wide_range_widens_buckets_by_powers_of_two() {
        let values = Array2::from_shape_fn((1, 100), |(_, c)| -40.0 + c as f32 * 0.5);
        let image = raster(values);
        let hist = native().histogram(&image, "VV", &full_roi(&image)).unwrap();

        // 49.5 dB range at 0.1 dB would need 496 buckets
        assert!((hist.bucket_width - 0.2).abs() < 1e-12);
        assert!(hist.counts.len() <= 255);
        assert_eq!(hist.total(), 100);
    }

    #[test]
    fn test_extreme_finite_range_fits_bucket_count() {
        let image = raster(Array2::from_shape_vec((1, 2), vec![-1e19f32, 1e19]).unwrap());
        let hist = native().histogram(&image, "VV", &full_roi(&image)).unwrap();

        assert_eq!(hist.total(), 2);
        assert_eq!(hist.populated_buckets(), 2);
        assert!(!hist.counts.is_empty() && hist.counts.len() <= 255);
        assert_eq!(hist.counts[0], 1);
        assert_eq!(hist.counts.last().copied(), Some(1));
        assert!(hist.bucket_width.is_finite());
    }

    #[test]
    fn test_missing_band_is_reported() {
        let image = raster(Array2::from_elem((3, 3), -10.0));
        let err = native().histogram(&image, "VH", &full_roi(&image)).unwrap_err();
        assert!(matches!(err, FloodError::HistogramMissingBand { band } if band == "VH"));
    }

    #[test]
    fn test_all_invalid_band_gives_empty_histogram() {
        let image = raster(Array2::from_elem((3, 3), f32::NAN));
        let hist = native().histogram(&image, "VV", &full_roi(&image)).unwrap();
        assert!(hist.is_empty());
        assert!(hist.bucket_means.is_empty());
    }

    #[test]
    fn test_parallel_and_sequential_are_identical() {
        let values = Array2::from_shape_fn((120, 80), |(r, c)| {
            -25.0 + ((r * 31 + c * 17) % 97) as f32 * 0.237
        });
        let image = raster(values);
        let roi = full_roi(&image);
        let params = HistogramParams { scale: 10.0, ..HistogramParams::default() };

        let parallel = HistogramReducer::new(
            params,
            ReducerBudget { tile_rows: 8, parallel: true, ..ReducerBudget::default() },
        )
        .histogram(&image, "VV", &roi)
        .unwrap();
        let sequential = HistogramReducer::new(
            params,
            ReducerBudget { tile_rows: 8, parallel: false, ..ReducerBudget::default() },
        )
        .histogram(&image, "VV", &roi)
        .unwrap();

        assert_eq!(parallel, sequential);
    }
}
