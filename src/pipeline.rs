//! End-to-end flood analysis.
//!
//! `run` composites the before and after windows, despeckles both,
//! thresholds by Otsu on the before histogram, derives the flood mask and
//! sums its area. Every stage consumes fully materialized values from the
//! previous one.

use crate::config::{BackscatterUnits, RunConfig};
use crate::core::composite::CompositeBuilder;
use crate::core::flood_mask::FloodMaskEngine;
use crate::core::histogram::{Histogram, HistogramReducer};
use crate::core::otsu::{OtsuThresholdSelector, ThresholdDecision};
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::zonal::{AreaStatistic, ZonalStatistics};
use crate::io::archive::{SceneArchive, SceneQuery};
use crate::io::elevation::ElevationService;
use crate::io::sink::ResultsSink;
use crate::types::{FloodResult, Mask, Raster, TimeWindow};
use serde::{Deserialize, Serialize};

/// Scalar results of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodSummary {
    pub threshold: ThresholdDecision,
    pub flood_area: AreaStatistic,
    pub flood_area_km2: f64,
    pub roi_area_m2: f64,
    pub roi_area_km2: f64,
    pub before_frames: usize,
    pub after_frames: usize,
    /// True when any reduction fell back to coarser sampling
    pub approximate: bool,
    pub before_histogram: Option<Histogram>,
    pub after_histogram: Option<Histogram>,
}

/// Full results of one run
#[derive(Debug, Clone)]
pub struct FloodReport {
    pub summary: FloodSummary,
    pub before_filtered: Raster,
    pub after_filtered: Raster,
    /// Flooded pixels only; everything else is nodata
    pub flood: Mask,
    /// {0, 1} flood layer before masking out dry pixels
    pub flood_layer: Mask,
}

impl FloodReport {
    pub fn summary_json(&self) -> FloodResult<String> {
        Ok(serde_json::to_string_pretty(&self.summary)?)
    }
}

/// Run the flood analysis described by `config`
pub fn run(
    config: &RunConfig,
    archive: &dyn SceneArchive,
    elevation: &dyn ElevationService,
) -> FloodResult<FloodReport> {
    let params = &config.params;
    let band = params.flood.band.as_str();
    let grid = config.roi.grid(params.pixel_size_m)?;
    log::info!(
        "Starting flood analysis on {}x{} grid at {} m (band {})",
        grid.rows,
        grid.cols,
        params.pixel_size_m,
        band
    );

    let builder = CompositeBuilder::new(grid, band);
    let composite = |window: &TimeWindow| -> FloodResult<(Raster, usize)> {
        let query = SceneQuery { filter: params.scene_filter, roi: &config.roi, window: *window };
        let collection = archive.scenes(&query)?;
        let frames = builder.select(&collection, window, &config.roi).len();
        let raster = builder.build(&collection, window, &config.roi)?;
        let raster = match params.backscatter_units {
            BackscatterUnits::Decibel => raster,
            BackscatterUnits::Linear => raster.to_db()?,
        };
        Ok((raster, frames))
    };

    let (before, before_frames) = composite(&config.before)?;
    let (after, after_frames) = composite(&config.after)?;

    let speckle = SpeckleFilter::with_params(params.speckle);
    let before_filtered = speckle.apply_filter(&before)?;
    let after_filtered = speckle.apply_filter(&after)?;

    let reducer = HistogramReducer::new(params.histogram, params.budget);
    let before_histogram = reducer.histogram(&before_filtered, band, &config.roi);
    let after_histogram = reducer.histogram(&after_filtered, band, &config.roi).ok();
    let before_histogram_value = before_histogram.as_ref().ok().cloned();

    let threshold = OtsuThresholdSelector::new(params.otsu).select_or_fallback(before_histogram);

    let slope = elevation.slope(&grid)?;
    let engine = FloodMaskEngine::new(params.flood.clone());
    let flood_layer = engine.derive_unmasked(
        &before_filtered,
        &after_filtered,
        threshold.value,
        &slope,
        params.slope_limit_deg,
    )?;
    let flood = flood_layer.self_mask();

    let flood_area = ZonalStatistics::new(params.budget).area(&flood, &config.roi, params.area_scale)?;
    let roi_area_m2 = ZonalStatistics::polygon_area(&config.roi);

    let approximate = flood_area.approximate
        || before_histogram_value.as_ref().map_or(false, |h| h.approximate)
        || after_histogram.as_ref().map_or(false, |h| h.approximate);

    let summary = FloodSummary {
        threshold,
        flood_area_km2: flood_area.km2(),
        flood_area,
        roi_area_m2,
        roi_area_km2: roi_area_m2 / 1e6,
        before_frames,
        after_frames,
        approximate,
        before_histogram: before_histogram_value,
        after_histogram,
    };

    log::info!(
        "Flood analysis complete: {:.2} km2 flooded of {:.2} km2 (threshold {:.2} dB)",
        summary.flood_area_km2,
        summary.roi_area_km2,
        summary.threshold.value
    );

    Ok(FloodReport { summary, before_filtered, after_filtered, flood, flood_layer })
}

/// Run the analysis and hand the report to `sink`
pub fn run_and_publish(
    config: &RunConfig,
    archive: &dyn SceneArchive,
    elevation: &dyn ElevationService,
    sink: &mut dyn ResultsSink,
) -> FloodResult<FloodReport> {
    let report = run(config, archive, elevation)?;
    sink.publish(&report)?;
    Ok(report)
}
