//! Run configuration: boundary request, validation and JSON loading.
//!
//! A [`FloodRequest`] carries the raw user input (four date strings, a
//! region of interest and analysis parameters). [`FloodRequest::validate`]
//! turns it into an immutable [`RunConfig`] or fails on the first malformed
//! field.

use crate::core::composite::SceneFilter;
use crate::core::flood_mask::FloodMaskParams;
use crate::core::histogram::HistogramParams;
use crate::core::otsu::OtsuParams;
use crate::core::roi::Roi;
use crate::core::sampling::ReducerBudget;
use crate::core::speckle_filter::SpeckleFilterParams;
use crate::types::{CoordinateSystem, FloodError, FloodResult, TimeWindow};
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Units of the archive's backscatter samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackscatterUnits {
    Decibel,
    /// Linear power, converted to dB before filtering
    Linear,
}

/// Numeric parameters of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub scene_filter: SceneFilter,
    /// Analysis pixel size in metres
    pub pixel_size_m: f64,
    pub backscatter_units: BackscatterUnits,
    pub speckle: SpeckleFilterParams,
    pub histogram: HistogramParams,
    pub otsu: OtsuParams,
    pub flood: FloodMaskParams,
    /// Pixels at or above this slope (degrees) are excluded
    pub slope_limit_deg: f64,
    pub budget: ReducerBudget,
    /// Scale in metres of the flood area sum
    pub area_scale: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            scene_filter: SceneFilter::default(),
            pixel_size_m: 10.0,
            backscatter_units: BackscatterUnits::Decibel,
            speckle: SpeckleFilterParams::default(),
            histogram: HistogramParams::default(),
            otsu: OtsuParams::default(),
            flood: FloodMaskParams::default(),
            slope_limit_deg: 5.0,
            budget: ReducerBudget::default(),
            area_scale: 30.0,
        }
    }
}

/// Region of interest as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiSource {
    /// GeoJSON geometry, feature or feature collection (WGS84)
    Geojson(GeoJson),
    Bbox {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
        crs: CoordinateSystem,
    },
}

impl RoiSource {
    pub fn to_roi(&self) -> FloodResult<Roi> {
        match self {
            RoiSource::Geojson(geojson) => Roi::from_geojson(geojson),
            RoiSource::Bbox { min_x, min_y, max_x, max_y, crs } => {
                Roi::from_bbox(*min_x, *min_y, *max_x, *max_y, *crs)
            }
        }
    }
}

fn default_before_start() -> String {
    "2025-09-29".to_string()
}

fn default_before_end() -> String {
    "2025-09-30".to_string()
}

fn default_after_start() -> String {
    "2025-10-05".to_string()
}

fn default_after_end() -> String {
    "2025-10-06".to_string()
}

/// Unvalidated analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodRequest {
    #[serde(default = "default_before_start")]
    pub before_start: String,
    #[serde(default = "default_before_end")]
    pub before_end: String,
    #[serde(default = "default_after_start")]
    pub after_start: String,
    #[serde(default = "default_after_end")]
    pub after_end: String,
    pub roi: RoiSource,
    #[serde(default)]
    pub params: AnalysisParams,
}

impl FloodRequest {
    /// Request with the default dates and parameters
    pub fn new(roi: RoiSource) -> Self {
        Self {
            before_start: default_before_start(),
            before_end: default_before_end(),
            after_start: default_after_start(),
            after_end: default_after_end(),
            roi,
            params: AnalysisParams::default(),
        }
    }

    pub fn validate(&self) -> FloodResult<RunConfig> {
        let before = TimeWindow::parse("before", &self.before_start, &self.before_end)?;
        let after = TimeWindow::parse("after", &self.after_start, &self.after_end)?;
        let roi = self.roi.to_roi()?;

        positive("pixel_size_m", self.params.pixel_size_m)?;
        positive("area_scale", self.params.area_scale)?;
        positive("histogram.scale", self.params.histogram.scale)?;

        log::debug!("Validated request: before {}, after {}", before, after);
        Ok(RunConfig {
            before,
            after,
            roi,
            roi_source: self.roi.clone(),
            params: self.params.clone(),
        })
    }
}

fn positive(field: &str, value: f64) -> FloodResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FloodError::InvalidInput {
            field: field.to_string(),
            value: value.to_string(),
            reason: "must be a positive number of metres".to_string(),
        })
    }
}

/// Validated, immutable configuration of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FloodRequest", into = "FloodRequest")]
pub struct RunConfig {
    pub before: TimeWindow,
    pub after: TimeWindow,
    pub roi: Roi,
    roi_source: RoiSource,
    pub params: AnalysisParams,
}

impl RunConfig {
    pub fn from_json_str(text: &str) -> FloodResult<Self> {
        let request: FloodRequest = serde_json::from_str(text)?;
        request.validate()
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FloodResult<Self> {
        log::info!("Loading run configuration from {}", path.as_ref().display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> FloodResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn roi_source(&self) -> &RoiSource {
        &self.roi_source
    }
}

impl TryFrom<FloodRequest> for RunConfig {
    type Error = FloodError;

    fn try_from(request: FloodRequest) -> FloodResult<Self> {
        request.validate()
    }
}

impl From<RunConfig> for FloodRequest {
    fn from(config: RunConfig) -> Self {
        let date = |d: chrono::NaiveDate| d.format("%Y-%m-%d").to_string();
        Self {
            before_start: date(config.before.start),
            before_end: date(config.before.end),
            after_start: date(config.after.start),
            after_end: date(config.after.end),
            roi: config.roi_source,
            params: config.params,
        }
    }
}
