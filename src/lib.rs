//! sarflood: Sentinel-1 flood extent mapping
//!
//! Detects flood extent from before/after SAR backscatter composites of a
//! region: Refined Lee despeckling, Otsu thresholding, slope and permanent
//! water masking, majority cleanup and area statistics.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{AnalysisParams, BackscatterUnits, FloodRequest, RoiSource, RunConfig};
pub use pipeline::{run, run_and_publish, FloodReport, FloodSummary};
pub use types::{
    AcquisitionMode, BoundingBox, CoordinateSystem, FloodError, FloodResult, GeoTransform,
    GridSpec, Mask, OrbitDirection, Polarization, Raster, SceneFrame, TimeWindow,
};
