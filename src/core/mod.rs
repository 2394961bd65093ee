//! Core flood mapping modules

pub mod composite;
pub mod flood_mask;
pub mod histogram;
pub mod otsu;
pub mod roi;
pub mod sampling;
pub mod speckle_filter;
pub mod terrain;
pub mod zonal;

// Re-export main types
pub use composite::{CompositeBuilder, SceneCollection, SceneFilter};
pub use flood_mask::{FloodMaskEngine, FloodMaskParams, FLOOD_BAND};
pub use histogram::{Histogram, HistogramParams, HistogramReducer};
pub use otsu::{OtsuParams, OtsuThresholdSelector, ThresholdDecision, ThresholdSource};
pub use roi::Roi;
pub use sampling::{ReducerBudget, SamplingPlan};
pub use speckle_filter::{SpeckleFilter, SpeckleFilterParams};
pub use terrain::{compute_slope_degrees, SLOPE_BAND};
pub use zonal::{AreaStatistic, ZonalStatistics};
