//! Temporal compositing of scene collections.
//!
//! Frames are overlaid in ascending acquisition order, so for every pixel
//! the latest valid sample wins.

use crate::core::roi::Roi;
use crate::types::{
    AcquisitionMode, FloodError, FloodResult, GridSpec, OrbitDirection, Polarization, Raster,
    SceneFrame, TimeWindow,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Fixed sensor filters applied to every collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFilter {
    pub mode: AcquisitionMode,
    pub polarization: Polarization,
    pub orbit_direction: OrbitDirection,
}

impl Default for SceneFilter {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::IW,
            polarization: Polarization::VV,
            orbit_direction: OrbitDirection::Ascending,
        }
    }
}

/// Ordered sequence of scene frames
#[derive(Debug, Clone, Default)]
pub struct SceneCollection {
    frames: Vec<SceneFrame>,
}

impl SceneCollection {
    pub fn new(frames: Vec<SceneFrame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SceneFrame> {
        self.frames.iter()
    }

    pub fn frames(&self) -> &[SceneFrame] {
        &self.frames
    }

    fn retain(mut self, keep: impl FnMut(&SceneFrame) -> bool) -> Self {
        self.frames.retain(keep);
        self
    }

    pub fn filter_mode(self, mode: AcquisitionMode) -> Self {
        self.retain(|f| f.mode == mode)
    }

    pub fn filter_polarization(self, polarization: Polarization) -> Self {
        self.retain(|f| f.polarizations.contains(&polarization))
    }

    pub fn filter_orbit(self, direction: OrbitDirection) -> Self {
        self.retain(|f| f.orbit_direction == direction)
    }

    /// Frames whose footprint intersects the ROI
    pub fn filter_bounds(self, roi: &Roi) -> Self {
        self.retain(|f| roi.intersects_bounds(&f.footprint))
    }

    /// Frames acquired within the half-open window
    pub fn filter_date(self, window: &TimeWindow) -> Self {
        self.retain(|f| window.contains(&f.acquisition_time))
    }

    /// Mode, polarization and orbit filters in one pass
    pub fn filter_sensor(self, filter: &SceneFilter) -> Self {
        self.filter_mode(filter.mode)
            .filter_polarization(filter.polarization)
            .filter_orbit(filter.orbit_direction)
    }

    /// Stable sort by acquisition time, ascending
    pub fn sorted_by_time(mut self) -> Self {
        self.frames.sort_by_key(|f| f.acquisition_time);
        self
    }
}

impl FromIterator<SceneFrame> for SceneCollection {
    fn from_iter<I: IntoIterator<Item = SceneFrame>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a SceneCollection {
    type Item = &'a SceneFrame;
    type IntoIter = std::slice::Iter<'a, SceneFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Reduces a scene collection to a single-band mosaic on a fixed grid
pub struct CompositeBuilder {
    grid: GridSpec,
    band: String,
}

impl CompositeBuilder {
    pub fn new(grid: GridSpec, band: &str) -> Self {
        Self { grid, band: band.to_string() }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Frames of `collection` that contribute to the composite, in time order
    pub fn select(&self, collection: &SceneCollection, window: &TimeWindow, roi: &Roi) -> SceneCollection {
        collection
            .clone()
            .filter_date(window)
            .filter_bounds(roi)
            .sorted_by_time()
    }

    /// Composite of the frames in `window` that intersect `roi`.
    ///
    /// Fails with `EmptyCollection` when no frame qualifies.
    pub fn try_build(
        &self,
        collection: &SceneCollection,
        window: &TimeWindow,
        roi: &Roi,
    ) -> FloodResult<Raster> {
        let frames = self.select(collection, window, roi);
        if frames.is_empty() {
            return Err(FloodError::EmptyCollection { window: window.to_string() });
        }

        log::info!(
            "Compositing {} frame(s) in {} ({} band)",
            frames.len(),
            window,
            self.band
        );

        let shape = self.grid.shape();
        let mut data = Array2::<f32>::from_elem(shape, f32::NAN);
        let mut valid = Array2::<bool>::from_elem(shape, false);

        for frame in &frames {
            self.grid
                .ensure_same(frame.raster.grid(), &format!("frame {}", frame.id))?;
            let index = frame.raster.require_band(&self.band)?;
            log::debug!("Overlaying frame {} ({})", frame.id, frame.acquisition_time);

            Zip::from(&mut data)
                .and(&mut valid)
                .and(frame.raster.band(index))
                .and(frame.raster.band_valid(index))
                .for_each(|d, v, &sample, &ok| {
                    if ok {
                        *d = sample;
                        *v = true;
                    }
                });
        }

        let roi_mask = roi.rasterize(&self.grid)?;
        Raster::from_band_with_mask(self.grid, &self.band, data, valid)?.clip(&roi_mask)
    }

    /// Like `try_build`, but an empty selection yields a fully-invalid raster
    pub fn build(
        &self,
        collection: &SceneCollection,
        window: &TimeWindow,
        roi: &Roi,
    ) -> FloodResult<Raster> {
        match self.try_build(collection, window, roi) {
            Err(e @ FloodError::EmptyCollection { .. }) => {
                log::warn!("{}; using an all-nodata composite", e);
                Ok(Raster::invalid(self.grid, vec![self.band.clone()]))
            }
            other => other,
        }
    }
}
