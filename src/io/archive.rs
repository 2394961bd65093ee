use crate::core::composite::{SceneCollection, SceneFilter};
use crate::core::roi::Roi;
use crate::types::{FloodResult, SceneFrame, TimeWindow};

/// Query against a scene archive
#[derive(Debug, Clone, Copy)]
pub struct SceneQuery<'a> {
    pub filter: SceneFilter,
    pub roi: &'a Roi,
    pub window: TimeWindow,
}

/// Source of calibrated backscatter frames on the analysis grid
pub trait SceneArchive {
    /// Frames matching the query's sensor filters, ROI and time window
    fn scenes(&self, query: &SceneQuery<'_>) -> FloodResult<SceneCollection>;
}

/// Archive over frames held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryArchive {
    frames: Vec<SceneFrame>,
}

impl InMemoryArchive {
    pub fn new(frames: Vec<SceneFrame>) -> Self {
        Self { frames }
    }

    pub fn push(&mut self, frame: SceneFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl SceneArchive for InMemoryArchive {
    fn scenes(&self, query: &SceneQuery<'_>) -> FloodResult<SceneCollection> {
        let collection = SceneCollection::new(self.frames.clone())
            .filter_sensor(&query.filter)
            .filter_bounds(query.roi)
            .filter_date(&query.window)
            .sorted_by_time();
        log::debug!(
            "Archive query {}: {} of {} frame(s) match",
            query.window,
            collection.len(),
            self.frames.len()
        );
        Ok(collection)
    }
}
