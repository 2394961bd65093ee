use crate::pipeline::{FloodReport, FloodSummary};
use crate::types::FloodResult;

/// Consumer of finished analysis reports (map layers, exports, ...)
pub trait ResultsSink {
    fn publish(&mut self, report: &FloodReport) -> FloodResult<()>;
}

/// Collects report summaries in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub summaries: Vec<FloodSummary>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&FloodSummary> {
        self.summaries.last()
    }
}

impl ResultsSink for MemorySink {
    fn publish(&mut self, report: &FloodReport) -> FloodResult<()> {
        log::debug!("Publishing flood summary ({:.3} km2)", report.summary.flood_area_km2);
        self.summaries.push(report.summary.clone());
        Ok(())
    }
}
