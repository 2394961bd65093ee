//! Interfaces to the scene archive, elevation data and result consumers

pub mod archive;
pub mod elevation;
pub mod sink;

pub use archive::{InMemoryArchive, SceneArchive, SceneQuery};
#[cfg(feature = "gdal")]
pub use elevation::GdalDemReader;
pub use elevation::{ElevationService, InMemoryElevation};
pub use sink::{MemorySink, ResultsSink};
