use crate::core::terrain::compute_slope_degrees;
use crate::types::{FloodResult, GridSpec, Raster};
use ndarray::Array2;

/// Band name of elevation rasters
pub const ELEVATION_BAND: &str = "elevation";

/// Source of terrain data on the analysis grid
pub trait ElevationService {
    /// Elevation in metres on `grid`
    fn elevation(&self, grid: &GridSpec) -> FloodResult<Raster>;

    /// Slope in degrees on `grid`
    fn slope(&self, grid: &GridSpec) -> FloodResult<Raster> {
        compute_slope_degrees(&self.elevation(grid)?)
    }
}

/// Elevation model held in memory on a fixed grid
#[derive(Debug, Clone)]
pub struct InMemoryElevation {
    dem: Raster,
}

impl InMemoryElevation {
    pub fn new(dem: Raster) -> Self {
        Self { dem }
    }

    /// Constant-height terrain on `grid`
    pub fn flat(grid: GridSpec, height: f32) -> FloodResult<Self> {
        let dem = Raster::from_band(grid, ELEVATION_BAND, Array2::from_elem(grid.shape(), height))?;
        Ok(Self::new(dem))
    }
}

impl ElevationService for InMemoryElevation {
    fn elevation(&self, grid: &GridSpec) -> FloodResult<Raster> {
        grid.ensure_same(self.dem.grid(), "elevation model")?;
        Ok(self.dem.clone())
    }
}

#[cfg(feature = "gdal")]
pub use self::gdal_reader::GdalDemReader;

#[cfg(feature = "gdal")]
mod gdal_reader {
    use super::{ElevationService, ELEVATION_BAND};
    use crate::types::{FloodError, FloodResult, GeoTransform, GridSpec, Raster};
    use gdal::Dataset;
    use ndarray::Array2;
    use std::path::{Path, PathBuf};

    /// Digital elevation model read from a GDAL raster (GeoTIFF, HGT, ...).
    ///
    /// The DEM must be in the analysis CRS. It is sampled nearest-neighbour
    /// at each target pixel centre; pixels outside the DEM are nodata.
    pub struct GdalDemReader {
        path: PathBuf,
    }

    impl GdalDemReader {
        pub fn new<P: AsRef<Path>>(path: P) -> Self {
            Self { path: path.as_ref().to_path_buf() }
        }

        /// Read the first band of the DEM with its geotransform
        pub fn read_dem(&self) -> FloodResult<(Array2<f32>, Array2<bool>, GeoTransform)> {
            log::info!("Reading DEM from: {}", self.path.display());

            let dataset = Dataset::open(&self.path)?;
            let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
            let (width, height) = dataset.raster_size();
            log::debug!("DEM size: {}x{}, geotransform: {:?}", width, height, geo_transform);

            let rasterband = dataset.rasterband(1)?;
            let no_data = rasterband.no_data_value();
            let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

            let dem = Array2::from_shape_vec((height, width), band_data.data)
                .map_err(|e| FloodError::Processing(format!("Failed to reshape DEM data: {}", e)))?;
            let valid = dem.mapv(|v| {
                v.is_finite() && no_data.map_or(true, |nd| (v as f64 - nd).abs() > f64::EPSILON) && v > -32000.0
            });

            Ok((dem, valid, geo_transform))
        }
    }

    impl ElevationService for GdalDemReader {
        fn elevation(&self, grid: &GridSpec) -> FloodResult<Raster> {
            let (dem, valid, gt) = self.read_dem()?;
            let (src_rows, src_cols) = dem.dim();

            let mut out = Array2::<f32>::from_elem(grid.shape(), f32::NAN);
            let mut out_valid = Array2::from_elem(grid.shape(), false);
            for ((r, c), v) in out.indexed_iter_mut() {
                let (x, y) = grid.transform.pixel_center(r, c);
                let col = ((x - gt.top_left_x) / gt.pixel_width).floor();
                let row = ((y - gt.top_left_y) / gt.pixel_height).floor();
                if col < 0.0 || row < 0.0 {
                    continue;
                }
                let (row, col) = (row as usize, col as usize);
                if row < src_rows && col < src_cols && valid[[row, col]] {
                    *v = dem[[row, col]];
                    out_valid[[r, c]] = true;
                }
            }

            log::debug!(
                "Sampled {} of {} DEM pixels onto the analysis grid",
                out_valid.iter().filter(|&&ok| ok).count(),
                grid.pixel_count()
            );
            Raster::from_band_with_mask(*grid, ELEVATION_BAND, out, out_valid)
        }
    }
}
