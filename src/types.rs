use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metres per degree of longitude at the equator (WGS84 semi-major axis)
pub const METRES_PER_DEGREE: f64 = 111_319.490_793;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (longitude, latitude in degrees)
    Geographic,
    /// Projected coordinates in metres (e.g., UTM)
    Projected { epsg: u32 },
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(FloodError::InvalidInput {
                field: "polarization".to_string(),
                value: s.to_string(),
                reason: "expected one of VV, VH, HV, HH".to_string(),
            }),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Orbit pass direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitDirection {
    Ascending,
    Descending,
}

/// Geospatial bounding box in grid CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// Pixel grid shared by every raster of one analysis run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub crs: CoordinateSystem,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform, crs: CoordinateSystem) -> Self {
        Self { rows, cols, transform, crs }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Nominal pixel size in metres
    pub fn nominal_scale(&self) -> f64 {
        match self.crs {
            CoordinateSystem::Projected { .. } => self.transform.pixel_width.abs(),
            CoordinateSystem::Geographic => self.transform.pixel_width.abs() * METRES_PER_DEGREE,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let x0 = t.top_left_x;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y0 = t.top_left_y;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    pub fn ensure_same(&self, other: &GridSpec, context: &str) -> FloodResult<()> {
        if self != other {
            return Err(FloodError::GridMismatch(format!(
                "{}: {}x{} grid does not match {}x{} grid",
                context, other.rows, other.cols, self.rows, self.cols
            )));
        }
        Ok(())
    }
}

/// Multi-band raster with named bands and an explicit validity mask.
///
/// `data` and `valid` are laid out (band, row, col). A `false` entry in
/// `valid` marks nodata; the sample stored underneath is NaN.
#[derive(Debug, Clone)]
pub struct Raster {
    band_names: Vec<String>,
    data: Array3<f32>,
    valid: Array3<bool>,
    grid: GridSpec,
}

impl Raster {
    pub fn new(
        grid: GridSpec,
        band_names: Vec<String>,
        data: Array3<f32>,
        valid: Array3<bool>,
    ) -> FloodResult<Self> {
        let expected = (band_names.len(), grid.rows, grid.cols);
        if data.dim() != expected || valid.dim() != expected {
            return Err(FloodError::GridMismatch(format!(
                "raster arrays {:?}/{:?} do not match {} bands on a {}x{} grid",
                data.dim(),
                valid.dim(),
                band_names.len(),
                grid.rows,
                grid.cols
            )));
        }

        let mut data = data;
        ndarray::Zip::from(&mut data).and(&valid).for_each(|v, &ok| {
            if !ok {
                *v = f32::NAN;
            }
        });

        Ok(Self { band_names, data, valid, grid })
    }

    /// Single-band raster; non-finite samples become nodata
    pub fn from_band(grid: GridSpec, name: &str, band: Array2<f32>) -> FloodResult<Self> {
        let valid = band.mapv(|v| v.is_finite());
        Self::from_band_with_mask(grid, name, band, valid)
    }

    pub fn from_band_with_mask(
        grid: GridSpec,
        name: &str,
        band: Array2<f32>,
        valid: Array2<bool>,
    ) -> FloodResult<Self> {
        let data = band.insert_axis(Axis(0));
        let valid = valid.insert_axis(Axis(0));
        Self::new(grid, vec![name.to_string()], data, valid)
    }

    /// Fully-invalid raster with the given bands
    pub fn invalid(grid: GridSpec, band_names: Vec<String>) -> Self {
        let dims = (band_names.len(), grid.rows, grid.cols);
        Self {
            band_names,
            data: Array3::from_elem(dims, f32::NAN),
            valid: Array3::from_elem(dims, false),
            grid,
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn band_names(&self) -> &[String] {
        &self.band_names
    }

    pub fn band_count(&self) -> usize {
        self.band_names.len()
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.band_names.iter().position(|b| b == name)
    }

    pub fn require_band(&self, name: &str) -> FloodResult<usize> {
        self.band_index(name)
            .ok_or_else(|| FloodError::MissingBand { band: name.to_string() })
    }

    pub fn band(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.slice(s![index, .., ..])
    }

    pub fn band_valid(&self, index: usize) -> ArrayView2<'_, bool> {
        self.valid.slice(s![index, .., ..])
    }

    pub fn value(&self, band: usize, row: usize, col: usize) -> Option<f32> {
        if self.valid[[band, row, col]] {
            Some(self.data[[band, row, col]])
        } else {
            None
        }
    }

    pub fn valid_count(&self, band: usize) -> usize {
        self.band_valid(band).iter().filter(|&&ok| ok).count()
    }

    /// Copy of a single band as its own raster
    pub fn select(&self, name: &str) -> FloodResult<Raster> {
        let index = self.require_band(name)?;
        Raster::from_band_with_mask(
            self.grid,
            name,
            self.band(index).to_owned(),
            self.band_valid(index).to_owned(),
        )
    }

    /// Restrict validity to pixels where `mask` is true
    pub fn clip(&self, mask: &Array2<bool>) -> FloodResult<Raster> {
        if mask.dim() != self.grid.shape() {
            return Err(FloodError::GridMismatch(format!(
                "clip mask {:?} does not match raster {:?}",
                mask.dim(),
                self.grid.shape()
            )));
        }
        let mut valid = self.valid.clone();
        for mut band in valid.outer_iter_mut() {
            ndarray::Zip::from(&mut band).and(mask).for_each(|v, &m| *v = *v && m);
        }
        Raster::new(self.grid, self.band_names.clone(), self.data.clone(), valid)
    }

    /// Convert linear power values to decibels (10 * log10).
    ///
    /// Non-positive samples have no dB value and become nodata.
    pub fn to_db(&self) -> FloodResult<Raster> {
        let data = self.data.mapv(|v| if v > 0.0 { 10.0 * v.log10() } else { f32::NAN });
        let valid = ndarray::Zip::from(&self.valid)
            .and(&data)
            .map_collect(|&ok, &v| ok && v.is_finite());
        Raster::new(self.grid, self.band_names.clone(), data, valid)
    }
}

/// Boolean raster with nodata, on the same grid as its source
#[derive(Debug, Clone)]
pub struct Mask {
    pub band_name: String,
    pub data: Array2<bool>,
    pub valid: Array2<bool>,
    pub grid: GridSpec,
}

impl Mask {
    pub fn new(
        grid: GridSpec,
        band_name: &str,
        data: Array2<bool>,
        valid: Array2<bool>,
    ) -> FloodResult<Self> {
        if data.dim() != grid.shape() || valid.dim() != grid.shape() {
            return Err(FloodError::GridMismatch(format!(
                "mask arrays {:?}/{:?} do not match {:?} grid",
                data.dim(),
                valid.dim(),
                grid.shape()
            )));
        }
        Ok(Self { band_name: band_name.to_string(), data, valid, grid })
    }

    /// `band < threshold`; nodata stays nodata
    pub fn less_than(raster: &Raster, band: &str, threshold: f64) -> FloodResult<Mask> {
        let index = raster.require_band(band)?;
        let valid = raster.band_valid(index).to_owned();
        let data = ndarray::Zip::from(raster.band(index))
            .and(&valid)
            .map_collect(|&v, &ok| ok && (v as f64) < threshold);
        Mask::new(*raster.grid(), band, data, valid)
    }

    pub fn and(&self, other: &Mask) -> FloodResult<Mask> {
        self.grid.ensure_same(&other.grid, "mask and")?;
        let valid = &self.valid & &other.valid;
        let data = ndarray::Zip::from(&self.data)
            .and(&other.data)
            .and(&valid)
            .map_collect(|&a, &b, &ok| ok && a && b);
        Mask::new(self.grid, &self.band_name, data, valid)
    }

    pub fn not(&self) -> Mask {
        let data = ndarray::Zip::from(&self.data)
            .and(&self.valid)
            .map_collect(|&v, &ok| ok && !v);
        Mask {
            band_name: self.band_name.clone(),
            data,
            valid: self.valid.clone(),
            grid: self.grid,
        }
    }

    /// Invalidate pixels where `other` is false or nodata
    pub fn update_mask(&self, other: &Mask) -> FloodResult<Mask> {
        self.grid.ensure_same(&other.grid, "update mask")?;
        let valid = ndarray::Zip::from(&self.valid)
            .and(&other.valid)
            .and(&other.data)
            .map_collect(|&a, &b, &keep| a && b && keep);
        let data = &self.data & &valid;
        Mask::new(self.grid, &self.band_name, data, valid)
    }

    /// Invalidate every `false` pixel, leaving a sparse layer of `true` pixels
    pub fn self_mask(&self) -> Mask {
        let valid = &self.valid & &self.data;
        Mask {
            band_name: self.band_name.clone(),
            data: valid.clone(),
            valid,
            grid: self.grid,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&ok| ok).count()
    }

    pub fn true_count(&self) -> usize {
        ndarray::Zip::from(&self.data)
            .and(&self.valid)
            .fold(0, |acc, &v, &ok| if ok && v { acc + 1 } else { acc })
    }

    /// {0, 1} raster, NaN where invalid
    pub fn to_raster(&self) -> FloodResult<Raster> {
        let band = ndarray::Zip::from(&self.data)
            .and(&self.valid)
            .map_collect(|&v, &ok| if !ok { f32::NAN } else if v { 1.0 } else { 0.0 });
        Raster::from_band_with_mask(self.grid, &self.band_name, band, self.valid.clone())
    }
}

/// Half-open date interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> FloodResult<Self> {
        if start >= end {
            return Err(FloodError::InvalidInput {
                field: "time window".to_string(),
                value: format!("{}..{}", start, end),
                reason: "start date must be before end date".to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` strings; `field` names the input for error reports
    pub fn parse(field: &str, start: &str, end: &str) -> FloodResult<Self> {
        let start = parse_date(&format!("{} start", field), start)?;
        let end = parse_date(&format!("{} end", field), end)?;
        Self::new(start, end).map_err(|_| FloodError::InvalidInput {
            field: field.to_string(),
            value: format!("{}..{}", start, end),
            reason: "start date must be before end date".to_string(),
        })
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        let start = midnight_utc(self.start);
        let end = midnight_utc(self.end);
        *time >= start && *time < end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

fn parse_date(field: &str, value: &str) -> FloodResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| FloodError::InvalidInput {
        field: field.to_string(),
        value: value.to_string(),
        reason: format!("expected YYYY-MM-DD ({})", e),
    })
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// One acquisition of the scene archive, already on the analysis grid
#[derive(Debug, Clone)]
pub struct SceneFrame {
    pub id: String,
    pub acquisition_time: DateTime<Utc>,
    pub mode: AcquisitionMode,
    pub polarizations: Vec<Polarization>,
    pub orbit_direction: OrbitDirection,
    pub footprint: BoundingBox,
    pub raster: Arc<Raster>,
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No scenes match time window {window}")]
    EmptyCollection { window: String },

    #[error("Histogram has no entry for band {band}")]
    HistogramMissingBand { band: String },

    #[error("Degenerate histogram: {0}")]
    DegenerateHistogram(String),

    #[error("Sample budget exceeded: {requested} samples requested, budget is {budget}")]
    ResourceLimitExceeded { requested: usize, budget: usize },

    #[error("Invalid input for {field} ({value}): {reason}")]
    InvalidInput {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Band not found: {band}")]
    MissingBand { band: String },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;
