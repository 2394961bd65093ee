use crate::types::{
    BoundingBox, CoordinateSystem, FloodError, FloodResult, GeoTransform, GridSpec,
    METRES_PER_DEGREE,
};
use geo::{
    Area, BoundingRect, Contains, Coord, GeodesicArea, Geometry, Intersects, MultiPolygon, Point,
    Polygon, Rect,
};
use geojson::GeoJson;
use ndarray::Array2;

/// Region of interest: immutable (multi)polygon in the analysis CRS
#[derive(Debug, Clone)]
pub struct Roi {
    geometry: MultiPolygon<f64>,
    crs: CoordinateSystem,
    bounds: BoundingBox,
}

impl Roi {
    pub fn new(geometry: MultiPolygon<f64>, crs: CoordinateSystem) -> FloodResult<Self> {
        let rect = geometry.bounding_rect().ok_or_else(|| FloodError::InvalidInput {
            field: "roi".to_string(),
            value: "empty geometry".to_string(),
            reason: "region of interest must contain at least one polygon".to_string(),
        })?;

        if geometry.unsigned_area() <= 0.0 {
            return Err(FloodError::InvalidInput {
                field: "roi".to_string(),
                value: format!("{:?}", rect),
                reason: "region of interest has zero area".to_string(),
            });
        }

        let bounds = BoundingBox {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        };

        Ok(Self { geometry, crs, bounds })
    }

    /// Rectangular ROI from corner coordinates
    pub fn from_bbox(
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
        crs: CoordinateSystem,
    ) -> FloodResult<Self> {
        if !(min_x < max_x && min_y < max_y) {
            return Err(FloodError::InvalidInput {
                field: "roi".to_string(),
                value: format!("[{}, {}, {}, {}]", min_x, min_y, max_x, max_y),
                reason: "bounding box minimum must be below maximum".to_string(),
            });
        }
        let rect = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y });
        Self::new(MultiPolygon::new(vec![rect.to_polygon()]), crs)
    }

    /// ROI from a GeoJSON document (Geometry, Feature or FeatureCollection).
    ///
    /// GeoJSON coordinates are WGS84 longitude/latitude. Every polygonal
    /// member is kept; points and lines are ignored.
    pub fn from_geojson_str(text: &str) -> FloodResult<Self> {
        let geojson: GeoJson = text.parse()?;
        Self::from_geojson(&geojson)
    }

    pub fn from_geojson(geojson: &GeoJson) -> FloodResult<Self> {
        let collection: geo::GeometryCollection<f64> = geojson::quick_collection(geojson)?;

        let mut polygons = Vec::new();
        for geometry in collection {
            collect_polygons(geometry, &mut polygons);
        }

        log::debug!("Loaded ROI with {} polygon(s) from GeoJSON", polygons.len());
        Self::new(MultiPolygon::new(polygons), CoordinateSystem::Geographic)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn crs(&self) -> CoordinateSystem {
        self.crs
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.bounds.min_x
            && x <= self.bounds.max_x
            && y >= self.bounds.min_y
            && y <= self.bounds.max_y
            && self.geometry.contains(&Point::new(x, y))
    }

    pub fn intersects_bounds(&self, bbox: &BoundingBox) -> bool {
        if !self.bounds.intersects(bbox) {
            return false;
        }
        let rect = Rect::new(
            Coord { x: bbox.min_x, y: bbox.min_y },
            Coord { x: bbox.max_x, y: bbox.max_y },
        );
        self.geometry.0.iter().any(|polygon| polygon.intersects(&rect))
    }

    /// North-up grid covering the ROI bounds at `pixel_size_m` metres
    pub fn grid(&self, pixel_size_m: f64) -> FloodResult<GridSpec> {
        if !(pixel_size_m.is_finite() && pixel_size_m > 0.0) {
            return Err(FloodError::InvalidInput {
                field: "pixel_size_m".to_string(),
                value: pixel_size_m.to_string(),
                reason: "pixel size must be a positive number of metres".to_string(),
            });
        }

        let pixel_size = match self.crs {
            CoordinateSystem::Projected { .. } => pixel_size_m,
            CoordinateSystem::Geographic => pixel_size_m / METRES_PER_DEGREE,
        };

        let cols = ((self.bounds.max_x - self.bounds.min_x) / pixel_size).ceil().max(1.0) as usize;
        let rows = ((self.bounds.max_y - self.bounds.min_y) / pixel_size).ceil().max(1.0) as usize;

        log::debug!("ROI grid: {}x{} pixels at {} m", rows, cols, pixel_size_m);

        Ok(GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(self.bounds.min_x, self.bounds.max_y, pixel_size),
            self.crs,
        ))
    }

    /// Pixels of `grid` whose centre lies inside the ROI
    pub fn rasterize(&self, grid: &GridSpec) -> FloodResult<Array2<bool>> {
        if grid.crs != self.crs {
            return Err(FloodError::GridMismatch(format!(
                "ROI is in {:?} but grid is in {:?}",
                self.crs, grid.crs
            )));
        }

        let (rows, cols) = grid.shape();
        let row_mask = |row: usize| -> Vec<bool> {
            (0..cols)
                .map(|col| {
                    let (x, y) = grid.transform.pixel_center(row, col);
                    self.contains_point(x, y)
                })
                .collect()
        };

        #[cfg(feature = "parallel")]
        let flat: Vec<bool> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().flat_map_iter(row_mask).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let flat: Vec<bool> = (0..rows).flat_map(row_mask).collect();

        Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| FloodError::Processing(format!("Failed to build ROI mask: {}", e)))
    }

    /// ROI area in square metres (planar for projected, geodesic for geographic)
    pub fn area(&self) -> f64 {
        match self.crs {
            CoordinateSystem::Projected { .. } => self.geometry.unsigned_area(),
            CoordinateSystem::Geographic => self.geometry.geodesic_area_unsigned(),
        }
    }
}

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp.0),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::Triangle(t) => out.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out);
            }
        }
        _ => {}
    }
}
