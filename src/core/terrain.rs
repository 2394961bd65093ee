use crate::types::{CoordinateSystem, FloodResult, GridSpec, Raster, METRES_PER_DEGREE};
use ndarray::{Array2, ArrayView2, Zip};

/// Band name of slope rasters
pub const SLOPE_BAND: &str = "slope";

/// Ground spacing (dx, dy) in metres of the pixels in `row`
fn pixel_spacing(grid: &GridSpec, row: usize) -> (f64, f64) {
    let t = &grid.transform;
    match grid.crs {
        CoordinateSystem::Projected { .. } => (t.pixel_width.abs(), t.pixel_height.abs()),
        CoordinateSystem::Geographic => {
            let (_, lat) = t.pixel_center(row, 0);
            (
                t.pixel_width.abs() * METRES_PER_DEGREE * lat.to_radians().cos(),
                t.pixel_height.abs() * METRES_PER_DEGREE,
            )
        }
    }
}

/// Compute terrain slope in degrees from the first band of an elevation raster.
///
/// Gradients use central differences; at the border and next to nodata the
/// missing neighbour is replaced by the centre pixel (one-sided difference).
/// Nodata elevation gives nodata slope.
pub fn compute_slope_degrees(dem: &Raster) -> FloodResult<Raster> {
    let grid = *dem.grid();
    let (rows, cols) = grid.shape();
    log::debug!("Computing slope from {}x{} elevation grid", rows, cols);

    let elevation = dem.band(0);
    let valid = dem.band_valid(0);

    let mut slope = Array2::<f32>::from_elem((rows, cols), f32::NAN);
    Zip::indexed(&mut slope).and(&valid).for_each(|(i, j), s, &ok| {
        if ok {
            *s = slope_at(&elevation, &valid, &grid, i, j) as f32;
        }
    });

    Raster::from_band_with_mask(grid, SLOPE_BAND, slope, valid.to_owned())
}

fn slope_at(
    elevation: &ArrayView2<'_, f32>,
    valid: &ArrayView2<'_, bool>,
    grid: &GridSpec,
    i: usize,
    j: usize,
) -> f64 {
    let (rows, cols) = elevation.dim();
    let (dx, dy) = pixel_spacing(grid, i);

    let ok = |r: usize, c: usize| valid[[r, c]];
    let left = if j > 0 && ok(i, j - 1) { j - 1 } else { j };
    let right = if j + 1 < cols && ok(i, j + 1) { j + 1 } else { j };
    let up = if i > 0 && ok(i - 1, j) { i - 1 } else { i };
    let down = if i + 1 < rows && ok(i + 1, j) { i + 1 } else { i };

    let dz_dx = if right > left {
        (elevation[[i, right]] as f64 - elevation[[i, left]] as f64) / ((right - left) as f64 * dx)
    } else {
        0.0
    };
    let dz_dy = if down > up {
        (elevation[[down, j]] as f64 - elevation[[up, j]] as f64) / ((down - up) as f64 * dy)
    } else {
        0.0
    };

    (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    fn utm_grid(n: usize) -> GridSpec {
        GridSpec::new(
            n,
            n,
            GeoTransform::north_up(500_000.0, 3_300_000.0, 10.0),
            CoordinateSystem::Projected { epsg: 32636 },
        )
    }

    #[test]
    fn test_tilted_plane_slope() {
        // 10 m rise per 10 m pixel eastwards
        let dem = Array2::from_shape_fn((5, 5), |(_, j)| j as f32 * 10.0);
        let dem = Raster::from_band(utm_grid(5), "elevation", dem).unwrap();
        let slope = compute_slope_degrees(&dem).unwrap();

        assert_eq!(slope.band_names(), &[SLOPE_BAND.to_string()]);
        for &(i, j) in &[(2, 2), (0, 0), (4, 4)] {
            assert_abs_diff_eq!(slope.value(0, i, j).unwrap(), 45.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_flat_terrain_has_zero_slope() {
        let dem = Raster::from_band(utm_grid(4), "elevation", Array2::from_elem((4, 4), 12.0)).unwrap();
        let slope = compute_slope_degrees(&dem).unwrap();
        assert!(slope.band(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_nodata_elevation_gives_nodata_slope() {
        let mut values = Array2::from_elem((3, 3), 5.0f32);
        values[[1, 1]] = f32::NAN;
        let dem = Raster::from_band(utm_grid(3), "elevation", values).unwrap();
        let slope = compute_slope_degrees(&dem).unwrap();

        assert_eq!(slope.value(0, 1, 1), None);
        assert_eq!(slope.value(0, 0, 1), Some(0.0));
    }
}
