//! Python bindings for the core numeric operations

use crate::core::flood_mask::FloodMaskEngine;
use crate::core::histogram::Histogram;
use crate::core::otsu::OtsuThresholdSelector;
use crate::core::speckle_filter::SpeckleFilter;
use crate::types::{CoordinateSystem, FloodError, GeoTransform, GridSpec, Raster};
use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(e: FloodError) -> PyErr {
    match e {
        FloodError::InvalidInput { .. } | FloodError::GridMismatch(_) | FloodError::MissingBand { .. } => {
            PyErr::new::<PyValueError, _>(format!("{}", e))
        }
        _ => PyErr::new::<PyRuntimeError, _>(format!("{}", e)),
    }
}

/// Unit pixel grid for arrays without georeferencing
fn pixel_grid(rows: usize, cols: usize) -> GridSpec {
    GridSpec::new(
        rows,
        cols,
        GeoTransform::north_up(0.0, rows as f64, 1.0),
        CoordinateSystem::Projected { epsg: 0 },
    )
}

fn raster(name: &str, array: PyReadonlyArray2<'_, f32>) -> PyResult<Raster> {
    let view = array.as_array();
    let (rows, cols) = view.dim();
    Raster::from_band(pixel_grid(rows, cols), name, view.to_owned()).map_err(to_py_err)
}

/// Refined Lee speckle filter; NaN marks nodata
#[pyfunction]
fn refined_lee<'py>(py: Python<'py>, image: PyReadonlyArray2<'_, f32>) -> PyResult<&'py PyArray2<f32>> {
    let input = raster("VV", image)?;
    let filtered = SpeckleFilter::new().apply_filter(&input).map_err(to_py_err)?;
    Ok(filtered.band(0).to_owned().into_pyarray(py))
}

/// Otsu threshold of a histogram given as bucket means and counts
#[pyfunction]
fn otsu_threshold(bucket_means: Vec<f64>, counts: Vec<u64>) -> PyResult<f64> {
    let histogram = Histogram::from_buckets("VV", bucket_means, counts).map_err(to_py_err)?;
    OtsuThresholdSelector::default().select(&histogram).map_err(to_py_err)
}

/// {0, 1} flood layer (NaN where nodata) from filtered dB arrays and slope
#[pyfunction]
#[pyo3(signature = (before, after, slope, threshold, slope_limit_deg = 5.0))]
fn flood_mask<'py>(
    py: Python<'py>,
    before: PyReadonlyArray2<'_, f32>,
    after: PyReadonlyArray2<'_, f32>,
    slope: PyReadonlyArray2<'_, f32>,
    threshold: f64,
    slope_limit_deg: f64,
) -> PyResult<&'py PyArray2<f32>> {
    let before = raster("VV", before)?;
    let after = raster("VV", after)?;
    let slope = raster("slope", slope)?;

    let layer = FloodMaskEngine::default()
        .derive_unmasked(&before, &after, threshold, &slope, slope_limit_deg)
        .and_then(|mask| mask.to_raster())
        .map_err(to_py_err)?;
    Ok(layer.band(0).to_owned().into_pyarray(py))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(refined_lee, m)?)?;
    m.add_function(wrap_pyfunction!(otsu_threshold, m)?)?;
    m.add_function(wrap_pyfunction!(flood_mask, m)?)?;
    Ok(())
}
