use approx::assert_relative_eq;
use ndarray::Array2;
use sarflood::core::histogram::{HistogramParams, HistogramReducer};
use sarflood::core::roi::Roi;
use sarflood::core::sampling::ReducerBudget;
use sarflood::core::zonal::ZonalStatistics;
use sarflood::{CoordinateSystem, GeoTransform, GridSpec, Mask, Raster};

const UTM: CoordinateSystem = CoordinateSystem::Projected { epsg: 32636 };

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn large_grid() -> GridSpec {
    GridSpec::new(1000, 1000, GeoTransform::north_up(0.0, 10_000.0, 10.0), UTM)
}

fn full_roi() -> Roi {
    Roi::from_bbox(0.0, 0.0, 10_000.0, 10_000.0, UTM).unwrap()
}

/// Western 400 columns flagged
fn west_mask() -> Mask {
    let grid = large_grid();
    Mask::new(
        grid,
        "flood",
        Array2::from_shape_fn(grid.shape(), |(_, c)| c < 400),
        Array2::from_elem(grid.shape(), true),
    )
    .unwrap()
}

#[test]
fn test_area_budget_switches_to_approximate_path() {
    init_logging();
    let mask = west_mask();
    let roi = full_roi();

    let exact = ZonalStatistics::default().area(&mask, &roi, 10.0).unwrap();
    assert!(!exact.approximate);
    assert_relative_eq!(exact.area_m2, 400_000.0 * 100.0);

    let budget = ReducerBudget { max_pixels: 10_000, ..ReducerBudget::default() };
    let coarse = ZonalStatistics::new(budget).area(&mask, &roi, 10.0).unwrap();
    println!(
        "Exact {:.0} m2, best-effort {:.0} m2 at {:.0} m",
        exact.area_m2, coarse.area_m2, coarse.scale
    );

    assert!(coarse.approximate);
    assert_relative_eq!(coarse.scale, 160.0);
    let error = (coarse.area_m2 - exact.area_m2).abs() / exact.area_m2;
    assert!(error < 0.05, "relative error {:.4}", error);
}

#[test]
fn test_histogram_budget_switches_to_approximate_path() {
    init_logging();
    let grid = large_grid();
    let values = Array2::from_shape_fn(grid.shape(), |(r, c)| {
        if c < 400 {
            -20.0
        } else {
            -6.0 + (r % 5) as f32 * 0.1
        }
    });
    let image = Raster::from_band(grid, "VV", values).unwrap();

    let params = HistogramParams { scale: 10.0, ..HistogramParams::default() };
    let budget = ReducerBudget { max_pixels: 10_000, ..ReducerBudget::default() };
    let histogram = HistogramReducer::new(params, budget)
        .histogram(&image, "VV", &full_roi())
        .unwrap();

    assert!(histogram.approximate);
    assert!(histogram.total() <= 10_000);
    assert!(histogram.total() > 0);
    assert!(histogram.scale > 10.0);
}

#[test]
fn test_narrow_strip_keeps_best_effort_estimate() {
    init_logging();
    let grid = GridSpec::new(100, 2, GeoTransform::north_up(0.0, 1000.0, 10.0), UTM);
    let roi = Roi::from_bbox(0.0, 0.0, 20.0, 1000.0, UTM).unwrap();
    let mask = Mask::new(
        grid,
        "flood",
        Array2::from_elem(grid.shape(), true),
        Array2::from_elem(grid.shape(), true),
    )
    .unwrap();
    let budget = ReducerBudget { max_pixels: 10, ..ReducerBudget::default() };

    let exact = ZonalStatistics::default().area(&mask, &roi, 10.0).unwrap();
    let coarse = ZonalStatistics::new(budget).area(&mask, &roi, 10.0).unwrap();
    println!(
        "Strip exact {:.0} m2, best-effort {:.0} m2 ({} samples at {:.0} m)",
        exact.area_m2, coarse.area_m2, coarse.samples, coarse.scale
    );

    assert_relative_eq!(exact.area_m2, 20_000.0);
    assert!(coarse.approximate);
    assert!(coarse.samples > 0);
    let error = (coarse.area_m2 - exact.area_m2).abs() / exact.area_m2;
    assert!(error < 0.05, "relative error {:.4}", error);

    let image = Raster::from_band(grid, "VV", Array2::from_elem(grid.shape(), -18.0)).unwrap();
    let params = HistogramParams { scale: 10.0, ..HistogramParams::default() };
    let histogram = HistogramReducer::new(params, budget).histogram(&image, "VV", &roi).unwrap();
    assert!(histogram.approximate);
    assert!(histogram.total() > 0);
}

#[test]
fn test_parallel_and_sequential_area_agree() {
    init_logging();
    let mask = west_mask();
    let roi = full_roi();

    let budget = |parallel| ReducerBudget { tile_rows: 16, parallel, ..ReducerBudget::default() };
    let parallel = ZonalStatistics::new(budget(true)).area(&mask, &roi, 30.0).unwrap();
    let sequential = ZonalStatistics::new(budget(false)).area(&mask, &roi, 30.0).unwrap();

    assert_eq!(parallel, sequential);
}
