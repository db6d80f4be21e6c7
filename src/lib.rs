//! s2cube: Sentinel-2 surface reflectance cubes
//!
//! Harmonizes acquisitions across the January 2022 processing-baseline change,
//! normalizes reflectance to [0, 1] and builds seasonal true-colour dashboards
//! from cubes loaded through a STAC catalog and GDAL.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use numpy::{IntoPyArray, PyArray4, PyReadonlyArray4};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

pub mod config;
pub mod core;
pub mod io;
pub mod types;
pub mod viz;

// Re-export main types and functions for easier access
pub use config::{DashboardConfig, PipelineConfig, SearchConfig};
pub use crate::core::{
    HarmonizationParams, Harmonizer, NormalizationParams, Normalizer, ProcessingPlan,
};
pub use io::{ArrayLoader, CatalogSearch, GdalLoader, StacApiClient, StaticCatalog};
pub use types::{
    BoundingBox, CoordinateSystem, RasterCube, Reflectance, S2Error, S2Result, NODATA,
};
pub use viz::{ColorMap, Dashboard, PngRenderer, Season};

fn to_py_err(err: S2Error) -> PyErr {
    if err.is_precondition() {
        PyErr::new::<PyValueError, _>(format!("{}", err))
    } else {
        PyErr::new::<PyRuntimeError, _>(format!("{}", err))
    }
}

fn parse_time(value: &str) -> S2Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// Wrap a numpy array in a cube with index coordinates
fn cube_from_numpy(
    data: PyReadonlyArray4<f64>,
    times: Vec<DateTime<Utc>>,
    bands: Vec<String>,
) -> S2Result<RasterCube> {
    let data = data.as_array().to_owned();
    let (_, _, rows, cols) = data.dim();
    RasterCube::new(
        times,
        bands,
        (0..rows).map(|r| r as f64).collect(),
        (0..cols).map(|c| c as f64).collect(),
        data,
        CoordinateSystem::Geographic,
    )
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(harmonize_to_old, m)?)?;
    m.add_function(wrap_pyfunction!(normalize, m)?)?;
    m.add_function(wrap_pyfunction!(season_of, m)?)?;
    Ok(())
}

/// Shift post-baseline acquisitions back onto the pre-2022 reflectance scale.
///
/// `data` is float64 `(time, band, y, x)`; `times` are RFC 3339 strings.
#[pyfunction]
fn harmonize_to_old<'py>(
    py: Python<'py>,
    data: PyReadonlyArray4<f64>,
    times: Vec<String>,
    bands: Vec<String>,
) -> PyResult<&'py PyArray4<f64>> {
    let times = times
        .iter()
        .map(|t| parse_time(t))
        .collect::<S2Result<Vec<_>>>()
        .map_err(to_py_err)?;
    let cube = cube_from_numpy(data, times, bands).map_err(to_py_err)?;

    let harmonized = py
        .allow_threads(|| Harmonizer::new().harmonize(&cube))
        .map_err(to_py_err)?;
    Ok(harmonized.data.into_pyarray(py))
}

/// Scale to [0, 1] and stretch every pixel to its band maximum
#[pyfunction]
fn normalize<'py>(
    py: Python<'py>,
    data: PyReadonlyArray4<f64>,
    bands: Vec<String>,
) -> PyResult<&'py PyArray4<f64>> {
    // Normalization ignores acquisition times
    let steps = data.shape()[0];
    let times = vec![DateTime::<Utc>::MIN_UTC; steps];
    let cube = cube_from_numpy(data, times, bands).map_err(to_py_err)?;

    let normalized = py
        .allow_threads(|| Normalizer::new().normalize(&cube))
        .map_err(to_py_err)?;
    Ok(normalized.data.into_pyarray(py))
}

/// Season name for an RFC 3339 timestamp or a `YYYY-MM-DD` date
#[pyfunction]
fn season_of(date: &str) -> PyResult<String> {
    let time = match parse_time(date) {
        Ok(time) => time,
        Err(_) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| PyErr::new::<PyValueError, _>(format!("Invalid date '{}': {}", date, e)))?
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| PyErr::new::<PyValueError, _>(format!("Invalid date '{}'", date)))?,
    };
    Ok(Season::of(&time).to_string())
}
