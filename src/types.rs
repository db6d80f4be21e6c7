use chrono::{DateTime, Utc};
use ndarray::{s, Array4, ArrayD, ArrayView2, ArrayView3, Axis, Ix4};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Reflectance cell value
pub type Reflectance = f64;

/// Dense reflectance data (time x band x y x x)
pub type CubeData = Array4<Reflectance>;

/// No-data marker for invalid or missing measurements
pub const NODATA: Reflectance = f64::NAN;

/// Nominal scale of Sentinel-2 L2A integer reflectance
pub const REFLECTANCE_SCALE: Reflectance = 10_000.0;

/// Dimension names in storage order
pub const CUBE_DIMS: [&str; 4] = ["time", "band", "y", "x"];

/// Whether a value is the no-data marker
pub fn is_nodata(value: Reflectance) -> bool {
    value.is_nan()
}

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

impl CoordinateSystem {
    pub fn epsg(&self) -> u32 {
        match self {
            CoordinateSystem::Geographic => 4326,
            CoordinateSystem::Projected { epsg } => *epsg,
        }
    }
}

impl std::fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Geospatial bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    /// Build from a STAC-style `[west, south, east, north]` array
    pub fn from_slice(values: &[f64]) -> S2Result<Self> {
        match values {
            [w, s, e, n] => Ok(Self::new(*w, *s, *e, *n)),
            // 3D bboxes carry elevation at index 2 and 5
            [w, s, _, e, n, _] => Ok(Self::new(*w, *s, *e, *n)),
            _ => Err(S2Error::InvalidParameter(format!(
                "bbox must have 4 or 6 values, got {}",
                values.len()
            ))),
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn validate(&self) -> S2Result<()> {
        let all_finite = self.to_array().iter().all(|v| v.is_finite());
        if !all_finite || self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(S2Error::InvalidParameter(format!(
                "Degenerate bounding box: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

/// Geospatial transformation parameters
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

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Projected x of the centre of column `col`
    pub fn pixel_center_x(&self, col: usize) -> f64 {
        self.top_left_x + (col as f64 + 0.5) * self.pixel_width
    }

    /// Projected y of the centre of row `row`
    pub fn pixel_center_y(&self, row: usize) -> f64 {
        self.top_left_y + (row as f64 + 0.5) * self.pixel_height
    }
}

/// Multi-band, multi-time reflectance cube
///
/// Storage order is `(time, band, y, x)`. Band labels keep the order they
/// were loaded in so channel-to-colour mapping stays stable downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterCube {
    pub times: Vec<DateTime<Utc>>,
    pub bands: Vec<String>,
    pub y: Vec<f64>,
    pub x: Vec<f64>,
    pub data: CubeData,
    pub crs: CoordinateSystem,
}

impl RasterCube {
    /// Create a cube, checking labels against the data shape
    pub fn new(
        times: Vec<DateTime<Utc>>,
        bands: Vec<String>,
        y: Vec<f64>,
        x: Vec<f64>,
        data: CubeData,
        crs: CoordinateSystem,
    ) -> S2Result<Self> {
        let cube = Self { times, bands, y, x, data, crs };
        cube.validate()?;
        Ok(cube)
    }

    /// Create a cube from an n-dimensional array that must be `(time, band, y, x)`
    pub fn from_dyn(
        data: ArrayD<Reflectance>,
        times: Vec<DateTime<Utc>>,
        bands: Vec<String>,
        y: Vec<f64>,
        x: Vec<f64>,
        crs: CoordinateSystem,
    ) -> S2Result<Self> {
        let ndim = data.ndim();
        if ndim != CUBE_DIMS.len() {
            let missing = &CUBE_DIMS[..CUBE_DIMS.len() - ndim.min(CUBE_DIMS.len())];
            return Err(S2Error::InvalidCube(format!(
                "Expected 4 dimensions (time, band, y, x), got {} (missing {:?})",
                ndim, missing
            )));
        }
        let data = data
            .into_dimensionality::<Ix4>()
            .map_err(|e| S2Error::InvalidCube(format!("Failed to reshape cube data: {}", e)))?;
        Self::new(times, bands, y, x, data, crs)
    }

    /// Check the precondition every processor relies on
    pub fn validate(&self) -> S2Result<()> {
        if self.bands.is_empty() {
            return Err(S2Error::InvalidCube("Cube has an empty band set".to_string()));
        }

        let expected = (self.times.len(), self.bands.len(), self.y.len(), self.x.len());
        if self.data.dim() != expected {
            return Err(S2Error::InvalidCube(format!(
                "Data shape {:?} does not match labels (time={}, band={}, y={}, x={})",
                self.data.dim(),
                expected.0,
                expected.1,
                expected.2,
                expected.3
            )));
        }

        let mut seen = HashSet::with_capacity(self.bands.len());
        for band in &self.bands {
            if !seen.insert(band.as_str()) {
                return Err(S2Error::InvalidCube(format!("Duplicate band label: {}", band)));
            }
        }

        Ok(())
    }

    /// (time, band, y, x) sizes
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    pub fn band_index(&self, band: &str) -> Option<usize> {
        self.bands.iter().position(|b| b == band)
    }

    pub fn time_index(&self, time: &DateTime<Utc>) -> Option<usize> {
        self.times.iter().position(|t| t == time)
    }

    /// Index of the acquisition closest to `target` (earliest wins ties)
    pub fn nearest_time_index(&self, target: &DateTime<Utc>) -> Option<usize> {
        self.times
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (**t - *target).num_milliseconds().unsigned_abs())
            .map(|(i, _)| i)
    }

    /// Earliest and latest acquisition
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.times.iter().min()?;
        let end = self.times.iter().max()?;
        Some((*start, *end))
    }

    /// All bands of one acquisition (band x y x x)
    pub fn time_slice(&self, time_index: usize) -> S2Result<ArrayView3<'_, Reflectance>> {
        if time_index >= self.times.len() {
            return Err(S2Error::InvalidParameter(format!(
                "Time index {} out of range (cube has {} acquisitions)",
                time_index,
                self.times.len()
            )));
        }
        Ok(self.data.index_axis(Axis(0), time_index))
    }

    /// One band of one acquisition (y x x)
    pub fn band_slice(&self, time_index: usize, band: &str) -> S2Result<ArrayView2<'_, Reflectance>> {
        let b = self.require_band(band)?;
        let slice = self.time_slice(time_index)?;
        Ok(slice.index_axis_move(Axis(0), b))
    }

    /// New cube restricted to `bands`, in the requested order
    pub fn select_bands(&self, bands: &[&str]) -> S2Result<RasterCube> {
        if bands.is_empty() {
            return Err(S2Error::InvalidParameter("No bands selected".to_string()));
        }
        let indices = bands
            .iter()
            .map(|b| self.require_band(b))
            .collect::<S2Result<Vec<_>>>()?;

        let data = self.data.select(Axis(1), &indices);
        RasterCube::new(
            self.times.clone(),
            bands.iter().map(|b| b.to_string()).collect(),
            self.y.clone(),
            self.x.clone(),
            data,
            self.crs,
        )
    }

    /// Replace a source no-data sentinel with [`NODATA`]
    pub fn mask_nodata(&mut self, sentinel: Reflectance) -> usize {
        let mut masked = 0;
        self.data.mapv_inplace(|v| {
            if v == sentinel {
                masked += 1;
                NODATA
            } else {
                v
            }
        });
        log::debug!("Masked {} cells equal to no-data value {}", masked, sentinel);
        masked
    }

    /// Count of cells holding the no-data marker
    pub fn nodata_count(&self) -> usize {
        self.data.iter().filter(|v| is_nodata(**v)).count()
    }

    /// Pixel values at one `(time, y, x)` position across all bands
    pub fn pixel(&self, time_index: usize, row: usize, col: usize) -> S2Result<Vec<Reflectance>> {
        let slice = self.time_slice(time_index)?;
        if row >= self.y.len() || col >= self.x.len() {
            return Err(S2Error::InvalidParameter(format!(
                "Pixel ({}, {}) outside the {}x{} grid",
                row,
                col,
                self.y.len(),
                self.x.len()
            )));
        }
        Ok(slice.slice(s![.., row, col]).to_vec())
    }

    fn require_band(&self, band: &str) -> S2Result<usize> {
        self.band_index(band).ok_or_else(|| {
            S2Error::InvalidParameter(format!(
                "Band {} not present in cube (available: {})",
                band,
                self.bands.join(", ")
            ))
        })
    }
}

/// Error types for reflectance processing
#[derive(Debug, thiserror::Error)]
pub enum S2Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cube: {0}")]
    InvalidCube(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Time parsing error: {0}")]
    TimeParse(#[from] chrono::ParseError),
}

impl S2Error {
    /// Whether the error is a caller precondition violation
    pub fn is_precondition(&self) -> bool {
        matches!(self, S2Error::InvalidCube(_) | S2Error::InvalidParameter(_))
    }
}

/// Result type for reflectance operations
pub type S2Result<T> = Result<T, S2Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::{Array, IxDyn};

    fn test_cube() -> RasterCube {
        let times = vec![
            Utc.with_ymd_and_hms(2022, 1, 10, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 2, 10, 17, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2022, 3, 10, 17, 0, 0).unwrap(),
        ];
        let bands = vec!["B02".to_string(), "B03".to_string(), "B04".to_string()];
        let data = Array4::from_shape_fn((3, 3, 2, 2), |(t, b, y, x)| {
            (t * 1000 + b * 100 + y * 10 + x) as f64
        });
        RasterCube::new(
            times,
            bands,
            vec![0.5, 1.5],
            vec![0.5, 1.5],
            data,
            CoordinateSystem::Projected { epsg: 32613 },
        )
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let cube = test_cube();
        let result = RasterCube::new(
            cube.times[..2].to_vec(),
            cube.bands.clone(),
            cube.y.clone(),
            cube.x.clone(),
            cube.data.clone(),
            cube.crs,
        );
        assert!(matches!(result, Err(S2Error::InvalidCube(_))));
    }

    #[test]
    fn test_empty_band_set_rejected() {
        let data = Array4::<f64>::zeros((1, 0, 1, 1));
        let result = RasterCube::new(
            vec![Utc::now()],
            vec![],
            vec![0.0],
            vec![0.0],
            data,
            CoordinateSystem::Geographic,
        );
        let err = result.unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("empty band set"));
    }

    #[test]
    fn test_duplicate_band_rejected() {
        let data = Array4::<f64>::zeros((1, 2, 1, 1));
        let result = RasterCube::new(
            vec![Utc::now()],
            vec!["B02".to_string(), "B02".to_string()],
            vec![0.0],
            vec![0.0],
            data,
            CoordinateSystem::Geographic,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_dyn_missing_dimension() {
        let data = Array::<f64, _>::zeros(IxDyn(&[2, 2, 2]));
        let result = RasterCube::from_dyn(
            data,
            vec![Utc::now(), Utc::now()],
            vec!["B02".to_string(), "B03".to_string()],
            vec![0.0, 1.0],
            vec![],
            CoordinateSystem::Geographic,
        );
        let message = result.unwrap_err().to_string();
        assert!(message.contains("time"), "{}", message);
    }

    #[test]
    fn test_select_bands_keeps_requested_order() {
        let cube = test_cube();
        let rgb = cube.select_bands(&["B04", "B03", "B02"]).unwrap();
        assert_eq!(rgb.bands, vec!["B04", "B03", "B02"]);
        assert_eq!(rgb.data[[1, 0, 0, 0]], cube.data[[1, 2, 0, 0]]);
        assert!(cube.select_bands(&["B8A"]).is_err());
    }

    #[test]
    fn test_nearest_time_index() {
        let cube = test_cube();
        let target = Utc.with_ymd_and_hms(2022, 2, 20, 0, 0, 0).unwrap();
        assert_eq!(cube.nearest_time_index(&target), Some(1));
        let before_all = Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(cube.nearest_time_index(&before_all), Some(0));
    }

    #[test]
    fn test_band_slice_and_mask() {
        let mut cube = test_cube();
        let slice = cube.band_slice(2, "B03").unwrap();
        assert_eq!(slice[[1, 1]], 2111.0);

        let masked = cube.mask_nodata(0.0);
        assert_eq!(masked, 1);
        assert!(is_nodata(cube.data[[0, 0, 0, 0]]));
        assert_eq!(cube.nodata_count(), 1);
    }

    #[test]
    fn test_pixel_bounds_checked() {
        let cube = test_cube();
        assert_eq!(cube.pixel(1, 0, 1).unwrap(), vec![1001.0, 1101.0, 1201.0]);

        let err = cube.pixel(0, 2, 0).unwrap_err();
        assert!(err.is_precondition());
        assert!(cube.pixel(3, 0, 0).is_err());
    }

    #[test]
    fn test_bbox_validation() {
        assert!(BoundingBox::new(-105.28, 39.97, -105.26, 39.98).validate().is_ok());
        assert!(BoundingBox::new(1.0, 0.0, 0.0, 1.0).validate().is_err());
        assert!(BoundingBox::from_slice(&[1.0, 2.0]).is_err());
    }
}
