use crate::types::{CubeData, RasterCube, Reflectance, S2Error, S2Result, NODATA, REFLECTANCE_SCALE};
use ndarray::{ArrayViewMut1, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Normalization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationParams {
    /// Divisor mapping integer reflectance onto [0, 1]
    pub scale: Reflectance,
    /// Rescale each (time, y, x) position by its band maximum
    pub band_max_stretch: bool,
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            scale: REFLECTANCE_SCALE,
            band_max_stretch: true,
        }
    }
}

impl NormalizationParams {
    pub fn validate(&self) -> S2Result<()> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(S2Error::InvalidParameter(format!(
                "Reflectance scale must be finite and positive, got {}",
                self.scale
            )));
        }
        Ok(())
    }
}

/// Maximum over the valid (finite) values of a lane
pub fn valid_max<I: IntoIterator<Item = Reflectance>>(values: I) -> Option<Reflectance> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<Reflectance>, v| Some(acc.map_or(v, |m| m.max(v))))
}

/// Stretch one band lane so its maximum becomes 1.0
///
/// A lane without a positive valid maximum is entirely no-data. Negative
/// and non-finite members become no-data as well.
fn stretch_lane(mut lane: ArrayViewMut1<'_, Reflectance>) {
    let max = valid_max(lane.iter().copied());
    match max {
        Some(max) if max > 0.0 => lane.mapv_inplace(|v| {
            if v.is_finite() && v >= 0.0 {
                v / max
            } else {
                NODATA
            }
        }),
        _ => lane.fill(NODATA),
    }
}

fn stretch_band_lanes(data: &mut CubeData, parallel: bool) {
    let lanes = data.lanes_mut(Axis(1));
    if parallel {
        Zip::from(lanes).par_for_each(stretch_lane);
    } else {
        Zip::from(lanes).for_each(stretch_lane);
    }
}

/// Converts harmonized integer reflectance into visualization-ready values
///
/// Scaling by [`NormalizationParams::scale`] is the physical step. The band
/// maximum stretch that follows is a visualization-only contrast
/// enhancement: after it, values no longer represent absolute reflectance.
pub struct Normalizer {
    params: NormalizationParams,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            params: NormalizationParams::default(),
        }
    }

    pub fn with_params(params: NormalizationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    /// Divide every value by the reflectance scale
    pub fn scale_reflectance(&self, cube: &RasterCube) -> S2Result<RasterCube> {
        cube.validate()?;
        self.params.validate()?;

        log::debug!("Scaling reflectance by 1/{}", self.params.scale);
        let scale = self.params.scale;
        let mut scaled = cube.clone();
        scaled.data.mapv_inplace(|v| v / scale);
        Ok(scaled)
    }

    /// Divide each (time, y, x) position by its maximum across bands
    pub fn stretch_to_band_max(&self, cube: &RasterCube) -> S2Result<RasterCube> {
        cube.validate()?;

        let mut stretched = cube.clone();
        stretch_band_lanes(&mut stretched.data, cfg!(feature = "parallel"));
        Ok(stretched)
    }

    /// Scale, then (when enabled) stretch to the per-position band maximum
    pub fn normalize(&self, cube: &RasterCube) -> S2Result<RasterCube> {
        let (times, bands, rows, cols) = cube.dim();
        log::info!(
            "Normalizing cube: {} acquisitions, {} bands, {}x{} pixels",
            times,
            bands,
            rows,
            cols
        );

        let scaled = self.scale_reflectance(cube)?;
        let normalized = if self.params.band_max_stretch {
            self.stretch_to_band_max(&scaled)?
        } else {
            scaled
        };

        let invalid = normalized.nodata_count();
        if invalid > 0 {
            log::warn!("{} cells carry the no-data marker after normalization", invalid);
        }
        log::info!("Normalization completed");
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoordinateSystem;
    use approx::assert_abs_diff_eq;
    use chrono::Utc;
    use ndarray::Array4;

    fn single_pixel(values: &[f64]) -> RasterCube {
        let bands: Vec<String> = (0..values.len()).map(|i| format!("B{:02}", i + 1)).collect();
        let data = Array4::from_shape_vec((1, values.len(), 1, 1), values.to_vec()).unwrap();
        RasterCube::new(
            vec![Utc::now()],
            bands,
            vec![0.0],
            vec![0.0],
            data,
            CoordinateSystem::Projected { epsg: 32613 },
        )
        .unwrap()
    }

    #[test]
    fn test_valid_max_skips_nodata() {
        assert_eq!(valid_max([1.0, f64::NAN, 3.0]), Some(3.0));
        assert_eq!(valid_max([f64::NAN]), None);
        assert_eq!(valid_max(Vec::<f64>::new()), None);
    }

    #[test]
    fn test_scale_only() {
        let normalizer = Normalizer::with_params(NormalizationParams {
            band_max_stretch: false,
            ..NormalizationParams::default()
        });
        let out = normalizer.normalize(&single_pixel(&[2500.0, 5000.0])).unwrap();
        assert_abs_diff_eq!(out.data[[0, 0, 0, 0]], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(out.data[[0, 1, 0, 0]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_stretch_max_is_one() {
        let out = Normalizer::new()
            .normalize(&single_pixel(&[1200.0, 3000.0, 600.0]))
            .unwrap();
        assert_abs_diff_eq!(out.data[[0, 0, 0, 0]], 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(out.data[[0, 1, 0, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.data[[0, 2, 0, 0]], 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_all_zero_position_is_nodata() {
        let out = Normalizer::new().normalize(&single_pixel(&[0.0, 0.0])).unwrap();
        assert!(out.data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_nodata_member_propagates() {
        let out = Normalizer::new()
            .normalize(&single_pixel(&[f64::NAN, 4000.0, 2000.0]))
            .unwrap();
        assert!(out.data[[0, 0, 0, 0]].is_nan());
        assert_abs_diff_eq!(out.data[[0, 1, 0, 0]], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.data[[0, 2, 0, 0]], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_value_is_nodata() {
        let out = Normalizer::new()
            .normalize(&single_pixel(&[-100.0, 4000.0]))
            .unwrap();
        assert!(out.data[[0, 0, 0, 0]].is_nan());
        assert_abs_diff_eq!(out.data[[0, 1, 0, 0]], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sequential_stretch_matches_parallel() {
        let mut sequential = Array4::from_shape_fn((3, 4, 6, 7), |(t, b, y, x)| {
            ((t * 613 + b * 241 + y * 37 + x * 11) % 900) as f64 / 1000.0
        });
        sequential[[1, 2, 3, 4]] = f64::NAN;
        sequential.slice_mut(ndarray::s![2, .., 0, 0]).fill(0.0);
        let mut parallel = sequential.clone();

        stretch_band_lanes(&mut sequential, false);
        stretch_band_lanes(&mut parallel, true);

        for (a, b) in sequential.iter().zip(parallel.iter()) {
            assert!(a == b || (a.is_nan() && b.is_nan()), "{} != {}", a, b);
        }
        assert!(sequential.slice(ndarray::s![2, .., 0, 0]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_zero_scale_rejected() {
        let normalizer = Normalizer::with_params(NormalizationParams {
            scale: 0.0,
            band_max_stretch: true,
        });
        assert!(normalizer.normalize(&single_pixel(&[1.0])).is_err());
    }
}
