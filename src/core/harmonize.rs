use crate::types::{RasterCube, Reflectance, S2Error, S2Result};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::{s, ArrayViewMut3, Axis};
use num_traits::Float;
use serde::{Deserialize, Serialize};

use rayon::prelude::*;

/// Physical reflectance bands shifted by the processing baseline 04.00 change
pub const BASELINE_BANDS: [&str; 13] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B10", "B11", "B12",
];

/// Additive offset introduced by baseline 04.00 (in integer reflectance units)
pub const BASELINE_OFFSET: Reflectance = 1000.0;

/// Instant the new processing baseline took effect
pub fn baseline_cutoff() -> DateTime<Utc> {
    // UTC has no gaps or folds, so this instant is unique
    Utc.with_ymd_and_hms(2022, 1, 25, 0, 0, 0)
        .single()
        .expect("2022-01-25T00:00:00Z is a valid UTC instant")
}

/// Harmonization parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonizationParams {
    /// Acquisitions strictly after this instant carry the offset
    pub cutoff: DateTime<Utc>,
    /// Offset removed from affected bands
    pub offset: Reflectance,
    /// Bands carrying the offset (intersected with the cube's bands)
    pub affected_bands: Vec<String>,
}

impl Default for HarmonizationParams {
    fn default() -> Self {
        Self {
            cutoff: baseline_cutoff(),
            offset: BASELINE_OFFSET,
            affected_bands: BASELINE_BANDS.iter().map(|b| b.to_string()).collect(),
        }
    }
}

impl HarmonizationParams {
    pub fn validate(&self) -> S2Result<()> {
        if !self.offset.is_finite() || self.offset < 0.0 {
            return Err(S2Error::InvalidParameter(format!(
                "Harmonization offset must be finite and non-negative, got {}",
                self.offset
            )));
        }
        Ok(())
    }
}

/// Split of acquisition indices around the cutoff
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CutoffSplit {
    /// Acquisitions at or before the cutoff
    pub old: Vec<usize>,
    /// Acquisitions strictly after the cutoff
    pub new: Vec<usize>,
}

/// Floor `value` at `offset`, then remove `offset`. No-data passes through.
pub fn clamp_then_offset<T: Float>(value: T, offset: T) -> T {
    if value.is_nan() {
        value
    } else {
        value.max(offset) - offset
    }
}

/// Clamp-then-offset the `affected` bands of every slice flagged in `is_new`
fn shift_new_slices(
    cube: &mut RasterCube,
    is_new: &[bool],
    affected: &[usize],
    offset: Reflectance,
    parallel: bool,
) {
    let apply = |(t, mut slice): (usize, ArrayViewMut3<'_, Reflectance>)| {
        if !is_new[t] {
            return;
        }
        for &b in affected {
            slice
                .slice_mut(s![b, .., ..])
                .mapv_inplace(|v| clamp_then_offset(v, offset));
        }
    };

    if parallel {
        cube.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(apply);
    } else {
        cube.data.axis_iter_mut(Axis(0)).enumerate().for_each(apply);
    }
}

/// Harmonizes post-baseline acquisitions to the old processing baseline
pub struct Harmonizer {
    params: HarmonizationParams,
}

impl Default for Harmonizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Harmonizer {
    /// Create a harmonizer with the documented baseline constants
    pub fn new() -> Self {
        Self {
            params: HarmonizationParams::default(),
        }
    }

    /// Create a harmonizer with custom parameters
    pub fn with_params(params: HarmonizationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &HarmonizationParams {
        &self.params
    }

    /// Partition acquisitions: `time <= cutoff` is old, `time > cutoff` is new
    pub fn split_at_cutoff(&self, cube: &RasterCube) -> CutoffSplit {
        let mut split = CutoffSplit::default();
        for (i, time) in cube.times.iter().enumerate() {
            if *time > self.params.cutoff {
                split.new.push(i);
            } else {
                split.old.push(i);
            }
        }
        split
    }

    /// Indices of the cube's bands that carry the offset, in cube order
    pub fn affected_band_indices(&self, cube: &RasterCube) -> Vec<usize> {
        cube.bands
            .iter()
            .enumerate()
            .filter(|(_, band)| self.params.affected_bands.iter().any(|a| a == *band))
            .map(|(i, _)| i)
            .collect()
    }

    /// Harmonize a cube
    ///
    /// Old acquisitions and unaffected bands are copied unchanged. Affected
    /// bands of new acquisitions are clamped from below at the offset and then
    /// shifted down by it. Band labels, band order and time order are kept.
    pub fn harmonize(&self, cube: &RasterCube) -> S2Result<RasterCube> {
        cube.validate()?;
        self.params.validate()?;

        let split = self.split_at_cutoff(cube);
        let affected = self.affected_band_indices(cube);

        log::info!(
            "Harmonizing {} acquisitions to the old baseline ({} before/at {}, {} after)",
            cube.times.len(),
            split.old.len(),
            self.params.cutoff.to_rfc3339(),
            split.new.len()
        );
        log::debug!(
            "Offset {} applied to bands {:?}",
            self.params.offset,
            affected.iter().map(|&b| cube.bands[b].as_str()).collect::<Vec<_>>()
        );

        let mut harmonized = cube.clone();

        if affected.is_empty() {
            log::warn!("No baseline bands present in cube; returning input unchanged");
            return Ok(harmonized);
        }
        if split.new.is_empty() {
            log::debug!("No acquisitions after cutoff; nothing to harmonize");
            return Ok(harmonized);
        }

        let mut is_new = vec![false; cube.times.len()];
        for &t in &split.new {
            is_new[t] = true;
        }
        shift_new_slices(
            &mut harmonized,
            &is_new,
            &affected,
            self.params.offset,
            cfg!(feature = "parallel"),
        );

        log::info!("Harmonization completed for {} acquisitions", split.new.len());
        Ok(harmonized)
    }
}
