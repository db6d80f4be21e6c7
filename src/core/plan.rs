//! Deferred processing plans
//!
//! A [`ProcessingPlan`] composes stages over a [`CubeDescriptor`] without
//! touching pixel data. [`ProcessingPlan::execute`] is the single blocking
//! step that materializes the result.

use crate::core::harmonize::{HarmonizationParams, Harmonizer};
use crate::core::normalize::{NormalizationParams, Normalizer};
use crate::types::{RasterCube, S2Error, S2Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Element type of cube values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Integer-encoded reflectance as delivered by the catalog
    UInt16,
    /// Floating point values after any arithmetic stage
    Float64,
}

/// Chunking of a cube along its axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub time: usize,
    pub band: usize,
    pub y: usize,
    pub x: usize,
}

impl ChunkSpec {
    /// One chunk per acquisition, holding every band and the full extent
    pub fn per_acquisition(shape: (usize, usize, usize, usize)) -> Self {
        Self {
            time: 1,
            band: shape.1.max(1),
            y: shape.2.max(1),
            x: shape.3.max(1),
        }
    }

    /// Number of chunks covering `shape`
    pub fn chunk_count(&self, shape: (usize, usize, usize, usize)) -> usize {
        let per_axis = |len: usize, chunk: usize| (len + chunk.max(1) - 1) / chunk.max(1);
        per_axis(shape.0, self.time)
            * per_axis(shape.1, self.band)
            * per_axis(shape.2, self.y)
            * per_axis(shape.3, self.x)
    }
}

/// Shape and label metadata of a cube, without pixel data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeDescriptor {
    pub times: Vec<DateTime<Utc>>,
    pub bands: Vec<String>,
    pub rows: usize,
    pub cols: usize,
    pub dtype: DataType,
    pub chunks: ChunkSpec,
}

impl CubeDescriptor {
    /// Describe an already materialized cube
    pub fn of(cube: &RasterCube, dtype: DataType) -> Self {
        let shape = cube.dim();
        Self {
            times: cube.times.clone(),
            bands: cube.bands.clone(),
            rows: shape.2,
            cols: shape.3,
            dtype,
            chunks: ChunkSpec::per_acquisition(shape),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        (self.times.len(), self.bands.len(), self.rows, self.cols)
    }

    pub fn validate(&self) -> S2Result<()> {
        if self.bands.is_empty() {
            return Err(S2Error::InvalidCube(
                "Descriptor has an empty band set".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `cube` has exactly the labels and extent this descriptor promises
    pub fn matches(&self, cube: &RasterCube) -> bool {
        cube.times == self.times
            && cube.bands == self.bands
            && cube.y.len() == self.rows
            && cube.x.len() == self.cols
    }
}

/// One deferred transformation
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Harmonize(HarmonizationParams),
    Normalize(NormalizationParams),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Harmonize(_) => "harmonize",
            Stage::Normalize(_) => "normalize",
        }
    }

    fn run(&self, cube: &RasterCube) -> S2Result<RasterCube> {
        match self {
            Stage::Harmonize(params) => Harmonizer::with_params(params.clone()).harmonize(cube),
            Stage::Normalize(params) => Normalizer::with_params(params.clone()).normalize(cube),
        }
    }
}

/// An ordered list of stages over a described cube
#[derive(Debug, Clone)]
pub struct ProcessingPlan {
    source: CubeDescriptor,
    stages: Vec<Stage>,
}

impl ProcessingPlan {
    pub fn new(source: CubeDescriptor) -> Self {
        Self {
            source,
            stages: Vec::new(),
        }
    }

    pub fn harmonize(mut self, params: HarmonizationParams) -> Self {
        self.stages.push(Stage::Harmonize(params));
        self
    }

    pub fn normalize(mut self, params: NormalizationParams) -> Self {
        self.stages.push(Stage::Normalize(params));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn source(&self) -> &CubeDescriptor {
        &self.source
    }

    /// Check every stage's parameters without reading data
    pub fn validate(&self) -> S2Result<()> {
        self.source.validate()?;
        for stage in &self.stages {
            match stage {
                Stage::Harmonize(params) => params.validate()?,
                Stage::Normalize(params) => params.validate()?,
            }
        }
        Ok(())
    }

    /// Descriptor of the result; labels are never altered by any stage
    pub fn output_descriptor(&self) -> CubeDescriptor {
        let mut out = self.source.clone();
        if !self.stages.is_empty() {
            out.dtype = DataType::Float64;
        }
        out
    }

    /// Materialize the plan over `cube`
    pub fn execute(&self, cube: &RasterCube) -> S2Result<RasterCube> {
        self.validate()?;
        cube.validate()?;
        if !self.source.matches(cube) {
            return Err(S2Error::InvalidCube(format!(
                "Cube {:?} does not match plan source {:?}",
                cube.dim(),
                self.source.shape()
            )));
        }

        log::info!(
            "Executing plan with {} stages over {} chunks",
            self.stages.len(),
            self.source.chunks.chunk_count(self.source.shape())
        );

        let mut current = cube.clone();
        for stage in &self.stages {
            let start = Instant::now();
            current = stage.run(&current)?;
            log::debug!(
                "Stage {} finished in {:.3} s",
                stage.name(),
                start.elapsed().as_secs_f64()
            );
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoordinateSystem;
    use chrono::TimeZone;
    use ndarray::Array4;

    fn raw_cube() -> RasterCube {
        RasterCube::new(
            vec![
                Utc.with_ymd_and_hms(2022, 1, 5, 17, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2022, 3, 5, 17, 0, 0).unwrap(),
            ],
            vec!["B02".to_string(), "B03".to_string()],
            vec![0.0, 1.0, 2.0],
            vec![0.0, 1.0],
            Array4::from_elem((2, 2, 3, 2), 2000.0),
            CoordinateSystem::Projected { epsg: 32613 },
        )
        .unwrap()
    }

    #[test]
    fn test_chunk_count() {
        let spec = ChunkSpec { time: 1, band: 2, y: 2, x: 2 };
        assert_eq!(spec.chunk_count((3, 4, 5, 4)), 3 * 2 * 3 * 2);
        let per_acq = ChunkSpec::per_acquisition((7, 4, 100, 100));
        assert_eq!(per_acq.chunk_count((7, 4, 100, 100)), 7);
    }

    #[test]
    fn test_plan_matches_eager_pipeline() {
        let cube = raw_cube();
        let plan = ProcessingPlan::new(CubeDescriptor::of(&cube, DataType::UInt16))
            .harmonize(HarmonizationParams::default())
            .normalize(NormalizationParams::default());

        let planned = plan.execute(&cube).unwrap();
        let harmonized = Harmonizer::new().harmonize(&cube).unwrap();
        let eager = Normalizer::new().normalize(&harmonized).unwrap();

        assert_eq!(planned, eager);
        assert_eq!(plan.output_descriptor().dtype, DataType::Float64);
        assert_eq!(plan.output_descriptor().bands, cube.bands);
    }

    #[test]
    fn test_plan_rejects_mismatched_cube() {
        let cube = raw_cube();
        let other = cube.select_bands(&["B03"]).unwrap();
        let plan = ProcessingPlan::new(CubeDescriptor::of(&cube, DataType::UInt16));
        assert!(plan.execute(&other).is_err());
    }

    #[test]
    fn test_plan_validates_before_execution() {
        let cube = raw_cube();
        let plan = ProcessingPlan::new(CubeDescriptor::of(&cube, DataType::UInt16)).normalize(
            NormalizationParams {
                scale: -1.0,
                band_max_stretch: true,
            },
        );
        assert!(plan.validate().is_err());
    }
}
