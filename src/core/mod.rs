//! Core reflectance processing modules

pub mod harmonize;
pub mod normalize;
pub mod plan;

// Re-export main types
pub use harmonize::{
    baseline_cutoff, clamp_then_offset, CutoffSplit, HarmonizationParams, Harmonizer,
    BASELINE_BANDS, BASELINE_OFFSET,
};
pub use normalize::{valid_max, NormalizationParams, Normalizer};
pub use plan::{ChunkSpec, CubeDescriptor, DataType, ProcessingPlan, Stage};
