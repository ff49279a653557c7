//! Error types for cascade construction, activation, and forward passes.

use crate::config::ConfigError;
use crate::learner::LearnerError;

/// Errors raised by the cascade engine.
///
/// None of these are recovered inside the engine: a failing activation leaves
/// the state untouched and a failing forward pass is abandoned whole.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("invalid cascade configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("stage index {index} out of range for a cascade of {num_stages} stages")]
    StageOutOfRange { index: usize, num_stages: usize },

    #[error("boosting weights need a label volume while training stage-wise")]
    MissingTarget,

    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("label volume of shape {found:?} does not match stage output {expected:?}")]
    TargetShape {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("stage {stage} produced shape {found:?}, expected {expected:?}")]
    StageOutput {
        stage: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("stage output has {found} classes, cascade is configured for {expected}")]
    ClassCount { expected: usize, found: usize },

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error(transparent)]
    Learner(#[from] LearnerError),
}
