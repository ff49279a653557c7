//! Base learner capability: the only thing the cascade knows about a stage.
//!
//! A learner maps a `[batch, channels, spatial...]` volume to per-class logits
//! of the same spatial extent, can be toggled between train and eval mode, and
//! exposes its parameters so the controller can reset them when a stage is
//! (re)started. Architectures live outside this crate; `learners` holds two
//! small reference implementations.

use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

/// Train/eval toggle of a learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearnerMode {
    Train,
    Eval,
}

/// Kind of layer a parameter belongs to. Only convolutional kinds are reset
/// on stage reinitialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Conv,
    ConvTranspose,
    Norm,
    Activation,
    Linear,
    Other,
}

impl LayerKind {
    pub fn is_convolutional(self) -> bool {
        matches!(self, Self::Conv | Self::ConvTranspose)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamRole {
    Weight,
    Bias,
}

/// One learnable tensor of a learner.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Layer name, e.g. `"ec0.conv"`. Parameters of one layer share it.
    pub layer: String,
    pub kind: LayerKind,
    pub role: ParamRole,
    pub value: ArrayD<f32>,
}

impl Parameter {
    pub fn new(layer: impl Into<String>, kind: LayerKind, role: ParamRole, value: ArrayD<f32>) -> Self {
        Self {
            layer: layer.into(),
            kind,
            role,
            value,
        }
    }
}

/// Errors a learner may raise from `forward`. The cascade surfaces them unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LearnerError {
    #[error("{learner}: expected {expected} input channels, got {found}")]
    ChannelMismatch {
        learner: String,
        expected: usize,
        found: usize,
    },

    #[error("{learner}: expected input of rank {expected}, got rank {found}")]
    RankMismatch {
        learner: String,
        expected: usize,
        found: usize,
    },

    #[error("{learner}: {message}")]
    Other { learner: String, message: String },
}

/// Trait for cascade stages.
///
/// # Contract
/// - `forward` is a pure function of the input and the current parameters;
///   the cascade decides gradient history, not the learner.
/// - Output is `[batch, num_classes, spatial...]` with the input's batch and
///   spatial extent.
/// - Only the controller calls `set_mode`.
pub trait BaseLearner: Send + Sync {
    /// Human-readable name (e.g., "pointwise_conv").
    fn name(&self) -> &str;

    fn forward(&self, input: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>, LearnerError>;

    fn set_mode(&mut self, mode: LearnerMode);

    fn mode(&self) -> LearnerMode;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;
}
