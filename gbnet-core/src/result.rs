//! Ensemble result of one forward pass.

use crate::tensor::Variable;

/// Output of `Cascade::run_forward`.
#[derive(Debug, Clone, PartialEq)]
pub enum EnsembleResult {
    /// One combined tensor, with the boosting sample weight when one applies.
    Single {
        output: Variable,
        weight: Option<Variable>,
    },
    /// One accumulator snapshot per active stage (end-to-end with per-stage
    /// outputs on). `weights` has the same length as `outputs`.
    PerStage {
        outputs: Vec<Variable>,
        weights: Vec<Option<Variable>>,
    },
}

impl EnsembleResult {
    pub fn is_per_stage(&self) -> bool {
        matches!(self, Self::PerStage { .. })
    }

    /// All outputs in stage order; a single result is a one-element slice.
    pub fn outputs(&self) -> &[Variable] {
        match self {
            Self::Single { output, .. } => std::slice::from_ref(output),
            Self::PerStage { outputs, .. } => outputs,
        }
    }

    /// The combined output after the newest stage.
    pub fn final_output(&self) -> Option<&Variable> {
        self.outputs().last()
    }

    /// Sample weight attached to the final output, if any.
    pub fn final_weight(&self) -> Option<&Variable> {
        match self {
            Self::Single { weight, .. } => weight.as_ref(),
            Self::PerStage { weights, .. } => weights.last().and_then(Option::as_ref),
        }
    }

    pub fn len(&self) -> usize {
        self.outputs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs().is_empty()
    }

    /// Unwrap the single form.
    pub fn into_single(self) -> Option<(Variable, Option<Variable>)> {
        match self {
            Self::Single { output, weight } => Some((output, weight)),
            Self::PerStage { .. } => None,
        }
    }
}
