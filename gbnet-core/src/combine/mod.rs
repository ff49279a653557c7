//! Combination strategies: how stage outputs fold into the ensemble result.
//!
//! A strategy is started from stage 0's output, receives every later active
//! stage's output in order, exposes the tensor the auto-context feeder reads,
//! and finally yields `(output, sample weight)`.
//!
//! - [`ResidualSum`]: scaled running sum.
//! - [`AdaBoost`]: multi-class boosting with per-voxel sample weights.
//! - [`start_strategy`]: picks the one selected by the cascade's mode.

pub mod adaboost;
pub mod residual;

pub use adaboost::{boost_step, AdaBoost, BoostStep};
pub use residual::ResidualSum;

use ndarray::ArrayD;

use crate::config::CombinationMode;
use crate::error::CascadeError;
use crate::state::{CascadeState, StageContext};
use crate::tensor::Variable;

/// Trait for the per-pass accumulator of a combination mode.
///
/// One value lives for exactly one forward pass.
pub trait CombinationStrategy: Send {
    /// Human-readable name (e.g., "residual").
    fn name(&self) -> &str;

    /// Fold the output of stage `ctx.stage_index` (≥ 1) into the accumulator.
    /// The output is consumed.
    fn fold(&mut self, output: Variable, ctx: &StageContext) -> Result<(), CascadeError>;

    /// Tensor whose softmax the next stage sees as context.
    fn context(&self) -> &Variable;

    /// Entry for per-stage results after the latest stage, with its weight.
    fn snapshot(&self) -> (Variable, Option<Variable>);

    /// Final `(output, sample weight)` of the pass.
    fn finish(self: Box<Self>) -> (Variable, Option<Variable>);
}

/// Start the strategy selected by `state` from stage 0's output.
///
/// `target` is the label volume; AdaBoost needs it when training stage-wise.
pub fn start_strategy(
    state: &CascadeState,
    target: Option<&ArrayD<usize>>,
    first_output: Variable,
) -> Result<Box<dyn CombinationStrategy>, CascadeError> {
    let ctx = state.stage_context(0);
    match state.combination_mode() {
        CombinationMode::Residual => Ok(Box::new(ResidualSum::new(
            state.residual_scale(),
            first_output,
        ))),
        CombinationMode::AdaBoost => Ok(Box::new(AdaBoost::start(
            state,
            target,
            first_output,
            &ctx,
        )?)),
    }
}
