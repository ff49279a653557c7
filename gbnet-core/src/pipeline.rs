//! Forward pipeline: one pass over the active stages.
//!
//! 1. Stage 0 runs on the raw input.
//! 2. The combination strategy starts from its output.
//! 3. Every later active stage gets its input from the auto-context feeder,
//!    runs, and is folded in. With per-stage results on, the accumulator is
//!    snapshotted after each stage (stage 0 included).
//! 4. The result is assembled in single or per-stage form.
//!
//! Stage inputs are dropped as soon as their stage has run; outputs move into
//! the strategy. Learners are only borrowed.

use ndarray::ArrayD;
use tracing::debug;

use crate::autocontext::{AutoContextFeeder, StageInput};
use crate::combine::start_strategy;
use crate::error::CascadeError;
use crate::learner::BaseLearner;
use crate::result::EnsembleResult;
use crate::state::CascadeState;
use crate::tensor::Variable;

/// Whether stage `stage_index` of a pass over `num_active_stages` stages runs
/// without recording gradient history.
///
/// Earlier stages are frozen in stage-wise training; nothing records history
/// outside training.
pub fn is_volatile(
    stage_index: usize,
    num_active_stages: usize,
    is_training: bool,
    is_end_to_end: bool,
) -> bool {
    (stage_index + 1 < num_active_stages && !is_end_to_end) || !is_training
}

/// Borrowed view of a cascade for one forward pass.
pub struct ForwardPipeline<'a> {
    learners: &'a [Box<dyn BaseLearner>],
    state: &'a CascadeState,
    feeder: AutoContextFeeder,
}

impl<'a> ForwardPipeline<'a> {
    pub fn new(learners: &'a [Box<dyn BaseLearner>], state: &'a CascadeState) -> Self {
        Self {
            learners,
            state,
            feeder: AutoContextFeeder::new(state.auto_context()),
        }
    }

    pub fn run(
        &self,
        input: &ArrayD<f32>,
        target: Option<&ArrayD<usize>>,
    ) -> Result<EnsembleResult, CascadeError> {
        let state = self.state;
        let n = state.num_active_stages();
        let per_stage = state.returns_per_stage();

        let first = self.run_stage(0, StageInput::raw(input.view(), state.is_volatile(0, n)))?;
        check_extent(0, input.shape(), first.shape())?;
        let stage_shape = first.shape().to_vec();

        let mut strategy = start_strategy(state, target, first)?;
        let mut outputs = Vec::new();
        let mut weights = Vec::new();
        if per_stage {
            let (output, weight) = strategy.snapshot();
            outputs.push(output);
            weights.push(weight);
        }

        for i in 1..n {
            let ctx = state.stage_context(i);
            let volatile = state.is_volatile(i, n);
            let stage_input = self
                .feeder
                .stage_input(input.view(), strategy.context(), volatile)?;
            let output = self.run_stage(i, stage_input)?;
            if output.shape() != stage_shape.as_slice() {
                return Err(CascadeError::StageOutput {
                    stage: i,
                    expected: stage_shape,
                    found: output.shape().to_vec(),
                });
            }
            strategy.fold(output, &ctx)?;
            if per_stage {
                let (output, weight) = strategy.snapshot();
                outputs.push(output);
                weights.push(weight);
            }
        }

        if per_stage {
            return Ok(EnsembleResult::PerStage { outputs, weights });
        }
        let (output, weight) = strategy.finish();
        Ok(EnsembleResult::Single { output, weight })
    }

    /// Run one stage. Its output's history is the input's history extended by
    /// this stage, unless the input is volatile.
    fn run_stage(&self, stage_index: usize, input: StageInput<'_>) -> Result<Variable, CascadeError> {
        let learner = self
            .learners
            .get(stage_index)
            .ok_or(CascadeError::StageOutOfRange {
                index: stage_index,
                num_stages: self.learners.len(),
            })?;
        let history = input.history().through_stage(stage_index);
        debug!(
            stage = stage_index,
            learner = learner.name(),
            volatile = history.is_volatile(),
            input_shape = ?input.shape(),
            "stage forward"
        );
        let output = learner.forward(input.view())?;
        drop(input);
        Ok(Variable::new(output, history))
    }
}

/// Stage outputs keep the input's batch and spatial extent.
fn check_extent(stage: usize, input: &[usize], output: &[usize]) -> Result<(), CascadeError> {
    let same_rank = input.len() == output.len() && output.len() >= 2;
    if !same_rank || input[0] != output[0] || input[2..] != output[2..] {
        let mut expected = input.to_vec();
        if expected.len() >= 2 {
            expected[1] = output.get(1).copied().unwrap_or(0);
        }
        return Err(CascadeError::StageOutput {
            stage,
            expected,
            found: output.to_vec(),
        });
    }
    Ok(())
}
