//! Multi-class boosting combination.
//!
//! For a stage output `o` over `C` classes:
//!
//! - `logp = log_softmax_c(o)`
//! - pseudo-residual `h = (C-1) * (logp - mean_c(logp))`
//! - sample weight `w = exp(-eta * (C-1)/C * sum_c(target * logp))`, with the
//!   target signed one-hot encoded (`+1` on the label, `-1/(C-1)` elsewhere)
//!
//! Stage-wise training keeps a cumulative per-voxel weight
//! (`weight *= w_i * stage_weight_scale` for every stage between the first and
//! the newest) and returns the newest stage's raw output with that weight.
//! Everywhere else the summed pseudo-residual `h_total` is the result.
//! Per-stage results list each stage's raw output.

use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use crate::config::BoostingConfig;
use crate::error::CascadeError;
use crate::state::{CascadeState, StageContext};
use crate::tensor::{
    encode_signed_one_hot, log_softmax_classes, mean_classes, weight_histogram, GradHistory,
    Variable, CLASS_AXIS,
};

use super::CombinationStrategy;

// ─── Single boosting step ───────────────────────────────────────────

/// Pseudo-residual of one stage output, plus its sample weight when a target
/// is given.
#[derive(Debug, Clone)]
pub struct BoostStep {
    pub h: Variable,
    pub weight: Option<Variable>,
}

/// Compute `h` (and `w` if `target` is set) for one stage output.
///
/// `target` must already be signed one-hot encoded to `output`'s shape.
pub fn boost_step(
    output: &Variable,
    target: Option<&ArrayD<f32>>,
    num_classes: usize,
    learning_rate: f32,
) -> BoostStep {
    let c = num_classes as f32;
    let logp = log_softmax_classes(output.view());

    let weight = target.map(|target| {
        let agreement = (target * &logp).sum_axis(CLASS_AXIS);
        let factor = -learning_rate * (c - 1.0) / c;
        Variable::new(
            agreement.mapv(|s| (factor * s).exp()),
            output.history().clone(),
        )
    });

    let mean = mean_classes(logp.view());
    let h = (logp - &mean).mapv(|v| v * (c - 1.0));
    BoostStep {
        h: Variable::new(h, output.history().clone()),
        weight,
    }
}

// ─── Strategy ───────────────────────────────────────────────────────

/// Boosting accumulator for one forward pass.
#[derive(Debug, Clone)]
pub struct AdaBoost {
    num_classes: usize,
    boosting: BoostingConfig,
    is_training: bool,
    /// Training outside end-to-end mode: weights are tracked.
    stagewise: bool,
    debug_last_stage_residual: bool,
    target: Option<ArrayD<f32>>,
    newest: Variable,
    h_total: Variable,
    last_h: Option<Variable>,
    weight: Option<Variable>,
}

impl AdaBoost {
    /// Start from stage 0's output.
    ///
    /// When stage 0 is the only active stage of a stage-wise training pass the
    /// sample weight is all ones; with later stages active it starts from
    /// stage 0's own boosting weight.
    pub fn start(
        state: &CascadeState,
        labels: Option<&ArrayD<usize>>,
        first_output: Variable,
        ctx: &StageContext,
    ) -> Result<Self, CascadeError> {
        let num_classes = state.num_classes();
        let found = first_output.shape().get(1).copied().unwrap_or(0);
        if found != num_classes {
            return Err(CascadeError::ClassCount {
                expected: num_classes,
                found,
            });
        }

        let stagewise = ctx.is_training && !ctx.is_end_to_end;
        let target = if stagewise {
            let labels = labels.ok_or(CascadeError::MissingTarget)?;
            Some(encode_signed_one_hot(labels, first_output.shape())?)
        } else {
            None
        };

        let boosting = state.boosting();
        let step = boost_step(
            &first_output,
            target.as_ref(),
            num_classes,
            boosting.learning_rate,
        );
        let weight = if stagewise && ctx.is_last() {
            let mut shape = first_output.shape().to_vec();
            shape.remove(1);
            Some(Variable::new(
                ArrayD::ones(IxDyn(&shape)),
                GradHistory::detached(),
            ))
        } else {
            step.weight
        };

        Ok(Self {
            num_classes,
            boosting,
            is_training: ctx.is_training,
            stagewise,
            debug_last_stage_residual: state.debug_last_stage_residual(),
            target,
            newest: first_output,
            h_total: step.h,
            last_h: None,
            weight,
        })
    }

    /// Cumulative sample weight so far (stage-wise training only).
    pub fn weight(&self) -> Option<&Variable> {
        self.weight.as_ref()
    }

    pub fn h_total(&self) -> &Variable {
        &self.h_total
    }
}

impl CombinationStrategy for AdaBoost {
    fn name(&self) -> &str {
        "adaboost"
    }

    fn fold(&mut self, output: Variable, ctx: &StageContext) -> Result<(), CascadeError> {
        if self.stagewise {
            // The newest stage only contributes its raw output.
            if !ctx.is_last() {
                let step = boost_step(
                    &output,
                    self.target.as_ref(),
                    self.num_classes,
                    self.boosting.learning_rate,
                );
                if let (Some(weight), Some(mut w)) = (self.weight.as_mut(), step.weight) {
                    w.scale_in_place(self.boosting.stage_weight_scale);
                    weight.mul_in_place(&w);
                    debug!(
                        stage = ctx.stage_index,
                        histogram = ?weight_histogram(weight.view()),
                        "boosting weight updated"
                    );
                }
                if ctx.auto_context {
                    self.h_total.add_in_place(&step.h);
                }
            }
        } else {
            let step = boost_step(&output, None, self.num_classes, self.boosting.learning_rate);
            self.h_total.add_in_place(&step.h);
            if self.debug_last_stage_residual && !self.is_training {
                self.last_h = Some(step.h);
            }
        }
        self.newest = output;
        Ok(())
    }

    fn context(&self) -> &Variable {
        &self.h_total
    }

    /// Per-stage entries are raw stage outputs, not the running `h_total`.
    fn snapshot(&self) -> (Variable, Option<Variable>) {
        (
            self.newest.clone(),
            self.weight.as_ref().map(Variable::detach),
        )
    }

    fn finish(self: Box<Self>) -> (Variable, Option<Variable>) {
        let this = *self;
        if this.stagewise {
            return (this.newest, this.weight.map(Variable::into_detached));
        }
        if !this.is_training && this.debug_last_stage_residual {
            return (this.last_h.unwrap_or(this.h_total), None);
        }
        (this.h_total, None)
    }
}
