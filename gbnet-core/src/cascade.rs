//! The cascade: an ordered, fixed-length collection of learners driven by a
//! controller and run through the forward pipeline.

use std::ops::RangeInclusive;

use ndarray::ArrayD;
use tracing::info;

use crate::config::CascadeConfig;
use crate::controller::CascadeController;
use crate::error::CascadeError;
use crate::learner::{BaseLearner, LearnerMode};
use crate::pipeline::ForwardPipeline;
use crate::result::EnsembleResult;
use crate::state::CascadeState;

pub struct Cascade {
    learners: Vec<Box<dyn BaseLearner>>,
    controller: CascadeController,
    fingerprint: String,
}

impl Cascade {
    /// Validate `config` and take ownership of `learners` (one per stage).
    ///
    /// Every learner starts in eval mode with stage 0 active.
    pub fn new(
        mut learners: Vec<Box<dyn BaseLearner>>,
        config: &CascadeConfig,
    ) -> Result<Self, CascadeError> {
        let state = CascadeState::new(learners.len(), config)?;
        for learner in learners.iter_mut() {
            learner.set_mode(LearnerMode::Eval);
        }
        let fingerprint = config.fingerprint();
        info!(
            stages = learners.len(),
            mode = ?state.combination_mode(),
            end_to_end = state.is_end_to_end(),
            auto_context = state.auto_context(),
            fingerprint = %fingerprint,
            "cascade built"
        );
        Ok(Self {
            learners,
            controller: CascadeController::new(state, config.init_seed),
            fingerprint,
        })
    }

    pub fn state(&self) -> &CascadeState {
        self.controller.state()
    }

    pub fn num_stages(&self) -> usize {
        self.learners.len()
    }

    /// Fingerprint of the configuration this cascade was built from.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn learner(&self, stage_index: usize) -> Option<&dyn BaseLearner> {
        self.learners.get(stage_index).map(|l| l.as_ref())
    }

    /// Mutable access for checkpoint loading. Modes are still the controller's.
    pub fn learner_mut(&mut self, stage_index: usize) -> Option<&mut (dyn BaseLearner + 'static)> {
        self.learners.get_mut(stage_index).map(|l| l.as_mut())
    }

    /// See [`CascadeController::activate_for_training`].
    pub fn activate_for_training(
        &mut self,
        stage_index: usize,
        reinitialize: bool,
    ) -> Result<Option<usize>, CascadeError> {
        self.controller
            .activate_for_training(&mut self.learners, stage_index, reinitialize)
    }

    pub fn activate_for_inference(&mut self, stage_index: Option<usize>) -> Result<(), CascadeError> {
        self.controller
            .activate_for_inference(&mut self.learners, stage_index)
    }

    pub fn trainable_stages(&self) -> RangeInclusive<usize> {
        self.controller.trainable_stages()
    }

    /// Run the active stages on `input` (`[batch, channels, spatial...]`).
    ///
    /// `target` holds integer labels; it is required only for boosting while
    /// training stage-wise.
    pub fn run_forward(
        &self,
        input: &ArrayD<f32>,
        target: Option<&ArrayD<usize>>,
    ) -> Result<EnsembleResult, CascadeError> {
        ForwardPipeline::new(&self.learners, self.controller.state()).run(input, target)
    }
}

impl std::fmt::Debug for Cascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.learners.iter().map(|l| l.name()).collect();
        f.debug_struct("Cascade")
            .field("learners", &names)
            .field("state", self.controller.state())
            .finish()
    }
}
