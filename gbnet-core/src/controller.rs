//! Stage activation and freezing policy.
//!
//! The controller owns the [`CascadeState`] and is the only writer of the
//! active stage index and the training flag. It also decides each learner's
//! train/eval mode and when a newly activated stage gets fresh parameters.

use std::ops::RangeInclusive;

use tracing::{debug, info};

use crate::error::CascadeError;
use crate::init::reinitialize_conv_layers;
use crate::learner::{BaseLearner, LearnerMode};
use crate::rng::SeedHierarchy;
use crate::state::CascadeState;

#[derive(Debug, Clone)]
pub struct CascadeController {
    state: CascadeState,
    seeds: SeedHierarchy,
    /// How many times each stage has been reinitialized.
    generations: Vec<u64>,
}

impl CascadeController {
    pub fn new(state: CascadeState, init_seed: u64) -> Self {
        let generations = vec![0; state.num_stages()];
        Self {
            state,
            seeds: SeedHierarchy::new(init_seed),
            generations,
        }
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    fn check_index(&self, stage_index: usize) -> Result<(), CascadeError> {
        if stage_index >= self.state.num_stages() {
            return Err(CascadeError::StageOutOfRange {
                index: stage_index,
                num_stages: self.state.num_stages(),
            });
        }
        Ok(())
    }

    /// Make `stage_index` the active stage and enter training.
    ///
    /// Stage-wise: earlier stages go to eval, the active stage to train, and
    /// with `reinitialize` the active stage's conv layers are reset if its
    /// index is above the copy threshold. End-to-end: every learner trains.
    ///
    /// Returns the number of conv layers reset, if a reset happened.
    pub fn activate_for_training(
        &mut self,
        learners: &mut [Box<dyn BaseLearner>],
        stage_index: usize,
        reinitialize: bool,
    ) -> Result<Option<usize>, CascadeError> {
        self.check_index(stage_index)?;
        if stage_index >= learners.len() {
            return Err(CascadeError::StageOutOfRange {
                index: stage_index,
                num_stages: learners.len(),
            });
        }
        self.state.set_active_stage_index(stage_index);
        self.state.set_training(true);

        if self.state.is_end_to_end() {
            for learner in learners.iter_mut() {
                learner.set_mode(LearnerMode::Train);
            }
            info!(stage = stage_index, "end-to-end training activated");
            return Ok(None);
        }

        for learner in learners[..stage_index].iter_mut() {
            learner.set_mode(LearnerMode::Eval);
        }
        let active = &mut learners[stage_index];

        let mut reset = None;
        if reinitialize && stage_index > self.state.copy_previous_model_threshold() {
            let generation = self.generations[stage_index];
            let mut rng = self.seeds.rng_for(stage_index, generation);
            let layers = reinitialize_conv_layers(active.as_mut(), &mut rng);
            self.generations[stage_index] += 1;
            info!(
                stage = stage_index,
                learner = active.name(),
                layers,
                generation,
                "conv layers reinitialized"
            );
            reset = Some(layers);
        } else if reinitialize {
            debug!(
                stage = stage_index,
                threshold = self.state.copy_previous_model_threshold(),
                "reinitialization skipped at or below threshold"
            );
        }
        active.set_mode(LearnerMode::Train);

        info!(stage = stage_index, "stage-wise training activated");
        Ok(reset)
    }

    /// Leave training; optionally move the active stage. Every learner goes to eval.
    pub fn activate_for_inference(
        &mut self,
        learners: &mut [Box<dyn BaseLearner>],
        stage_index: Option<usize>,
    ) -> Result<(), CascadeError> {
        if let Some(index) = stage_index {
            self.check_index(index)?;
            self.state.set_active_stage_index(index);
        }
        self.state.set_training(false);
        for learner in learners.iter_mut() {
            learner.set_mode(LearnerMode::Eval);
        }
        info!(
            stage = self.state.active_stage_index(),
            "inference activated"
        );
        Ok(())
    }

    /// Stages whose parameters an optimizer should update.
    pub fn trainable_stages(&self) -> RangeInclusive<usize> {
        let active = self.state.active_stage_index();
        if self.state.is_end_to_end() {
            0..=active
        } else {
            active..=active
        }
    }
}
