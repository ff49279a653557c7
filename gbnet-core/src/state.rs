//! Cascade state: fixed configuration plus the mutable progression fields.
//!
//! Only `active_stage_index` and `is_training` change after construction, and
//! only through the controller's activation entry points (the setters are
//! crate-private).

use serde::Serialize;

use crate::config::{BoostingConfig, CascadeConfig, CombinationMode, ConfigError};
use crate::pipeline::is_volatile;

/// Everything a forward pass needs to know about one stage's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContext {
    pub stage_index: usize,
    pub num_active_stages: usize,
    pub is_training: bool,
    pub is_end_to_end: bool,
    pub auto_context: bool,
}

impl StageContext {
    /// True for the highest-index stage taking part in this pass.
    pub fn is_last(&self) -> bool {
        self.stage_index + 1 == self.num_active_stages
    }
}

/// Configuration and progression state of one cascade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CascadeState {
    num_stages: usize,
    active_stage_index: usize,
    is_training: bool,
    is_end_to_end: bool,
    auto_context: bool,
    combination_mode: CombinationMode,
    residual_scale: f32,
    num_classes: usize,
    multi_output: bool,
    copy_previous_model_threshold: usize,
    boosting: BoostingConfig,
    debug_last_stage_residual: bool,
}

impl CascadeState {
    /// Validate `config` and build the state of a fresh `num_stages` cascade.
    ///
    /// A fresh cascade has stage 0 active and is not training.
    pub fn new(num_stages: usize, config: &CascadeConfig) -> Result<Self, ConfigError> {
        if num_stages == 0 {
            return Err(ConfigError::NoStages);
        }
        let combination_mode = config.validate()?;
        Ok(Self {
            num_stages,
            active_stage_index: 0,
            is_training: false,
            is_end_to_end: config.end_to_end,
            auto_context: config.auto_context,
            combination_mode,
            residual_scale: config.residual_scale,
            num_classes: config.num_classes,
            multi_output: config.multi_output,
            copy_previous_model_threshold: config.copy_previous_model_threshold,
            boosting: config.boosting,
            debug_last_stage_residual: config.debug_last_stage_residual,
        })
    }

    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    pub fn active_stage_index(&self) -> usize {
        self.active_stage_index
    }

    /// Number of stages that execute in a forward pass.
    pub fn num_active_stages(&self) -> usize {
        self.active_stage_index + 1
    }

    pub fn is_training(&self) -> bool {
        self.is_training
    }

    pub fn is_end_to_end(&self) -> bool {
        self.is_end_to_end
    }

    pub fn auto_context(&self) -> bool {
        self.auto_context
    }

    pub fn combination_mode(&self) -> CombinationMode {
        self.combination_mode
    }

    pub fn residual_scale(&self) -> f32 {
        self.residual_scale
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn multi_output(&self) -> bool {
        self.multi_output
    }

    pub fn copy_previous_model_threshold(&self) -> usize {
        self.copy_previous_model_threshold
    }

    pub fn boosting(&self) -> BoostingConfig {
        self.boosting
    }

    pub fn debug_last_stage_residual(&self) -> bool {
        self.debug_last_stage_residual
    }

    /// Whether results come back as one tensor per stage.
    pub fn returns_per_stage(&self) -> bool {
        self.multi_output && self.is_end_to_end
    }

    /// Gradient-detachment policy for stage `stage_index` of a pass over
    /// `num_active_stages` stages.
    pub fn is_volatile(&self, stage_index: usize, num_active_stages: usize) -> bool {
        is_volatile(
            stage_index,
            num_active_stages,
            self.is_training,
            self.is_end_to_end,
        )
    }

    pub fn stage_context(&self, stage_index: usize) -> StageContext {
        StageContext {
            stage_index,
            num_active_stages: self.num_active_stages(),
            is_training: self.is_training,
            is_end_to_end: self.is_end_to_end,
            auto_context: self.auto_context,
        }
    }

    pub(crate) fn set_active_stage_index(&mut self, index: usize) {
        debug_assert!(index < self.num_stages);
        self.active_stage_index = index;
    }

    pub(crate) fn set_training(&mut self, is_training: bool) {
        self.is_training = is_training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_starts_at_stage_zero_not_training() {
        let state = CascadeState::new(4, &CascadeConfig::default()).unwrap();
        assert_eq!(state.num_stages(), 4);
        assert_eq!(state.active_stage_index(), 0);
        assert_eq!(state.num_active_stages(), 1);
        assert!(!state.is_training());
        assert_eq!(state.combination_mode(), CombinationMode::Residual);
    }

    #[test]
    fn zero_stages_rejected() {
        assert!(matches!(
            CascadeState::new(0, &CascadeConfig::default()),
            Err(ConfigError::NoStages)
        ));
    }

    #[test]
    fn both_modes_rejected() {
        let config = CascadeConfig {
            residual: true,
            adaboost: true,
            ..CascadeConfig::default()
        };
        assert!(matches!(
            CascadeState::new(2, &config),
            Err(ConfigError::CombinationMode { .. })
        ));
    }

    #[test]
    fn volatility_follows_mode_flags() {
        let mut state = CascadeState::new(3, &CascadeConfig::default()).unwrap();
        state.set_active_stage_index(2);
        state.set_training(true);
        assert!(state.is_volatile(0, 3));
        assert!(!state.is_volatile(2, 3));
        state.set_training(false);
        assert!(state.is_volatile(2, 3));
    }

    #[test]
    fn stage_context_marks_last_stage() {
        let mut state = CascadeState::new(3, &CascadeConfig::default()).unwrap();
        state.set_active_stage_index(2);
        assert!(!state.stage_context(1).is_last());
        assert!(state.stage_context(2).is_last());
    }

    #[test]
    fn per_stage_results_need_both_flags() {
        let mut config = CascadeConfig {
            multi_output: true,
            ..CascadeConfig::default()
        };
        assert!(!CascadeState::new(2, &config).unwrap().returns_per_stage());
        config.end_to_end = true;
        assert!(CascadeState::new(2, &config).unwrap().returns_per_stage());
    }
}
