//! gbnet core: orchestration of cascaded segmentation learners.
//!
//! This crate contains the cascade engine:
//! - Stage tensors with explicit gradient-history bookkeeping
//! - The base learner capability and two reference learners
//! - Validated configuration (TOML) and the cascade state
//! - Stage activation, freezing and parameter resets
//! - Residual and boosting combination of stage outputs
//! - Auto-context stage inputs and the forward pipeline

pub mod autocontext;
pub mod cascade;
pub mod combine;
pub mod config;
pub mod controller;
pub mod error;
pub mod init;
pub mod learner;
pub mod learners;
pub mod pipeline;
pub mod result;
pub mod rng;
pub mod state;
pub mod tensor;

pub use cascade::Cascade;
pub use config::{BoostingConfig, CascadeConfig, CombinationMode, ConfigError};
pub use error::CascadeError;
pub use learner::{BaseLearner, LayerKind, LearnerError, LearnerMode, ParamRole, Parameter};
pub use result::EnsembleResult;
pub use state::{CascadeState, StageContext};
pub use tensor::{GradHistory, Variable};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: learners, state and results can cross threads.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Variable>();
        require_sync::<Variable>();
        require_send::<EnsembleResult>();
        require_sync::<EnsembleResult>();
        require_send::<CascadeState>();
        require_sync::<CascadeState>();
        require_send::<CascadeConfig>();
        require_sync::<CascadeConfig>();
        require_send::<controller::CascadeController>();
        require_sync::<controller::CascadeController>();
        require_send::<Cascade>();
        require_sync::<Cascade>();

        require_send::<learners::PointwiseConv>();
        require_sync::<learners::PointwiseConv>();
        require_send::<learners::ConstantLearner>();
        require_sync::<learners::ConstantLearner>();
        require_send::<combine::ResidualSum>();
        require_send::<combine::AdaBoost>();
    }

    /// The pipeline only needs `&dyn BaseLearner`; modes change through `&mut`.
    fn forward_takes_shared_learner(
        learner: &dyn BaseLearner,
        input: ndarray::ArrayViewD<'_, f32>,
    ) -> Result<ndarray::ArrayD<f32>, LearnerError> {
        learner.forward(input)
    }

    #[test]
    fn learners_are_usable_as_trait_objects() {
        let learner: Box<dyn BaseLearner> =
            Box::new(learners::ConstantLearner::new("stage0", vec![1.0, 2.0]));
        let input = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 3, 2]));
        let out = forward_takes_shared_learner(learner.as_ref(), input.view()).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2]);
        assert_eq!(out[[0, 1, 1]], 2.0);
    }
}
