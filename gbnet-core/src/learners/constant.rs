//! Constant learner: fixed per-class logits at every voxel.
//!
//! Ignores input values (only batch and spatial extent are read), so it
//! accepts any channel count. Useful as a prior stage and for checking
//! combination arithmetic exactly.

use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};

use crate::learner::{
    BaseLearner, LayerKind, LearnerError, LearnerMode, ParamRole, Parameter,
};

#[derive(Debug, Clone)]
pub struct ConstantLearner {
    name: String,
    logits: Parameter,
    mode: LearnerMode,
}

impl ConstantLearner {
    pub fn new(name: impl Into<String>, logits: Vec<f32>) -> Self {
        let name = name.into();
        let value = Array1::from(logits).into_dyn();
        Self {
            logits: Parameter::new(format!("{name}.logits"), LayerKind::Other, ParamRole::Bias, value),
            name,
            mode: LearnerMode::Eval,
        }
    }

    /// Same value for every one of `num_classes` classes.
    pub fn uniform(name: impl Into<String>, num_classes: usize, value: f32) -> Self {
        Self::new(name, vec![value; num_classes])
    }

    pub fn num_classes(&self) -> usize {
        self.logits.value.len()
    }
}

impl BaseLearner for ConstantLearner {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>, LearnerError> {
        if input.ndim() < 2 {
            return Err(LearnerError::RankMismatch {
                learner: self.name.clone(),
                expected: 2,
                found: input.ndim(),
            });
        }
        let mut shape = input.shape().to_vec();
        shape[1] = self.num_classes();
        let mut out = ArrayD::zeros(IxDyn(&shape));
        for (c, &v) in self.logits.value.iter().enumerate() {
            out.index_axis_mut(Axis(1), c).fill(v);
        }
        Ok(out)
    }

    fn set_mode(&mut self, mode: LearnerMode) {
        self.mode = mode;
    }

    fn mode(&self) -> LearnerMode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.logits]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.logits]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::reinitialize_conv_layers;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fills_each_class_plane() {
        let learner = ConstantLearner::new("prior", vec![0.5, -1.0, 2.0]);
        let x = ArrayD::<f32>::zeros(IxDyn(&[2, 7, 3, 3]));
        let y = learner.forward(x.view()).unwrap();
        assert_eq!(y.shape(), &[2, 3, 3, 3]);
        assert!(y.index_axis(Axis(1), 0).iter().all(|&v| v == 0.5));
        assert!(y.index_axis(Axis(1), 1).iter().all(|&v| v == -1.0));
        assert!(y.index_axis(Axis(1), 2).iter().all(|&v| v == 2.0));
    }

    #[test]
    fn rejects_rank_below_two() {
        let learner = ConstantLearner::uniform("prior", 2, 1.0);
        let x = ArrayD::<f32>::zeros(IxDyn(&[4]));
        assert!(learner.forward(x.view()).is_err());
    }

    #[test]
    fn logits_are_not_reset_by_conv_reinit() {
        let mut learner = ConstantLearner::uniform("prior", 2, 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(reinitialize_conv_layers(&mut learner, &mut rng), 0);
        assert!(learner.parameters()[0].value.iter().all(|&v| v == 1.0));
    }
}
