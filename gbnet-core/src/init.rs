//! Parameter reset hook: Xavier-normal conv weights, zero conv biases.
//!
//! Fan sizes follow the usual convolution convention: for a weight shaped
//! `[dim0, dim1, k...]` the receptive field is `prod(k)`,
//! `fan_in = dim1 * receptive` and `fan_out = dim0 * receptive`.

use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::warn;

use crate::learner::{BaseLearner, ParamRole};

/// `(fan_in, fan_out)` of a weight tensor, or `None` below rank 2.
pub fn fan_in_out(shape: &[usize]) -> Option<(usize, usize)> {
    if shape.len() < 2 {
        return None;
    }
    let receptive: usize = shape[2..].iter().product();
    Some((shape[1] * receptive, shape[0] * receptive))
}

/// Overwrite `weight` with `N(0, 2 / (fan_in + fan_out))` samples.
///
/// Returns false (and leaves the tensor alone) when the fans are undefined.
pub fn xavier_normal<R: Rng + ?Sized>(weight: &mut ArrayD<f32>, rng: &mut R) -> bool {
    let Some((fan_in, fan_out)) = fan_in_out(weight.shape()) else {
        return false;
    };
    if fan_in + fan_out == 0 {
        return false;
    }
    let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
    let normal = match Normal::new(0.0_f32, std) {
        Ok(normal) => normal,
        Err(_) => return false,
    };
    weight.mapv_inplace(|_| normal.sample(&mut *rng));
    true
}

/// Reset every convolutional layer of `learner`.
///
/// Weights get Xavier-normal values, biases are zeroed; parameters of any
/// other layer kind are untouched. Returns the number of conv layers reset.
pub fn reinitialize_conv_layers<R: Rng + ?Sized>(
    learner: &mut dyn BaseLearner,
    rng: &mut R,
) -> usize {
    let name = learner.name().to_string();
    let mut layers: Vec<String> = Vec::new();
    for param in learner.parameters_mut() {
        if !param.kind.is_convolutional() {
            continue;
        }
        match param.role {
            ParamRole::Weight => {
                if !xavier_normal(&mut param.value, rng) {
                    warn!(
                        learner = %name,
                        layer = %param.layer,
                        shape = ?param.value.shape(),
                        "conv weight has no defined fan; left as is"
                    );
                }
            }
            ParamRole::Bias => param.value.fill(0.0),
        }
        if !layers.contains(&param.layer) {
            layers.push(param.layer.clone());
        }
    }
    layers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn fans_for_conv3d_weight() {
        // [out=8, in=4, 3, 3, 3]
        assert_eq!(fan_in_out(&[8, 4, 3, 3, 3]), Some((108, 216)));
        assert_eq!(fan_in_out(&[8, 4]), Some((4, 8)));
        assert_eq!(fan_in_out(&[8]), None);
    }

    #[test]
    fn xavier_normal_has_expected_spread() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut w = ArrayD::<f32>::zeros(IxDyn(&[64, 64, 3, 3]));
        assert!(xavier_normal(&mut w, &mut rng));

        let n = w.len() as f32;
        let mean = w.sum() / n;
        let var = w.mapv(|v| (v - mean).powi(2)).sum() / n;
        let expected_var = 2.0 / (64.0 * 9.0 * 2.0);
        assert!(mean.abs() < 0.01, "mean {mean}");
        assert!((var - expected_var).abs() / expected_var < 0.1, "var {var}");
    }

    #[test]
    fn xavier_normal_skips_rank_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut b = ArrayD::<f32>::from_elem(IxDyn(&[4]), 5.0);
        assert!(!xavier_normal(&mut b, &mut rng));
        assert!(b.iter().all(|&v| v == 5.0));
    }
}
