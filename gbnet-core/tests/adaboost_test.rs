//! Boosting combination through the cascade: sample weights, pseudo-residual
//! sums and the result form of each mode.

use gbnet_core::autocontext::stage_in_channels;
use gbnet_core::learners::{ConstantLearner, PointwiseConv};
use gbnet_core::{BaseLearner, Cascade, CascadeConfig, CascadeError};
use ndarray::{array, ArrayD, Axis, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;

const SHAPE: [usize; 5] = [2, 1, 3, 4, 4];

fn adaboost_config(num_classes: usize) -> CascadeConfig {
    CascadeConfig {
        num_classes,
        residual: false,
        adaboost: true,
        ..CascadeConfig::default()
    }
}

/// Every stage predicts logits `[2, 0]`: `logp0 - logp1 = 2`.
fn confident_stages(count: usize) -> Vec<Box<dyn BaseLearner>> {
    (0..count)
        .map(|i| {
            Box::new(ConstantLearner::new(format!("stage{i}"), vec![2.0, 0.0])) as Box<dyn BaseLearner>
        })
        .collect()
}

fn input() -> ArrayD<f32> {
    ArrayD::from_elem(IxDyn(&SHAPE), 0.25)
}

fn class_zero_labels() -> ArrayD<usize> {
    ArrayD::zeros(IxDyn(&SHAPE))
}

fn assert_all_close(values: &ArrayD<f32>, expected: f32) {
    for &v in values.iter() {
        assert!(
            (v - expected).abs() <= 1e-5 * expected.abs().max(1.0),
            "{v} != {expected}"
        );
    }
}

#[test]
fn first_stage_weight_is_uniformly_one() {
    let config = adaboost_config(3);
    let mut rng = StdRng::seed_from_u64(4);
    let stages: Vec<Box<dyn BaseLearner>> = vec![Box::new(PointwiseConv::new(
        "stage0",
        stage_in_channels(0, 1, 3, true),
        3,
        3,
        true,
        &mut rng,
    ))];
    let mut cascade = Cascade::new(stages, &config).unwrap();
    cascade.activate_for_training(0, false).unwrap();

    let labels = ArrayD::from_shape_fn(IxDyn(&SHAPE), |idx| idx[4] % 3);
    let x = ArrayD::from_shape_fn(IxDyn(&SHAPE), |idx| idx[3] as f32 - 1.5);
    let (output, weight) = cascade
        .run_forward(&x, Some(&labels))
        .unwrap()
        .into_single()
        .unwrap();
    let weight = weight.expect("stage-wise boosting returns a weight");
    assert_eq!(output.shape(), &[2, 3, 3, 4, 4]);
    assert_eq!(weight.shape(), &[2, 3, 4, 4]);
    assert!(weight.data().iter().all(|&w| w == 1.0));
    assert!(!weight.requires_grad());
}

#[test]
fn later_stage_starts_from_first_stage_weight() {
    // sum_c(target * logp) = 2, eta = 2, (C-1)/C = 1/2 -> w = e^-2
    let mut cascade = Cascade::new(confident_stages(2), &adaboost_config(2)).unwrap();
    cascade.activate_for_training(1, false).unwrap();
    let labels = class_zero_labels();
    let (_, weight) = cascade
        .run_forward(&input(), Some(&labels))
        .unwrap()
        .into_single()
        .unwrap();
    assert_all_close(weight.unwrap().data(), (-2.0_f32).exp());
}

#[test]
fn intermediate_stages_multiply_scaled_weights() {
    let mut cascade = Cascade::new(confident_stages(3), &adaboost_config(2)).unwrap();
    cascade.activate_for_training(2, false).unwrap();
    let labels = class_zero_labels();
    let (output, weight) = cascade
        .run_forward(&input(), Some(&labels))
        .unwrap()
        .into_single()
        .unwrap();
    let weight = weight.unwrap();
    assert_all_close(weight.data(), (-4.0_f32).exp() * 1.5);
    assert!(!weight.is_volatile());

    // newest raw output, tracking only the newest stage
    assert_all_close(&output.data().index_axis(Axis(1), 0).to_owned(), 2.0);
    assert_all_close(&output.data().index_axis(Axis(1), 1).to_owned(), 0.0);
    assert_eq!(output.history().stages(), vec![2]);
}

#[test]
fn stage_weight_scale_is_configurable() {
    let mut config = adaboost_config(2);
    config.boosting.stage_weight_scale = 1.0;
    let mut cascade = Cascade::new(confident_stages(3), &config).unwrap();
    cascade.activate_for_training(2, false).unwrap();
    let (_, weight) = cascade
        .run_forward(&input(), Some(&class_zero_labels()))
        .unwrap()
        .into_single()
        .unwrap();
    assert_all_close(weight.unwrap().data(), (-4.0_f32).exp());
}

#[test]
fn stagewise_training_needs_labels() {
    let mut cascade = Cascade::new(confident_stages(2), &adaboost_config(2)).unwrap();
    cascade.activate_for_training(1, false).unwrap();
    let err = cascade.run_forward(&input(), None).unwrap_err();
    assert!(matches!(err, CascadeError::MissingTarget));
}

#[test]
fn out_of_range_label_rejected() {
    let mut cascade = Cascade::new(confident_stages(1), &adaboost_config(2)).unwrap();
    cascade.activate_for_training(0, false).unwrap();
    let labels = ArrayD::from_elem(IxDyn(&SHAPE), 2usize);
    let err = cascade.run_forward(&input(), Some(&labels)).unwrap_err();
    assert!(matches!(
        err,
        CascadeError::LabelOutOfRange {
            label: 2,
            num_classes: 2
        }
    ));
}

#[test]
fn labels_without_channel_axis_accepted() {
    let mut cascade = Cascade::new(confident_stages(1), &adaboost_config(2)).unwrap();
    cascade.activate_for_training(0, false).unwrap();
    let labels = ArrayD::<usize>::zeros(IxDyn(&[2, 3, 4, 4]));
    assert!(cascade.run_forward(&input(), Some(&labels)).is_ok());
}

#[test]
fn inference_sums_pseudo_residuals() {
    // per stage h = (C-1) * (logp - mean_c logp) = [1, -1]
    let mut cascade = Cascade::new(confident_stages(2), &adaboost_config(2)).unwrap();
    cascade.activate_for_inference(Some(1)).unwrap();
    let (output, weight) = cascade
        .run_forward(&input(), None)
        .unwrap()
        .into_single()
        .unwrap();
    assert!(weight.is_none());
    assert!(output.is_volatile());
    assert_all_close(&output.data().index_axis(Axis(1), 0).to_owned(), 2.0);
    assert_all_close(&output.data().index_axis(Axis(1), 1).to_owned(), -2.0);
}

#[test]
fn debug_inference_returns_newest_residual() {
    let config = CascadeConfig {
        debug_last_stage_residual: true,
        ..adaboost_config(2)
    };
    let mut cascade = Cascade::new(confident_stages(3), &config).unwrap();
    cascade.activate_for_inference(Some(2)).unwrap();
    let output = cascade
        .run_forward(&input(), None)
        .unwrap()
        .into_single()
        .unwrap()
        .0;
    assert_all_close(&output.data().index_axis(Axis(1), 0).to_owned(), 1.0);
    assert_all_close(&output.data().index_axis(Axis(1), 1).to_owned(), -1.0);
}

#[test]
fn end_to_end_training_returns_residual_sum_without_weight() {
    let config = CascadeConfig {
        end_to_end: true,
        ..adaboost_config(2)
    };
    let mut cascade = Cascade::new(confident_stages(2), &config).unwrap();
    cascade.activate_for_training(1, false).unwrap();
    let (output, weight) = cascade
        .run_forward(&input(), None)
        .unwrap()
        .into_single()
        .unwrap();
    assert!(weight.is_none());
    assert_eq!(output.history().stages(), vec![0, 1]);
    assert_all_close(&output.data().index_axis(Axis(1), 0).to_owned(), 2.0);
}

#[test]
fn end_to_end_per_stage_results_are_raw_stage_outputs() {
    let config = CascadeConfig {
        end_to_end: true,
        multi_output: true,
        ..adaboost_config(2)
    };
    let mut cascade = Cascade::new(confident_stages(3), &config).unwrap();
    cascade.activate_for_training(2, false).unwrap();
    let result = cascade.run_forward(&input(), None).unwrap();
    assert_eq!(result.len(), 3);
    for (i, output) in result.outputs().iter().enumerate() {
        // logits [2, 0] from every stage, not the running h_total
        assert_all_close(&output.data().index_axis(Axis(1), 0).to_owned(), 2.0);
        assert_all_close(&output.data().index_axis(Axis(1), 1).to_owned(), 0.0);
        assert_eq!(output.history().stages(), vec![i]);
    }
    assert!(result.final_weight().is_none());
}

#[test]
fn class_count_must_match_configuration() {
    let mut cascade = Cascade::new(confident_stages(1), &adaboost_config(3)).unwrap();
    cascade.activate_for_inference(None).unwrap();
    assert!(matches!(
        cascade.run_forward(&input(), None),
        Err(CascadeError::ClassCount {
            expected: 3,
            found: 2
        })
    ));
}

#[test]
fn auto_context_feeds_softmax_of_earlier_pseudo_residuals() {
    // stage 2 copies its context channels to its output
    let mut stages = confident_stages(2);
    let weight = array![[1.0_f32, 0.0, 0.0], [0.0, 1.0, 0.0]];
    stages.push(Box::new(
        PointwiseConv::from_weights("stage2", weight, None, 3).unwrap(),
    ));
    let mut cascade = Cascade::new(stages, &adaboost_config(2)).unwrap();
    cascade.activate_for_training(2, false).unwrap();
    let (output, _) = cascade
        .run_forward(&input(), Some(&class_zero_labels()))
        .unwrap()
        .into_single()
        .unwrap();

    // h_total of stages 0 and 1 is [2, -2]; the newest stage is not in it
    let p0 = 1.0 / (1.0 + (-4.0_f32).exp());
    assert_all_close(&output.data().index_axis(Axis(1), 0).to_owned(), p0);
    assert_all_close(&output.data().index_axis(Axis(1), 1).to_owned(), 1.0 - p0);
    assert_eq!(output.history().stages(), vec![2]);
}
