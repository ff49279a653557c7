//! Stage tensors and gradient-history bookkeeping.
//!
//! Every tensor the cascade moves between stages is a [`Variable`]: an
//! `ndarray::ArrayD<f32>` laid out as `[batch, class/channel, spatial...]`
//! plus a [`GradHistory`] recording which stages a backward pass from this
//! value would reach. The history is decided explicitly when a stage input is
//! built (see `pipeline::is_volatile`) and propagated by the pipeline, never
//! through a mutable flag on the data itself.
//!
//! Class-axis math (softmax, log-softmax, signed one-hot targets) lives here
//! as free functions over array views.

use std::collections::BTreeSet;

use ndarray::{concatenate, Array3, ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::CascadeError;

/// The class (channel) axis of every stage tensor.
pub const CLASS_AXIS: Axis = Axis(1);

// ─── GradHistory ─────────────────────────────────────────────────────

/// How far gradient history reaches from a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradHistory {
    /// Nothing computed from this value records history.
    Volatile,
    /// History reaches the listed stages. An empty set is a detached leaf.
    Tracked(BTreeSet<usize>),
}

impl GradHistory {
    /// History of a freshly constructed stage input.
    pub fn leaf(volatile: bool) -> Self {
        if volatile {
            Self::Volatile
        } else {
            Self::detached()
        }
    }

    pub fn detached() -> Self {
        Self::Tracked(BTreeSet::new())
    }

    pub fn is_volatile(&self) -> bool {
        matches!(self, Self::Volatile)
    }

    /// True if a backward pass from this value reaches at least one stage.
    pub fn requires_grad(&self) -> bool {
        matches!(self, Self::Tracked(stages) if !stages.is_empty())
    }

    /// Stages reached by a backward pass, ascending. Empty when volatile or detached.
    pub fn stages(&self) -> Vec<usize> {
        match self {
            Self::Volatile => Vec::new(),
            Self::Tracked(stages) => stages.iter().copied().collect(),
        }
    }

    /// History of a stage's output given the history of its input.
    ///
    /// A volatile input yields a volatile output; otherwise the stage's own
    /// parameters join the graph.
    pub fn through_stage(&self, stage_index: usize) -> Self {
        match self {
            Self::Volatile => Self::Volatile,
            Self::Tracked(stages) => {
                let mut stages = stages.clone();
                stages.insert(stage_index);
                Self::Tracked(stages)
            }
        }
    }

    /// History of a value computed from two operands. Volatile dominates.
    pub fn merge(&self, other: &GradHistory) -> Self {
        match (self, other) {
            (Self::Tracked(a), Self::Tracked(b)) => Self::Tracked(a.union(b).copied().collect()),
            _ => Self::Volatile,
        }
    }
}

// ─── Variable ────────────────────────────────────────────────────────

/// A stage tensor with its gradient history.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    data: ArrayD<f32>,
    history: GradHistory,
}

impl Variable {
    pub fn new(data: ArrayD<f32>, history: GradHistory) -> Self {
        Self { data, history }
    }

    /// A leaf value: volatile, or detached with no history.
    pub fn leaf(data: ArrayD<f32>, volatile: bool) -> Self {
        Self::new(data, GradHistory::leaf(volatile))
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    pub fn into_data(self) -> ArrayD<f32> {
        self.data
    }

    pub fn history(&self) -> &GradHistory {
        &self.history
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn requires_grad(&self) -> bool {
        self.history.requires_grad()
    }

    pub fn is_volatile(&self) -> bool {
        self.history.is_volatile()
    }

    /// Copy of the values as a fresh, non-volatile leaf.
    ///
    /// Operations on the copy record history again from this point on, so a
    /// detached volatile value can feed a trainable stage.
    pub fn detach(&self) -> Variable {
        Self::new(self.data.clone(), GradHistory::detached())
    }

    /// Same as [`Variable::detach`] without copying the values.
    pub fn into_detached(self) -> Variable {
        Self::new(self.data, GradHistory::detached())
    }

    /// Drop gradient history, keeping the values where they are.
    pub fn detach_in_place(&mut self) {
        self.history = GradHistory::detached();
    }

    /// Replace the values, keeping the history (element-wise ops).
    pub fn map_data(self, f: impl FnOnce(ArrayD<f32>) -> ArrayD<f32>) -> Variable {
        Self::new(f(self.data), self.history)
    }

    /// `self = self * scalar`.
    pub fn scale_in_place(&mut self, scalar: f32) {
        self.data.mapv_inplace(|v| v * scalar);
    }

    /// `self = self + other`. `other` must broadcast to `self`'s shape.
    pub fn add_in_place(&mut self, other: &Variable) {
        self.data += &other.data;
        self.history = self.history.merge(&other.history);
    }

    /// `self = self * other`. `other` must broadcast to `self`'s shape.
    pub fn mul_in_place(&mut self, other: &Variable) {
        self.data *= &other.data;
        self.history = self.history.merge(&other.history);
    }
}

// ─── Class-axis math ────────────────────────────────────────────────

fn class_max(x: &ArrayViewD<'_, f32>) -> ArrayD<f32> {
    x.map_axis(CLASS_AXIS, |lane| {
        lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v))
    })
    .insert_axis(CLASS_AXIS)
}

/// Softmax over the class axis. Numerically stable (max-shifted).
pub fn softmax_classes(x: ArrayViewD<'_, f32>) -> ArrayD<f32> {
    let max = class_max(&x);
    let mut e = &x - &max;
    e.mapv_inplace(f32::exp);
    let sum = e.sum_axis(CLASS_AXIS).insert_axis(CLASS_AXIS);
    e / &sum
}

/// Log-softmax over the class axis.
pub fn log_softmax_classes(x: ArrayViewD<'_, f32>) -> ArrayD<f32> {
    let max = class_max(&x);
    let shifted = &x - &max;
    let log_sum_exp = shifted
        .mapv(f32::exp)
        .sum_axis(CLASS_AXIS)
        .mapv(f32::ln)
        .insert_axis(CLASS_AXIS);
    shifted - &log_sum_exp
}

/// Mean over the class axis, kept as a length-1 axis for broadcasting.
pub fn mean_classes(x: ArrayViewD<'_, f32>) -> ArrayD<f32> {
    let classes = x.len_of(CLASS_AXIS).max(1) as f32;
    (x.sum_axis(CLASS_AXIS) / classes).insert_axis(CLASS_AXIS)
}

/// Concatenate two tensors along the channel axis: `[first, second]`.
pub fn concat_channels<'a>(
    first: ArrayViewD<'a, f32>,
    second: ArrayViewD<'a, f32>,
) -> Result<ArrayD<f32>, CascadeError> {
    Ok(concatenate(CLASS_AXIS, &[first, second])?)
}

/// Signed one-hot encoding of an integer label volume.
///
/// `labels` holds one class index per voxel, shaped `[batch, 1, spatial...]`
/// or `[batch, spatial...]`. The result has `output_shape`
/// (`[batch, classes, spatial...]`) with `+1` at the labelled class and
/// `-1/(classes-1)` everywhere else.
pub fn encode_signed_one_hot(
    labels: &ArrayD<usize>,
    output_shape: &[usize],
) -> Result<ArrayD<f32>, CascadeError> {
    if output_shape.len() < 2 || output_shape[1] < 2 {
        return Err(CascadeError::TargetShape {
            expected: output_shape.to_vec(),
            found: labels.shape().to_vec(),
        });
    }
    let batch = output_shape[0];
    let num_classes = output_shape[1];
    let spatial = &output_shape[2..];
    let voxels: usize = spatial.iter().product();
    let found = labels.shape();
    let with_channel = found.len() == output_shape.len()
        && found[0] == batch
        && found[1] == 1
        && &found[2..] == spatial;
    let without_channel =
        found.len() + 1 == output_shape.len() && found[0] == batch && &found[1..] == spatial;
    if !(with_channel || without_channel) {
        return Err(CascadeError::TargetShape {
            expected: output_shape.to_vec(),
            found: labels.shape().to_vec(),
        });
    }

    let flat = labels.to_shape((batch, voxels))?;
    let off_target = -1.0 / (num_classes as f32 - 1.0);
    let mut encoded = Array3::from_elem((batch, num_classes, voxels), off_target);
    for ((n, v), &label) in flat.indexed_iter() {
        if label >= num_classes {
            return Err(CascadeError::LabelOutOfRange { label, num_classes });
        }
        encoded[[n, label, v]] = 1.0;
    }
    Ok(encoded.into_shape_with_order(IxDyn(output_shape))?)
}

/// Log-decade histogram of sample weights.
///
/// Bin edges are `1e-5, 1e-4, ..., 1e4`; values outside that range are not
/// counted. The last bin includes its right edge.
pub fn weight_histogram(weights: ArrayViewD<'_, f32>) -> [usize; 9] {
    let mut counts = [0usize; 9];
    for &w in weights.iter() {
        if !(1e-5..=1e4).contains(&w) {
            continue;
        }
        let bin = (w.log10().floor() as i32 + 5).clamp(0, 8) as usize;
        counts[bin] += 1;
    }
    counts
}
