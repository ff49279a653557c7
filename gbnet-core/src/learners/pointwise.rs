//! Pointwise convolution: a kernel of extent 1 along every spatial axis.
//!
//! `out[n, o, v] = sum_i w[o, i] * x[n, i, v] + b[o]` for every voxel `v`.
//! The weight is stored conv-shaped (`[out, in, 1, ..., 1]`) so the reset hook
//! computes the same fans it would for any other convolution. Samples of a
//! batch are processed in parallel.

use ndarray::{stack, Array2, ArrayD, ArrayView2, ArrayViewD, Axis, IxDyn, ShapeError};
use rand::Rng;
use rayon::prelude::*;

use crate::init::xavier_normal;
use crate::learner::{
    BaseLearner, LayerKind, LearnerError, LearnerMode, ParamRole, Parameter,
};

/// Single pointwise convolution layer.
#[derive(Debug, Clone)]
pub struct PointwiseConv {
    name: String,
    in_channels: usize,
    out_channels: usize,
    weight: Parameter,
    bias: Option<Parameter>,
    mode: LearnerMode,
}

fn conv_shape(out_channels: usize, in_channels: usize, spatial_rank: usize) -> Vec<usize> {
    let mut shape = vec![out_channels, in_channels];
    shape.extend(std::iter::repeat(1).take(spatial_rank));
    shape
}

impl PointwiseConv {
    /// Xavier-normal weights, zero bias.
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        spatial_rank: usize,
        with_bias: bool,
        rng: &mut R,
    ) -> Self {
        let mut weight = ArrayD::zeros(IxDyn(&conv_shape(
            out_channels,
            in_channels,
            spatial_rank,
        )));
        xavier_normal(&mut weight, rng);
        let bias = with_bias.then(|| ArrayD::zeros(IxDyn(&[out_channels])));
        Self::assemble(name.into(), in_channels, out_channels, weight, bias)
    }

    /// Build from an explicit `[out, in]` channel-mixing matrix.
    pub fn from_weights(
        name: impl Into<String>,
        weight: Array2<f32>,
        bias: Option<Vec<f32>>,
        spatial_rank: usize,
    ) -> Result<Self, ShapeError> {
        let (out_channels, in_channels) = weight.dim();
        let weight =
            weight.into_shape_with_order(IxDyn(&conv_shape(out_channels, in_channels, spatial_rank)))?;
        let bias = match bias {
            Some(values) => Some(ArrayD::from_shape_vec(IxDyn(&[out_channels]), values)?),
            None => None,
        };
        Ok(Self::assemble(name.into(), in_channels, out_channels, weight, bias))
    }

    fn assemble(
        name: String,
        in_channels: usize,
        out_channels: usize,
        weight: ArrayD<f32>,
        bias: Option<ArrayD<f32>>,
    ) -> Self {
        let layer = format!("{name}.conv");
        Self {
            weight: Parameter::new(layer.clone(), LayerKind::Conv, ParamRole::Weight, weight),
            bias: bias.map(|b| Parameter::new(layer, LayerKind::Conv, ParamRole::Bias, b)),
            name,
            in_channels,
            out_channels,
            mode: LearnerMode::Eval,
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn other(&self, err: ShapeError) -> LearnerError {
        LearnerError::Other {
            learner: self.name.clone(),
            message: err.to_string(),
        }
    }

    fn mix(&self, w: &ArrayView2<'_, f32>, sample: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut y = w.dot(&sample);
        if let Some(bias) = &self.bias {
            for (mut row, &b) in y.outer_iter_mut().zip(bias.value.iter()) {
                row += b;
            }
        }
        y
    }
}

impl BaseLearner for PointwiseConv {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&self, input: ArrayViewD<'_, f32>) -> Result<ArrayD<f32>, LearnerError> {
        let rank = self.weight.value.ndim();
        if input.ndim() != rank {
            return Err(LearnerError::RankMismatch {
                learner: self.name.clone(),
                expected: rank,
                found: input.ndim(),
            });
        }
        let shape = input.shape().to_vec();
        if shape[1] != self.in_channels {
            return Err(LearnerError::ChannelMismatch {
                learner: self.name.clone(),
                expected: self.in_channels,
                found: shape[1],
            });
        }

        let batch = shape[0];
        let voxels: usize = shape[2..].iter().product();
        let x = input
            .to_shape((batch, self.in_channels, voxels))
            .map_err(|e| self.other(e))?;
        let w = self
            .weight
            .value
            .to_shape((self.out_channels, self.in_channels))
            .map_err(|e| self.other(e))?;
        let w = w.view();

        let samples: Vec<Array2<f32>> = (0..batch)
            .into_par_iter()
            .map(|n| self.mix(&w, x.index_axis(Axis(0), n)))
            .collect();
        let views: Vec<ArrayView2<'_, f32>> = samples.iter().map(|s| s.view()).collect();
        let stacked = stack(Axis(0), &views).map_err(|e| self.other(e))?;

        let mut out_shape = shape;
        out_shape[1] = self.out_channels;
        stacked
            .into_shape_with_order(IxDyn(&out_shape))
            .map_err(|e| self.other(e))
    }

    fn set_mode(&mut self, mode: LearnerMode) {
        self.mode = mode;
    }

    fn mode(&self) -> LearnerMode {
        self.mode
    }

    fn parameters(&self) -> Vec<&Parameter> {
        std::iter::once(&self.weight).chain(self.bias.as_ref()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        std::iter::once(&mut self.weight)
            .chain(self.bias.as_mut())
            .collect()
    }
}
