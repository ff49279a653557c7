//! Reference learners.
//!
//! Production stages are encoder/decoder networks supplied by the caller.
//! These two are small enough to reason about exactly and are what the CLI
//! simulation, the benches and the tests run:
//! - `PointwiseConv`: one 1×…×1 convolution mixing channels per voxel
//! - `ConstantLearner`: emits fixed per-class logits regardless of input

pub mod constant;
pub mod pointwise;

pub use constant::ConstantLearner;
pub use pointwise::PointwiseConv;
