//! Auto-context: stage inputs built from the raw volume and prior predictions.
//!
//! With auto-context on, stage `i > 0` sees `[softmax_c(context), raw]`
//! concatenated along the channel axis, context channels first. The context
//! is read as plain values, so the new input is always a leaf: volatile, or
//! detached with no history, as the volatility policy decides.

use ndarray::{ArrayViewD, CowArray, IxDyn};

use crate::error::CascadeError;
use crate::tensor::{concat_channels, softmax_classes, GradHistory, Variable};

/// Input of one stage. Borrows the raw volume when nothing is concatenated.
#[derive(Debug)]
pub struct StageInput<'a> {
    data: CowArray<'a, f32, IxDyn>,
    history: GradHistory,
}

impl<'a> StageInput<'a> {
    /// The raw volume as-is, as a leaf.
    pub fn raw(input: ArrayViewD<'a, f32>, volatile: bool) -> Self {
        Self {
            data: CowArray::from(input),
            history: GradHistory::leaf(volatile),
        }
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn history(&self) -> &GradHistory {
        &self.history
    }
}

/// Builds stage inputs for stages after the first.
#[derive(Debug, Clone, Copy)]
pub struct AutoContextFeeder {
    enabled: bool,
}

impl AutoContextFeeder {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Input for a stage after the first, given the current accumulator.
    pub fn stage_input<'a>(
        &self,
        raw: ArrayViewD<'a, f32>,
        context: &Variable,
        volatile: bool,
    ) -> Result<StageInput<'a>, CascadeError> {
        if !self.enabled {
            return Ok(StageInput::raw(raw, volatile));
        }
        let probs = softmax_classes(context.view());
        let data = concat_channels(probs.view(), raw.view())?;
        Ok(StageInput {
            data: CowArray::from(data),
            history: GradHistory::leaf(volatile),
        })
    }
}

/// Channel count stage `stage_index` receives; learners must be built with it.
pub fn stage_in_channels(
    stage_index: usize,
    raw_channels: usize,
    num_classes: usize,
    auto_context: bool,
) -> usize {
    if stage_index > 0 && auto_context {
        num_classes + raw_channels
    } else {
        raw_channels
    }
}
