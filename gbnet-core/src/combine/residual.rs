//! Residual combination: `acc = acc * scale + output_i`.

use crate::error::CascadeError;
use crate::state::StageContext;
use crate::tensor::Variable;

use super::CombinationStrategy;

/// Scaled running sum of stage outputs.
///
/// When the last active stage is folded outside end-to-end mode, the running
/// sum is detached first, so gradient reaches only the newest stage.
#[derive(Debug, Clone)]
pub struct ResidualSum {
    scale: f32,
    acc: Variable,
}

impl ResidualSum {
    pub fn new(scale: f32, first_output: Variable) -> Self {
        Self {
            scale,
            acc: first_output,
        }
    }

    pub fn accumulator(&self) -> &Variable {
        &self.acc
    }
}

impl CombinationStrategy for ResidualSum {
    fn name(&self) -> &str {
        "residual"
    }

    fn fold(&mut self, output: Variable, ctx: &StageContext) -> Result<(), CascadeError> {
        if ctx.is_last() && !ctx.is_end_to_end {
            self.acc.detach_in_place();
        }
        self.acc.scale_in_place(self.scale);
        self.acc.add_in_place(&output);
        Ok(())
    }

    fn context(&self) -> &Variable {
        &self.acc
    }

    fn snapshot(&self) -> (Variable, Option<Variable>) {
        (self.acc.clone(), None)
    }

    fn finish(self: Box<Self>) -> (Variable, Option<Variable>) {
        (self.acc, None)
    }
}
