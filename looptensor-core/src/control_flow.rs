//! The `While` operator.
//!
//! A [`WhileController`] refers to a condition and a body subgraph by their
//! index in the interpreter's subgraph table. Each invocation threads a loop
//! state, owned by the controller for the duration of that invocation only,
//! through alternating condition and body runs:
//!
//! ```text
//! Idle -> Evaluating -> (BodyExecuting -> Evaluating)* -> Finalizing -> Idle
//! ```

use crate::{
    ops::NodeContext,
    subgraph::Subgraph,
    transfer::{Access, TransferPolicy},
    ElementType, Error, Result, Shape, Tensor,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WhileState {
    #[default]
    Idle,
    /// Running the condition subgraph on the current loop state.
    Evaluating,
    /// Running the body subgraph to produce the next loop state.
    BodyExecuting,
    /// Copying the final loop state into the operator outputs.
    Finalizing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WhileController {
    cond_subgraph: usize,
    body_subgraph: usize,
    /// Some body output can change shape between iterations.
    body_has_dynamic_outputs: bool,
    state: WhileState,
    iterations: usize,
}

/// Element type and shape of one loop-carried value, `None` while unknown.
type SlotSignature = (ElementType, Option<Shape>);

impl WhileController {
    pub fn new(cond_subgraph: usize, body_subgraph: usize) -> Self {
        Self {
            cond_subgraph,
            body_subgraph,
            body_has_dynamic_outputs: false,
            state: WhileState::Idle,
            iterations: 0,
        }
    }

    pub fn cond_subgraph(&self) -> usize {
        self.cond_subgraph
    }

    pub fn body_subgraph(&self) -> usize {
        self.body_subgraph
    }

    pub fn body_has_dynamic_outputs(&self) -> bool {
        self.body_has_dynamic_outputs
    }

    /// `Idle` whenever no invocation is in progress.
    pub fn state(&self) -> WhileState {
        self.state
    }

    /// Body executions during the most recent invocation.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn enter(&mut self, next: WhileState) {
        tracing::trace!(from = ?self.state, to = ?next, iteration = self.iterations, "while");
        self.state = next;
    }

    pub(crate) fn prepare(&mut self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let n = ctx.num_inputs();
        if n == 0 || ctx.num_outputs() != n {
            return Err(Error::shape_mismatch(format!(
                "While needs as many outputs as inputs (at least one), got {n} inputs and {} outputs",
                ctx.num_outputs()
            )));
        }
        let mut slots: Vec<SlotSignature> = Vec::with_capacity(n);
        for position in 0..n {
            let input = ctx.input(position)?;
            let output = ctx.output(position)?;
            if output.dtype() != input.dtype() {
                return Err(Error::type_mismatch(
                    format!("While output {position}"),
                    input.dtype(),
                    output.dtype(),
                ));
            }
            let shape = (!input.is_deferred()).then(|| input.shape().clone());
            slots.push((input.dtype(), shape));
        }

        let options = ctx.options;
        ctx.table.with(self.cond_subgraph, |cond, table| {
            bind_inputs("condition", cond, &slots)?;
            cond.allocate(table, options)?;
            check_condition_output(cond)
        })?;
        let dynamic = ctx.table.with(self.body_subgraph, |body, table| {
            bind_inputs("body", body, &slots)?;
            if body.outputs().len() != n {
                return Err(Error::shape_mismatch(format!(
                    "body subgraph has {} outputs for {n} loop-carried values",
                    body.outputs().len()
                )));
            }
            body.allocate(table, options)?;
            let mut dynamic = false;
            for (position, (dtype, shape)) in slots.iter().enumerate() {
                let output = body
                    .output_tensor(position)
                    .ok_or(Error::InvalidTensor { index: position })?;
                if output.dtype() != *dtype {
                    return Err(Error::type_mismatch(
                        format!("body output {position}"),
                        *dtype,
                        output.dtype(),
                    ));
                }
                dynamic |= output.is_deferred() || shape.as_ref() != Some(output.shape());
            }
            Ok(dynamic)
        })?;
        self.body_has_dynamic_outputs = dynamic;
        tracing::debug!(
            cond = self.cond_subgraph,
            body = self.body_subgraph,
            dynamic,
            "prepared while"
        );

        for (position, (_, shape)) in slots.into_iter().enumerate() {
            match shape {
                Some(shape) if !dynamic => {
                    ctx.resize_output(position, shape)?;
                }
                _ => ctx.defer_output(position)?,
            }
        }
        Ok(())
    }

    pub(crate) fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<()> {
        self.iterations = 0;
        let result = self.run(ctx);
        if let Err(err) = &result {
            tracing::debug!(state = ?self.state, iterations = self.iterations, "while failed: {err}");
        }
        self.enter(WhileState::Idle);
        result
    }

    fn run(&mut self, ctx: &mut NodeContext<'_>) -> Result<()> {
        let policy = ctx.options.transfer_policy();
        let mut loop_state = Vec::with_capacity(ctx.num_inputs());
        for position in 0..ctx.num_inputs() {
            let input = ctx.input(position)?;
            let mut slot = Tensor::dynamic_slot(input.dtype());
            policy.transfer(input, &mut slot, Access::Exclusive)?;
            loop_state.push(slot);
        }

        self.enter(WhileState::Evaluating);
        loop {
            match self.state {
                WhileState::Evaluating => {
                    let next = if self.evaluate_condition(ctx, &policy, &loop_state)? {
                        WhileState::BodyExecuting
                    } else {
                        WhileState::Finalizing
                    };
                    self.enter(next);
                }
                WhileState::BodyExecuting => {
                    if let Some(limit) = ctx.options.max_while_iterations {
                        if self.iterations >= limit {
                            return Err(Error::IterationLimitExceeded { limit });
                        }
                    }
                    self.execute_body(ctx, &policy, &mut loop_state)?;
                    self.iterations += 1;
                    self.enter(WhileState::Evaluating);
                }
                WhileState::Finalizing => {
                    // Past these checks only an allocation failure can stop
                    // the outputs being written part way.
                    for (position, value) in loop_state.iter().enumerate() {
                        check_final_value(position, value, ctx.output(position)?)?;
                    }
                    for (position, value) in loop_state.iter().enumerate() {
                        let output = ctx.output_mut(position)?;
                        if let Some(released) = policy.transfer(value, output, Access::Exclusive)? {
                            ctx.recycle(released);
                        }
                    }
                    return Ok(());
                }
                WhileState::Idle => crate::bail!("while loop left its state machine"),
            }
        }
    }

    fn evaluate_condition(
        &self,
        ctx: &mut NodeContext<'_>,
        policy: &TransferPolicy,
        loop_state: &[Tensor],
    ) -> Result<bool> {
        let options = ctx.options;
        ctx.table.with(self.cond_subgraph, |cond, table| {
            let result = feed_inputs(cond, loop_state, policy, Access::ReadOnly)
                .and_then(|()| cond.invoke(table, options))
                .and_then(|()| {
                    let output = cond.output_tensor(0).ok_or_else(|| {
                        Error::shape_mismatch("condition subgraph has no output")
                    })?;
                    match output.data::<bool>()? {
                        [flag] => Ok(*flag),
                        _ => Err(Error::shape_mismatch(format!(
                            "condition output must hold one element, has shape {}",
                            output.shape()
                        ))),
                    }
                });
            cond.release_input_aliases();
            result
        })
    }

    fn execute_body(
        &self,
        ctx: &mut NodeContext<'_>,
        policy: &TransferPolicy,
        loop_state: &mut [Tensor],
    ) -> Result<()> {
        let options = ctx.options;
        ctx.table.with(self.body_subgraph, |body, table| {
            feed_inputs(body, loop_state, policy, Access::Exclusive)?;
            body.invoke(table, options)?;
            for (position, slot) in loop_state.iter_mut().enumerate() {
                let access = if body.is_pass_through(position) {
                    Access::Forwarded
                } else {
                    Access::Exclusive
                };
                let output = body
                    .output_tensor(position)
                    .ok_or(Error::InvalidTensor { index: position })?;
                policy.transfer(output, slot, access)?;
            }
            Ok(())
        })
    }
}

fn feed_inputs(
    subgraph: &mut Subgraph,
    values: &[Tensor],
    policy: &TransferPolicy,
    access: Access,
) -> Result<()> {
    for (position, value) in values.iter().enumerate() {
        subgraph.feed_input(position, value, policy, access)?;
    }
    Ok(())
}

/// Check a subgraph's inputs against the loop-carried values and give them
/// the values' shapes.
fn bind_inputs(role: &str, subgraph: &mut Subgraph, slots: &[SlotSignature]) -> Result<()> {
    if subgraph.inputs().len() != slots.len() {
        return Err(Error::shape_mismatch(format!(
            "{role} subgraph has {} inputs for {} loop-carried values",
            subgraph.inputs().len(),
            slots.len()
        )));
    }
    for (position, (dtype, shape)) in slots.iter().enumerate() {
        let actual = subgraph
            .input_tensor(position)
            .map(Tensor::dtype)
            .ok_or(Error::InvalidTensor { index: position })?;
        if actual != *dtype {
            return Err(Error::type_mismatch(
                format!("{role} input {position}"),
                *dtype,
                actual,
            ));
        }
        subgraph.shape_input(position, shape.as_ref())?;
    }
    Ok(())
}

fn check_condition_output(cond: &Subgraph) -> Result<()> {
    if cond.outputs().len() != 1 {
        return Err(Error::shape_mismatch(format!(
            "condition subgraph must have one output, has {}",
            cond.outputs().len()
        )));
    }
    let output = cond
        .output_tensor(0)
        .ok_or(Error::InvalidTensor { index: 0 })?;
    if output.dtype() != ElementType::Bool {
        return Err(Error::type_mismatch(
            "condition output",
            ElementType::Bool,
            output.dtype(),
        ));
    }
    if !output.is_deferred() && output.shape().element_count() != 1 {
        return Err(Error::shape_mismatch(format!(
            "condition output must hold one element, has shape {}",
            output.shape()
        )));
    }
    Ok(())
}

/// A final loop value must be writable into operator output `position`.
fn check_final_value(position: usize, value: &Tensor, output: &Tensor) -> Result<()> {
    if value.dtype() != output.dtype() {
        return Err(Error::type_mismatch(
            format!("While output {position}"),
            output.dtype(),
            value.dtype(),
        ));
    }
    if !value.is_allocated() {
        return Err(Error::UninitializedTensor);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_values_are_checked_before_any_output_is_written() {
        let mut counter = Tensor::dynamic_slot(ElementType::Int32);
        counter.copy_from_slice(&[4i32]).unwrap();
        let output = Tensor::new(ElementType::Int32, [1]);
        check_final_value(0, &counter, &output).unwrap();

        let unwritten = Tensor::dynamic_slot(ElementType::Int32);
        assert!(matches!(
            check_final_value(1, &unwritten, &output),
            Err(Error::UninitializedTensor)
        ));

        let text = Tensor::new(ElementType::String, [1]);
        let err = check_final_value(2, &counter, &text).unwrap_err();
        assert!(matches!(
            err.inner(),
            Error::TypeMismatch {
                expected: ElementType::String,
                actual: ElementType::Int32,
                ..
            }
        ));
    }
}
