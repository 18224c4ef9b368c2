mod arithmetic;
mod concat;
mod pad;

pub use arithmetic::{BinaryOpType, CompareOpType, Numeric};

use crate::{
    arena::Arena, control_flow::WhileController, executor::SubgraphTable, tensor::Buffer,
    AllocationKind, ElementType, Error, InterpreterOptions, Result, Shape, Tensor,
};

/// Operators a subgraph can run.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Elementwise numeric arithmetic.
    Binary(BinaryOpType),
    /// Elementwise comparison producing `Bool`.
    Compare(CompareOpType),
    /// Zero padding; the second input holds `Int32` paddings of shape `[rank, 2]`.
    Pad,
    /// Concatenation along the first axis. Scalars count as one element.
    Concat,
    While(WhileController),
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Binary(_) => "Binary",
            Self::Compare(_) => "Compare",
            Self::Pad => "Pad",
            Self::Concat => "Concat",
            Self::While(_) => "While",
        }
    }

    /// Node label used when rendering a subgraph.
    pub fn label(&self) -> String {
        match self {
            Self::Binary(op) => format!("{op:?}"),
            Self::Compare(op) => format!("{op:?}"),
            Self::While(w) => format!(
                "While(cond={}, body={})",
                w.cond_subgraph(),
                w.body_subgraph()
            ),
            other => other.name().to_string(),
        }
    }

    pub fn as_while(&self) -> Option<&WhileController> {
        match self {
            Self::While(w) => Some(w),
            _ => None,
        }
    }

    /// Validate inputs and set up output shapes during an allocation pass.
    pub(crate) fn prepare(&mut self, ctx: &mut NodeContext<'_>) -> Result<()> {
        match self {
            Self::Binary(op) => arithmetic::prepare(ctx, op.name(), None),
            Self::Compare(op) => {
                arithmetic::prepare(ctx, op.name(), Some(ElementType::Bool))
            }
            Self::Pad => pad::prepare(ctx),
            Self::Concat => concat::prepare(ctx),
            Self::While(w) => w.prepare(ctx),
        }
    }

    pub(crate) fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<()> {
        match self {
            Self::Binary(op) => arithmetic::eval_binary(ctx, *op),
            Self::Compare(op) => arithmetic::eval_compare(ctx, *op),
            Self::Pad => pad::eval(ctx),
            Self::Concat => concat::eval(ctx),
            Self::While(w) => w.eval(ctx),
        }
    }
}

/// One operator application inside a subgraph.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub(crate) op: Op,
    pub(crate) inputs: Vec<usize>,
    pub(crate) outputs: Vec<usize>,
}

impl Node {
    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[usize] {
        &self.outputs
    }
}

/// What an operator sees while it prepares or runs: its own tensors, the
/// owning subgraph's arena, and the rest of the subgraph table.
pub(crate) struct NodeContext<'a> {
    tensors: &'a mut [Tensor],
    inputs: &'a [usize],
    outputs: &'a [usize],
    arena: &'a mut Arena,
    pub(crate) table: &'a mut SubgraphTable,
    pub(crate) options: &'a InterpreterOptions,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        tensors: &'a mut [Tensor],
        inputs: &'a [usize],
        outputs: &'a [usize],
        arena: &'a mut Arena,
        table: &'a mut SubgraphTable,
        options: &'a InterpreterOptions,
    ) -> Self {
        Self {
            tensors,
            inputs,
            outputs,
            arena,
            table,
            options,
        }
    }

    pub(crate) fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub(crate) fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub(crate) fn expect_arity(&self, op: &str, inputs: usize, outputs: usize) -> Result<()> {
        if self.inputs.len() != inputs || self.outputs.len() != outputs {
            return Err(Error::shape_mismatch(format!(
                "{op} takes {inputs} inputs and {outputs} outputs, got {} and {}",
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        Ok(())
    }

    pub(crate) fn input(&self, position: usize) -> Result<&Tensor> {
        let index = *self.inputs.get(position).ok_or_else(|| {
            Error::shape_mismatch(format!("operator has no input {position}"))
        })?;
        self.tensors
            .get(index)
            .ok_or(Error::InvalidTensor { index })
    }

    pub(crate) fn output(&self, position: usize) -> Result<&Tensor> {
        let index = self.output_index(position)?;
        self.tensors
            .get(index)
            .ok_or(Error::InvalidTensor { index })
    }

    pub(crate) fn output_mut(&mut self, position: usize) -> Result<&mut Tensor> {
        let index = self.output_index(position)?;
        self.tensors
            .get_mut(index)
            .ok_or(Error::InvalidTensor { index })
    }

    fn output_index(&self, position: usize) -> Result<usize> {
        self.outputs
            .get(position)
            .copied()
            .ok_or_else(|| Error::shape_mismatch(format!("operator has no output {position}")))
    }

    /// Resize an output, recycling any arena storage it gives up.
    pub(crate) fn resize_output(&mut self, position: usize, shape: Shape) -> Result<&mut Tensor> {
        let index = self.output_index(position)?;
        let tensor = self
            .tensors
            .get_mut(index)
            .ok_or(Error::InvalidTensor { index })?;
        if let Some(released) = tensor.resize(shape)? {
            self.arena.release(released);
        }
        Ok(tensor)
    }

    /// Mark an output whose shape is only known once the operator runs.
    pub(crate) fn defer_output(&mut self, position: usize) -> Result<()> {
        let tensor = self.output_mut(position)?;
        let was_static = tensor.kind() == AllocationKind::Static;
        let released = tensor.take_buffer().and_then(|b| b.try_unwrap().ok());
        tensor.mark_deferred()?;
        if let (true, Some(buffer)) = (was_static, released) {
            self.arena.release(buffer);
        }
        Ok(())
    }

    /// Hand arena storage back to the owning subgraph.
    pub(crate) fn recycle(&mut self, buffer: Buffer) {
        self.arena.release(buffer);
    }
}
