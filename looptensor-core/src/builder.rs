//! Builders for small control-flow models.
//!
//! Input and output tensors start out as scalars; the `While` operator and
//! [`Interpreter::resize_input_tensor`](crate::Interpreter::resize_input_tensor)
//! give them their real shapes.

use crate::{
    ops::{BinaryOpType, CompareOpType, Op},
    subgraph::Subgraph,
    ElementType, Result, Shape, Tensor, WhileController,
};

/// Subgraph index [`build_while_subgraph`] uses for the condition.
pub const COND_SUBGRAPH: usize = 1;
/// Subgraph index [`build_while_subgraph`] uses for the body.
pub const BODY_SUBGRAPH: usize = 2;

fn add_tensors(subgraph: &mut Subgraph, dtypes: &[ElementType]) -> Vec<usize> {
    dtypes
        .iter()
        .map(|&dtype| subgraph.add_tensor(Tensor::new(dtype, Shape::scalar())))
        .collect()
}

/// `input[0] <= rhs`, with a second, unused input.
pub fn build_less_equal_cond_subgraph(subgraph: &mut Subgraph, rhs: i32) -> Result<()> {
    let t = add_tensors(
        subgraph,
        &[ElementType::Int32, ElementType::Int32, ElementType::Bool],
    );
    let rhs = subgraph.add_constant([1], vec![rhs])?;
    subgraph.set_inputs(vec![t[0], t[1]])?;
    subgraph.set_outputs(vec![t[2]])?;
    subgraph.add_node(Op::Compare(CompareOpType::LessEqual), vec![t[0], rhs], vec![t[2]])?;
    Ok(())
}

/// `counter + 1` and `accumulator + (counter + 1)`.
pub fn build_accumulate_loop_body_subgraph(subgraph: &mut Subgraph) -> Result<()> {
    let t = add_tensors(subgraph, &[ElementType::Int32; 4]);
    let one = subgraph.add_constant([1], vec![1i32])?;
    subgraph.set_inputs(vec![t[0], t[1]])?;
    subgraph.set_outputs(vec![t[2], t[3]])?;
    subgraph.add_node(Op::Binary(BinaryOpType::Add), vec![t[0], one], vec![t[2]])?;
    subgraph.add_node(Op::Binary(BinaryOpType::Add), vec![t[2], t[1]], vec![t[3]])?;
    Ok(())
}

/// `counter + 1` and the value padded by `padding` (before, after) zeros.
pub fn build_pad_loop_body_subgraph(subgraph: &mut Subgraph, padding: [i32; 2]) -> Result<()> {
    let t = add_tensors(subgraph, &[ElementType::Int32; 4]);
    let one = subgraph.add_constant([1], vec![1i32])?;
    let paddings = subgraph.add_constant([1, 2], padding.to_vec())?;
    subgraph.set_inputs(vec![t[0], t[1]])?;
    subgraph.set_outputs(vec![t[2], t[3]])?;
    subgraph.add_node(Op::Binary(BinaryOpType::Add), vec![t[0], one], vec![t[2]])?;
    subgraph.add_node(Op::Pad, vec![t[1], paddings], vec![t[3]])?;
    Ok(())
}

/// A single `While` over two `Int32` values, calling subgraphs
/// [`COND_SUBGRAPH`] and [`BODY_SUBGRAPH`].
pub fn build_while_subgraph(subgraph: &mut Subgraph) -> Result<()> {
    build_while(subgraph, &[ElementType::Int32, ElementType::Int32])
}

/// `input[2] <= rhs` over two strings and an `Int32` counter.
pub fn build_less_equal_cond_subgraph_with_dynamic_tensor(
    subgraph: &mut Subgraph,
    rhs: i32,
) -> Result<()> {
    let t = add_tensors(
        subgraph,
        &[
            ElementType::String,
            ElementType::String,
            ElementType::Int32,
            ElementType::Bool,
        ],
    );
    let rhs = subgraph.add_constant([1], vec![rhs])?;
    subgraph.set_inputs(vec![t[0], t[1], t[2]])?;
    subgraph.set_outputs(vec![t[3]])?;
    subgraph.add_node(Op::Compare(CompareOpType::LessEqual), vec![t[2], rhs], vec![t[3]])?;
    Ok(())
}

/// Passes the first string through, appends it to the second, and counts.
pub fn build_body_subgraph_with_dynamic_tensor(subgraph: &mut Subgraph) -> Result<()> {
    let t = add_tensors(
        subgraph,
        &[
            ElementType::String,
            ElementType::String,
            ElementType::Int32,
            ElementType::String,
            ElementType::Int32,
        ],
    );
    let one = subgraph.add_constant([1], vec![1i32])?;
    subgraph.set_inputs(vec![t[0], t[1], t[2]])?;
    subgraph.set_outputs(vec![t[0], t[3], t[4]])?;
    subgraph.add_node(Op::Concat, vec![t[1], t[0]], vec![t[3]])?;
    subgraph.add_node(Op::Binary(BinaryOpType::Add), vec![t[2], one], vec![t[4]])?;
    Ok(())
}

/// A single `While` over two strings and an `Int32` counter.
pub fn build_while_subgraph_with_dynamic_tensor(subgraph: &mut Subgraph) -> Result<()> {
    build_while(
        subgraph,
        &[ElementType::String, ElementType::String, ElementType::Int32],
    )
}

fn build_while(subgraph: &mut Subgraph, dtypes: &[ElementType]) -> Result<()> {
    let inputs = add_tensors(subgraph, dtypes);
    let outputs = add_tensors(subgraph, dtypes);
    subgraph.set_inputs(inputs.clone())?;
    subgraph.set_outputs(outputs.clone())?;
    subgraph.add_node(
        Op::While(WhileController::new(COND_SUBGRAPH, BODY_SUBGRAPH)),
        inputs,
        outputs,
    )?;
    Ok(())
}
