use super::NodeContext;
use crate::{
    tensor::{with_buffer, Buffer},
    AllocationKind, ElementType, Error, Result, Shape,
};

const OP: &str = "Pad";

/// `(before, after)` amounts per dimension from an `Int32` paddings tensor.
fn paddings(values: &[i32], rank: usize) -> Result<Vec<(usize, usize)>> {
    if values.len() != rank * 2 {
        return Err(Error::shape_mismatch(format!(
            "{OP} needs {} padding values for rank {rank}, got {}",
            rank * 2,
            values.len()
        )));
    }
    values
        .chunks_exact(2)
        .map(|pair| match (usize::try_from(pair[0]), usize::try_from(pair[1])) {
            (Ok(before), Ok(after)) => Ok((before, after)),
            _ => Err(Error::shape_mismatch(format!(
                "{OP} paddings must be non-negative, got {pair:?}"
            ))),
        })
        .collect()
}

fn padded_shape(input: &Shape, pads: &[(usize, usize)]) -> Shape {
    input
        .dims()
        .iter()
        .zip(pads)
        .map(|(dim, (before, after))| before + dim + after)
        .collect::<Vec<_>>()
        .into()
}

pub(super) fn prepare(ctx: &mut NodeContext<'_>) -> Result<()> {
    ctx.expect_arity(OP, 2, 1)?;
    let input = ctx.input(0)?;
    let pads = ctx.input(1)?;
    if pads.dtype() != ElementType::Int32 {
        return Err(Error::type_mismatch(
            format!("{OP} paddings"),
            ElementType::Int32,
            pads.dtype(),
        ));
    }
    let output = ctx.output(0)?.dtype();
    if output != input.dtype() {
        return Err(Error::type_mismatch(format!("{OP} output"), input.dtype(), output));
    }
    if input.is_deferred() {
        return ctx.defer_output(0);
    }
    let rank = input.shape().rank();
    if pads.dims() != [rank, 2] {
        return Err(Error::shape_mismatch(format!(
            "{OP} paddings for rank {rank} must have shape [{rank}, 2], got {}",
            pads.shape()
        )));
    }
    if pads.kind() != AllocationKind::Constant {
        return ctx.defer_output(0);
    }
    let shape = padded_shape(input.shape(), &paddings(pads.data::<i32>()?, rank)?);
    ctx.resize_output(0, shape)?;
    Ok(())
}

/// Copy `src` into a default-filled buffer of `out_shape`, offset by `before`.
fn pad_values<T: Clone + Default>(
    src: &[T],
    in_shape: &Shape,
    out_shape: &Shape,
    pads: &[(usize, usize)],
) -> Result<Vec<T>> {
    let len = out_shape.element_count();
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    out.resize(len, T::default());

    let in_strides = in_shape.strides();
    let out_strides = out_shape.strides();
    for (i, value) in src.iter().enumerate() {
        let offset: usize = in_strides
            .iter()
            .zip(&out_strides)
            .zip(in_shape.dims())
            .zip(pads)
            .map(|(((in_stride, out_stride), dim), (before, _))| {
                (i / in_stride % dim + before) * out_stride
            })
            .sum();
        out[offset] = value.clone();
    }
    Ok(out)
}

pub(super) fn eval(ctx: &mut NodeContext<'_>) -> Result<()> {
    let input = ctx.input(0)?.clone();
    let rank = input.shape().rank();
    let pads = paddings(ctx.input(1)?.data::<i32>()?, rank)?;
    let shape = padded_shape(input.shape(), &pads);
    let source = input
        .buffer()
        .ok_or(Error::UninitializedTensor)?
        .as_buffer();
    let padded = with_buffer!(source, data => {
        Buffer::from(pad_values(data, input.shape(), &shape, &pads)?)
    });
    ctx.resize_output(0, shape)?.set_storage(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_each_dimension() {
        let input = Shape::from([2, 2]);
        let pads = paddings(&[1, 0, 0, 1], 2).unwrap();
        let out = padded_shape(&input, &pads);
        assert_eq!(out.dims(), &[3, 3]);
        let values = pad_values(&[1, 2, 3, 4], &input, &out, &pads).unwrap();
        assert_eq!(values, vec![0, 0, 0, 1, 2, 0, 3, 4, 0]);
    }

    #[test]
    fn scalar_input_is_unchanged() {
        let pads = paddings(&[], 0).unwrap();
        let out = padded_shape(&Shape::scalar(), &pads);
        assert_eq!(out, Shape::scalar());
        assert_eq!(
            pad_values(&[7i32], &Shape::scalar(), &out, &pads).unwrap(),
            vec![7]
        );
    }

    #[test]
    fn negative_paddings_are_rejected() {
        assert!(matches!(
            paddings(&[-1, 2], 1),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
