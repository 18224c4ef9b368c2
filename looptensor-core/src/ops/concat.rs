use super::NodeContext;
use crate::{tensor::Buffer, DType, ElementType, Error, Result, Shape, Tensor};

const OP: &str = "Concat";

/// Output shape of joining `shapes` along the first axis.
fn concat_shape<'a>(shapes: impl IntoIterator<Item = &'a Shape>) -> Result<Shape> {
    let mut leading = 0;
    let mut trailing: Option<&[usize]> = None;
    for shape in shapes {
        let rest = shape.dims().get(1..).unwrap_or(&[]);
        if let Some(expected) = trailing.filter(|expected| *expected != rest) {
            return Err(Error::shape_mismatch(format!(
                "{OP} inputs disagree beyond the first axis: {expected:?} vs {rest:?}"
            )));
        }
        trailing = Some(rest);
        leading += shape.leading_dim();
    }
    let mut dims = vec![leading];
    dims.extend_from_slice(trailing.unwrap_or(&[]));
    Ok(dims.into())
}

pub(super) fn prepare(ctx: &mut NodeContext<'_>) -> Result<()> {
    if ctx.num_inputs() == 0 || ctx.num_outputs() != 1 {
        return Err(Error::shape_mismatch(format!(
            "{OP} takes at least one input and one output, got {} and {}",
            ctx.num_inputs(),
            ctx.num_outputs()
        )));
    }
    let dtype = ctx.output(0)?.dtype();
    let mut deferred = false;
    let mut shapes = Vec::with_capacity(ctx.num_inputs());
    for position in 0..ctx.num_inputs() {
        let input = ctx.input(position)?;
        if input.dtype() != dtype {
            return Err(Error::type_mismatch(
                format!("{OP} input {position}"),
                dtype,
                input.dtype(),
            ));
        }
        deferred |= input.is_deferred();
        shapes.push(input.shape().clone());
    }
    if deferred {
        return ctx.defer_output(0);
    }
    ctx.resize_output(0, concat_shape(&shapes)?)?;
    Ok(())
}

fn concat_values<T: DType>(inputs: &[Tensor], len: usize) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailure {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    for input in inputs {
        out.extend_from_slice(input.data::<T>()?);
    }
    Ok(out)
}

pub(super) fn eval(ctx: &mut NodeContext<'_>) -> Result<()> {
    let inputs = (0..ctx.num_inputs())
        .map(|position| ctx.input(position).cloned())
        .collect::<Result<Vec<_>>>()?;
    let shape = concat_shape(inputs.iter().map(Tensor::shape))?;
    let len = shape.element_count();
    let joined: Buffer = match ctx.output(0)?.dtype() {
        ElementType::Bool => concat_values::<bool>(&inputs, len)?.into(),
        ElementType::UInt8 => concat_values::<u8>(&inputs, len)?.into(),
        ElementType::Int32 => concat_values::<i32>(&inputs, len)?.into(),
        ElementType::Int64 => concat_values::<i64>(&inputs, len)?.into(),
        ElementType::Float32 => concat_values::<f32>(&inputs, len)?.into(),
        ElementType::Float64 => concat_values::<f64>(&inputs, len)?.into(),
        ElementType::String => concat_values::<String>(&inputs, len)?.into(),
    };
    ctx.resize_output(0, shape)?.set_storage(joined)
}
