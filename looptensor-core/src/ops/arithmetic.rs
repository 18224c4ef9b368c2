use rayon::prelude::*;

use super::NodeContext;
use crate::{DType, ElementType, Error, Result, Shape, Tensor};

/// Outputs with at least this many elements are computed on the rayon pool.
const PARALLEL_THRESHOLD: usize = 1 << 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOpType {
    Add,
    Div,
    Sub,
    Mul,
}

impl BinaryOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Div => "Div",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
        }
    }

    /// Integer results wrap on overflow. `None` marks an integer division by zero.
    pub fn as_fn<T: Numeric>(&self) -> fn(T, T) -> Option<T> {
        match self {
            Self::Add => |x, y| Some(x.wrapping_add(y)),
            Self::Div => |x, y| x.checked_div(y),
            Self::Sub => |x, y| Some(x.wrapping_sub(y)),
            Self::Mul => |x, y| Some(x.wrapping_mul(y)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOpType {
    Less,
    LessEqual,
    Equal,
}

impl CompareOpType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Less => "Less",
            Self::LessEqual => "LessEqual",
            Self::Equal => "Equal",
        }
    }

    pub fn as_fn<T: Numeric>(&self) -> fn(T, T) -> bool {
        match self {
            Self::Less => |x, y| x < y,
            Self::LessEqual => |x, y| x <= y,
            Self::Equal => |x, y| x == y,
        }
    }
}

/// Element types the arithmetic kernels accept.
pub trait Numeric: DType + Copy + PartialOrd {
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn checked_div(self, rhs: Self) -> Option<Self>;
}

macro_rules! integer_numeric {
    ($($t:ty),*) => {$(
        impl Numeric for $t {
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }
            fn checked_div(self, rhs: Self) -> Option<Self> {
                (rhs != 0).then(|| <$t>::wrapping_div(self, rhs))
            }
        }
    )*};
}

macro_rules! float_numeric {
    ($($t:ty),*) => {$(
        impl Numeric for $t {
            fn wrapping_add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn wrapping_mul(self, rhs: Self) -> Self {
                self * rhs
            }
            fn checked_div(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }
        }
    )*};
}

integer_numeric!(u8, i32, i64);
float_numeric!(f32, f64);

/// Run `$body` with `$T` aliased to the Rust type of a numeric element type.
macro_rules! numeric_dispatch {
    ($dtype:expr, $op:expr, $T:ident => $body:expr) => {
        match $dtype {
            ElementType::UInt8 => {
                type $T = u8;
                $body
            }
            ElementType::Int32 => {
                type $T = i32;
                $body
            }
            ElementType::Int64 => {
                type $T = i64;
                $body
            }
            ElementType::Float32 => {
                type $T = f32;
                $body
            }
            ElementType::Float64 => {
                type $T = f64;
                $body
            }
            other => Err(Error::type_mismatch(
                format!("{} needs numeric operands", $op),
                ElementType::Float32,
                other,
            )),
        }
    };
}

/// Equal shapes, or one single-element operand broadcast against the other.
fn broadcast_shape(op: &str, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    if lhs == rhs {
        Ok(lhs.clone())
    } else if rhs.element_count() == 1 && lhs.rank() >= rhs.rank() {
        Ok(lhs.clone())
    } else if lhs.element_count() == 1 && rhs.rank() >= lhs.rank() {
        Ok(rhs.clone())
    } else {
        Err(Error::shape_mismatch(format!(
            "{op} operands of shape {lhs} and {rhs} do not broadcast"
        )))
    }
}

fn check_operands(ctx: &NodeContext<'_>, op: &str, output: ElementType) -> Result<()> {
    ctx.expect_arity(op, 2, 1)?;
    let (lhs, rhs) = (ctx.input(0)?, ctx.input(1)?);
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::type_mismatch(
            format!("{op} right operand"),
            lhs.dtype(),
            rhs.dtype(),
        ));
    }
    if !lhs.dtype().is_numeric() {
        return Err(Error::type_mismatch(
            format!("{op} needs numeric operands"),
            ElementType::Float32,
            lhs.dtype(),
        ));
    }
    let actual = ctx.output(0)?.dtype();
    if actual != output {
        return Err(Error::type_mismatch(format!("{op} output"), output, actual));
    }
    Ok(())
}

/// `output` is the result element type, `None` meaning the operand type.
pub(super) fn prepare(ctx: &mut NodeContext<'_>, op: &str, output: Option<ElementType>) -> Result<()> {
    ctx.expect_arity(op, 2, 1)?;
    let operand = ctx.input(0)?.dtype();
    check_operands(ctx, op, output.unwrap_or(operand))?;
    let (lhs, rhs) = (ctx.input(0)?, ctx.input(1)?);
    if lhs.is_deferred() || rhs.is_deferred() {
        return ctx.defer_output(0);
    }
    let shape = broadcast_shape(op, lhs.shape(), rhs.shape())?;
    ctx.resize_output(0, shape)?;
    Ok(())
}

/// Apply `f` elementwise, broadcasting single-element operands. Stops with
/// `None` at the first element `f` rejects.
fn zip_broadcast<T, U, F>(lhs: &[T], rhs: &[T], out: &mut [U], f: F) -> Option<()>
where
    T: Copy + Send + Sync,
    U: Send,
    F: Fn(T, T) -> Option<U> + Send + Sync,
{
    let pick = |data: &[T], i: usize| if data.len() == 1 { data[0] } else { data[i] };
    if out.len() >= PARALLEL_THRESHOLD {
        out.par_iter_mut().enumerate().try_for_each(|(i, o)| {
            *o = f(pick(lhs, i), pick(rhs, i))?;
            Some(())
        })
    } else {
        out.iter_mut().enumerate().try_for_each(|(i, o)| {
            *o = f(pick(lhs, i), pick(rhs, i))?;
            Some(())
        })
    }
}

/// Operands are cloned as handles so the output can be borrowed mutably.
fn operands(ctx: &NodeContext<'_>, op: &str) -> Result<(Tensor, Tensor, Shape)> {
    let lhs = ctx.input(0)?.clone();
    let rhs = ctx.input(1)?.clone();
    let shape = broadcast_shape(op, lhs.shape(), rhs.shape())?;
    Ok((lhs, rhs, shape))
}

pub(super) fn eval_binary(ctx: &mut NodeContext<'_>, op: BinaryOpType) -> Result<()> {
    let (lhs, rhs, shape) = operands(ctx, op.name())?;
    let out = ctx.resize_output(0, shape)?;
    numeric_dispatch!(lhs.dtype(), op.name(), T => {
        let f = op.as_fn::<T>();
        zip_broadcast(lhs.data::<T>()?, rhs.data::<T>()?, out.data_for_overwrite::<T>()?, f)
            .ok_or_else(|| {
                Error::msg(format!("{} by zero on {:?} operands", op.name(), lhs.dtype()))
            })
    })
}

pub(super) fn eval_compare(ctx: &mut NodeContext<'_>, op: CompareOpType) -> Result<()> {
    let (lhs, rhs, shape) = operands(ctx, op.name())?;
    let out = ctx.resize_output(0, shape)?;
    numeric_dispatch!(lhs.dtype(), op.name(), T => {
        let f = op.as_fn::<T>();
        zip_broadcast(lhs.data::<T>()?, rhs.data::<T>()?, out.data_for_overwrite::<bool>()?, |x, y| {
            Some(f(x, y))
        });
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_rules() {
        let v = Shape::from([3]);
        let one = Shape::from([1]);
        assert_eq!(broadcast_shape("Add", &v, &one).unwrap(), v);
        assert_eq!(broadcast_shape("Add", &Shape::scalar(), &v).unwrap(), v);
        assert_eq!(broadcast_shape("Add", &v, &v).unwrap(), v);
        assert!(matches!(
            broadcast_shape("Add", &v, &Shape::from([2])),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn zip_broadcast_parallel_matches_serial() {
        let n = PARALLEL_THRESHOLD + 3;
        let lhs: Vec<i32> = (0..n as i32).collect();
        let mut out = vec![0i32; n];
        zip_broadcast(&lhs, &[2], &mut out, BinaryOpType::Mul.as_fn::<i32>()).unwrap();
        assert!(out.iter().enumerate().all(|(i, &v)| v == 2 * i as i32));

        let le = CompareOpType::LessEqual.as_fn::<i32>();
        let mut small = vec![false; 3];
        zip_broadcast(&[1, 2, 3], &[2], &mut small, |x, y| Some(le(x, y))).unwrap();
        assert_eq!(small, vec![true, true, false]);
    }

    #[test]
    fn integer_arithmetic_wraps_and_rejects_zero_divisors() {
        let add = BinaryOpType::Add.as_fn::<i32>();
        assert_eq!(add(i32::MAX, 1), Some(i32::MIN));
        assert_eq!(BinaryOpType::Mul.as_fn::<u8>()(16, 16), Some(0));
        assert_eq!(BinaryOpType::Sub.as_fn::<u8>()(0, 1), Some(u8::MAX));

        let div = BinaryOpType::Div.as_fn::<i32>();
        assert_eq!(div(7, 2), Some(3));
        assert_eq!(div(i32::MIN, -1), Some(i32::MIN));
        assert_eq!(div(4, 0), None);
        assert_eq!(BinaryOpType::Div.as_fn::<f32>()(1.0, 0.0), Some(f32::INFINITY));

        let mut out = vec![0i64; 3];
        let div = BinaryOpType::Div.as_fn::<i64>();
        assert!(zip_broadcast(&[1, 2, 3], &[1, 0, 1], &mut out, div).is_none());
    }
}
