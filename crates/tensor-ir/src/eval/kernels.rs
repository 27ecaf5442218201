use ndarray::{concatenate, ArrayD, ArrayView1, Axis, IxDyn, Slice, Zip};
use num_traits::{Float, NumCast};

use super::Value;
use crate::infer::{normalize_axis, permutation, reduce_axes, reshape_dims, split_points, PoolParams};
use crate::tensor::{reshape_array, visit, visit_float, visit_numeric, visit_numeric_pair, visit_pair};
use crate::{DType, Dim, Element, IrError, Op, OpAttrs, TensorData};

/// Arithmetic shared by every numeric element type.
trait Arith: Element {
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    /// Callers check integer divisors for zero.
    fn div(self, rhs: Self) -> Self;
    fn pow(self, rhs: Self) -> Self;
    fn neg(self) -> Self;
    fn abs(self) -> Self;
    fn floor(self) -> Self;
    fn ceil(self) -> Self;
    fn round(self) -> Self;
}

macro_rules! impl_arith_float {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn add(self, rhs: Self) -> Self { self + rhs }
            fn sub(self, rhs: Self) -> Self { self - rhs }
            fn mul(self, rhs: Self) -> Self { self * rhs }
            fn div(self, rhs: Self) -> Self { self / rhs }
            fn pow(self, rhs: Self) -> Self { self.powf(rhs) }
            fn neg(self) -> Self { -self }
            fn abs(self) -> Self { <$ty>::abs(self) }
            fn floor(self) -> Self { <$ty>::floor(self) }
            fn ceil(self) -> Self { <$ty>::ceil(self) }
            fn round(self) -> Self { self.round_ties_even() }
        }
    )*};
}

macro_rules! impl_arith_int {
    ($($ty:ty),*) => {$(
        impl Arith for $ty {
            fn add(self, rhs: Self) -> Self { self.wrapping_add(rhs) }
            fn sub(self, rhs: Self) -> Self { self.wrapping_sub(rhs) }
            fn mul(self, rhs: Self) -> Self { self.wrapping_mul(rhs) }
            fn div(self, rhs: Self) -> Self { self.wrapping_div(rhs) }
            fn pow(self, rhs: Self) -> Self {
                match u32::try_from(rhs.to_i64()) {
                    Ok(exp) => self.wrapping_pow(exp),
                    Err(_) => 0,
                }
            }
            fn neg(self) -> Self { self.wrapping_neg() }
            fn abs(self) -> Self {
                if self.to_i64() < 0 { self.wrapping_neg() } else { self }
            }
            fn floor(self) -> Self { self }
            fn ceil(self) -> Self { self }
            fn round(self) -> Self { self }
        }
    )*};
}

impl_arith_float!(f32, f64);
impl_arith_int!(i8, i32, i64, u8);

/// Applies `op` to evaluated arguments.
pub(super) fn apply(op: Op, args: &[TensorData], attrs: &OpAttrs) -> Result<Value, IrError> {
    let data: TensorData = match op {
        _ if op.is_arithmetic() => arithmetic(op, arg(op, args, 0)?, arg(op, args, 1)?)?,
        _ if op.is_comparison() => compare(op, arg(op, args, 0)?, arg(op, args, 1)?)?,
        Op::LogicalNot => match arg(op, args, 0)? {
            TensorData::Bool(input) => input.mapv(|value| !value).into(),
            other => return Err(unsupported_dtype(op, other)),
        },
        Op::LogicalAnd | Op::LogicalOr | Op::LogicalXor => {
            logical(op, arg(op, args, 0)?, arg(op, args, 1)?)?
        }
        Op::Negative
        | Op::Abs
        | Op::Floor
        | Op::Ceil
        | Op::Round
        | Op::Relu
        | Op::LeakyRelu
        | Op::Clip => numeric_unary(op, arg(op, args, 0)?, attrs)?,
        Op::Sqrt | Op::Exp | Op::Log | Op::Sigmoid | Op::Tanh => {
            float_unary(op, arg(op, args, 0)?)?
        }
        Op::Copy | Op::Dropout => arg(op, args, 0)?.clone(),
        Op::Cast => {
            let dtype = attrs
                .dtype("dtype")?
                .ok_or_else(|| IrError::invalid_attribute(op, "dtype", "missing"))?;
            arg(op, args, 0)?.cast(dtype)
        }
        Op::OnesLike | Op::ZerosLike => {
            let input = arg(op, args, 0)?;
            let dtype = attrs.dtype("dtype")?.unwrap_or(input.dtype());
            let fill = if op == Op::OnesLike { 1.0 } else { 0.0 };
            TensorData::full(dtype, input.shape(), fill)
        }
        Op::Reshape => {
            let input = arg(op, args, 0)?;
            let newshape = attrs
                .ints("newshape")?
                .ok_or_else(|| IrError::invalid_attribute(op, "newshape", "missing"))?;
            input.reshape(&concrete_reshape(input.shape(), &newshape)?)?
        }
        Op::DynReshape => {
            let input = arg(op, args, 0)?;
            let newshape = arg(op, args, 1)?.to_i64_vec();
            input.reshape(&concrete_reshape(input.shape(), &newshape)?)?
        }
        Op::ExpandDims => {
            let input = arg(op, args, 0)?;
            let axis = normalize_axis(attrs.int_or("axis", 0)?, input.rank() + 1)?;
            let mut shape = input.shape().to_vec();
            for _ in 0..attrs.int_or("num_newaxis", 1)?.max(0) {
                shape.insert(axis, 1);
            }
            input.reshape(&shape)?
        }
        Op::Squeeze => {
            let input = arg(op, args, 0)?;
            let shape = match attrs.ints("axis")? {
                None => input.shape().iter().copied().filter(|&dim| dim != 1).collect(),
                Some(axes) => {
                    let axes = axes
                        .into_iter()
                        .map(|axis| normalize_axis(axis, input.rank()))
                        .collect::<Result<Vec<_>, _>>()?;
                    input
                        .shape()
                        .iter()
                        .enumerate()
                        .filter(|(axis, _)| !axes.contains(axis))
                        .map(|(_, dim)| *dim)
                        .collect::<Vec<_>>()
                }
            };
            input.reshape(&shape)?
        }
        Op::Transpose => {
            let input = arg(op, args, 0)?;
            let axes = permutation(attrs, input.rank())?;
            visit!(input, array => array
                .clone()
                .permuted_axes(IxDyn(&axes))
                .as_standard_layout()
                .into_owned()
                .into())
        }
        Op::Concatenate => concat(op, args, attrs)?,
        Op::Split => return split(arg(op, args, 0)?, attrs),
        Op::Take => take(op, arg(op, args, 0)?, arg(op, args, 1)?, attrs)?,
        Op::ShapeOf => {
            let input = arg(op, args, 0)?;
            let dims: Vec<i64> = input.shape().iter().map(|&dim| dim as i64).collect();
            TensorData::from_vec(dims, &[input.rank()])?
                .cast(attrs.dtype("dtype")?.unwrap_or(DType::Int64))
        }
        Op::BroadcastTo => {
            let input = arg(op, args, 0)?;
            let shape = to_shape(arg(op, args, 1)?)?;
            visit!(input, array => array
                .broadcast(IxDyn(&shape))
                .ok_or_else(|| shape_mismatch(op, input.shape(), &shape))?
                .to_owned()
                .into())
        }
        Op::Where => select(op, arg(op, args, 0)?, arg(op, args, 1)?, arg(op, args, 2)?)?,
        Op::Softmax | Op::LogSoftmax => {
            let input = arg(op, args, 0)?;
            let axis = normalize_axis(attrs.int_or("axis", -1)?, input.rank())?;
            let log = op == Op::LogSoftmax;
            visit_float!(input, array => softmax(array, axis, log).into(),
                other => return Err(unsupported_dtype(op, other)))
        }
        Op::Sum | Op::Mean | Op::Max | Op::Min => {
            let input = arg(op, args, 0)?;
            let axes = reduce_axes(attrs, input.rank())?;
            let keepdims = attrs.bool_or("keepdims", false)?;
            visit_numeric!(input, array => reduce(op, array, &axes, keepdims)?.into(),
                other => return Err(unsupported_dtype(op, other)))
        }
        Op::Dense => {
            let weight = arg(op, args, 1)?;
            if weight.rank() != 2 {
                return Err(IrError::type_mismatch(op, "a 2-D weight", weight.dtype()));
            }
            let transposed = visit!(weight, array => TensorData::from(array.t().to_owned()));
            matmul(op, arg(op, args, 0)?, &transposed)?
        }
        Op::MatMul => matmul(op, arg(op, args, 0)?, arg(op, args, 1)?)?,
        _ => match op.pool_dims() {
            Some(dims) => {
                let input = arg(op, args, 0)?;
                let params = PoolParams::from_attrs(op, attrs, dims)?;
                if input.rank() != dims + 2 {
                    return Err(IrError::type_mismatch(
                        op,
                        format!("rank {}", dims + 2),
                        format!("rank {}", input.rank()),
                    ));
                }
                let max = matches!(op, Op::MaxPool1d | Op::MaxPool2d | Op::MaxPool3d);
                visit_float!(input, array => pool(array, &params, max)?.into(),
                    other => return Err(unsupported_dtype(op, other)))
            }
            None => return Err(IrError::Unsupported(op.to_string())),
        },
    };

    Ok(Value::Tensor(data))
}

fn arg<'a>(op: Op, args: &'a [TensorData], index: usize) -> Result<&'a TensorData, IrError> {
    args.get(index).ok_or_else(|| IrError::ArgumentCount {
        op: op.to_string(),
        expected: format!("at least {}", index + 1),
        actual: args.len(),
    })
}

fn unsupported_dtype(op: Op, data: &TensorData) -> IrError {
    IrError::UnsupportedDType {
        op: op.to_string(),
        dtype: data.dtype(),
    }
}

fn dtype_mismatch(op: Op, lhs: &TensorData, rhs: &TensorData) -> IrError {
    IrError::type_mismatch(op, lhs.dtype(), rhs.dtype())
}

fn shape_mismatch(op: Op, lhs: &[usize], rhs: &[usize]) -> IrError {
    IrError::ShapeMismatch {
        op: op.to_string(),
        lhs: format!("{lhs:?}"),
        rhs: format!("{rhs:?}"),
    }
}

fn to_shape(data: &TensorData) -> Result<Vec<usize>, IrError> {
    data.to_i64_vec()
        .into_iter()
        .map(|dim| {
            usize::try_from(dim).map_err(|_| IrError::IndexOutOfBounds {
                index: dim,
                size: 0,
            })
        })
        .collect()
}

fn concrete_reshape(shape: &[usize], newshape: &[i64]) -> Result<Vec<usize>, IrError> {
    let dims: Vec<Dim> = shape.iter().map(|&dim| Dim::Known(dim)).collect();
    reshape_dims(&dims, newshape)?
        .into_iter()
        .map(|dim| {
            dim.known()
                .ok_or_else(|| shape_mismatch(Op::Reshape, shape, &[]))
        })
        .collect()
}

fn broadcast_shape(op: Op, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, IrError> {
    let rank = lhs.len().max(rhs.len());
    (0..rank)
        .map(|i| {
            let a = (i + lhs.len()).checked_sub(rank).map_or(1, |idx| lhs[idx]);
            let b = (i + rhs.len()).checked_sub(rank).map_or(1, |idx| rhs[idx]);
            match (a, b) {
                (1, other) | (other, 1) => Ok(other),
                (a, b) if a == b => Ok(a),
                _ => Err(shape_mismatch(op, lhs, rhs)),
            }
        })
        .collect()
}

fn zip_with<A: Copy, B: Copy, C>(
    op: Op,
    lhs: &ArrayD<A>,
    rhs: &ArrayD<B>,
    f: impl Fn(A, B) -> C,
) -> Result<ArrayD<C>, IrError> {
    let shape = broadcast_shape(op, lhs.shape(), rhs.shape())?;
    let lhs = lhs
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| shape_mismatch(op, lhs.shape(), &shape))?;
    let rhs = rhs
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| shape_mismatch(op, rhs.shape(), &shape))?;

    Ok(Zip::from(&lhs).and(&rhs).map_collect(|&a, &b| f(a, b)))
}

fn max_of<T: PartialOrd>(a: T, b: T) -> T {
    if b > a { b } else { a }
}

fn min_of<T: PartialOrd>(a: T, b: T) -> T {
    if b < a { b } else { a }
}

fn binary_fn<T: Arith>(op: Op) -> Option<fn(T, T) -> T> {
    let f: fn(T, T) -> T = match op {
        Op::Add => T::add,
        Op::Subtract => T::sub,
        Op::Multiply => T::mul,
        Op::Divide => T::div,
        Op::Power => T::pow,
        Op::Maximum => max_of,
        Op::Minimum => min_of,
        _ => return None,
    };
    Some(f)
}

fn arithmetic(op: Op, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData, IrError> {
    if op == Op::Divide && rhs.dtype().is_int() && rhs.to_i64_vec().contains(&0) {
        return Err(IrError::DivisionByZero);
    }

    fn typed<T: Arith>(op: Op, lhs: &ArrayD<T>, rhs: &ArrayD<T>) -> Result<ArrayD<T>, IrError> {
        let f = binary_fn::<T>(op).ok_or_else(|| IrError::Unsupported(op.to_string()))?;
        zip_with(op, lhs, rhs, f)
    }

    visit_numeric_pair!(lhs, rhs, (a, b) => Ok(typed(op, a, b)?.into()),
        _other => Err(dtype_mismatch(op, lhs, rhs)))
}

fn comparison<T: PartialOrd>(op: Op) -> Option<fn(T, T) -> bool> {
    let f: fn(T, T) -> bool = match op {
        Op::Equal => |a, b| a == b,
        Op::Less => |a, b| a < b,
        Op::LessEqual => |a, b| a <= b,
        Op::Greater => |a, b| a > b,
        Op::GreaterEqual => |a, b| a >= b,
        _ => return None,
    };
    Some(f)
}

fn compare(op: Op, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData, IrError> {
    fn typed<T: Element>(op: Op, lhs: &ArrayD<T>, rhs: &ArrayD<T>) -> Result<ArrayD<bool>, IrError> {
        let f = comparison::<T>(op).ok_or_else(|| IrError::Unsupported(op.to_string()))?;
        zip_with(op, lhs, rhs, f)
    }

    visit_pair!(lhs, rhs, (a, b) => Ok(typed(op, a, b)?.into()),
        _other => Err(dtype_mismatch(op, lhs, rhs)))
}

fn logical(op: Op, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData, IrError> {
    let (TensorData::Bool(a), TensorData::Bool(b)) = (lhs, rhs) else {
        return Err(IrError::type_mismatch(op, DType::Bool, lhs.dtype()));
    };

    let out = match op {
        Op::LogicalAnd => zip_with(op, a, b, |x, y| x && y)?,
        Op::LogicalOr => zip_with(op, a, b, |x, y| x || y)?,
        _ => zip_with(op, a, b, |x, y| x ^ y)?,
    };
    Ok(out.into())
}

fn numeric_unary(op: Op, input: &TensorData, attrs: &OpAttrs) -> Result<TensorData, IrError> {
    let alpha = attrs.float_or("alpha", 0.01)?;
    let low = attrs.float_or("a_min", f64::NEG_INFINITY)?;
    let high = attrs.float_or("a_max", f64::INFINITY)?;

    visit_numeric!(input, array => Ok(match op {
        Op::Negative => array.mapv(Arith::neg).into(),
        Op::Abs => array.mapv(Arith::abs).into(),
        Op::Floor => array.mapv(Arith::floor).into(),
        Op::Ceil => array.mapv(Arith::ceil).into(),
        Op::Round => array.mapv(Arith::round).into(),
        Op::Relu => array.mapv(|v| max_of(v, Element::from_i64(0))).into(),
        Op::LeakyRelu => array
            .mapv(|v| {
                if v.to_f64() < 0.0 {
                    Element::from_f64(v.to_f64() * alpha)
                } else {
                    v
                }
            })
            .into(),
        Op::Clip => array
            .mapv(|v| {
                let x = v.to_f64();
                if x < low {
                    Element::from_f64(low)
                } else if x > high {
                    Element::from_f64(high)
                } else {
                    v
                }
            })
            .into(),
        _ => return Err(IrError::Unsupported(op.to_string())),
    }), other => Err(unsupported_dtype(op, other)))
}

fn float_unary(op: Op, input: &TensorData) -> Result<TensorData, IrError> {
    visit_float!(input, array => Ok(match op {
        Op::Sqrt => array.mapv(|v| v.sqrt()).into(),
        Op::Exp => array.mapv(|v| v.exp()).into(),
        Op::Log => array.mapv(|v| v.ln()).into(),
        Op::Tanh => array.mapv(|v| v.tanh()).into(),
        Op::Sigmoid => array.mapv(|v| 1.0 / (1.0 + (-v).exp())).into(),
        _ => return Err(IrError::Unsupported(op.to_string())),
    }), other => Err(unsupported_dtype(op, other)))
}

fn concat(op: Op, args: &[TensorData], attrs: &OpAttrs) -> Result<TensorData, IrError> {
    fn typed<T: Element>(
        op: Op,
        head: &ArrayD<T>,
        rest: &[TensorData],
        axis: usize,
    ) -> Result<ArrayD<T>, IrError> {
        let mut views = vec![head.view()];
        for data in rest {
            let array = T::array(data).ok_or_else(|| {
                IrError::type_mismatch(op, T::DTYPE, data.dtype())
            })?;
            views.push(array.view());
        }
        Ok(concatenate(Axis(axis), &views)?)
    }

    let head = arg(op, args, 0)?;
    let axis = normalize_axis(attrs.int_or("axis", 0)?, head.rank())?;
    visit!(head, array => Ok(typed(op, array, &args[1..], axis)?.into()))
}

fn split(input: &TensorData, attrs: &OpAttrs) -> Result<Value, IrError> {
    let axis = normalize_axis(attrs.int_or("axis", 0)?, input.rank())?;
    let size = input.shape()[axis];
    let mut bounds = vec![0];
    bounds.extend(split_points(attrs, Some(size))?);
    bounds.push(size);

    let fields = bounds
        .windows(2)
        .map(|window| {
            let begin = window[0].min(size);
            let end = window[1].clamp(begin, size);
            let part: TensorData = visit!(input, array => array
                .slice_axis(Axis(axis), Slice::from(begin..end))
                .to_owned()
                .into());
            Value::Tensor(part)
        })
        .collect();

    Ok(Value::Tuple(fields))
}

fn take(
    op: Op,
    data: &TensorData,
    indices: &TensorData,
    attrs: &OpAttrs,
) -> Result<TensorData, IrError> {
    fn typed<T: Element>(
        array: &ArrayD<T>,
        indices: &[usize],
        indices_shape: &[usize],
        axis: Option<usize>,
    ) -> Result<ArrayD<T>, IrError> {
        match axis {
            None => {
                let flat: Vec<T> = array.iter().copied().collect();
                let values = indices.iter().map(|&index| flat[index]).collect();
                Ok(ArrayD::from_shape_vec(IxDyn(indices_shape), values)?)
            }
            Some(axis) => {
                let selected = array.select(Axis(axis), indices);
                let mut shape = array.shape()[..axis].to_vec();
                shape.extend_from_slice(indices_shape);
                shape.extend_from_slice(&array.shape()[axis + 1..]);
                reshape_array(&selected, &shape)
            }
        }
    }

    if !indices.dtype().is_int() {
        return Err(IrError::type_mismatch(op, "integer indices", indices.dtype()));
    }

    let axis = match attrs.int("axis")? {
        Some(axis) => Some(normalize_axis(axis, data.rank())?),
        None => None,
    };
    let size = match axis {
        Some(axis) => data.shape()[axis],
        None => data.len(),
    };
    let resolved = indices
        .to_i64_vec()
        .into_iter()
        .map(|index| {
            let resolved = if index < 0 { index + size as i64 } else { index };
            if resolved < 0 || resolved >= size as i64 {
                return Err(IrError::IndexOutOfBounds { index, size });
            }
            Ok(resolved as usize)
        })
        .collect::<Result<Vec<_>, _>>()?;

    visit!(data, array => Ok(typed(array, &resolved, indices.shape(), axis)?.into()))
}

fn select(
    op: Op,
    cond: &TensorData,
    lhs: &TensorData,
    rhs: &TensorData,
) -> Result<TensorData, IrError> {
    fn typed<T: Element>(
        op: Op,
        cond: &ArrayD<bool>,
        lhs: &ArrayD<T>,
        rhs: &ArrayD<T>,
    ) -> Result<ArrayD<T>, IrError> {
        let shape = broadcast_shape(op, cond.shape(), lhs.shape())?;
        let shape = broadcast_shape(op, &shape, rhs.shape())?;
        let cond = cond
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| shape_mismatch(op, cond.shape(), &shape))?;
        let lhs = lhs
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| shape_mismatch(op, lhs.shape(), &shape))?;
        let rhs = rhs
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| shape_mismatch(op, rhs.shape(), &shape))?;

        Ok(Zip::from(&cond)
            .and(&lhs)
            .and(&rhs)
            .map_collect(|&c, &a, &b| if c { a } else { b }))
    }

    let TensorData::Bool(cond) = cond else {
        return Err(IrError::type_mismatch(op, DType::Bool, cond.dtype()));
    };
    visit_pair!(lhs, rhs, (a, b) => Ok(typed(op, cond, a, b)?.into()),
        _other => Err(dtype_mismatch(op, lhs, rhs)))
}

fn softmax<T: Float + 'static>(array: &ArrayD<T>, axis: usize, log: bool) -> ArrayD<T> {
    let mut out = array.clone();
    for mut lane in out.lanes_mut(Axis(axis)) {
        let max = lane.iter().fold(T::neg_infinity(), |acc, &v| acc.max(v));
        lane.mapv_inplace(|v| v - max);
        let sum = lane.iter().fold(T::zero(), |acc, &v| acc + v.exp());
        if log {
            let log_sum = sum.ln();
            lane.mapv_inplace(|v| v - log_sum);
        } else {
            lane.mapv_inplace(|v| v.exp() / sum);
        }
    }
    out
}

fn reduce<T: Arith>(
    op: Op,
    array: &ArrayD<T>,
    axes: &[usize],
    keepdims: bool,
) -> Result<ArrayD<T>, IrError> {
    let mut axes = axes.to_vec();
    axes.sort_unstable();
    axes.dedup();

    let fold = |lane: ArrayView1<'_, T>| -> T {
        let zero = T::from_i64(0);
        match op {
            Op::Sum => lane.iter().fold(zero, |acc, &v| acc.add(v)),
            Op::Mean if lane.is_empty() => zero,
            Op::Mean => lane
                .iter()
                .fold(zero, |acc, &v| acc.add(v))
                .div(T::from_i64(lane.len() as i64)),
            Op::Max => lane.iter().copied().reduce(max_of).unwrap_or(zero),
            _ => lane.iter().copied().reduce(min_of).unwrap_or(zero),
        }
    };

    let mut out = array.clone();
    for &axis in axes.iter().rev() {
        if out.shape()[axis] == 0 && matches!(op, Op::Max | Op::Min) {
            return Err(IrError::Unsupported(format!("{op} over an empty axis")));
        }
        out = out.map_axis(Axis(axis), fold);
    }

    if keepdims {
        let shape: Vec<usize> = array
            .shape()
            .iter()
            .enumerate()
            .map(|(axis, &dim)| if axes.contains(&axis) { 1 } else { dim })
            .collect();
        out = reshape_array(&out, &shape)?;
    }
    Ok(out)
}

fn matmul(op: Op, lhs: &TensorData, rhs: &TensorData) -> Result<TensorData, IrError> {
    fn typed<T: Arith>(op: Op, lhs: &ArrayD<T>, rhs: &ArrayD<T>) -> Result<ArrayD<T>, IrError> {
        if lhs.ndim() == 0 || rhs.ndim() == 0 {
            return Err(IrError::Unsupported(format!("{op} on scalars")));
        }
        let lhs_vector = lhs.ndim() == 1;
        let rhs_vector = rhs.ndim() == 1;
        let lhs = if lhs_vector {
            lhs.clone().insert_axis(Axis(0))
        } else {
            lhs.clone()
        };
        let rhs = if rhs_vector {
            rhs.clone().insert_axis(Axis(1))
        } else {
            rhs.clone()
        };

        let (m, k) = (lhs.shape()[lhs.ndim() - 2], lhs.shape()[lhs.ndim() - 1]);
        let (k_rhs, n) = (rhs.shape()[rhs.ndim() - 2], rhs.shape()[rhs.ndim() - 1]);
        if k != k_rhs {
            return Err(shape_mismatch(op, lhs.shape(), rhs.shape()));
        }

        let batch = broadcast_shape(
            op,
            &lhs.shape()[..lhs.ndim() - 2],
            &rhs.shape()[..rhs.ndim() - 2],
        )?;
        let lhs_shape = [batch.as_slice(), &[m, k]].concat();
        let rhs_shape = [batch.as_slice(), &[k, n]].concat();
        let lhs: Vec<T> = lhs
            .broadcast(IxDyn(&lhs_shape))
            .ok_or_else(|| shape_mismatch(op, lhs.shape(), &lhs_shape))?
            .iter()
            .copied()
            .collect();
        let rhs: Vec<T> = rhs
            .broadcast(IxDyn(&rhs_shape))
            .ok_or_else(|| shape_mismatch(op, rhs.shape(), &rhs_shape))?
            .iter()
            .copied()
            .collect();

        let count: usize = batch.iter().product();
        let mut values = Vec::with_capacity(count * m * n);
        for b in 0..count {
            for i in 0..m {
                for j in 0..n {
                    let mut acc = T::from_i64(0);
                    for p in 0..k {
                        acc = acc.add(lhs[b * m * k + i * k + p].mul(rhs[b * k * n + p * n + j]));
                    }
                    values.push(acc);
                }
            }
        }

        let mut shape = batch;
        if !lhs_vector {
            shape.push(m);
        }
        if !rhs_vector {
            shape.push(n);
        }
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }

    visit_numeric_pair!(lhs, rhs, (a, b) => Ok(typed(op, a, b)?.into()),
        _other => Err(dtype_mismatch(op, lhs, rhs)))
}

fn pool<T: Float + 'static>(
    array: &ArrayD<T>,
    params: &PoolParams,
    max: bool,
) -> Result<ArrayD<T>, IrError> {
    let dims = params.pool_size.len();
    let input_shape = array.shape();
    let mut out_shape = input_shape[..2].to_vec();
    for i in 0..dims {
        out_shape.push(params.output_size(i, input_shape[i + 2]));
    }

    Ok(ArrayD::from_shape_fn(IxDyn(&out_shape), |out| {
        let mut acc = if max { T::neg_infinity() } else { T::zero() };
        let mut counted = 0usize;
        let mut position = vec![out[0], out[1]];
        position.extend(std::iter::repeat(0).take(dims));

        for window in ndarray::indices(IxDyn(&params.pool_size)) {
            let mut inside = true;
            let mut padded = true;
            for i in 0..dims {
                let offset = (out[i + 2] * params.strides[i] + window[i] * params.dilation[i])
                    as isize
                    - params.pads_begin[i] as isize;
                let size = input_shape[i + 2] as isize;
                if offset < 0 || offset >= size {
                    inside = false;
                    padded &= offset < size + params.pads_end[i] as isize;
                } else {
                    position[i + 2] = offset as usize;
                }
            }

            if inside {
                let value = array[IxDyn(&position)];
                acc = if max { acc.max(value) } else { acc + value };
                counted += 1;
            } else if padded && params.count_include_pad {
                counted += 1;
            }
        }

        if max {
            acc
        } else {
            let divisor: Option<T> = NumCast::from(counted.max(1));
            acc / divisor.unwrap_or_else(T::one)
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn floats(values: &[f32], shape: &[usize]) -> TensorData {
        TensorData::from_vec(values.to_vec(), shape).unwrap()
    }

    fn ints(values: &[i64], shape: &[usize]) -> TensorData {
        TensorData::from_vec(values.to_vec(), shape).unwrap()
    }

    fn tensor(value: Value) -> TensorData {
        value.into_tensor().unwrap()
    }

    #[rstest]
    #[case(Op::Add, &[11, 22, 13, 24])]
    #[case(Op::Subtract, &[-9, -18, -7, -16])]
    #[case(Op::Multiply, &[10, 40, 30, 80])]
    #[case(Op::Maximum, &[10, 20, 10, 20])]
    fn arithmetic_broadcasts(#[case] op: Op, #[case] expected: &[i64]) {
        let lhs = ints(&[1, 2, 3, 4], &[2, 2]);
        let rhs = ints(&[10, 20], &[2]);

        let out = tensor(apply(op, &[lhs, rhs], &OpAttrs::new()).unwrap());
        assert_eq!(out, ints(expected, &[2, 2]));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let err = apply(
            Op::Divide,
            &[ints(&[1], &[1]), ints(&[0], &[1])],
            &OpAttrs::new(),
        )
        .unwrap_err();
        assert!(matches!(err, IrError::DivisionByZero));
    }

    #[test]
    fn concatenate_along_the_leading_axis() {
        let out = tensor(
            apply(
                Op::Concatenate,
                &[ints(&[], &[0, 1]), ints(&[7], &[1, 1])],
                &OpAttrs::new().with("axis", 0i64),
            )
            .unwrap(),
        );
        assert_eq!(out, ints(&[7], &[1, 1]));
    }

    #[test]
    fn broadcast_to_grows_an_empty_accumulator() {
        let out = tensor(
            apply(
                Op::BroadcastTo,
                &[floats(&[], &[0, 1]), ints(&[0, 3], &[2])],
                &OpAttrs::new(),
            )
            .unwrap(),
        );
        assert_eq!(out.shape(), &[0, 3]);
    }

    #[test]
    fn take_with_negative_indices() {
        let data = floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
        let out = tensor(
            apply(
                Op::Take,
                &[data, ints(&[-1, 0], &[2])],
                &OpAttrs::new().with("axis", 0i64),
            )
            .unwrap(),
        );
        assert_eq!(out, floats(&[5.0, 6.0, 1.0, 2.0], &[2, 2]));
    }

    #[test]
    fn split_into_sections() {
        let out = apply(
            Op::Split,
            &[ints(&[1, 2, 3, 4], &[4])],
            &OpAttrs::new().with("sections", 2i64),
        )
        .unwrap();
        assert_eq!(
            out,
            Value::Tuple(vec![
                Value::Tensor(ints(&[1, 2], &[2])),
                Value::Tensor(ints(&[3, 4], &[2])),
            ])
        );
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let out = tensor(
            apply(
                Op::Softmax,
                &[floats(&[1.0, 2.0, 3.0, 1.0, 1.0, 1.0], &[2, 3])],
                &OpAttrs::new().with("axis", -1i64),
            )
            .unwrap(),
        );
        let values = out.to_f64_vec();
        assert!((values[..3].iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!((values[3] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn reduce_keeps_dims() {
        let out = tensor(
            apply(
                Op::Sum,
                &[ints(&[1, 2, 3, 4, 5, 6], &[2, 3])],
                &OpAttrs::new().with("axis", vec![1i64]).with("keepdims", true),
            )
            .unwrap(),
        );
        assert_eq!(out, ints(&[6, 15], &[2, 1]));
    }

    #[test]
    fn dense_multiplies_by_the_transposed_weight() {
        let x = floats(&[1.0, 2.0], &[1, 2]);
        let w = floats(&[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
        let out = tensor(apply(Op::Dense, &[x, w], &OpAttrs::new()).unwrap());
        assert_eq!(out, floats(&[1.0, 2.0, 3.0], &[1, 3]));
    }

    #[test]
    fn max_pool_with_padding() {
        let x = floats(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let attrs = OpAttrs::new()
            .with("pool_size", vec![2i64, 2])
            .with("padding", vec![1i64, 1, 1, 1])
            .with("strides", vec![2i64, 2]);
        let out = tensor(apply(Op::MaxPool2d, &[x], &attrs).unwrap());
        assert_eq!(out, floats(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]));
    }

    #[test]
    fn average_pool_excludes_padding_by_default() {
        let x = floats(&[1.0, 3.0], &[1, 1, 2]);
        let attrs = OpAttrs::new()
            .with("pool_size", vec![2i64])
            .with("padding", vec![1i64, 0]);
        let out = tensor(apply(Op::AvgPool1d, &[x], &attrs).unwrap());
        assert_eq!(out, floats(&[1.0, 2.0], &[1, 1, 2]));
    }

    #[test]
    fn clip_saturates_integers() {
        let out = tensor(
            apply(
                Op::Clip,
                &[ints(&[-5, 0, 5], &[3])],
                &OpAttrs::new().with("a_min", -1.0).with("a_max", 1.0),
            )
            .unwrap(),
        );
        assert_eq!(out, ints(&[-1, 0, 1], &[3]));
    }
}
