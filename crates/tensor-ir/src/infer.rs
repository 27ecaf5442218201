//! Type and shape inference.
//!
//! Inferred types are cached on each expression node, so repeated queries while a program
//! is being built stay linear in the size of the program.

use crate::{
    Call, DType, Dim, Expr, ExprKind, IrError, Op, OpAttrs, TensorType, Type, WhileLoop,
};

/// Infers the type of `expr`.
pub fn infer_type(expr: &Expr) -> Result<Type, IrError> {
    if let Some(ty) = expr.0.checked_type.get() {
        return Ok(ty.clone());
    }

    let ty = match expr.kind() {
        ExprKind::Var(var) => var.ty().clone(),
        ExprKind::Constant(data) => Type::Tensor(data.ty()),
        ExprKind::Call(call) => infer_call(call)?,
        ExprKind::Tuple(fields) => Type::Tuple(
            fields
                .iter()
                .map(infer_type)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ExprKind::TupleGetItem { tuple, index } => {
            let ty = infer_type(tuple)?;
            let fields = ty.fields()?;
            fields.get(*index).cloned().ok_or(IrError::TupleIndex {
                index: *index,
                len: fields.len(),
            })?
        }
        ExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = infer_type(cond)?.into_tensor()?;
            if cond.dtype != DType::Bool || cond.rank() != 0 {
                return Err(IrError::type_mismatch("if", "a scalar bool condition", &cond));
            }
            join(&infer_type(then_branch)?, &infer_type(else_branch)?)?
        }
        ExprKind::WhileLoop(while_loop) => infer_loop(while_loop)?,
    };

    let _ = expr.0.checked_type.set(ty.clone());
    Ok(ty)
}

/// Infers the tensor type of `expr`, failing on tuples.
pub fn infer_tensor_type(expr: &Expr) -> Result<TensorType, IrError> {
    infer_type(expr)?.into_tensor()
}

/// Least upper bound of two branch types: dimensions that disagree become dynamic.
fn join(lhs: &Type, rhs: &Type) -> Result<Type, IrError> {
    match (lhs, rhs) {
        (Type::Tensor(a), Type::Tensor(b)) if a.dtype == b.dtype && a.rank() == b.rank() => {
            let shape = a
                .shape
                .iter()
                .zip(&b.shape)
                .map(|(x, y)| if x == y { *x } else { Dim::Any })
                .collect();
            Ok(Type::Tensor(TensorType::new(a.dtype, shape)))
        }
        (Type::Tuple(a), Type::Tuple(b)) if a.len() == b.len() => Ok(Type::Tuple(
            a.iter()
                .zip(b)
                .map(|(x, y)| join(x, y))
                .collect::<Result<_, _>>()?,
        )),
        _ => Err(IrError::type_mismatch("if", lhs, rhs)),
    }
}

fn infer_loop(while_loop: &WhileLoop) -> Result<Type, IrError> {
    if while_loop.vars.len() != while_loop.init.len() {
        return Err(IrError::ArgumentCount {
            op: "while_loop".to_string(),
            expected: while_loop.vars.len().to_string(),
            actual: while_loop.init.len(),
        });
    }

    let cond = infer_tensor_type(&while_loop.cond)?;
    if cond.dtype != DType::Bool {
        return Err(IrError::type_mismatch("while_loop", "a bool condition", &cond));
    }

    let body = infer_type(&while_loop.body)?;
    if body.fields()?.len() != while_loop.vars.len() {
        return Err(IrError::type_mismatch(
            "while_loop",
            format!("a body tuple of {} fields", while_loop.vars.len()),
            &body,
        ));
    }

    Ok(Type::Tuple(
        while_loop.vars.iter().map(|var| var.ty().clone()).collect(),
    ))
}

fn infer_call(call: &Call) -> Result<Type, IrError> {
    let op = call.op;
    let attrs = &call.attrs;
    let args = call
        .args
        .iter()
        .map(infer_tensor_type)
        .collect::<Result<Vec<_>, _>>()?;

    let ty = match op {
        _ if op.is_arithmetic() => {
            let [lhs, rhs] = exact::<2>(op, &args)?;
            same_dtype(op, lhs, rhs)?;
            if lhs.dtype == DType::Bool {
                return Err(IrError::UnsupportedDType {
                    op: op.to_string(),
                    dtype: DType::Bool,
                });
            }
            TensorType::new(lhs.dtype, broadcast_dims(op, &lhs.shape, &rhs.shape)?)
        }
        _ if op.is_comparison() => {
            let [lhs, rhs] = exact::<2>(op, &args)?;
            same_dtype(op, lhs, rhs)?;
            TensorType::new(DType::Bool, broadcast_dims(op, &lhs.shape, &rhs.shape)?)
        }
        Op::LogicalNot => {
            let [input] = exact::<1>(op, &args)?;
            expect_dtype(op, input, DType::Bool)?;
            input.clone()
        }
        Op::LogicalAnd | Op::LogicalOr | Op::LogicalXor => {
            let [lhs, rhs] = exact::<2>(op, &args)?;
            expect_dtype(op, lhs, DType::Bool)?;
            expect_dtype(op, rhs, DType::Bool)?;
            TensorType::new(DType::Bool, broadcast_dims(op, &lhs.shape, &rhs.shape)?)
        }
        Op::Sqrt | Op::Exp | Op::Log | Op::Sigmoid | Op::Tanh | Op::Softmax | Op::LogSoftmax => {
            let [input] = exact::<1>(op, &args)?;
            if !input.dtype.is_float() {
                return Err(IrError::UnsupportedDType {
                    op: op.to_string(),
                    dtype: input.dtype,
                });
            }
            if matches!(op, Op::Softmax | Op::LogSoftmax) {
                normalize_axis(attrs.int_or("axis", -1)?, input.rank())?;
            }
            input.clone()
        }
        Op::Negative
        | Op::Abs
        | Op::Floor
        | Op::Ceil
        | Op::Round
        | Op::Relu
        | Op::LeakyRelu
        | Op::Clip => {
            let [input] = exact::<1>(op, &args)?;
            if !input.dtype.is_numeric() {
                return Err(IrError::UnsupportedDType {
                    op: op.to_string(),
                    dtype: input.dtype,
                });
            }
            input.clone()
        }
        Op::Copy | Op::Dropout => exact::<1>(op, &args)?[0].clone(),
        Op::Cast => {
            let [input] = exact::<1>(op, &args)?;
            TensorType::new(required_dtype(op, attrs)?, input.shape.clone())
        }
        Op::OnesLike | Op::ZerosLike => {
            let [input] = exact::<1>(op, &args)?;
            let dtype = attrs.dtype("dtype")?.unwrap_or(input.dtype);
            TensorType::new(dtype, input.shape.clone())
        }
        Op::Reshape => {
            let [input] = exact::<1>(op, &args)?;
            let newshape = required_ints(op, attrs, "newshape")?;
            TensorType::new(input.dtype, reshape_dims(&input.shape, &newshape)?)
        }
        Op::DynReshape | Op::BroadcastTo => {
            let [input, shape] = exact::<2>(op, &args)?;
            if !shape.dtype.is_int() || shape.rank() != 1 {
                return Err(IrError::type_mismatch(op, "a 1-D integer shape", shape));
            }
            let dims = match call.args[1].as_constant() {
                Some(values) if op == Op::DynReshape => {
                    reshape_dims(&input.shape, &values.to_i64_vec())?
                }
                Some(values) => values
                    .to_i64_vec()
                    .into_iter()
                    .map(|dim| Dim::Known(dim.max(0) as usize))
                    .collect(),
                None => match shape.shape[0] {
                    Dim::Known(rank) => vec![Dim::Any; rank],
                    Dim::Any => return Err(IrError::Unsupported(format!("{op} to a dynamic rank"))),
                },
            };
            TensorType::new(input.dtype, dims)
        }
        Op::ExpandDims => {
            let [input] = exact::<1>(op, &args)?;
            let count = attrs.int_or("num_newaxis", 1)?.max(0) as usize;
            let axis = normalize_axis(attrs.int_or("axis", 0)?, input.rank() + 1)?;
            let mut shape = input.shape.clone();
            for _ in 0..count {
                shape.insert(axis, Dim::Known(1));
            }
            TensorType::new(input.dtype, shape)
        }
        Op::Squeeze => {
            let [input] = exact::<1>(op, &args)?;
            TensorType::new(input.dtype, squeeze_dims(&input.shape, attrs.ints("axis")?)?)
        }
        Op::Transpose => {
            let [input] = exact::<1>(op, &args)?;
            let axes = permutation(attrs, input.rank())?;
            TensorType::new(
                input.dtype,
                axes.iter().map(|&axis| input.shape[axis]).collect(),
            )
        }
        Op::Concatenate => infer_concat(op, attrs, &args)?,
        Op::Split => return infer_split(op, attrs, &args),
        Op::Take => {
            let [data, indices] = exact::<2>(op, &args)?;
            if !indices.dtype.is_int() {
                return Err(IrError::type_mismatch(op, "integer indices", indices));
            }
            match attrs.int("axis")? {
                None => TensorType::new(data.dtype, indices.shape.clone()),
                Some(axis) => {
                    let axis = normalize_axis(axis, data.rank())?;
                    let mut shape = data.shape[..axis].to_vec();
                    shape.extend(indices.shape.iter().copied());
                    shape.extend(data.shape[axis + 1..].iter().copied());
                    TensorType::new(data.dtype, shape)
                }
            }
        }
        Op::ShapeOf => {
            let [input] = exact::<1>(op, &args)?;
            let dtype = attrs.dtype("dtype")?.unwrap_or(DType::Int64);
            TensorType::new(dtype, vec![Dim::Known(input.rank())])
        }
        Op::Where => {
            let [cond, lhs, rhs] = exact::<3>(op, &args)?;
            expect_dtype(op, cond, DType::Bool)?;
            same_dtype(op, lhs, rhs)?;
            let shape = broadcast_dims(op, &cond.shape, &lhs.shape)?;
            TensorType::new(lhs.dtype, broadcast_dims(op, &shape, &rhs.shape)?)
        }
        _ if op.is_reduction() => {
            let [input] = exact::<1>(op, &args)?;
            let axes = reduce_axes(attrs, input.rank())?;
            let keepdims = attrs.bool_or("keepdims", false)?;
            let shape = input
                .shape
                .iter()
                .enumerate()
                .filter_map(|(axis, dim)| match (axes.contains(&axis), keepdims) {
                    (false, _) => Some(*dim),
                    (true, true) => Some(Dim::Known(1)),
                    (true, false) => None,
                })
                .collect();
            TensorType::new(input.dtype, shape)
        }
        Op::Dense => {
            let [data, weight] = exact::<2>(op, &args)?;
            same_dtype(op, data, weight)?;
            if data.rank() == 0 || weight.rank() != 2 {
                return Err(IrError::type_mismatch(op, "a [units, in] weight", weight));
            }
            check_dim(op, data.shape[data.rank() - 1], weight.shape[1])?;
            let mut shape = data.shape.clone();
            let last = shape.len() - 1;
            shape[last] = weight.shape[0];
            TensorType::new(data.dtype, shape)
        }
        Op::MatMul => {
            let [lhs, rhs] = exact::<2>(op, &args)?;
            same_dtype(op, lhs, rhs)?;
            TensorType::new(lhs.dtype, matmul_dims(op, &lhs.shape, &rhs.shape)?)
        }
        _ => match op.pool_dims() {
            Some(dims) => {
                let [input] = exact::<1>(op, &args)?;
                infer_pool(op, attrs, input, dims)?
            }
            None => return Err(IrError::Unsupported(format!("type inference for {op}"))),
        },
    };

    Ok(Type::Tensor(ty))
}

fn exact<const N: usize>(op: Op, args: &[TensorType]) -> Result<&[TensorType; N], IrError> {
    args.try_into().map_err(|_| IrError::ArgumentCount {
        op: op.to_string(),
        expected: N.to_string(),
        actual: args.len(),
    })
}

fn same_dtype(op: Op, lhs: &TensorType, rhs: &TensorType) -> Result<(), IrError> {
    if lhs.dtype != rhs.dtype {
        return Err(IrError::type_mismatch(op, lhs.dtype, rhs.dtype));
    }
    Ok(())
}

fn expect_dtype(op: Op, ty: &TensorType, dtype: DType) -> Result<(), IrError> {
    if ty.dtype != dtype {
        return Err(IrError::type_mismatch(op, dtype, ty.dtype));
    }
    Ok(())
}

fn check_dim(op: Op, lhs: Dim, rhs: Dim) -> Result<(), IrError> {
    match (lhs, rhs) {
        (Dim::Known(a), Dim::Known(b)) if a != b => Err(IrError::ShapeMismatch {
            op: op.to_string(),
            lhs: a.to_string(),
            rhs: b.to_string(),
        }),
        _ => Ok(()),
    }
}

fn required_dtype(op: Op, attrs: &OpAttrs) -> Result<DType, IrError> {
    attrs
        .dtype("dtype")?
        .ok_or_else(|| IrError::invalid_attribute(op, "dtype", "missing"))
}

fn required_ints(op: Op, attrs: &OpAttrs, name: &str) -> Result<Vec<i64>, IrError> {
    attrs
        .ints(name)?
        .ok_or_else(|| IrError::invalid_attribute(op, name, "missing"))
}

/// Resolves a possibly negative axis against `rank`.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Result<usize, IrError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved >= rank as i64 {
        return Err(IrError::AxisOutOfRange { axis, rank });
    }
    Ok(resolved as usize)
}

/// Numpy broadcasting over possibly dynamic dimensions.
pub(crate) fn broadcast_dims(op: Op, lhs: &[Dim], rhs: &[Dim]) -> Result<Vec<Dim>, IrError> {
    let rank = lhs.len().max(rhs.len());
    let mut shape = Vec::with_capacity(rank);

    for i in 0..rank {
        let a = lhs
            .len()
            .checked_sub(rank - i)
            .map_or(Dim::Known(1), |idx| lhs[idx]);
        let b = rhs
            .len()
            .checked_sub(rank - i)
            .map_or(Dim::Known(1), |idx| rhs[idx]);

        let dim = match (a, b) {
            (Dim::Known(1), other) | (other, Dim::Known(1)) => other,
            (Dim::Known(x), Dim::Known(y)) if x == y => Dim::Known(x),
            (Dim::Known(x), Dim::Known(y)) => {
                return Err(IrError::ShapeMismatch {
                    op: op.to_string(),
                    lhs: format!("{lhs:?}"),
                    rhs: format!("{x} vs {y}"),
                });
            }
            (Dim::Known(x), Dim::Any) | (Dim::Any, Dim::Known(x)) => Dim::Known(x),
            (Dim::Any, Dim::Any) => Dim::Any,
        };
        shape.push(dim);
    }

    Ok(shape)
}

/// Output dimensions of a reshape. `0` copies the input dimension and a single `-1` is
/// inferred from the element count when every other dimension is known.
pub(crate) fn reshape_dims(input: &[Dim], newshape: &[i64]) -> Result<Vec<Dim>, IrError> {
    let mut dims = Vec::with_capacity(newshape.len());
    let mut inferred = None;

    for (i, &value) in newshape.iter().enumerate() {
        match value {
            0 => dims.push(*input.get(i).ok_or_else(|| {
                IrError::invalid_attribute(Op::Reshape, "newshape", "0 past the input rank")
            })?),
            -1 if inferred.is_none() => {
                inferred = Some(i);
                dims.push(Dim::Any);
            }
            value if value > 0 => dims.push(Dim::Known(value as usize)),
            _ => {
                return Err(IrError::invalid_attribute(
                    Op::Reshape,
                    "newshape",
                    format!("invalid entry {value} in {newshape:?}"),
                ));
            }
        }
    }

    if let Some(index) = inferred {
        let total: Option<usize> = input.iter().map(Dim::known).product();
        let known: Option<usize> = dims
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, dim)| dim.known())
            .product();
        if let (Some(total), Some(known)) = (total, known) {
            if known == 0 || total % known != 0 {
                return Err(IrError::ShapeMismatch {
                    op: Op::Reshape.to_string(),
                    lhs: format!("{input:?}"),
                    rhs: format!("{newshape:?}"),
                });
            }
            dims[index] = Dim::Known(total / known);
        }
    }

    Ok(dims)
}

fn squeeze_dims(shape: &[Dim], axes: Option<Vec<i64>>) -> Result<Vec<Dim>, IrError> {
    match axes {
        None => Ok(shape
            .iter()
            .filter(|dim| **dim != Dim::Known(1))
            .copied()
            .collect()),
        Some(axes) => {
            let axes = axes
                .into_iter()
                .map(|axis| normalize_axis(axis, shape.len()))
                .collect::<Result<Vec<_>, _>>()?;
            for &axis in &axes {
                if let Dim::Known(size) = shape[axis] {
                    if size != 1 {
                        return Err(IrError::invalid_attribute(
                            Op::Squeeze,
                            "axis",
                            format!("dimension {axis} has size {size}"),
                        ));
                    }
                }
            }
            Ok(shape
                .iter()
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(_, dim)| *dim)
                .collect())
        }
    }
}

pub(crate) fn permutation(attrs: &OpAttrs, rank: usize) -> Result<Vec<usize>, IrError> {
    let axes = match attrs.ints("axes")? {
        None => return Ok((0..rank).rev().collect()),
        Some(axes) => axes,
    };

    let mut resolved = axes
        .iter()
        .map(|&axis| normalize_axis(axis, rank))
        .collect::<Result<Vec<_>, _>>()?;
    let permutation = resolved.clone();
    resolved.sort_unstable();
    if resolved != (0..rank).collect::<Vec<_>>() {
        return Err(IrError::invalid_attribute(
            Op::Transpose,
            "axes",
            format!("{axes:?} is not a permutation of rank {rank}"),
        ));
    }
    Ok(permutation)
}

pub(crate) fn reduce_axes(attrs: &OpAttrs, rank: usize) -> Result<Vec<usize>, IrError> {
    match attrs.ints("axis")? {
        None => Ok((0..rank).collect()),
        Some(axes) if axes.is_empty() => Ok((0..rank).collect()),
        Some(axes) => axes
            .into_iter()
            .map(|axis| normalize_axis(axis, rank))
            .collect(),
    }
}

fn infer_concat(op: Op, attrs: &OpAttrs, args: &[TensorType]) -> Result<TensorType, IrError> {
    let first = args.first().ok_or(IrError::ArgumentCount {
        op: op.to_string(),
        expected: "at least 1".to_string(),
        actual: 0,
    })?;
    let axis = normalize_axis(attrs.int_or("axis", 0)?, first.rank())?;
    let mut shape = first.shape.clone();

    for arg in &args[1..] {
        same_dtype(op, first, arg)?;
        if arg.rank() != first.rank() {
            return Err(IrError::type_mismatch(op, first, arg));
        }
        for (i, dim) in arg.shape.iter().enumerate() {
            if i == axis {
                shape[i] = match (shape[i], dim) {
                    (Dim::Known(a), Dim::Known(b)) => Dim::Known(a + b),
                    _ => Dim::Any,
                };
            } else {
                check_dim(op, shape[i], *dim)?;
                if shape[i] == Dim::Any {
                    shape[i] = *dim;
                }
            }
        }
    }

    Ok(TensorType::new(first.dtype, shape))
}

/// Split points along an axis of size `size` from either `indices` or `sections`.
pub(crate) fn split_points(attrs: &OpAttrs, size: Option<usize>) -> Result<Vec<usize>, IrError> {
    if let Some(indices) = attrs.ints("indices")? {
        return Ok(indices.into_iter().map(|index| index.max(0) as usize).collect());
    }

    let sections = attrs
        .int("sections")?
        .filter(|sections| *sections > 0)
        .ok_or_else(|| IrError::invalid_attribute(Op::Split, "sections", "missing"))?
        as usize;
    let size = size.ok_or_else(|| {
        IrError::Unsupported("split into sections along a dynamic axis".to_string())
    })?;
    if size % sections != 0 {
        return Err(IrError::invalid_attribute(
            Op::Split,
            "sections",
            format!("{size} is not divisible into {sections} sections"),
        ));
    }
    let step = size / sections;
    Ok((1..sections).map(|i| i * step).collect())
}

fn infer_split(op: Op, attrs: &OpAttrs, args: &[TensorType]) -> Result<Type, IrError> {
    let [input] = exact::<1>(op, args)?;
    let axis = normalize_axis(attrs.int_or("axis", 0)?, input.rank())?;
    let size = input.shape[axis].known();
    let points = split_points(attrs, size)?;

    let mut bounds = vec![0];
    bounds.extend(points.iter().copied());
    let fields = (0..bounds.len())
        .map(|i| {
            let begin = bounds[i];
            let end = bounds.get(i + 1).copied().map(Some).unwrap_or(size);
            let mut shape = input.shape.clone();
            shape[axis] = match end {
                Some(end) => Dim::Known(end.saturating_sub(begin)),
                None => Dim::Any,
            };
            Type::Tensor(TensorType::new(input.dtype, shape))
        })
        .collect();

    Ok(Type::Tuple(fields))
}

fn matmul_dims(op: Op, lhs: &[Dim], rhs: &[Dim]) -> Result<Vec<Dim>, IrError> {
    if lhs.is_empty() || rhs.is_empty() {
        return Err(IrError::Unsupported(format!("{op} on scalars")));
    }

    let lhs_vector = lhs.len() == 1;
    let rhs_vector = rhs.len() == 1;
    let lhs: Vec<Dim> = if lhs_vector {
        vec![Dim::Known(1), lhs[0]]
    } else {
        lhs.to_vec()
    };
    let rhs: Vec<Dim> = if rhs_vector {
        vec![rhs[0], Dim::Known(1)]
    } else {
        rhs.to_vec()
    };

    check_dim(op, lhs[lhs.len() - 1], rhs[rhs.len() - 2])?;
    let mut shape = broadcast_dims(op, &lhs[..lhs.len() - 2], &rhs[..rhs.len() - 2])?;
    if !lhs_vector {
        shape.push(lhs[lhs.len() - 2]);
    }
    if !rhs_vector {
        shape.push(rhs[rhs.len() - 1]);
    }
    Ok(shape)
}

/// Pooling hyper-parameters resolved against the number of spatial dimensions.
pub(crate) struct PoolParams {
    pub pool_size: Vec<usize>,
    pub strides: Vec<usize>,
    pub dilation: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
    pub ceil_mode: bool,
    pub count_include_pad: bool,
}

impl PoolParams {
    pub(crate) fn from_attrs(op: Op, attrs: &OpAttrs, dims: usize) -> Result<Self, IrError> {
        let list = |name: &str, default: usize| -> Result<Vec<usize>, IrError> {
            match attrs.ints(name)? {
                None => Ok(vec![default; dims]),
                Some(values) if values.len() == dims => {
                    Ok(values.into_iter().map(|v| v.max(0) as usize).collect())
                }
                Some(values) => Err(IrError::invalid_attribute(
                    op,
                    name,
                    format!("expected {dims} values, got {values:?}"),
                )),
            }
        };

        let pool_size = list("pool_size", 1)?;
        if attrs.ints("pool_size")?.is_none() {
            return Err(IrError::invalid_attribute(op, "pool_size", "missing"));
        }

        let padding = attrs.ints("padding")?.unwrap_or_else(|| vec![0; dims * 2]);
        let (pads_begin, pads_end) = match padding.len() {
            len if len == dims * 2 => (padding[..dims].to_vec(), padding[dims..].to_vec()),
            len if len == dims => (padding.clone(), padding),
            _ => {
                return Err(IrError::invalid_attribute(
                    op,
                    "padding",
                    format!("expected {} values, got {padding:?}", dims * 2),
                ));
            }
        };
        let to_usize = |values: Vec<i64>| -> Vec<usize> {
            values.into_iter().map(|v| v.max(0) as usize).collect()
        };

        Ok(Self {
            pool_size,
            strides: list("strides", 1)?,
            dilation: list("dilation", 1)?,
            pads_begin: to_usize(pads_begin),
            pads_end: to_usize(pads_end),
            ceil_mode: attrs.bool_or("ceil_mode", false)?,
            count_include_pad: attrs.bool_or("count_include_pad", false)?,
        })
    }

    /// Output size of spatial dimension `i` for an input of size `size`.
    pub(crate) fn output_size(&self, i: usize, size: usize) -> usize {
        let window = self.dilation[i] * (self.pool_size[i].max(1) - 1) + 1;
        let padded = size + self.pads_begin[i] + self.pads_end[i];
        if padded < window {
            return 0;
        }
        let span = padded - window;
        let stride = self.strides[i].max(1);
        let steps = if self.ceil_mode {
            span.div_ceil(stride)
        } else {
            span / stride
        };
        steps + 1
    }
}

fn infer_pool(op: Op, attrs: &OpAttrs, input: &TensorType, dims: usize) -> Result<TensorType, IrError> {
    if input.rank() != dims + 2 {
        return Err(IrError::type_mismatch(
            op,
            format!("a rank {} input", dims + 2),
            input,
        ));
    }

    let params = PoolParams::from_attrs(op, attrs, dims)?;
    let mut shape = input.shape[..2].to_vec();
    for i in 0..dims {
        shape.push(match input.shape[i + 2] {
            Dim::Known(size) => Dim::Known(params.output_size(i, size)),
            Dim::Any => Dim::Any,
        });
    }
    Ok(TensorType::new(input.dtype, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TensorData, Var};

    fn var(name: &str, dtype: DType, shape: &[Dim]) -> Expr {
        Var::new(name, TensorType::new(dtype, shape.to_vec())).into()
    }

    #[test]
    fn broadcasting_with_dynamic_dims() {
        let x = var("x", DType::Float32, &[Dim::Any, Dim::Known(3)]);
        let y = var("y", DType::Float32, &[Dim::Known(3)]);
        let sum = Expr::call(Op::Add, vec![x, y], OpAttrs::new());

        assert_eq!(
            infer_tensor_type(&sum).unwrap(),
            TensorType::new(DType::Float32, vec![Dim::Any, Dim::Known(3)])
        );
    }

    #[test]
    fn mismatched_dtypes_are_rejected() {
        let x = var("x", DType::Float32, &[Dim::Known(3)]);
        let y = var("y", DType::Int64, &[Dim::Known(3)]);
        let sum = Expr::call(Op::Add, vec![x, y], OpAttrs::new());

        assert!(matches!(
            infer_type(&sum),
            Err(IrError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn reshape_infers_the_missing_dimension() {
        let dims = reshape_dims(&[Dim::Known(2), Dim::Known(3), Dim::Known(4)], &[0, -1]).unwrap();
        assert_eq!(dims, vec![Dim::Known(2), Dim::Known(12)]);

        let dims = reshape_dims(&[Dim::Any, Dim::Known(4)], &[-1, 2]).unwrap();
        assert_eq!(dims, vec![Dim::Any, Dim::Known(2)]);
    }

    #[test]
    fn dyn_reshape_with_a_constant_shape() {
        let x = var("x", DType::Float32, &[Dim::Known(6)]);
        let shape = Expr::constant(TensorData::from_vec(vec![2i64, 3], &[2]).unwrap());
        let reshaped = Expr::call(Op::DynReshape, vec![x, shape], OpAttrs::new());

        assert_eq!(
            infer_tensor_type(&reshaped).unwrap(),
            TensorType::fixed(DType::Float32, &[2, 3])
        );
    }

    #[test]
    fn split_produces_a_tuple() {
        let x = var("x", DType::Float32, &[Dim::Known(6), Dim::Known(2)]);
        let split = Expr::call(Op::Split, vec![x], OpAttrs::new().with("indices", vec![2i64]));

        assert_eq!(
            infer_type(&split).unwrap(),
            Type::Tuple(vec![
                TensorType::fixed(DType::Float32, &[2, 2]).into(),
                TensorType::fixed(DType::Float32, &[4, 2]).into(),
            ])
        );
    }

    #[test]
    fn pooling_output_shape() {
        let x = var("x", DType::Float32, &[1, 1, 5, 5].map(Dim::Known));
        let attrs = OpAttrs::new()
            .with("pool_size", vec![3i64, 3])
            .with("strides", vec![2i64, 2])
            .with("padding", vec![1i64, 1, 1, 1]);
        let pooled = Expr::call(Op::MaxPool2d, vec![x], attrs);

        assert_eq!(
            infer_tensor_type(&pooled).unwrap(),
            TensorType::fixed(DType::Float32, &[1, 1, 3, 3])
        );
    }

    #[test]
    fn if_requires_a_scalar_bool() {
        let cond = Expr::constant(TensorData::from_vec(vec![true, false], &[2]).unwrap());
        let a = Expr::constant(TensorData::scalar(1.0f32));
        let expr = Expr::if_then_else(cond, a.clone(), a);
        assert!(infer_type(&expr).is_err());
    }

    #[test]
    fn negative_axes_resolve_against_the_rank() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert!(normalize_axis(0, 0).is_err());
        assert!(normalize_axis(3, 3).is_err());
        assert!(normalize_axis(-4, 3).is_err());
    }
}
