use tensor_ir::{DType, Dim, Expr, Op, OpAttrs, TensorData, TensorType, Type, Var, WhileLoop};

use crate::{Attributes, ConversionError, ConvertContext, Inputs};

/// Number of bookkeeping variables ahead of the loop-carried values: the iteration count,
/// the trip limit and the continuation flag.
const STATE_VARS: usize = 3;

/// Lowers `Loop` onto a fixed-point iteration.
///
/// The loop state is `(iteration, max trip count, condition, carried values..., scan
/// accumulators...)`. The body is imported once against the state variables; each scan
/// output is appended to its accumulator along a new leading axis.
pub(super) fn convert(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    if inputs.len() < 2 {
        return Err(ConversionError::InvalidInputCount {
            expected: "at least 2".to_string(),
            actual: inputs.len(),
        });
    }
    let body = attrs.required_graph("body")?;
    let trip_count = inputs.get(0).cloned();
    let condition = inputs.get(1).cloned();
    let carried = (2..inputs.len())
        .map(|index| inputs.required(index).cloned())
        .collect::<Result<Vec<_>, _>>()?;

    if body.input.len() != carried.len() + 2 {
        return Err(ConversionError::invalid_attribute(
            "body",
            format!(
                "expected {} inputs for {} carried value(s), found {}",
                carried.len() + 2,
                carried.len(),
                body.input.len()
            ),
        ));
    }

    let count_dtype = match &trip_count {
        Some(max) => ctx.tensor_type(max)?.dtype,
        None => DType::Int64,
    };
    let iteration = Var::new("iter", TensorType::scalar(count_dtype));
    let max_count = Var::new("max_count", TensorType::scalar(count_dtype));
    let cond = Var::new("cond", TensorType::scalar(DType::Bool));
    let carried_vars = carried
        .iter()
        .zip(&body.input[2..])
        .map(|(init, input)| Ok(Var::new(input.name.clone(), loop_type(ctx.infer_type(init)?))))
        .collect::<Result<Vec<_>, ConversionError>>()?;

    let mut bindings = vec![
        (body.input[0].name.clone(), Expr::var(&iteration)),
        (body.input[1].name.clone(), Expr::var(&cond)),
    ];
    bindings.extend(
        body.input[2..]
            .iter()
            .zip(&carried_vars)
            .map(|(input, var)| (input.name.clone(), Expr::var(var))),
    );
    let subgraph = ctx.import_subgraph(body, bindings)?;

    let mut outputs = subgraph.outputs;
    if outputs.len() < carried.len() + 1 {
        return Err(ConversionError::invalid_attribute(
            "body",
            format!(
                "expected at least {} outputs, found {}",
                carried.len() + 1,
                outputs.len()
            ),
        ));
    }
    let scans = outputs.split_off(carried.len() + 1);
    let carried_out = outputs.split_off(1);
    let cond_out = outputs.remove(0);

    let mut scan_vars = Vec::with_capacity(scans.len());
    let mut scan_inits = Vec::with_capacity(scans.len());
    for (index, scan) in scans.iter().enumerate() {
        let ty = ctx.tensor_type(scan)?;
        scan_vars.push(Var::new(
            format!("scan{index}"),
            TensorType::new(ty.dtype, vec![Dim::Any; ty.rank() + 1]),
        ));
        let mut shape = vec![1; ty.rank() + 1];
        shape[0] = 0;
        scan_inits.push(Expr::constant(TensorData::empty(ty.dtype, &shape)));
    }

    let keep_going = match (&trip_count, &condition) {
        (Some(_), None) => less(&iteration, &max_count),
        (None, Some(_)) => Expr::var(&cond),
        (Some(_), Some(_)) => Expr::call(
            Op::LogicalAnd,
            vec![less(&iteration, &max_count), Expr::var(&cond)],
            OpAttrs::new(),
        ),
        (None, None) => {
            return Err(ConversionError::Unsupported(
                "Loop without a trip count or a condition".to_string(),
            ));
        }
    };

    let mut next = vec![
        Expr::call(
            Op::Add,
            vec![Expr::var(&iteration), one(count_dtype)],
            OpAttrs::new(),
        ),
        Expr::var(&max_count),
        to_scalar(cond_out, ctx)?,
    ];
    next.extend(carried_out);
    for (acc, scan) in scan_vars.iter().zip(scans) {
        next.push(append(&iteration, acc, scan, ctx)?);
    }

    let mut init = vec![
        Expr::constant(TensorData::full(count_dtype, &[], 0.0)),
        match trip_count {
            Some(max) => to_scalar(max, ctx)?,
            None => Expr::constant(TensorData::full(count_dtype, &[], 0.0)),
        },
        match condition {
            Some(cond) => to_scalar(cond, ctx)?,
            None => Expr::constant(TensorData::scalar(true)),
        },
    ];
    init.extend(carried);
    init.extend(scan_inits);

    let carried_count = carried_vars.len() + scan_vars.len();
    let mut vars = vec![iteration, max_count, cond];
    vars.extend(carried_vars);
    vars.extend(scan_vars);

    let result = Expr::while_loop(WhileLoop::new(vars, keep_going, Expr::tuple(next), init));
    ctx.splice(subgraph.captures, &result);
    log::debug!("Lowered a loop with {carried_count} output(s)");

    Ok((0..carried_count)
        .map(|index| Expr::tuple_get_item(result.clone(), STATE_VARS + index))
        .collect())
}

/// The type of a loop variable initialized with a value of type `ty`. Empty dimensions are
/// treated as growing, so they are left dynamic.
fn loop_type(ty: Type) -> Type {
    match ty {
        Type::Tensor(tensor) => Type::Tensor(TensorType::new(
            tensor.dtype,
            tensor
                .shape
                .into_iter()
                .map(|dim| match dim {
                    Dim::Known(0) => Dim::Any,
                    other => other,
                })
                .collect(),
        )),
        other => other,
    }
}

fn less(lhs: &Var, rhs: &Var) -> Expr {
    Expr::call(Op::Less, vec![Expr::var(lhs), Expr::var(rhs)], OpAttrs::new())
}

fn one(dtype: DType) -> Expr {
    Expr::constant(TensorData::full(dtype, &[], 1.0))
}

fn to_scalar(expr: Expr, ctx: &mut ConvertContext<'_, '_>) -> Result<Expr, ConversionError> {
    if ctx.tensor_type(&expr)?.rank() == 0 {
        return Ok(expr);
    }
    Ok(Expr::call(
        Op::Reshape,
        vec![expr],
        OpAttrs::new().with("newshape", Vec::<i64>::new()),
    ))
}

/// `concatenate([acc, scan[None]])`. For a scan value of rank above zero the accumulator is
/// first broadcast to `[iteration, scan.shape...]`, which turns the initial `[0, 1, ...]`
/// placeholder into a correctly shaped empty tensor.
fn append(
    iteration: &Var,
    acc: &Var,
    scan: Expr,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Expr, ConversionError> {
    let rank = ctx.tensor_type(&scan)?.rank();
    let mut acc = Expr::var(acc);
    if rank > 0 {
        let count = Expr::call(
            Op::Cast,
            vec![Expr::var(iteration)],
            OpAttrs::new().with("dtype", DType::Int64),
        );
        let count = Expr::call(
            Op::Reshape,
            vec![count],
            OpAttrs::new().with("newshape", vec![1i64]),
        );
        let scan_shape = Expr::call(
            Op::ShapeOf,
            vec![scan.clone()],
            OpAttrs::new().with("dtype", DType::Int64),
        );
        let shape = Expr::call(
            Op::Concatenate,
            vec![count, scan_shape],
            OpAttrs::new().with("axis", 0i64),
        );
        acc = Expr::call(Op::BroadcastTo, vec![acc, shape], OpAttrs::new());
    }

    let step = Expr::call(
        Op::ExpandDims,
        vec![scan],
        OpAttrs::new().with("axis", 0i64).with("num_newaxis", 1i64),
    );
    Ok(Expr::call(
        Op::Concatenate,
        vec![acc, step],
        OpAttrs::new().with("axis", 0i64),
    ))
}
