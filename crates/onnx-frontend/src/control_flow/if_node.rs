use tensor_ir::{DType, Expr, Op, OpAttrs, TensorData};

use crate::{Attributes, ConversionError, ConvertContext, Inputs};

/// Imports both branches and selects between their results.
pub(super) fn convert(
    inputs: &Inputs,
    attrs: &Attributes,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Vec<Expr>, ConversionError> {
    inputs.expect_len(1)?;
    let cond = scalar_condition(inputs.required(0)?.clone(), ctx)?;

    let then_branch = ctx.import_subgraph(attrs.required_graph("then_branch")?, Vec::new())?;
    let else_branch = ctx.import_subgraph(attrs.required_graph("else_branch")?, Vec::new())?;
    let count = then_branch.outputs.len();
    if count == 0 || count != else_branch.outputs.len() {
        return Err(ConversionError::invalid_attribute(
            "else_branch",
            format!(
                "branches produce {count} and {} output(s)",
                else_branch.outputs.len()
            ),
        ));
    }

    let result = Expr::if_then_else(
        cond,
        branch_value(then_branch.outputs),
        branch_value(else_branch.outputs),
    );
    ctx.splice(then_branch.captures, &result);
    ctx.splice(else_branch.captures, &result);

    if count == 1 {
        return Ok(vec![result]);
    }
    Ok((0..count)
        .map(|index| Expr::tuple_get_item(result.clone(), index))
        .collect())
}

/// Reduces a condition to a rank-0 boolean by reading its first element.
fn scalar_condition(
    cond: Expr,
    ctx: &mut ConvertContext<'_, '_>,
) -> Result<Expr, ConversionError> {
    let ty = ctx.tensor_type(&cond)?;
    let mut cond = cond;
    if ty.rank() > 0 {
        cond = Expr::call(
            Op::Take,
            vec![cond, Expr::constant(TensorData::scalar(0i64))],
            OpAttrs::new(),
        );
    }
    if ty.dtype != DType::Bool {
        cond = Expr::call(Op::Cast, vec![cond], OpAttrs::new().with("dtype", DType::Bool));
    }
    Ok(cond)
}

fn branch_value(mut outputs: Vec<Expr>) -> Expr {
    match outputs.len() {
        1 => outputs.remove(0),
        _ => Expr::tuple(outputs),
    }
}
