use crate::eval::evaluate_expr;
use crate::{Expr, ExprKind, Value};

/// Replaces `expr` with a constant when it can be computed without inputs.
///
/// Calls whose arguments are all constants are evaluated, projections out of constant
/// tuples are resolved. Anything else, including calls the interpreter rejects, is
/// returned unchanged.
pub fn fold_constant(expr: &Expr) -> Expr {
    match expr.kind() {
        ExprKind::Call(call) if call.args.iter().all(is_constant) => {
            match evaluate_expr(expr) {
                Ok(value) => value_to_expr(value),
                Err(err) => {
                    log::debug!("Not folding {}: {err}", call.op);
                    expr.clone()
                }
            }
        }
        ExprKind::TupleGetItem { tuple, index } => {
            let folded = fold_constant(tuple);
            match folded.kind() {
                ExprKind::Tuple(fields) => match fields.get(*index) {
                    Some(field) if is_constant(field) => field.clone(),
                    _ => expr.clone(),
                },
                _ => expr.clone(),
            }
        }
        ExprKind::Tuple(fields) if !fields.iter().all(is_constant) => {
            let folded: Vec<Expr> = fields.iter().map(fold_constant).collect();
            if folded.iter().zip(fields).all(|(new, old)| new.ptr_eq(old)) {
                expr.clone()
            } else {
                Expr::tuple(folded)
            }
        }
        _ => expr.clone(),
    }
}

/// A constant, or a tuple of constants.
fn is_constant(expr: &Expr) -> bool {
    match expr.kind() {
        ExprKind::Constant(_) => true,
        ExprKind::Tuple(fields) => fields.iter().all(is_constant),
        _ => false,
    }
}

fn value_to_expr(value: Value) -> Expr {
    match value {
        Value::Tensor(data) => Expr::constant(data),
        Value::Tuple(fields) => Expr::tuple(fields.into_iter().map(value_to_expr).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Op, OpAttrs, TensorData, TensorType, Var};

    fn int(value: i64) -> Expr {
        Expr::constant(TensorData::scalar(value))
    }

    #[test]
    fn constant_calls_are_evaluated() {
        let sum = Expr::call(Op::Add, vec![int(2), int(3)], OpAttrs::new());
        let folded = fold_constant(&sum);

        assert_eq!(folded.as_constant(), Some(&TensorData::scalar(5i64)));
    }

    #[test]
    fn calls_on_variables_are_kept() {
        let x = Var::new("x", TensorType::scalar(DType::Int64));
        let sum = Expr::call(Op::Add, vec![x.into(), int(3)], OpAttrs::new());

        assert!(fold_constant(&sum).ptr_eq(&sum));
    }

    #[test]
    fn projections_out_of_constant_splits_fold() {
        let data = TensorData::from_vec(vec![1i64, 2, 3, 4], &[4]).unwrap();
        let split = Expr::call(
            Op::Split,
            vec![Expr::constant(data)],
            OpAttrs::new().with("sections", 2i64),
        );
        let second = Expr::tuple_get_item(split, 1);

        assert_eq!(
            fold_constant(&second).as_constant(),
            Some(&TensorData::from_vec(vec![3i64, 4], &[2]).unwrap())
        );
    }

    #[test]
    fn failing_evaluation_leaves_the_call() {
        let div = Expr::call(Op::Divide, vec![int(1), int(0)], OpAttrs::new());
        assert!(fold_constant(&div).ptr_eq(&div));
    }
}
