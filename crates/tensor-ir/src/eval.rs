//! Reference interpreter.
//!
//! Evaluation walks the expression DAG, memoising every node per frame. Loop bodies run
//! in child frames so values depending on the loop state are recomputed on each iteration.

mod kernels;

use std::collections::HashMap;

use crate::{Expr, ExprKind, Function, IrError, TensorData, Var, WhileLoop};

/// Runtime value of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(TensorData),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn as_tensor(&self) -> Result<&TensorData, IrError> {
        match self {
            Value::Tensor(data) => Ok(data),
            Value::Tuple(_) => Err(IrError::NotATensor),
        }
    }

    pub fn into_tensor(self) -> Result<TensorData, IrError> {
        match self {
            Value::Tensor(data) => Ok(data),
            Value::Tuple(_) => Err(IrError::NotATensor),
        }
    }

    pub fn into_fields(self) -> Result<Vec<Value>, IrError> {
        match self {
            Value::Tuple(fields) => Ok(fields),
            Value::Tensor(_) => Err(IrError::NotATuple),
        }
    }
}

impl From<TensorData> for Value {
    fn from(data: TensorData) -> Self {
        Value::Tensor(data)
    }
}

/// Evaluates `function` with positional arguments.
pub fn evaluate(function: &Function, args: Vec<TensorData>) -> Result<Value, IrError> {
    if args.len() != function.params.len() {
        return Err(IrError::ArgumentCount {
            op: "function".to_string(),
            expected: function.params.len().to_string(),
            actual: args.len(),
        });
    }

    let mut frame = Frame::root();
    for (param, arg) in function.params.iter().zip(args) {
        frame.vars.insert(param.clone(), Value::Tensor(arg));
    }
    frame.eval(&function.body)
}

/// Evaluates an expression without free variables.
pub fn evaluate_expr(expr: &Expr) -> Result<Value, IrError> {
    Frame::root().eval(expr)
}

struct Frame<'p> {
    parent: Option<&'p Frame<'p>>,
    vars: HashMap<Var, Value>,
    memo: HashMap<usize, Value>,
}

impl<'p> Frame<'p> {
    fn root() -> Self {
        Self {
            parent: None,
            vars: HashMap::new(),
            memo: HashMap::new(),
        }
    }

    fn child(parent: &'p Frame<'p>) -> Self {
        Self {
            parent: Some(parent),
            vars: HashMap::new(),
            memo: HashMap::new(),
        }
    }

    fn lookup(&self, var: &Var) -> Result<Value, IrError> {
        match self.vars.get(var) {
            Some(value) => Ok(value.clone()),
            None => match self.parent {
                Some(parent) => parent.lookup(var),
                None => Err(IrError::UnboundVar(var.name_hint().to_string())),
            },
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, IrError> {
        if let Some(value) = self.memo.get(&expr.id()) {
            return Ok(value.clone());
        }

        let value = match expr.kind() {
            ExprKind::Var(var) => self.lookup(var)?,
            ExprKind::Constant(data) => Value::Tensor(data.clone()),
            ExprKind::Call(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.eval(arg)?.into_tensor())
                    .collect::<Result<Vec<_>, _>>()?;
                kernels::apply(call.op, &args, &call.attrs)?
            }
            ExprKind::Tuple(fields) => Value::Tuple(
                fields
                    .iter()
                    .map(|field| self.eval(field))
                    .collect::<Result<_, _>>()?,
            ),
            ExprKind::TupleGetItem { tuple, index } => {
                let fields = self.eval(tuple)?.into_fields()?;
                let len = fields.len();
                fields
                    .into_iter()
                    .nth(*index)
                    .ok_or(IrError::TupleIndex { index: *index, len })?
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.as_tensor()?.truthy()? {
                    self.eval(then_branch)?
                } else {
                    self.eval(else_branch)?
                }
            }
            ExprKind::WhileLoop(while_loop) => self.eval_loop(while_loop)?,
        };

        self.memo.insert(expr.id(), value.clone());
        Ok(value)
    }

    fn eval_loop(&mut self, while_loop: &WhileLoop) -> Result<Value, IrError> {
        let mut state = while_loop
            .init
            .iter()
            .map(|init| self.eval(init))
            .collect::<Result<Vec<_>, _>>()?;

        loop {
            let mut frame = Frame::child(self);
            for (var, value) in while_loop.vars.iter().zip(&state) {
                frame.vars.insert(var.clone(), value.clone());
            }

            if !frame.eval(&while_loop.cond)?.as_tensor()?.truthy()? {
                break;
            }

            let next = frame.eval(&while_loop.body)?.into_fields()?;
            if next.len() != state.len() {
                return Err(IrError::TupleIndex {
                    index: state.len(),
                    len: next.len(),
                });
            }
            state = next;
        }

        Ok(Value::Tuple(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Op, OpAttrs, TensorType};

    fn int(value: i64) -> Expr {
        Expr::constant(TensorData::scalar(value))
    }

    #[test]
    fn evaluates_a_function() {
        let x = Var::new("x", TensorType::fixed(DType::Float32, &[2]));
        let body = Expr::call(
            Op::Multiply,
            vec![x.clone().into(), Expr::constant(TensorData::scalar(2.0f32))],
            OpAttrs::new(),
        );
        let function = Function::new(vec![x], body);

        let out = evaluate(
            &function,
            vec![TensorData::from_vec(vec![1.0f32, 3.0], &[2]).unwrap()],
        )
        .unwrap();

        assert_eq!(
            out,
            Value::Tensor(TensorData::from_vec(vec![2.0f32, 6.0], &[2]).unwrap())
        );
    }

    #[test]
    fn while_loop_counts_to_the_limit() {
        let i = Var::new("i", TensorType::scalar(DType::Int64));
        let acc = Var::new("acc", TensorType::scalar(DType::Int64));
        let cond = Expr::call(Op::Less, vec![i.clone().into(), int(4)], OpAttrs::new());
        let body = Expr::tuple(vec![
            Expr::call(Op::Add, vec![i.clone().into(), int(1)], OpAttrs::new()),
            Expr::call(Op::Add, vec![acc.clone().into(), i.clone().into()], OpAttrs::new()),
        ]);
        let looped = Expr::while_loop(WhileLoop::new(vec![i, acc], cond, body, vec![int(0), int(0)]));

        let fields = evaluate_expr(&looped).unwrap().into_fields().unwrap();
        assert_eq!(fields[0], Value::Tensor(TensorData::scalar(4i64)));
        assert_eq!(fields[1], Value::Tensor(TensorData::scalar(6i64)));
    }

    #[test]
    fn if_selects_a_branch() {
        for (cond, expected) in [(true, 1i64), (false, 2)] {
            let expr = Expr::if_then_else(
                Expr::constant(TensorData::scalar(cond)),
                int(1),
                int(2),
            );
            assert_eq!(
                evaluate_expr(&expr).unwrap(),
                Value::Tensor(TensorData::scalar(expected))
            );
        }
    }

    #[test]
    fn unbound_variables_are_reported() {
        let x = Var::new("x", TensorType::scalar(DType::Int64));
        let err = evaluate_expr(&x.into()).unwrap_err();
        assert!(matches!(err, IrError::UnboundVar(name) if name == "x"));
    }
}
