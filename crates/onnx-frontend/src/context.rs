use tensor_ir::{Expr, ExprKind, TensorData, TensorType, Type, fold_constant, free_vars, infer_type};

use crate::graph::{ImportSession, import_body};
use crate::protos::GraphProto;
use crate::{Captures, ConversionError, Scope};

/// The inputs of a node. Omitted optional inputs are `None`.
#[derive(Debug, Clone, Default, new)]
pub struct Inputs(Vec<Option<Expr>>);

impl Inputs {
    /// Number of input slots, including omitted ones.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The input at `index`, if it was given.
    pub fn get(&self, index: usize) -> Option<&Expr> {
        self.0.get(index).and_then(Option::as_ref)
    }

    pub fn required(&self, index: usize) -> Result<&Expr, ConversionError> {
        self.get(index)
            .ok_or(ConversionError::MissingInput { index })
    }

    /// Every given input, in order.
    pub fn present(&self) -> Vec<Expr> {
        self.0.iter().flatten().cloned().collect()
    }

    pub fn expect_len(&self, expected: usize) -> Result<(), ConversionError> {
        self.expect_between(expected, expected)
    }

    pub fn expect_between(&self, min: usize, max: usize) -> Result<(), ConversionError> {
        if (min..=max).contains(&self.len()) {
            return Ok(());
        }
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        Err(ConversionError::InvalidInputCount {
            expected,
            actual: self.len(),
        })
    }
}

/// A subgraph body imported into a child scope.
#[derive(Debug)]
pub struct Subgraph {
    /// Values of the body outputs, in declared order.
    pub outputs: Vec<Expr>,
    /// Parameters and values the body declared.
    pub captures: Captures,
}

/// What a conversion rule can see besides its inputs and attributes.
pub struct ConvertContext<'a, 's> {
    pub(crate) session: &'a ImportSession<'a>,
    pub(crate) scope: &'a mut Scope<'s>,
    num_outputs: usize,
}

impl<'a, 's> ConvertContext<'a, 's> {
    pub(crate) fn new(
        session: &'a ImportSession<'a>,
        scope: &'a mut Scope<'s>,
        num_outputs: usize,
    ) -> Self {
        Self {
            session,
            scope,
            num_outputs,
        }
    }

    /// The opset rules are dispatched with.
    pub fn opset(&self) -> usize {
        self.session.opset
    }

    /// Number of output slots the node declares, including empty ones.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn infer_type(&self, expr: &Expr) -> Result<Type, ConversionError> {
        Ok(infer_type(expr)?)
    }

    pub fn tensor_type(&self, expr: &Expr) -> Result<TensorType, ConversionError> {
        Ok(infer_type(expr)?.into_tensor()?)
    }

    /// The value of `expr` when it is known at import time: a constant, a parameter
    /// initialized from the model, or a call folding to a constant.
    pub fn constant_value(&self, expr: &Expr) -> Option<TensorData> {
        match expr.kind() {
            ExprKind::Constant(data) => Some(data.clone()),
            ExprKind::Var(var) => self.scope.constant(var).cloned(),
            _ => fold_constant(expr).as_constant().cloned(),
        }
    }

    /// Imports `graph` in a child of the current scope, with `bindings` bound before its
    /// inputs are declared.
    pub fn import_subgraph(
        &mut self,
        graph: &GraphProto,
        bindings: Vec<(String, Expr)>,
    ) -> Result<Subgraph, ConversionError> {
        let mut child = Scope::child(&*self.scope);
        for (name, expr) in bindings {
            child.bind(name, expr);
        }

        let outputs = import_body(self.session, &mut child, graph)
            .map_err(|err| ConversionError::Subgraph(Box::new(err)))?;

        Ok(Subgraph {
            outputs,
            captures: child.into_captures(),
        })
    }

    /// Hands what a subgraph declared to the current scope, promoting the parameters
    /// `result` depends on.
    pub fn splice(&mut self, captures: Captures, result: &Expr) {
        let free = free_vars(result);
        self.scope.absorb(captures, &free);
    }
}
