use core::fmt;
use core::hash::{Hash, Hasher};
use std::cell::OnceCell;
use std::rc::Rc;

use crate::{Op, OpAttrs, TensorData, Type};

/// A parameter placeholder.
///
/// Variables compare by identity: two variables with the same name hint are distinct
/// unless one is a clone of the other.
#[derive(Clone)]
pub struct Var(Rc<VarNode>);

struct VarNode {
    name_hint: String,
    ty: Type,
}

impl Var {
    pub fn new(name_hint: impl Into<String>, ty: impl Into<Type>) -> Self {
        Self(Rc::new(VarNode {
            name_hint: name_hint.into(),
            ty: ty.into(),
        }))
    }

    pub fn name_hint(&self) -> &str {
        &self.0.name_hint
    }

    /// The declared type.
    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    /// Identity of the variable, stable for its lifetime.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Var {}

impl Hash for Var {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}: {}", self.name_hint(), self.ty())
    }
}

/// An operator application.
#[derive(Debug, new)]
pub struct Call {
    pub op: Op,
    pub args: Vec<Expr>,
    pub attrs: OpAttrs,
}

/// Fixed-point iteration.
///
/// `vars` hold the loop state. While `cond` evaluates to true against the current state,
/// `body` (a tuple with one field per variable) computes the next state. The loop
/// expression evaluates to the final state as a tuple.
#[derive(Debug, new)]
pub struct WhileLoop {
    pub vars: Vec<Var>,
    pub cond: Expr,
    pub body: Expr,
    pub init: Vec<Expr>,
}

#[derive(Debug)]
pub enum ExprKind {
    Var(Var),
    Constant(TensorData),
    Call(Call),
    Tuple(Vec<Expr>),
    TupleGetItem {
        tuple: Expr,
        index: usize,
    },
    If {
        cond: Expr,
        then_branch: Expr,
        else_branch: Expr,
    },
    WhileLoop(WhileLoop),
}

pub(crate) struct ExprNode {
    pub(crate) kind: ExprKind,
    pub(crate) checked_type: OnceCell<Type>,
}

/// An immutable, shared IR expression.
#[derive(Clone)]
pub struct Expr(pub(crate) Rc<ExprNode>);

impl Expr {
    fn from_kind(kind: ExprKind) -> Self {
        Self(Rc::new(ExprNode {
            kind,
            checked_type: OnceCell::new(),
        }))
    }

    pub fn var(var: &Var) -> Self {
        Self::from_kind(ExprKind::Var(var.clone()))
    }

    pub fn constant(data: TensorData) -> Self {
        Self::from_kind(ExprKind::Constant(data))
    }

    pub fn call(op: Op, args: Vec<Expr>, attrs: OpAttrs) -> Self {
        Self::from_kind(ExprKind::Call(Call::new(op, args, attrs)))
    }

    pub fn tuple(fields: Vec<Expr>) -> Self {
        Self::from_kind(ExprKind::Tuple(fields))
    }

    pub fn tuple_get_item(tuple: Expr, index: usize) -> Self {
        Self::from_kind(ExprKind::TupleGetItem { tuple, index })
    }

    pub fn if_then_else(cond: Expr, then_branch: Expr, else_branch: Expr) -> Self {
        Self::from_kind(ExprKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    pub fn while_loop(while_loop: WhileLoop) -> Self {
        Self::from_kind(ExprKind::WhileLoop(while_loop))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// Identity of the node, stable for its lifetime.
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self.kind() {
            ExprKind::Var(var) => Some(var),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&TensorData> {
        match self.kind() {
            ExprKind::Constant(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self.kind() {
            ExprKind::Call(call) => Some(call),
            _ => None,
        }
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Expr::var(&var)
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        Expr::var(var)
    }
}

impl From<TensorData> for Expr {
    fn from(data: TensorData) -> Self {
        Expr::constant(data)
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::printer::print_expr(self))
    }
}

/// A closed IR function.
#[derive(Debug, Clone, new)]
pub struct Function {
    pub params: Vec<Var>,
    pub body: Expr,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::printer::print_function(self))
    }
}
