//! `tensor-ir` is a small functional intermediate representation for tensor programs.
//!
//! Programs are built as immutable, reference-counted expression DAGs in single static
//! assignment form: parameters are [`Var`]s, operator applications are [`ExprKind::Call`]s
//! and control flow is expressed with [`ExprKind::If`] and the fixed-point
//! [`ExprKind::WhileLoop`] construct. A [`Function`] closes an expression over its parameters.
//!
//! Besides the data structures, the crate provides the analyses a frontend leans on while
//! building programs:
//!
//! - [`infer_type`]: type and shape inference, cached on every node.
//! - [`fold_constant`]: evaluation of calls whose arguments are all constants.
//! - [`free_vars`]: variables an expression depends on but does not bind.
//! - [`evaluate`]: a reference interpreter over [`TensorData`] host arrays.

#[macro_use]
extern crate derive_new;

mod analysis;
mod attrs;
mod dtype;
mod error;
mod eval;
mod expr;
mod fold;
mod infer;
mod op;
mod printer;
mod tensor;
mod ty;

pub use analysis::*;
pub use attrs::*;
pub use dtype::*;
pub use error::*;
pub use eval::{Value, evaluate, evaluate_expr};
pub use expr::*;
pub use fold::*;
pub use infer::*;
pub use op::*;
pub use tensor::*;
pub use ty::*;
