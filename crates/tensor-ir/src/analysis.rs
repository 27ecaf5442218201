use std::collections::HashSet;

use crate::{Expr, ExprKind, Function, Var};

/// Variables used by `expr` but bound neither by a loop inside it nor by a function.
///
/// Variables are returned in post-order of first use, without duplicates.
pub fn free_vars(expr: &Expr) -> Vec<Var> {
    let mut collector = VarCollector::default();
    collector.visit(expr);
    collector.free()
}

/// Free variables of a function body that are not among its parameters.
pub fn unbound_params(function: &Function) -> Vec<Var> {
    free_vars(&function.body)
        .into_iter()
        .filter(|var| !function.params.contains(var))
        .collect()
}

#[derive(Default)]
struct VarCollector {
    visited: HashSet<usize>,
    used: Vec<Var>,
    seen: HashSet<Var>,
    bound: HashSet<Var>,
}

impl VarCollector {
    fn visit(&mut self, expr: &Expr) {
        if !self.visited.insert(expr.id()) {
            return;
        }

        match expr.kind() {
            ExprKind::Var(var) => {
                if self.seen.insert(var.clone()) {
                    self.used.push(var.clone());
                }
            }
            ExprKind::Constant(_) => {}
            ExprKind::Call(call) => call.args.iter().for_each(|arg| self.visit(arg)),
            ExprKind::Tuple(fields) => fields.iter().for_each(|field| self.visit(field)),
            ExprKind::TupleGetItem { tuple, .. } => self.visit(tuple),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit(cond);
                self.visit(then_branch);
                self.visit(else_branch);
            }
            ExprKind::WhileLoop(while_loop) => {
                self.bound.extend(while_loop.vars.iter().cloned());
                while_loop.init.iter().for_each(|init| self.visit(init));
                self.visit(&while_loop.cond);
                self.visit(&while_loop.body);
            }
        }
    }

    fn free(self) -> Vec<Var> {
        let bound = self.bound;
        self.used
            .into_iter()
            .filter(|var| !bound.contains(var))
            .collect()
    }
}
