//! Text form of the IR.
//!
//! Every call, projection and control-flow node is bound once to a numbered `%n` name in
//! the innermost block it appears in. Constants and tuples are printed inline.
//!
//! ```text
//! fn (%x: Tensor[(2,), float32]) {
//!   %0 = multiply(%x, 2.0f);
//!   %0
//! }
//! ```

use std::collections::{HashMap, HashSet};

use crate::{Expr, ExprKind, Function, Var};

const INDENT: &str = "  ";

pub(crate) fn print_expr(expr: &Expr) -> String {
    let mut printer = Printer::default();
    let mut lines = Vec::new();
    let result = printer.block(expr, 0, &mut lines);
    lines.push(result);
    lines.join("\n")
}

pub(crate) fn print_function(function: &Function) -> String {
    let mut printer = Printer::default();
    let params: Vec<String> = function
        .params
        .iter()
        .map(|param| format!("{}: {}", printer.var_name(param), param.ty()))
        .collect();

    let mut lines = vec![format!("fn ({}) {{", params.join(", "))];
    let result = printer.block(&function.body, 1, &mut lines);
    lines.push(format!("{INDENT}{result}"));
    lines.push("}".to_string());
    lines.join("\n")
}

#[derive(Default)]
struct Printer {
    scopes: Vec<HashMap<usize, String>>,
    vars: HashMap<Var, String>,
    taken: HashSet<String>,
    next: usize,
}

impl Printer {
    /// Prints `expr` in a fresh scope, pushing its bindings to `lines` and returning the
    /// atom holding the result.
    fn block(&mut self, expr: &Expr, depth: usize, lines: &mut Vec<String>) -> String {
        self.scopes.push(HashMap::new());
        let result = self.atom(expr, depth, lines);
        self.scopes.pop();
        result
    }

    fn var_name(&mut self, var: &Var) -> String {
        if let Some(name) = self.vars.get(var) {
            return name.clone();
        }

        let hint = match var.name_hint() {
            "" => "v",
            hint => hint,
        };
        let mut name = format!("%{hint}");
        let mut suffix = 1;
        while self.taken.contains(&name) {
            name = format!("%{hint}.{suffix}");
            suffix += 1;
        }
        self.taken.insert(name.clone());
        self.vars.insert(var.clone(), name.clone());
        name
    }

    fn lookup(&self, expr: &Expr) -> Option<String> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&expr.id()).cloned())
    }

    fn bind(&mut self, expr: &Expr, value: String, depth: usize, lines: &mut Vec<String>) -> String {
        let name = format!("%{}", self.next);
        self.next += 1;
        lines.push(format!("{}{name} = {value};", INDENT.repeat(depth)));
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(expr.id(), name.clone());
        }
        name
    }

    fn atom(&mut self, expr: &Expr, depth: usize, lines: &mut Vec<String>) -> String {
        if let Some(name) = self.lookup(expr) {
            return name;
        }

        match expr.kind() {
            ExprKind::Var(var) => self.var_name(var),
            ExprKind::Constant(data) => data.to_string(),
            ExprKind::Tuple(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|field| self.atom(field, depth, lines))
                    .collect();
                match fields.len() {
                    1 => format!("({},)", fields[0]),
                    _ => format!("({})", fields.join(", ")),
                }
            }
            ExprKind::Call(call) => {
                let mut args: Vec<String> = call
                    .args
                    .iter()
                    .map(|arg| self.atom(arg, depth, lines))
                    .collect();
                args.extend(call.attrs.iter().map(|(name, value)| format!("{name}={value}")));
                let value = format!("{}({})", call.op, args.join(", "));
                self.bind(expr, value, depth, lines)
            }
            ExprKind::TupleGetItem { tuple, index } => {
                let tuple = self.atom(tuple, depth, lines);
                self.bind(expr, format!("{tuple}.{index}"), depth, lines)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.atom(cond, depth, lines);
                let indent = INDENT.repeat(depth);
                let mut value = format!("if ({cond}) {{\n");
                value.push_str(&self.nested(then_branch, depth + 1));
                value.push_str(&format!("\n{indent}}} else {{\n"));
                value.push_str(&self.nested(else_branch, depth + 1));
                value.push_str(&format!("\n{indent}}}"));
                self.bind(expr, value, depth, lines)
            }
            ExprKind::WhileLoop(while_loop) => {
                let state: Vec<String> = while_loop
                    .vars
                    .iter()
                    .zip(&while_loop.init)
                    .map(|(var, init)| {
                        let init = self.atom(init, depth, lines);
                        format!("{}: {} = {init}", self.var_name(var), var.ty())
                    })
                    .collect();
                let indent = INDENT.repeat(depth);
                let mut value = format!("while_loop({}) if {{\n", state.join(", "));
                value.push_str(&self.nested(&while_loop.cond, depth + 1));
                value.push_str(&format!("\n{indent}}} do {{\n"));
                value.push_str(&self.nested(&while_loop.body, depth + 1));
                value.push_str(&format!("\n{indent}}}"));
                self.bind(expr, value, depth, lines)
            }
        }
    }

    fn nested(&mut self, expr: &Expr, depth: usize) -> String {
        let mut lines = Vec::new();
        let result = self.block(expr, depth, &mut lines);
        lines.push(format!("{}{result}", INDENT.repeat(depth)));
        lines.join("\n")
    }
}
