//! Lexical conversion scopes.
//!
//! A [`Scope`] maps graph value names to IR expressions. Subgraph bodies are imported in a
//! child scope borrowing its parent, so names resolve outward through the chain while new
//! bindings stay local. Parameters declared by a body (its non-frozen initializers) are
//! handed back to the parent as [`Captures`] once the body is imported.

use std::collections::HashMap;

use tensor_ir::{Expr, TensorData, Var};

/// Name bindings, parameters and parameter values of one graph body.
#[derive(Debug, Default)]
pub struct Scope<'p> {
    parent: Option<&'p Scope<'p>>,
    bindings: HashMap<String, Expr>,
    params: Vec<Var>,
    constants: HashMap<Var, TensorData>,
}

/// Parameters and values declared inside a subgraph scope.
#[derive(Debug, Default)]
pub struct Captures {
    pub params: Vec<Var>,
    pub constants: HashMap<Var, TensorData>,
}

impl<'p> Scope<'p> {
    /// The scope of a top-level graph.
    pub fn root() -> Self {
        Self::default()
    }

    /// A nested scope resolving unknown names through `parent`.
    pub fn child(parent: &'p Scope<'p>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, expr: Expr) {
        self.bindings.insert(name.into(), expr);
    }

    /// Looks `name` up in this scope, then in its ancestors.
    pub fn lookup(&self, name: &str) -> Option<&Expr> {
        match self.bindings.get(name) {
            Some(expr) => Some(expr),
            None => self.parent.and_then(|parent| parent.lookup(name)),
        }
    }

    pub fn is_bound_locally(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Declares a function parameter, with the value it is initialized with if any.
    pub fn declare_param(&mut self, var: Var, value: Option<TensorData>) {
        if let Some(value) = value {
            self.constants.insert(var.clone(), value);
        }
        if !self.params.contains(&var) {
            self.params.push(var);
        }
    }

    /// The value a parameter of this scope or an ancestor is initialized with.
    pub fn constant(&self, var: &Var) -> Option<&TensorData> {
        match self.constants.get(var) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.constant(var)),
        }
    }

    /// Whether `var` is a parameter of this scope or an ancestor.
    pub fn declares(&self, var: &Var) -> bool {
        self.params.contains(var) || self.parent.is_some_and(|parent| parent.declares(var))
    }

    /// Parameters declared in this scope, in declaration order.
    pub fn params(&self) -> &[Var] {
        &self.params
    }

    /// Releases the parameters of this scope and their values.
    pub fn into_captures(self) -> Captures {
        Captures {
            params: self.params,
            constants: self.constants,
        }
    }

    /// Merges what a subgraph declared into this scope.
    ///
    /// Every captured value is kept. Captured parameters are promoted to parameters of this
    /// scope when they occur in `free` (the free variables of the expression built from the
    /// subgraph) and are not already declared along the chain. A promoted parameter is also
    /// bound under its name unless the name already resolves.
    pub fn absorb(&mut self, captures: Captures, free: &[Var]) {
        self.constants.extend(captures.constants);

        for var in captures.params {
            if !free.contains(&var) || self.declares(&var) {
                continue;
            }
            log::debug!("Promoting `{}` out of a subgraph", var.name_hint());
            if self.lookup(var.name_hint()).is_none() {
                self.bind(var.name_hint().to_string(), Expr::var(&var));
            }
            self.params.push(var);
        }
    }
}
