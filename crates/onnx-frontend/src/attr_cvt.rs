//! Declarative mapping from ONNX attributes to IR keyword arguments.

use std::fmt;

use tensor_ir::{Expr, Op, OpAttr, OpAttrs};

use crate::{AttributeValue, Attributes, ConversionError};

/// Converts one attribute value into an IR keyword argument.
pub type AttrTransform = fn(&str, &AttributeValue) -> Result<OpAttr, ConversionError>;

/// Predicate over the full attribute table of a node.
pub type AttrCheck = fn(&Attributes) -> bool;

/// Builds a single IR call from a node's inputs and attributes.
///
/// Attributes are processed in this order:
///
/// 1. the [check](Self::check) predicate must hold,
/// 2. [excluded](Self::exclude) attributes must be absent,
/// 3. an attribute and its rename target may not both be present,
/// 4. each attribute is [ignored](Self::ignore), [disabled](Self::disable),
///    [renamed](Self::rename), [transformed](Self::transform) or passed through as is,
/// 5. [defaults](Self::with_default) fill in absent parameters,
/// 6. [extras](Self::extra) are added last and win over everything else.
#[derive(Clone)]
pub struct AttrConverter {
    op: Op,
    renames: Vec<(String, String)>,
    transforms: Vec<(String, String, AttrTransform)>,
    defaults: Vec<(String, OpAttr)>,
    excludes: Vec<String>,
    ignores: Vec<String>,
    disables: Vec<String>,
    extras: Vec<(String, OpAttr)>,
    check: Option<(AttrCheck, String)>,
}

impl AttrConverter {
    pub fn new(op: Op) -> Self {
        Self {
            op,
            renames: Vec::new(),
            transforms: Vec::new(),
            defaults: Vec::new(),
            excludes: Vec::new(),
            ignores: Vec::new(),
            disables: Vec::new(),
            extras: Vec::new(),
            check: None,
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.push((from.into(), to.into()));
        self
    }

    /// Renames `from` to `to`, converting the value with `transform`.
    pub fn transform(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        transform: AttrTransform,
    ) -> Self {
        self.transforms.push((from.into(), to.into(), transform));
        self
    }

    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<OpAttr>) -> Self {
        self.defaults.push((name.into(), value.into()));
        self
    }

    /// Fails the conversion when `name` is present.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excludes.push(name.into());
        self
    }

    /// Drops `name` silently.
    pub fn ignore(mut self, name: impl Into<String>) -> Self {
        self.ignores.push(name.into());
        self
    }

    /// Drops `name` with a warning.
    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.disables.push(name.into());
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: impl Into<OpAttr>) -> Self {
        self.extras.push((name.into(), value.into()));
        self
    }

    pub fn check(mut self, predicate: AttrCheck, reason: impl Into<String>) -> Self {
        self.check = Some((predicate, reason.into()));
        self
    }

    /// Computes the IR keyword arguments for `attrs`.
    pub fn op_attrs(&self, attrs: &Attributes) -> Result<OpAttrs, ConversionError> {
        if let Some((predicate, reason)) = &self.check {
            if !predicate(attrs) {
                return Err(ConversionError::invalid_attribute(self.op, reason));
            }
        }

        if let Some(name) = self.excludes.iter().find(|name| attrs.contains(name)) {
            return Err(ConversionError::invalid_attribute(
                name,
                format!("not supported by {}", self.op),
            ));
        }

        let targets = self
            .renames
            .iter()
            .map(|(from, to)| (from, to))
            .chain(self.transforms.iter().map(|(from, to, _)| (from, to)));
        for (from, to) in targets {
            if from != to && attrs.contains(from) && attrs.contains(to) {
                return Err(ConversionError::AttributeConflict {
                    original: from.clone(),
                    renamed: to.clone(),
                });
            }
        }

        let mut out = OpAttrs::new();
        for (name, value) in attrs.iter() {
            if self.ignores.contains(name) {
                log::debug!("Ignoring attribute `{name}` of {}", self.op);
            } else if self.disables.contains(name) {
                log::warn!("Attribute `{name}` is disabled in {}", self.op);
            } else if let Some((_, to)) = self.renames.iter().find(|(from, _)| from == name) {
                out.insert(to.clone(), value.to_op_attr(name)?);
            } else if let Some((_, to, transform)) =
                self.transforms.iter().find(|(from, _, _)| from == name)
            {
                out.insert(to.clone(), transform(name, value)?);
            } else {
                out.insert(name.clone(), value.to_op_attr(name)?);
            }
        }

        for (name, value) in &self.defaults {
            if !out.contains(name) {
                out.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in &self.extras {
            out.insert(name.clone(), value.clone());
        }

        Ok(out)
    }

    /// Builds the IR call over `args`.
    pub fn convert(&self, args: Vec<Expr>, attrs: &Attributes) -> Result<Expr, ConversionError> {
        Ok(Expr::call(self.op, args, self.op_attrs(attrs)?))
    }
}

impl fmt::Debug for AttrConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttrConverter")
            .field("op", &self.op)
            .field("renames", &self.renames)
            .field("defaults", &self.defaults)
            .field("excludes", &self.excludes)
            .field("ignores", &self.ignores)
            .field("disables", &self.disables)
            .field("extras", &self.extras)
            .finish_non_exhaustive()
    }
}
