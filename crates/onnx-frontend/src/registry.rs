//! Versioned operator registry.
//!
//! Each ONNX operator owns a family of [`ConversionRule`]s keyed by the opset version that
//! introduced them. A node is converted by the rule with the greatest version not above the
//! opset in force.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tensor_ir::{Expr, Op, OpAttrs};

use crate::{AttrConverter, Attributes, ConversionError, ConvertContext, Inputs};

/// Failure to find a rule for an operator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operator `{0}` is not supported")]
    UnknownOperator(String),

    #[error("operator `{op}` has no rule for opset {requested} (earliest supported is {earliest})")]
    UnsupportedVersion {
        op: String,
        requested: usize,
        earliest: usize,
    },
}

/// A conversion function: node inputs and attributes to the IR values of its outputs.
pub type ConvertFn =
    fn(&Inputs, &Attributes, &mut ConvertContext<'_, '_>) -> Result<Vec<Expr>, ConversionError>;

/// How a node is turned into IR.
#[derive(Clone)]
pub enum ConversionRule {
    /// A direct mapping onto an IR operator taking exactly `arity` inputs and no attributes.
    Elementwise { op: Op, arity: usize },
    /// A single IR call whose keyword arguments are derived from the node attributes.
    Transform(AttrConverter),
    /// Anything else.
    Custom(ConvertFn),
}

impl ConversionRule {
    pub fn apply(
        &self,
        inputs: &Inputs,
        attrs: &Attributes,
        ctx: &mut ConvertContext<'_, '_>,
    ) -> Result<Vec<Expr>, ConversionError> {
        match self {
            ConversionRule::Elementwise { op, arity } => {
                inputs.expect_len(*arity)?;
                let args = (0..*arity)
                    .map(|index| inputs.required(index).cloned())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(vec![Expr::call(*op, args, OpAttrs::new())])
            }
            ConversionRule::Transform(converter) => {
                Ok(vec![converter.convert(inputs.present(), attrs)?])
            }
            ConversionRule::Custom(convert) => convert(inputs, attrs, ctx),
        }
    }
}

impl fmt::Debug for ConversionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionRule::Elementwise { op, arity } => f
                .debug_struct("Elementwise")
                .field("op", op)
                .field("arity", arity)
                .finish(),
            ConversionRule::Transform(converter) => {
                f.debug_tuple("Transform").field(converter).finish()
            }
            ConversionRule::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Conversion rules by operator name and minimum opset version.
#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    rules: HashMap<String, BTreeMap<usize, ConversionRule>>,
}

impl OperatorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in ONNX rule.
    pub fn onnx() -> Self {
        let mut registry = Self::new();
        crate::node::register(&mut registry);
        crate::control_flow::register(&mut registry);
        registry
    }

    /// Registers `rule` for `op` from opset `since` on, replacing any rule with the same key.
    pub fn register(
        &mut self,
        op: impl Into<String>,
        since: usize,
        rule: ConversionRule,
    ) -> &mut Self {
        self.rules.entry(op.into()).or_default().insert(since, rule);
        self
    }

    /// Resolves the rule in force for `op` at opset `requested`, returning it with the
    /// version it was registered under.
    pub fn resolve(
        &self,
        op: &str,
        requested: usize,
    ) -> Result<(usize, &ConversionRule), RegistryError> {
        let family = self
            .rules
            .get(op)
            .ok_or_else(|| RegistryError::UnknownOperator(op.to_string()))?;

        match family.range(..=requested).next_back() {
            Some((version, rule)) => Ok((*version, rule)),
            None => Err(RegistryError::UnsupportedVersion {
                op: op.to_string(),
                requested,
                earliest: family.keys().next().copied().unwrap_or_default(),
            }),
        }
    }

    pub fn contains(&self, op: &str) -> bool {
        self.rules.contains_key(op)
    }

    /// Registered versions of `op`, ascending.
    pub fn versions(&self, op: &str) -> Vec<usize> {
        self.rules
            .get(op)
            .map(|family| family.keys().copied().collect())
            .unwrap_or_default()
    }
}
