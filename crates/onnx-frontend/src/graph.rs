//! Conversion of one graph body into IR values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use tensor_ir::{DType, Dim, Expr, TensorData, TensorType, Var, fold_constant, infer_type};

use crate::protos::{GraphProto, NodeProto};
use crate::tensor::DeclaredType;
use crate::{
    Attributes, ConversionError, ConvertContext, ImportConfig, ImportError, Inputs,
    OperatorRegistry, RegistryError, Scope, tensor_from_proto,
};

/// A non-fatal condition met while importing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportWarning {
    /// An input with symbolic dimensions and no shape override; they are left dynamic.
    SymbolicInputShape { input: String },
    /// The opset rules are dispatched with is lower than the one the model declares.
    OpsetDowngrade { requested: usize, model: usize },
}

impl fmt::Display for ImportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportWarning::SymbolicInputShape { input } => write!(
                f,
                "input `{input}` has symbolic dimensions and no shape override; they stay dynamic"
            ),
            ImportWarning::OpsetDowngrade { requested, model } => write!(
                f,
                "converting with opset {requested} while the model declares opset {model}"
            ),
        }
    }
}

/// State shared by every scope of one import.
pub(crate) struct ImportSession<'a> {
    pub registry: &'a OperatorRegistry,
    pub config: &'a ImportConfig,
    pub opset: usize,
    pub warnings: RefCell<Vec<ImportWarning>>,
}

impl<'a> ImportSession<'a> {
    pub(crate) fn new(registry: &'a OperatorRegistry, config: &'a ImportConfig, opset: usize) -> Self {
        Self {
            registry,
            config,
            opset,
            warnings: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn warn(&self, warning: ImportWarning) {
        log::warn!("{warning}");
        self.warnings.borrow_mut().push(warning);
    }

    /// Resolves every node of `graph` and of the graphs nested in its attributes, collecting
    /// each distinct failure.
    pub(crate) fn check_support(&self, graph: &GraphProto, missing: &mut Vec<RegistryError>) {
        for node in &graph.node {
            if let Err(err) = self.registry.resolve(&node.op_type, self.opset) {
                if !missing.contains(&err) {
                    missing.push(err);
                }
            }
            for attr in &node.attribute {
                if let Some(body) = attr.g.as_ref() {
                    self.check_support(body, missing);
                }
                for body in &attr.graphs {
                    self.check_support(body, missing);
                }
            }
        }
    }
}

/// Imports the initializers, inputs and nodes of `graph` into `scope` and returns the values
/// of its outputs.
pub(crate) fn import_body(
    session: &ImportSession<'_>,
    scope: &mut Scope<'_>,
    graph: &GraphProto,
) -> Result<Vec<Expr>, ImportError> {
    let freeze = session.config.freeze_params;

    // Non-frozen initializers become parameters. Those also listed as inputs are declared
    // in input order, the rest after the inputs.
    let mut pending: HashMap<&str, (Var, TensorData)> = HashMap::new();
    for initializer in &graph.initializer {
        let value = tensor_from_proto(initializer)?;
        if freeze {
            scope.bind(initializer.name.clone(), Expr::constant(value));
        } else {
            let var = Var::new(initializer.name.clone(), value.ty());
            scope.bind(initializer.name.clone(), Expr::var(&var));
            pending.insert(initializer.name.as_str(), (var, value));
        }
    }

    for input in &graph.input {
        let name = input.name.as_str();
        if name.is_empty() {
            continue;
        }
        if let Some((var, value)) = pending.remove(name) {
            scope.declare_param(var, Some(value));
            continue;
        }
        if scope.is_bound_locally(name) {
            continue;
        }

        let declared = DeclaredType::from_value_info(input)?;
        let shape = match session.config.shapes.get(name) {
            Some(dims) => dims.iter().map(|&dim| Dim::Known(dim)).collect(),
            None => {
                if declared.is_symbolic() {
                    session.warn(ImportWarning::SymbolicInputShape {
                        input: name.to_string(),
                    });
                }
                declared.dims()
            }
        };
        let dtype = session
            .config
            .dtypes
            .resolve(name)
            .or(declared.dtype)
            .unwrap_or(DType::Float32);

        let var = Var::new(name, TensorType::new(dtype, shape));
        log::debug!("Input {var:?}");
        scope.bind(name, Expr::var(&var));
        scope.declare_param(var, None);
    }

    for initializer in &graph.initializer {
        if let Some((var, value)) = pending.remove(initializer.name.as_str()) {
            scope.declare_param(var, Some(value));
        }
    }

    for (position, node) in graph.node.iter().enumerate() {
        import_node(session, scope, position, node)?;
    }

    graph
        .output
        .iter()
        .map(|output| {
            scope
                .lookup(&output.name)
                .cloned()
                .ok_or_else(|| ImportError::UnboundValue {
                    node: graph.name.clone(),
                    name: output.name.clone(),
                })
        })
        .collect()
}

fn import_node(
    session: &ImportSession<'_>,
    scope: &mut Scope<'_>,
    position: usize,
    node: &NodeProto,
) -> Result<(), ImportError> {
    let op = node.op_type.as_str();
    let attrs = Attributes::from_proto(&node.attribute).map_err(|err| {
        ImportError::MalformedAttribute {
            op: op.to_string(),
            node: node.name.clone(),
            reason: err.to_string(),
        }
    })?;

    let (version, rule) = session
        .registry
        .resolve(op, session.opset)
        .map_err(|err| ImportError::UnsupportedOperatorSet(vec![err]))?;
    log::debug!("Converting node {position} `{}` with {op} v{version}", node.name);

    let inputs = node
        .input
        .iter()
        .map(|name| match name.as_str() {
            "" => Ok(None),
            name => scope
                .lookup(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| ImportError::UnboundValue {
                    node: node.name.clone(),
                    name: name.to_string(),
                }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let rule_error = |source: ConversionError| {
        if source.is_attribute_error() {
            ImportError::MalformedAttribute {
                op: op.to_string(),
                node: node.name.clone(),
                reason: source.to_string(),
            }
        } else {
            ImportError::ConversionRule {
                op: op.to_string(),
                node: node.name.clone(),
                position,
                source,
            }
        }
    };

    let mut ctx = ConvertContext::new(session, scope, node.output.len());
    let produced = rule
        .apply(&Inputs::new(inputs), &attrs, &mut ctx)
        .map_err(rule_error)?;

    let produced = produced
        .iter()
        .map(|expr| {
            let expr = fold_constant(expr);
            infer_type(&expr).map_err(|err| rule_error(err.into()))?;
            Ok(expr)
        })
        .collect::<Result<Vec<_>, ImportError>>()?;

    let bound = reconcile_outputs(&node.output, produced).map_err(|(produced, declared)| {
        ImportError::ArityMismatch {
            op: op.to_string(),
            node: node.name.clone(),
            produced,
            declared,
        }
    })?;
    for (name, expr) in bound {
        scope.bind(name, expr);
    }

    Ok(())
}

/// Pairs the values a rule produced with the non-empty output names of its node.
///
/// Values are paired with the declared names slot by slot. Values in slots with an empty
/// name (or past the end of the declared names) are dropped. On a count mismatch, returns
/// the number of surviving values and of non-empty names.
pub fn reconcile_outputs(
    declared: &[String],
    produced: Vec<Expr>,
) -> Result<Vec<(String, Expr)>, (usize, usize)> {
    let names = declared.iter().filter(|name| !name.is_empty()).count();
    let survivors: Vec<(String, Expr)> = produced
        .into_iter()
        .enumerate()
        .filter_map(|(slot, expr)| match declared.get(slot) {
            Some(name) if !name.is_empty() => Some((name.clone(), expr)),
            _ => None,
        })
        .collect();

    if survivors.len() != names {
        return Err((survivors.len(), names));
    }
    Ok(survivors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(count: usize) -> Vec<Expr> {
        (0..count)
            .map(|i| Expr::constant(TensorData::scalar(i as i64)))
            .collect()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn empty_slots_are_dropped_in_order() {
        let produced = values(3);
        let bound = reconcile_outputs(&names(&["a", "", "c"]), produced.clone()).unwrap();

        let bound_names: Vec<&str> = bound.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(bound_names, vec!["a", "c"]);
        assert!(bound[0].1.ptr_eq(&produced[0]));
        assert!(bound[1].1.ptr_eq(&produced[2]));
    }

    #[test]
    fn single_value_keeps_its_slot() {
        assert_eq!(reconcile_outputs(&names(&["", "mask"]), values(1)).unwrap_err(), (0, 1));

        let bound = reconcile_outputs(&names(&["y", ""]), values(1)).unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].0, "y");
    }

    #[test]
    fn extra_values_past_the_declared_names_are_dropped() {
        let bound = reconcile_outputs(&names(&["out"]), values(2)).unwrap();
        assert_eq!(bound.len(), 1);
    }

    #[test]
    fn count_mismatch_is_reported() {
        assert_eq!(
            reconcile_outputs(&names(&["a", "b", "c"]), values(2)).unwrap_err(),
            (2, 3)
        );
        assert_eq!(reconcile_outputs(&names(&["a", "b"]), values(1)).unwrap_err(), (1, 2));
    }

    #[test]
    fn warnings_read_as_sentences() {
        let warning = ImportWarning::OpsetDowngrade {
            requested: 9,
            model: 13,
        };
        assert_eq!(
            warning.to_string(),
            "converting with opset 9 while the model declares opset 13"
        );
    }
}
