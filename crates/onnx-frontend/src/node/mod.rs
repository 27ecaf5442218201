//! Conversion rules for the built-in ONNX operators.

mod activation;
mod constant;
mod elementwise;
mod linear;
mod pool;
mod reduce;
mod shape;

use tensor_ir::{DType, Expr, Op, OpAttr, OpAttrs, TensorData};

use crate::{AttributeValue, ConversionError, OperatorRegistry};

pub(crate) fn register(registry: &mut OperatorRegistry) {
    elementwise::register(registry);
    activation::register(registry);
    constant::register(registry);
    shape::register(registry);
    linear::register(registry);
    pool::register(registry);
    reduce::register(registry);
}

fn call(op: Op, args: Vec<Expr>) -> Expr {
    Expr::call(op, args, OpAttrs::new())
}

/// A rank-0 constant of `dtype`.
fn scalar(dtype: DType, value: f64) -> Expr {
    Expr::constant(TensorData::full(dtype, &[], value))
}

/// Integer values of a constant, such as a shape or a list of axes.
fn int_values(name: &str, value: Option<TensorData>) -> Result<Vec<i64>, ConversionError> {
    match value {
        Some(value) if value.dtype().is_int() => Ok(value.to_i64_vec()),
        Some(value) => Err(ConversionError::invalid_attribute(
            name,
            format!("expected integers, found {}", value.dtype()),
        )),
        None => Err(ConversionError::Unsupported(format!(
            "`{name}` computed at runtime"
        ))),
    }
}

/// Passes a list of integers through, rejecting a single integer where exporters must
/// write a list.
fn int_list(name: &str, value: &AttributeValue) -> Result<OpAttr, ConversionError> {
    match value {
        AttributeValue::Ints(values) => Ok(OpAttr::Ints(values.clone())),
        other => Err(ConversionError::AttributeKind {
            name: name.to_string(),
            expected: "a list of ints",
            found: other.kind(),
        }),
    }
}

/// Resolves a possibly negative axis against `rank`.
fn normalize_axis(name: &str, axis: i64, rank: usize) -> Result<usize, ConversionError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved >= rank as i64 {
        return Err(ConversionError::invalid_attribute(
            name,
            format!("axis {axis} is out of range for rank {rank}"),
        ));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use tensor_ir::{Function, TensorData, Value, evaluate};

    use crate::builder::GraphBuilder;
    use crate::protos::GraphProto;
    use crate::{ImportedModel, Importer};

    /// Imports a graph at `opset` with frozen initializers.
    pub(crate) fn import(graph: GraphProto, opset: usize) -> ImportedModel {
        Importer::new()
            .freeze_params(true)
            .import_graph(&graph, opset)
            .unwrap()
    }

    pub(crate) fn run(function: &Function, args: Vec<TensorData>) -> TensorData {
        evaluate(function, args).unwrap().into_tensor().unwrap()
    }

    pub(crate) fn run_tuple(function: &Function, args: Vec<TensorData>) -> Vec<TensorData> {
        evaluate(function, args)
            .unwrap()
            .into_fields()
            .unwrap()
            .into_iter()
            .map(|value: Value| value.into_tensor().unwrap())
            .collect()
    }

    pub(crate) fn floats(values: &[f32], shape: &[usize]) -> TensorData {
        TensorData::from_vec(values.to_vec(), shape).unwrap()
    }

    pub(crate) fn ints(values: &[i64], shape: &[usize]) -> TensorData {
        TensorData::from_vec(values.to_vec(), shape).unwrap()
    }

    /// A graph with one node reading `x` and writing `y`.
    pub(crate) fn unary_graph(
        node: crate::protos::NodeProto,
        dtype: tensor_ir::DType,
        shape: &[usize],
    ) -> GraphProto {
        GraphBuilder::new("test")
            .input("x", dtype, shape)
            .node(node)
            .output("y")
            .build()
    }
}
