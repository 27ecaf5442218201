//! Builders for ONNX protobuf messages.
//!
//! Handy for tests and for programs that assemble small graphs without an exporter.
//!
//! ```
//! use onnx_frontend::builder::{GraphBuilder, NodeBuilder};
//! use tensor_ir::DType;
//!
//! let graph = GraphBuilder::new("double")
//!     .input("x", DType::Float32, &[2])
//!     .node(NodeBuilder::new("Add").inputs(&["x", "x"]).output("y").build())
//!     .output("y")
//!     .build();
//! assert_eq!(graph.node.len(), 1);
//! ```

use protobuf::{EnumOrUnknown, MessageField};
use tensor_ir::{DType, TensorData};

use crate::dtype_to_proto;
use crate::protos::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    TensorShapeProto, TypeProto, ValueInfoProto, attribute_proto::AttributeType,
    tensor_shape_proto::{Dimension, dimension::Value},
    type_proto,
};

/// Encodes `data` into the typed payload fields of a tensor.
pub fn tensor_proto(name: &str, data: &TensorData) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = name.to_string();
    tensor.dims = data.shape().iter().map(|&dim| dim as i64).collect();
    tensor.data_type = dtype_to_proto(data.dtype()) as i32;

    match data.dtype() {
        DType::Float32 => {
            tensor.float_data = data.to_f64_vec().into_iter().map(|v| v as f32).collect()
        }
        DType::Float64 => tensor.double_data = data.to_f64_vec(),
        DType::Int64 => tensor.int64_data = data.to_i64_vec(),
        DType::Int8 | DType::Int32 | DType::Uint8 | DType::Bool => {
            tensor.int32_data = data.to_i64_vec().into_iter().map(|v| v as i32).collect()
        }
    }
    tensor
}

/// Declares a tensor value. `None` dimensions become symbolic `d{i}` parameters.
pub fn value_info(name: &str, dtype: DType, shape: &[Option<usize>]) -> ValueInfoProto {
    let mut tensor_shape = TensorShapeProto::new();
    for (i, dim) in shape.iter().enumerate() {
        let mut dimension = Dimension::new();
        dimension.value = Some(match dim {
            Some(size) => Value::DimValue(*size as i64),
            None => Value::DimParam(format!("d{i}")),
        });
        tensor_shape.dim.push(dimension);
    }

    let mut tensor = type_proto::Tensor::new();
    tensor.elem_type = dtype_to_proto(dtype) as i32;
    tensor.shape = MessageField::some(tensor_shape);

    let mut ty = TypeProto::new();
    ty.value = Some(type_proto::Value::TensorType(tensor));

    let mut info = ValueInfoProto::new();
    info.name = name.to_string();
    info.type_ = MessageField::some(ty);
    info
}

/// Assembles a [`GraphProto`].
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    graph: GraphProto,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        let mut graph = GraphProto::new();
        graph.name = name.to_string();
        Self { graph }
    }

    pub fn input(self, name: &str, dtype: DType, shape: &[usize]) -> Self {
        let shape: Vec<Option<usize>> = shape.iter().copied().map(Some).collect();
        self.symbolic_input(name, dtype, &shape)
    }

    pub fn symbolic_input(mut self, name: &str, dtype: DType, shape: &[Option<usize>]) -> Self {
        self.graph.input.push(value_info(name, dtype, shape));
        self
    }

    /// Declares an output by name only.
    pub fn output(mut self, name: &str) -> Self {
        let mut info = ValueInfoProto::new();
        info.name = name.to_string();
        self.graph.output.push(info);
        self
    }

    pub fn initializer(mut self, name: &str, data: &TensorData) -> Self {
        self.graph.initializer.push(tensor_proto(name, data));
        self
    }

    pub fn node(mut self, node: NodeProto) -> Self {
        self.graph.node.push(node);
        self
    }

    pub fn build(self) -> GraphProto {
        self.graph
    }

    /// Wraps the graph in a model importing the default domain at `opset`.
    pub fn into_model(self, opset: i64) -> ModelProto {
        let mut import = OperatorSetIdProto::new();
        import.version = opset;

        let mut model = ModelProto::new();
        model.ir_version = 8;
        model.opset_import.push(import);
        model.graph = MessageField::some(self.graph);
        model
    }
}

impl From<GraphProto> for GraphBuilder {
    fn from(graph: GraphProto) -> Self {
        Self { graph }
    }
}

/// Assembles a [`NodeProto`].
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    node: NodeProto,
}

impl NodeBuilder {
    pub fn new(op: &str) -> Self {
        let mut node = NodeProto::new();
        node.op_type = op.to_string();
        Self { node }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.node.name = name.to_string();
        self
    }

    /// Adds an input; an empty name marks an omitted optional input.
    pub fn input(mut self, name: &str) -> Self {
        self.node.input.push(name.to_string());
        self
    }

    pub fn inputs(self, names: &[&str]) -> Self {
        names.iter().fold(self, |builder, name| builder.input(name))
    }

    /// Adds an output; an empty name marks an unused output.
    pub fn output(mut self, name: &str) -> Self {
        self.node.output.push(name.to_string());
        self
    }

    pub fn outputs(self, names: &[&str]) -> Self {
        names.iter().fold(self, |builder, name| builder.output(name))
    }

    pub fn attr_int(self, name: &str, value: i64) -> Self {
        let mut attr = attribute(name, AttributeType::INT);
        attr.i = value;
        self.attr(attr)
    }

    pub fn attr_float(self, name: &str, value: f32) -> Self {
        let mut attr = attribute(name, AttributeType::FLOAT);
        attr.f = value;
        self.attr(attr)
    }

    pub fn attr_string(self, name: &str, value: &str) -> Self {
        let mut attr = attribute(name, AttributeType::STRING);
        attr.s = value.as_bytes().to_vec();
        self.attr(attr)
    }

    pub fn attr_ints(self, name: &str, values: &[i64]) -> Self {
        let mut attr = attribute(name, AttributeType::INTS);
        attr.ints = values.to_vec();
        self.attr(attr)
    }

    pub fn attr_floats(self, name: &str, values: &[f32]) -> Self {
        let mut attr = attribute(name, AttributeType::FLOATS);
        attr.floats = values.to_vec();
        self.attr(attr)
    }

    pub fn attr_tensor(self, name: &str, data: &TensorData) -> Self {
        let mut attr = attribute(name, AttributeType::TENSOR);
        attr.t = MessageField::some(tensor_proto(name, data));
        self.attr(attr)
    }

    pub fn attr_graph(self, name: &str, graph: GraphProto) -> Self {
        let mut attr = attribute(name, AttributeType::GRAPH);
        attr.g = MessageField::some(graph);
        self.attr(attr)
    }

    pub fn attr(mut self, attr: AttributeProto) -> Self {
        self.node.attribute.push(attr);
        self
    }

    pub fn build(self) -> NodeProto {
        self.node
    }
}

fn attribute(name: &str, kind: AttributeType) -> AttributeProto {
    let mut attr = AttributeProto::new();
    attr.name = name.to_string();
    attr.type_ = EnumOrUnknown::new(kind);
    attr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::DeclaredType;

    #[test]
    fn symbolic_dimensions_are_named() {
        let info = value_info("x", DType::Int64, &[None, Some(3)]);
        let declared = DeclaredType::from_value_info(&info).unwrap();

        assert_eq!(declared.dtype, Some(DType::Int64));
        assert_eq!(declared.shape, vec![None, Some(3)]);
        assert!(declared.is_symbolic());
    }

    #[test]
    fn models_import_the_default_domain() {
        let model = GraphBuilder::new("g").into_model(13);

        assert_eq!(model.opset_import[0].domain, "");
        assert_eq!(model.opset_import[0].version, 13);
        assert_eq!(model.graph.name, "g");
    }
}
