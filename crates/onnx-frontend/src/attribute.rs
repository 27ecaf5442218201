//! ONNX attribute values
//!
//! Raw [`AttributeProto`] records are parsed once per node into an [`Attributes`] table.
//! Conversion rules read typed values from the table; a value of the wrong kind is an
//! error rather than a silent coercion.

use std::collections::BTreeMap;

use tensor_ir::OpAttr;

use crate::ConversionError;
use crate::protos::{AttributeProto, GraphProto, TensorProto, attribute_proto::AttributeType};

/// The value of a node attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(TensorProto),
    Graph(GraphProto),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
    Tensors(Vec<TensorProto>),
    Graphs(Vec<GraphProto>),
}

impl AttributeValue {
    /// Parses a raw attribute.
    ///
    /// The declared attribute type selects the populated field. Writers that leave the type
    /// undefined are supported by probing the fields, lists and messages first.
    pub fn from_proto(attr: &AttributeProto) -> Result<Self, ConversionError> {
        let kind = match attr.type_.enum_value() {
            Ok(AttributeType::UNDEFINED) => probe(attr).ok_or_else(|| {
                ConversionError::invalid_attribute(&attr.name, "no populated value")
            })?,
            Ok(kind) => kind,
            Err(code) => {
                return Err(ConversionError::invalid_attribute(
                    &attr.name,
                    format!("unknown attribute type {code}"),
                ));
            }
        };

        let value = match kind {
            AttributeType::FLOAT => AttributeValue::Float(attr.f),
            AttributeType::INT => AttributeValue::Int(attr.i),
            AttributeType::STRING => AttributeValue::String(utf8(&attr.name, &attr.s)?),
            AttributeType::TENSOR => AttributeValue::Tensor(
                attr.t
                    .as_ref()
                    .cloned()
                    .ok_or_else(|| ConversionError::invalid_attribute(&attr.name, "no tensor"))?,
            ),
            AttributeType::GRAPH => AttributeValue::Graph(
                attr.g
                    .as_ref()
                    .cloned()
                    .ok_or_else(|| ConversionError::invalid_attribute(&attr.name, "no graph"))?,
            ),
            AttributeType::FLOATS => AttributeValue::Floats(attr.floats.clone()),
            AttributeType::INTS => AttributeValue::Ints(attr.ints.clone()),
            AttributeType::STRINGS => AttributeValue::Strings(
                attr.strings
                    .iter()
                    .map(|bytes| utf8(&attr.name, bytes))
                    .collect::<Result<_, _>>()?,
            ),
            AttributeType::TENSORS => AttributeValue::Tensors(attr.tensors.clone()),
            AttributeType::GRAPHS => AttributeValue::Graphs(attr.graphs.clone()),
            other => {
                return Err(ConversionError::invalid_attribute(
                    &attr.name,
                    format!("unsupported attribute type {other:?}"),
                ));
            }
        };

        Ok(value)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Float(_) => "a float",
            AttributeValue::Int(_) => "an int",
            AttributeValue::String(_) => "a string",
            AttributeValue::Tensor(_) => "a tensor",
            AttributeValue::Graph(_) => "a graph",
            AttributeValue::Floats(_) => "a list of floats",
            AttributeValue::Ints(_) => "a list of ints",
            AttributeValue::Strings(_) => "a list of strings",
            AttributeValue::Tensors(_) => "a list of tensors",
            AttributeValue::Graphs(_) => "a list of graphs",
        }
    }

    /// Converts the value into an IR operator keyword argument.
    pub fn to_op_attr(&self, name: &str) -> Result<OpAttr, ConversionError> {
        let attr = match self {
            AttributeValue::Float(value) => OpAttr::Float(*value as f64),
            AttributeValue::Int(value) => OpAttr::Int(*value),
            AttributeValue::String(value) => OpAttr::Str(value.clone()),
            AttributeValue::Floats(values) => {
                OpAttr::Floats(values.iter().map(|v| *v as f64).collect())
            }
            AttributeValue::Ints(values) => OpAttr::Ints(values.clone()),
            AttributeValue::Strings(values) => OpAttr::Strs(values.clone()),
            other => {
                return Err(ConversionError::invalid_attribute(
                    name,
                    format!("{} cannot be passed to an IR operator", other.kind()),
                ));
            }
        };
        Ok(attr)
    }
}

fn probe(attr: &AttributeProto) -> Option<AttributeType> {
    let kind = if attr.t.is_some() {
        AttributeType::TENSOR
    } else if attr.g.is_some() {
        AttributeType::GRAPH
    } else if !attr.floats.is_empty() {
        AttributeType::FLOATS
    } else if !attr.ints.is_empty() {
        AttributeType::INTS
    } else if !attr.strings.is_empty() {
        AttributeType::STRINGS
    } else if !attr.tensors.is_empty() {
        AttributeType::TENSORS
    } else if !attr.graphs.is_empty() {
        AttributeType::GRAPHS
    } else if !attr.s.is_empty() {
        AttributeType::STRING
    } else if attr.i != 0 {
        AttributeType::INT
    } else if attr.f != 0.0 {
        AttributeType::FLOAT
    } else {
        return None;
    };
    Some(kind)
}

fn utf8(name: &str, bytes: &[u8]) -> Result<String, ConversionError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ConversionError::invalid_attribute(name, "string is not valid UTF-8"))
}

/// Parsed attributes of a node, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every attribute of a node.
    pub fn from_proto(attrs: &[AttributeProto]) -> Result<Self, ConversionError> {
        let mut table = Self::new();
        for attr in attrs {
            table.insert(attr.name.clone(), AttributeValue::from_proto(attr)?);
        }
        Ok(table)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.0.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, ConversionError> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Int(value)) => Ok(Some(*value)),
            Some(other) => Err(kind_error(name, "an int", other)),
        }
    }

    pub fn int_or(&self, name: &str, default: i64) -> Result<i64, ConversionError> {
        Ok(self.int(name)?.unwrap_or(default))
    }

    pub fn required_int(&self, name: &str) -> Result<i64, ConversionError> {
        self.int(name)?
            .ok_or_else(|| ConversionError::MissingAttribute(name.to_string()))
    }

    /// A float; integer values are accepted since exporters write `1` for `1.0`.
    pub fn float(&self, name: &str) -> Result<Option<f32>, ConversionError> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Float(value)) => Ok(Some(*value)),
            Some(AttributeValue::Int(value)) => Ok(Some(*value as f32)),
            Some(other) => Err(kind_error(name, "a float", other)),
        }
    }

    pub fn float_or(&self, name: &str, default: f32) -> Result<f32, ConversionError> {
        Ok(self.float(name)?.unwrap_or(default))
    }

    pub fn string(&self, name: &str) -> Result<Option<&str>, ConversionError> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::String(value)) => Ok(Some(value)),
            Some(other) => Err(kind_error(name, "a string", other)),
        }
    }

    pub fn ints(&self, name: &str) -> Result<Option<&[i64]>, ConversionError> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Ints(values)) => Ok(Some(values)),
            Some(other) => Err(kind_error(name, "a list of ints", other)),
        }
    }

    pub fn required_ints(&self, name: &str) -> Result<&[i64], ConversionError> {
        self.ints(name)?
            .ok_or_else(|| ConversionError::MissingAttribute(name.to_string()))
    }

    pub fn floats(&self, name: &str) -> Result<Option<&[f32]>, ConversionError> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Floats(values)) => Ok(Some(values)),
            Some(other) => Err(kind_error(name, "a list of floats", other)),
        }
    }

    pub fn tensor(&self, name: &str) -> Result<Option<&TensorProto>, ConversionError> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Tensor(tensor)) => Ok(Some(tensor)),
            Some(other) => Err(kind_error(name, "a tensor", other)),
        }
    }

    pub fn required_graph(&self, name: &str) -> Result<&GraphProto, ConversionError> {
        match self.get(name) {
            None => Err(ConversionError::MissingAttribute(name.to_string())),
            Some(AttributeValue::Graph(graph)) => Ok(graph),
            Some(other) => Err(kind_error(name, "a graph", other)),
        }
    }

    /// Every graph held by an attribute, in attribute name order.
    pub fn graphs(&self) -> impl Iterator<Item = &GraphProto> {
        self.0.values().flat_map(|value| match value {
            AttributeValue::Graph(graph) => std::slice::from_ref(graph),
            AttributeValue::Graphs(graphs) => graphs.as_slice(),
            _ => &[],
        })
    }
}

fn kind_error(name: &str, expected: &'static str, found: &AttributeValue) -> ConversionError {
    ConversionError::AttributeKind {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NodeBuilder;
    use protobuf::EnumOrUnknown;

    #[test]
    fn typed_attributes_are_parsed() {
        let node = NodeBuilder::new("Transpose")
            .attr_ints("perm", &[1, 0])
            .attr_float("alpha", 0.5)
            .attr_string("mode", "constant")
            .build();

        let attrs = Attributes::from_proto(&node.attribute).unwrap();
        assert_eq!(attrs.ints("perm").unwrap(), Some(&[1i64, 0][..]));
        assert_eq!(attrs.float("alpha").unwrap(), Some(0.5));
        assert_eq!(attrs.string("mode").unwrap(), Some("constant"));
    }

    #[test]
    fn scalar_where_a_list_is_expected_is_a_kind_error() {
        let node = NodeBuilder::new("Transpose").attr_int("perm", 1).build();
        let attrs = Attributes::from_proto(&node.attribute).unwrap();

        let err = attrs.ints("perm").unwrap_err();
        assert!(matches!(err, ConversionError::AttributeKind { ref name, .. } if name == "perm"));
        assert!(err.is_attribute_error());
    }

    #[test]
    fn undefined_types_are_probed() {
        let mut attr = AttributeProto::new();
        attr.name = "axes".to_string();
        attr.ints = vec![0, 2];

        assert_eq!(
            AttributeValue::from_proto(&attr).unwrap(),
            AttributeValue::Ints(vec![0, 2])
        );
    }

    #[test]
    fn attribute_without_a_value_is_rejected() {
        let mut attr = AttributeProto::new();
        attr.name = "empty".to_string();
        attr.type_ = EnumOrUnknown::new(AttributeType::UNDEFINED);

        assert!(AttributeValue::from_proto(&attr).is_err());
    }

    #[test]
    fn declared_tensor_without_payload_is_rejected() {
        let mut attr = AttributeProto::new();
        attr.name = "value".to_string();
        attr.type_ = EnumOrUnknown::new(AttributeType::TENSOR);

        let err = AttributeValue::from_proto(&attr).unwrap_err();
        assert_eq!(err.to_string(), "invalid attribute `value`: no tensor");
    }
}
