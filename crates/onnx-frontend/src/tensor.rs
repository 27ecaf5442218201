//! Decoding of ONNX tensors and declared value types.

use bytemuck::AnyBitPattern;
use half::f16;
use protobuf::Enum;
use tensor_ir::{DType, Dim, TensorData};

use crate::protos::{
    TensorProto, ValueInfoProto, tensor_proto::DataType as DT,
    tensor_shape_proto::dimension::Value, type_proto,
};

/// Errors raised while decoding a tensor or a declared type.
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("tensor `{name}`: unsupported element type {dtype}")]
    UnsupportedType { name: String, dtype: String },

    #[error("tensor `{name}`: invalid dimensions {dims:?}")]
    InvalidShape { name: String, dims: Vec<i64> },

    #[error("tensor `{name}`: shape {shape:?} needs {expected} element(s), found {actual}")]
    PayloadSize {
        name: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("tensor `{name}`: value {value} does not fit in {dtype}")]
    OutOfRange {
        name: String,
        dtype: DType,
        value: i32,
    },
}

/// Maps an ONNX element type code to an IR dtype.
///
/// Half precision and 16-bit integers have no IR counterpart and widen to `float32` and
/// `int32`.
pub fn dtype_from_proto(code: i32) -> Option<DType> {
    let dtype = match DT::from_i32(code)? {
        DT::FLOAT | DT::FLOAT16 => DType::Float32,
        DT::DOUBLE => DType::Float64,
        DT::INT8 => DType::Int8,
        DT::INT16 | DT::UINT16 | DT::INT32 => DType::Int32,
        DT::INT64 => DType::Int64,
        DT::UINT8 => DType::Uint8,
        DT::BOOL => DType::Bool,
        _ => return None,
    };
    Some(dtype)
}

/// The ONNX element type code of an IR dtype.
pub fn dtype_to_proto(dtype: DType) -> DT {
    match dtype {
        DType::Float32 => DT::FLOAT,
        DType::Float64 => DT::DOUBLE,
        DType::Int8 => DT::INT8,
        DType::Int32 => DT::INT32,
        DType::Int64 => DT::INT64,
        DType::Uint8 => DT::UINT8,
        DType::Bool => DT::BOOL,
    }
}

fn is_widened(code: i32) -> bool {
    matches!(
        DT::from_i32(code),
        Some(DT::FLOAT16 | DT::INT16 | DT::UINT16)
    )
}

fn type_name(code: i32) -> String {
    match DT::from_i32(code) {
        Some(dtype) => format!("{dtype:?}"),
        None => format!("#{code}"),
    }
}

/// Decodes a tensor from either its `raw_data` bytes or its typed payload fields.
pub fn tensor_from_proto(tensor: &TensorProto) -> Result<TensorData, TensorError> {
    let name = tensor.name.as_str();
    let shape = tensor
        .dims
        .iter()
        .map(|&dim| usize::try_from(dim))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TensorError::InvalidShape {
            name: name.to_string(),
            dims: tensor.dims.clone(),
        })?;

    let code = tensor.data_type;
    let unsupported = || TensorError::UnsupportedType {
        name: name.to_string(),
        dtype: type_name(code),
    };
    let dtype = dtype_from_proto(code).ok_or_else(unsupported)?;
    if is_widened(code) {
        log::warn!(
            "Tensor `{name}` of type {} is widened to {dtype}",
            type_name(code)
        );
    }

    let raw = tensor.raw_data.as_slice();
    let data = match DT::from_i32(code).ok_or_else(unsupported)? {
        DT::FLOAT if raw.is_empty() => build(name, tensor.float_data.clone(), &shape),
        DT::FLOAT => build(name, from_le::<f32>(name, raw)?, &shape),
        DT::DOUBLE if raw.is_empty() => build(name, tensor.double_data.clone(), &shape),
        DT::DOUBLE => build(name, from_le::<f64>(name, raw)?, &shape),
        DT::INT64 if raw.is_empty() => build(name, tensor.int64_data.clone(), &shape),
        DT::INT64 => build(name, from_le::<i64>(name, raw)?, &shape),
        DT::INT32 if raw.is_empty() => build(name, tensor.int32_data.clone(), &shape),
        DT::INT32 => build(name, from_le::<i32>(name, raw)?, &shape),
        DT::INT16 if raw.is_empty() => build(name, tensor.int32_data.clone(), &shape),
        DT::INT16 => build(name, widen(from_le::<i16>(name, raw)?), &shape),
        DT::UINT16 if raw.is_empty() => build(name, tensor.int32_data.clone(), &shape),
        DT::UINT16 => build(name, widen(from_le::<u16>(name, raw)?), &shape),
        DT::INT8 if raw.is_empty() => {
            build(name, narrow::<i8>(name, DType::Int8, &tensor.int32_data)?, &shape)
        }
        DT::INT8 => build(name, from_le::<i8>(name, raw)?, &shape),
        DT::UINT8 if raw.is_empty() => {
            build(name, narrow::<u8>(name, DType::Uint8, &tensor.int32_data)?, &shape)
        }
        DT::UINT8 => build(name, raw.to_vec(), &shape),
        DT::BOOL if raw.is_empty() => build(
            name,
            tensor.int32_data.iter().map(|&v| v != 0).collect(),
            &shape,
        ),
        DT::BOOL => build(name, raw.iter().map(|&v| v != 0).collect(), &shape),
        DT::FLOAT16 => {
            let halves: Vec<f16> = if raw.is_empty() {
                tensor
                    .int32_data
                    .iter()
                    .map(|&bits| f16::from_bits(bits as u16))
                    .collect()
            } else {
                from_le::<f16>(name, raw)?
            };
            build(name, halves.into_iter().map(f16::to_f32).collect(), &shape)
        }
        _ => return Err(unsupported()),
    }?;

    Ok(data)
}

fn build<T: tensor_ir::Element>(
    name: &str,
    values: Vec<T>,
    shape: &[usize],
) -> Result<TensorData, TensorError> {
    let expected = shape.iter().product::<usize>();
    if values.len() != expected {
        return Err(TensorError::PayloadSize {
            name: name.to_string(),
            shape: shape.to_vec(),
            expected,
            actual: values.len(),
        });
    }

    TensorData::from_vec(values, shape).map_err(|_| TensorError::PayloadSize {
        name: name.to_string(),
        shape: shape.to_vec(),
        expected,
        actual: expected,
    })
}

/// Reinterprets little-endian bytes as elements of `T`.
fn from_le<T: AnyBitPattern>(name: &str, raw: &[u8]) -> Result<Vec<T>, TensorError> {
    let size = std::mem::size_of::<T>();
    if raw.len() % size != 0 {
        return Err(TensorError::PayloadSize {
            name: name.to_string(),
            shape: vec![raw.len()],
            expected: raw.len().next_multiple_of(size),
            actual: raw.len(),
        });
    }
    Ok(raw.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
}

fn widen<T: Into<i32>>(values: Vec<T>) -> Vec<i32> {
    values.into_iter().map(Into::into).collect()
}

/// Narrows the `int32_data` payload of an 8-bit tensor.
fn narrow<T: TryFrom<i32>>(
    name: &str,
    dtype: DType,
    values: &[i32],
) -> Result<Vec<T>, TensorError> {
    values
        .iter()
        .map(|&value| {
            T::try_from(value).map_err(|_| TensorError::OutOfRange {
                name: name.to_string(),
                dtype,
                value,
            })
        })
        .collect()
}

/// Element type and shape declared for a graph value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeclaredType {
    pub dtype: Option<DType>,
    /// `None` entries are symbolic or unknown dimensions.
    pub shape: Vec<Option<usize>>,
}

impl DeclaredType {
    pub(crate) fn from_value_info(info: &ValueInfoProto) -> Result<Self, TensorError> {
        let Some(type_proto::Value::TensorType(tensor)) =
            info.type_.as_ref().and_then(|ty| ty.value.as_ref())
        else {
            return Ok(Self {
                dtype: None,
                shape: Vec::new(),
            });
        };

        let dtype = match tensor.elem_type {
            0 => None,
            code => Some(dtype_from_proto(code).ok_or_else(|| TensorError::UnsupportedType {
                name: info.name.clone(),
                dtype: type_name(code),
            })?),
        };
        let shape = tensor
            .shape
            .as_ref()
            .map(|shape| {
                shape
                    .dim
                    .iter()
                    .map(|dim| match dim.value {
                        Some(Value::DimValue(value)) if value >= 0 => Some(value as usize),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self { dtype, shape })
    }

    pub(crate) fn is_symbolic(&self) -> bool {
        self.shape.iter().any(Option::is_none)
    }

    pub(crate) fn dims(&self) -> Vec<Dim> {
        self.shape
            .iter()
            .map(|dim| dim.map_or(Dim::Any, Dim::Known))
            .collect()
    }
}
