use core::fmt;

use crate::{DType, IrError};

/// A tensor dimension, either statically known or dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    Any,
}

impl Dim {
    pub fn known(&self) -> Option<usize> {
        match self {
            Dim::Known(value) => Some(*value),
            Dim::Any => None,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Known(value)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(value) => write!(f, "{value}"),
            Dim::Any => f.write_str("?"),
        }
    }
}

/// Element type and (possibly partially dynamic) shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Vec<Dim>,
}

impl TensorType {
    /// Rank-0 tensor type.
    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Vec::new())
    }

    /// Tensor type with every dimension known.
    pub fn fixed(dtype: DType, shape: &[usize]) -> Self {
        Self::new(dtype, shape.iter().map(|&dim| Dim::Known(dim)).collect())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The concrete shape, if no dimension is dynamic.
    pub fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().map(Dim::known).collect()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|dim| dim.to_string()).collect();
        let trailing = if dims.len() == 1 { "," } else { "" };
        write!(f, "Tensor[({}{trailing}), {}]", dims.join(", "), self.dtype)
    }
}

/// The type of an IR expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Tensor(TensorType),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn as_tensor(&self) -> Result<&TensorType, IrError> {
        match self {
            Type::Tensor(tensor) => Ok(tensor),
            Type::Tuple(_) => Err(IrError::NotATensor),
        }
    }

    pub fn into_tensor(self) -> Result<TensorType, IrError> {
        match self {
            Type::Tensor(tensor) => Ok(tensor),
            Type::Tuple(_) => Err(IrError::NotATensor),
        }
    }

    pub fn fields(&self) -> Result<&[Type], IrError> {
        match self {
            Type::Tuple(fields) => Ok(fields),
            Type::Tensor(_) => Err(IrError::NotATuple),
        }
    }
}

impl From<TensorType> for Type {
    fn from(tensor: TensorType) -> Self {
        Type::Tensor(tensor)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor(tensor) => tensor.fmt(f),
            Type::Tuple(fields) => {
                let fields: Vec<String> = fields.iter().map(|field| field.to_string()).collect();
                write!(f, "({})", fields.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_the_printer_format() {
        let ty = TensorType::new(DType::Float32, vec![Dim::Any, Dim::Known(3)]);
        assert_eq!(ty.to_string(), "Tensor[(?, 3), float32]");
        assert_eq!(
            TensorType::fixed(DType::Int64, &[5]).to_string(),
            "Tensor[(5,), int64]"
        );
        assert_eq!(TensorType::scalar(DType::Bool).to_string(), "Tensor[(), bool]");
    }

    #[test]
    fn static_shape_requires_known_dims() {
        let ty = TensorType::new(DType::Float32, vec![Dim::Any, Dim::Known(3)]);
        assert_eq!(ty.static_shape(), None);
        assert_eq!(
            TensorType::fixed(DType::Float32, &[2, 3]).static_shape(),
            Some(vec![2, 3])
        );
    }
}
