use core::fmt;

use ndarray::{ArrayD, IxDyn};

use crate::{DType, Dim, IrError, TensorType};

/// Host n-dimensional array tagged with its element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
    Int8(ArrayD<i8>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
    Bool(ArrayD<bool>),
}

/// Scalar types that can be stored in a [`TensorData`].
pub trait Element: Copy + fmt::Debug + PartialEq + PartialOrd + Send + Sync + 'static {
    /// The element type tag.
    const DTYPE: DType;

    /// Wraps an array of this element type.
    fn into_data(array: ArrayD<Self>) -> TensorData;

    /// Borrows the array if `data` holds this element type.
    fn array(data: &TensorData) -> Option<&ArrayD<Self>>;

    /// Saturating conversion from a float.
    fn from_f64(value: f64) -> Self;

    /// Conversion from an integer, wrapping on overflow.
    fn from_i64(value: i64) -> Self;

    /// Widening conversion to a float.
    fn to_f64(self) -> f64;

    /// Conversion to an integer, truncating floats.
    fn to_i64(self) -> i64;
}

macro_rules! impl_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_data(array: ArrayD<Self>) -> TensorData {
                TensorData::$variant(array)
            }

            fn array(data: &TensorData) -> Option<&ArrayD<Self>> {
                match data {
                    TensorData::$variant(array) => Some(array),
                    _ => None,
                }
            }

            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn from_i64(value: i64) -> Self {
                value as $ty
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn to_i64(self) -> i64 {
                self as i64
            }
        }

        impl From<ArrayD<$ty>> for TensorData {
            fn from(array: ArrayD<$ty>) -> Self {
                TensorData::$variant(array)
            }
        }
    };
}

impl_element!(f32, Float32);
impl_element!(f64, Float64);
impl_element!(i8, Int8);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, Uint8);

impl Element for bool {
    const DTYPE: DType = DType::Bool;

    fn into_data(array: ArrayD<Self>) -> TensorData {
        TensorData::Bool(array)
    }

    fn array(data: &TensorData) -> Option<&ArrayD<Self>> {
        match data {
            TensorData::Bool(array) => Some(array),
            _ => None,
        }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }

    fn from_i64(value: i64) -> Self {
        value != 0
    }

    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }

    fn to_i64(self) -> i64 {
        self as i64
    }
}

impl From<ArrayD<bool>> for TensorData {
    fn from(array: ArrayD<bool>) -> Self {
        TensorData::Bool(array)
    }
}

/// Runs `$body` with `$arr` bound to the inner array, whatever the element type.
macro_rules! visit {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            $crate::TensorData::Float32($arr) => $body,
            $crate::TensorData::Float64($arr) => $body,
            $crate::TensorData::Int8($arr) => $body,
            $crate::TensorData::Int32($arr) => $body,
            $crate::TensorData::Int64($arr) => $body,
            $crate::TensorData::Uint8($arr) => $body,
            $crate::TensorData::Bool($arr) => $body,
        }
    };
}

/// Like [`visit`], falling back to `$other` for booleans.
macro_rules! visit_numeric {
    ($data:expr, $arr:ident => $body:expr, $other:ident => $fallback:expr) => {
        match $data {
            $crate::TensorData::Float32($arr) => $body,
            $crate::TensorData::Float64($arr) => $body,
            $crate::TensorData::Int8($arr) => $body,
            $crate::TensorData::Int32($arr) => $body,
            $crate::TensorData::Int64($arr) => $body,
            $crate::TensorData::Uint8($arr) => $body,
            $other => $fallback,
        }
    };
}

/// Like [`visit`], restricted to floating point arrays.
macro_rules! visit_float {
    ($data:expr, $arr:ident => $body:expr, $other:ident => $fallback:expr) => {
        match $data {
            $crate::TensorData::Float32($arr) => $body,
            $crate::TensorData::Float64($arr) => $body,
            $other => $fallback,
        }
    };
}

/// Binds two arrays of the same element type.
macro_rules! visit_pair {
    ($lhs:expr, $rhs:expr, ($a:ident, $b:ident) => $body:expr, $other:ident => $fallback:expr) => {
        match ($lhs, $rhs) {
            ($crate::TensorData::Float32($a), $crate::TensorData::Float32($b)) => $body,
            ($crate::TensorData::Float64($a), $crate::TensorData::Float64($b)) => $body,
            ($crate::TensorData::Int8($a), $crate::TensorData::Int8($b)) => $body,
            ($crate::TensorData::Int32($a), $crate::TensorData::Int32($b)) => $body,
            ($crate::TensorData::Int64($a), $crate::TensorData::Int64($b)) => $body,
            ($crate::TensorData::Uint8($a), $crate::TensorData::Uint8($b)) => $body,
            ($crate::TensorData::Bool($a), $crate::TensorData::Bool($b)) => $body,
            $other => $fallback,
        }
    };
}

/// Binds two numeric arrays of the same element type.
macro_rules! visit_numeric_pair {
    ($lhs:expr, $rhs:expr, ($a:ident, $b:ident) => $body:expr, $other:ident => $fallback:expr) => {
        match ($lhs, $rhs) {
            ($crate::TensorData::Float32($a), $crate::TensorData::Float32($b)) => $body,
            ($crate::TensorData::Float64($a), $crate::TensorData::Float64($b)) => $body,
            ($crate::TensorData::Int8($a), $crate::TensorData::Int8($b)) => $body,
            ($crate::TensorData::Int32($a), $crate::TensorData::Int32($b)) => $body,
            ($crate::TensorData::Int64($a), $crate::TensorData::Int64($b)) => $body,
            ($crate::TensorData::Uint8($a), $crate::TensorData::Uint8($b)) => $body,
            $other => $fallback,
        }
    };
}

pub(crate) use {visit, visit_float, visit_numeric, visit_numeric_pair, visit_pair};

impl TensorData {
    /// Creates a tensor from row-major values.
    pub fn from_vec<T: Element>(values: Vec<T>, shape: &[usize]) -> Result<Self, IrError> {
        Ok(T::into_data(ArrayD::from_shape_vec(IxDyn(shape), values)?))
    }

    /// Creates a rank-0 tensor.
    pub fn scalar<T: Element>(value: T) -> Self {
        T::into_data(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Creates a tensor of the given type filled with `value`.
    pub fn full(dtype: DType, shape: &[usize], value: f64) -> Self {
        fn fill<T: Element>(shape: &[usize], value: f64) -> TensorData {
            T::into_data(ArrayD::from_elem(IxDyn(shape), T::from_f64(value)))
        }

        match dtype {
            DType::Float32 => fill::<f32>(shape, value),
            DType::Float64 => fill::<f64>(shape, value),
            DType::Int8 => fill::<i8>(shape, value),
            DType::Int32 => fill::<i32>(shape, value),
            DType::Int64 => fill::<i64>(shape, value),
            DType::Uint8 => fill::<u8>(shape, value),
            DType::Bool => fill::<bool>(shape, value),
        }
    }

    /// Creates a tensor with zero elements along at least one axis.
    pub fn empty(dtype: DType, shape: &[usize]) -> Self {
        Self::full(dtype, shape, 0.0)
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Float32(_) => DType::Float32,
            TensorData::Float64(_) => DType::Float64,
            TensorData::Int8(_) => DType::Int8,
            TensorData::Int32(_) => DType::Int32,
            TensorData::Int64(_) => DType::Int64,
            TensorData::Uint8(_) => DType::Uint8,
            TensorData::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> &[usize] {
        visit!(self, array => array.shape())
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        visit!(self, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The static type of this value.
    pub fn ty(&self) -> TensorType {
        TensorType::new(
            self.dtype(),
            self.shape().iter().map(|&dim| Dim::Known(dim)).collect(),
        )
    }

    /// Reinterprets the row-major elements under a new shape.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, IrError> {
        visit!(self, array => Ok(reshape_array(array, shape)?.into()))
    }

    /// Converts every element to `dtype`.
    pub fn cast(&self, dtype: DType) -> Self {
        if self.dtype() == dtype {
            return self.clone();
        }

        visit!(self, array => match dtype {
            DType::Float32 => convert::<_, f32>(array),
            DType::Float64 => convert::<_, f64>(array),
            DType::Int8 => convert::<_, i8>(array),
            DType::Int32 => convert::<_, i32>(array),
            DType::Int64 => convert::<_, i64>(array),
            DType::Uint8 => convert::<_, u8>(array),
            DType::Bool => convert::<_, bool>(array),
        })
    }

    /// Row-major elements converted to `i64`.
    pub fn to_i64_vec(&self) -> Vec<i64> {
        visit!(self, array => array.iter().map(|value| value.to_i64()).collect())
    }

    /// Row-major elements converted to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        visit!(self, array => array.iter().map(|value| value.to_f64()).collect())
    }

    /// Reads a single-element tensor as a boolean.
    pub fn truthy(&self) -> Result<bool, IrError> {
        if self.len() != 1 {
            return Err(IrError::type_mismatch(
                "condition",
                "a single element",
                format!("{} elements", self.len()),
            ));
        }

        Ok(visit!(self, array => array.iter().all(|value| value.to_f64() != 0.0)))
    }
}

pub(crate) fn reshape_array<T: Clone>(
    array: &ArrayD<T>,
    shape: &[usize],
) -> Result<ArrayD<T>, IrError> {
    Ok(ArrayD::from_shape_vec(
        IxDyn(shape),
        array.iter().cloned().collect(),
    )?)
}

fn convert<T: Element, U: Element>(array: &ArrayD<T>) -> TensorData {
    let converted = if T::DTYPE.is_float() || U::DTYPE.is_float() {
        array.mapv(|value| U::from_f64(value.to_f64()))
    } else {
        array.mapv(|value| U::from_i64(value.to_i64()))
    };

    U::into_data(converted)
}

impl fmt::Display for TensorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() > 8 {
            return write!(f, "<{:?}, {}>", self.shape(), self.dtype());
        }

        let values = visit!(self, array => array
            .iter()
            .map(|value| format!("{value:?}"))
            .collect::<Vec<_>>());

        if self.rank() == 0 {
            write!(f, "{}{}", values.join(""), suffix(self.dtype()))
        } else {
            write!(
                f,
                "[{}] /* {:?}, {} */",
                values.join(", "),
                self.shape(),
                self.dtype()
            )
        }
    }
}

fn suffix(dtype: DType) -> &'static str {
    match dtype {
        DType::Float32 => "f",
        DType::Float64 => "f64",
        DType::Int8 => "i8",
        DType::Int32 => "",
        DType::Int64 => "i64",
        DType::Uint8 => "u8",
        DType::Bool => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_checks_the_element_count() {
        assert!(TensorData::from_vec(vec![1.0f32, 2.0, 3.0], &[2, 2]).is_err());

        let data = TensorData::from_vec(vec![1i64, 2, 3, 4], &[2, 2]).unwrap();
        assert_eq!(data.dtype(), DType::Int64);
        assert_eq!(data.shape(), &[2, 2]);
    }

    #[test]
    fn cast_between_integer_types_is_exact() {
        let data = TensorData::from_vec(vec![i64::MAX / 3, -7], &[2]).unwrap();
        let cast = data.cast(DType::Int64);

        assert_eq!(cast, data);
        assert_eq!(
            data.cast(DType::Float32).cast(DType::Int32).to_i64_vec()[1],
            -7
        );
    }

    #[test]
    fn truthy_requires_a_single_element() {
        assert!(TensorData::scalar(true).truthy().unwrap());
        assert!(!TensorData::scalar(0i32).truthy().unwrap());
        assert!(
            TensorData::from_vec(vec![true, true], &[2])
                .unwrap()
                .truthy()
                .is_err()
        );
    }

    #[test]
    fn display_scalars_and_small_tensors() {
        assert_eq!(TensorData::scalar(5i64).to_string(), "5i64");
        assert_eq!(
            TensorData::from_vec(vec![1i32, 2], &[2]).unwrap().to_string(),
            "[1, 2] /* [2], int32 */"
        );
    }
}
