use crate::DType;

/// Errors raised while type checking or evaluating IR.
#[derive(thiserror::Error, Debug)]
pub enum IrError {
    #[error("{op}: expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        op: String,
        expected: String,
        actual: usize,
    },

    #[error("{op}: expected {expected}, got {actual}")]
    TypeMismatch {
        op: String,
        expected: String,
        actual: String,
    },

    #[error("{op}: incompatible shapes {lhs} and {rhs}")]
    ShapeMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },

    #[error("{op}: invalid attribute `{name}`: {reason}")]
    InvalidAttribute {
        op: String,
        name: String,
        reason: String,
    },

    #[error("axis {axis} is out of range for a tensor of rank {rank}")]
    AxisOutOfRange { axis: i64, rank: usize },

    #[error("index {index} is out of bounds for an axis of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("tuple index {index} is out of range for a tuple of {len} field(s)")]
    TupleIndex { index: usize, len: usize },

    #[error("expected a tensor value, found a tuple")]
    NotATensor,

    #[error("expected a tuple value, found a tensor")]
    NotATuple,

    #[error("{op} is not defined for {dtype}")]
    UnsupportedDType { op: String, dtype: DType },

    #[error("unbound variable `%{0}`")]
    UnboundVar(String),

    #[error("integer division by zero")]
    DivisionByZero,

    #[error("cannot evaluate {0}")]
    Unsupported(String),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl IrError {
    pub(crate) fn type_mismatch(
        op: impl ToString,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::TypeMismatch {
            op: op.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn invalid_attribute(
        op: impl ToString,
        name: impl ToString,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidAttribute {
            op: op.to_string(),
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
