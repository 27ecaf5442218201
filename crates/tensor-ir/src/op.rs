use strum::{Display, EnumString};

/// IR operators.
///
/// Operators take tensor arguments plus keyword [`OpAttrs`](crate::OpAttrs). The
/// attribute names each operator reads are listed on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Op {
    // Elementwise binary arithmetic, numpy broadcasting.
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Maximum,
    Minimum,

    // Comparisons, producing booleans.
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Boolean logic.
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    LogicalNot,

    // Elementwise unary.
    Negative,
    Abs,
    Sqrt,
    Exp,
    Log,
    Floor,
    Ceil,
    Round,
    Sigmoid,
    Tanh,
    #[strum(serialize = "nn.relu")]
    Relu,
    /// `alpha`
    #[strum(serialize = "nn.leaky_relu")]
    LeakyRelu,
    Copy,
    /// `rate`; identity at inference.
    #[strum(serialize = "nn.dropout")]
    Dropout,
    /// `dtype`
    Cast,
    /// `a_min`, `a_max`
    Clip,
    /// `dtype` (optional, defaults to the input's)
    OnesLike,
    /// `dtype` (optional, defaults to the input's)
    ZerosLike,

    // Shape manipulation.
    /// `newshape`: `0` copies the input dimension, `-1` is inferred.
    Reshape,
    /// Reshape driven by a runtime 1-D shape tensor.
    DynReshape,
    /// `axis`, `num_newaxis`
    ExpandDims,
    /// `axis` (optional list; squeezes every unit dimension when absent)
    Squeeze,
    /// `axes` (optional permutation; reverses when absent)
    Transpose,
    /// `axis`; variadic.
    Concatenate,
    /// `indices` (split points) or `sections`, and `axis`. Produces a tuple.
    Split,
    /// `axis` (optional; indexes the flattened data when absent)
    Take,
    /// `dtype`
    ShapeOf,
    /// Broadcast to a runtime 1-D shape tensor.
    BroadcastTo,
    /// Selects between two tensors with a boolean condition.
    Where,

    // Normalization and reductions.
    /// `axis`
    #[strum(serialize = "nn.softmax")]
    Softmax,
    /// `axis`
    #[strum(serialize = "nn.log_softmax")]
    LogSoftmax,
    /// `axis` (optional list), `keepdims`
    Sum,
    /// `axis` (optional list), `keepdims`
    Mean,
    /// `axis` (optional list), `keepdims`
    Max,
    /// `axis` (optional list), `keepdims`
    Min,

    // Linear algebra.
    /// `x @ w^T` with `w` laid out as `[units, in]`.
    #[strum(serialize = "nn.dense")]
    Dense,
    #[strum(serialize = "nn.matmul")]
    MatMul,

    // Pooling over `[N, C, spatial...]`: `pool_size`, `strides`, `dilation`, `padding`
    // (all begins then all ends), `ceil_mode`, and `count_include_pad` for averages.
    #[strum(serialize = "nn.max_pool1d")]
    MaxPool1d,
    #[strum(serialize = "nn.max_pool2d")]
    MaxPool2d,
    #[strum(serialize = "nn.max_pool3d")]
    MaxPool3d,
    #[strum(serialize = "nn.avg_pool1d")]
    AvgPool1d,
    #[strum(serialize = "nn.avg_pool2d")]
    AvgPool2d,
    #[strum(serialize = "nn.avg_pool3d")]
    AvgPool3d,
}

impl Op {
    /// Elementwise binary arithmetic.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Subtract
                | Op::Multiply
                | Op::Divide
                | Op::Power
                | Op::Maximum
                | Op::Minimum
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Op::Equal | Op::Less | Op::LessEqual | Op::Greater | Op::GreaterEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Op::LogicalAnd | Op::LogicalOr | Op::LogicalXor | Op::LogicalNot
        )
    }

    pub fn is_reduction(&self) -> bool {
        matches!(self, Op::Sum | Op::Mean | Op::Max | Op::Min)
    }

    /// Number of spatial dimensions for pooling operators.
    pub fn pool_dims(&self) -> Option<usize> {
        match self {
            Op::MaxPool1d | Op::AvgPool1d => Some(1),
            Op::MaxPool2d | Op::AvgPool2d => Some(2),
            Op::MaxPool3d | Op::AvgPool3d => Some(3),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names() {
        assert_eq!(Op::LogicalAnd.to_string(), "logical_and");
        assert_eq!(Op::MaxPool2d.to_string(), "nn.max_pool2d");
        assert_eq!(Op::from_str("expand_dims").unwrap(), Op::ExpandDims);
    }
}
