use tensor_ir::IrError;

use crate::registry::RegistryError;
use crate::tensor::TensorError;

/// Errors raised by a single conversion rule.
#[derive(thiserror::Error, Debug)]
pub enum ConversionError {
    #[error("missing required input {index}")]
    MissingInput { index: usize },

    #[error("expected {expected} input(s), got {actual}")]
    InvalidInputCount { expected: String, actual: usize },

    #[error("missing required attribute `{0}`")]
    MissingAttribute(String),

    #[error("attribute `{name}`: expected {expected}, found {found}")]
    AttributeKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid attribute `{name}`: {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("attribute `{original}` conflicts with `{renamed}`")]
    AttributeConflict { original: String, renamed: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("in subgraph: {0}")]
    Subgraph(#[source] Box<ImportError>),
}

impl ConversionError {
    pub(crate) fn invalid_attribute(name: impl ToString, reason: impl ToString) -> Self {
        Self::InvalidAttribute {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error stems from the attributes of the node rather than the rule.
    pub fn is_attribute_error(&self) -> bool {
        matches!(
            self,
            ConversionError::AttributeKind { .. } | ConversionError::MissingAttribute(_)
        )
    }
}

/// Errors aborting an import.
#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("unsupported operators: {}", join(.0))]
    UnsupportedOperatorSet(Vec<RegistryError>),

    #[error("node `{node}` ({op}): malformed attribute: {reason}")]
    MalformedAttribute {
        op: String,
        node: String,
        reason: String,
    },

    #[error("node {position} `{node}` ({op}): {source}")]
    ConversionRule {
        op: String,
        node: String,
        position: usize,
        source: ConversionError,
    },

    #[error(
        "node `{node}` ({op}) produced {produced} output(s) for {declared} non-empty output name(s)"
    )]
    ArityMismatch {
        op: String,
        node: String,
        produced: usize,
        declared: usize,
    },

    #[error("node `{node}` reads `{name}`, which is not bound")]
    UnboundValue { node: String, name: String },

    #[error("shape override `{0}` does not name a graph input")]
    UnknownInputOverride(String),

    #[error("several initializer parameters are named `{0}`")]
    DuplicateParameter(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("model has no graph")]
    MissingGraph,

    #[error("invalid import configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf error: {0}")]
    Protobuf(#[from] protobuf::Error),
}

fn join(errors: &[RegistryError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
