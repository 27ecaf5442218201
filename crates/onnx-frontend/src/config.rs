use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tensor_ir::DType;

use crate::ImportError;

/// Element type overrides for graph inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DTypeOverrides {
    /// Use the declared element types.
    #[default]
    None,
    /// One element type for every input.
    All(DType),
    /// Element types by input name.
    PerInput(BTreeMap<String, DType>),
}

impl DTypeOverrides {
    /// The override for input `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<DType> {
        match self {
            DTypeOverrides::None => None,
            DTypeOverrides::All(dtype) => Some(*dtype),
            DTypeOverrides::PerInput(dtypes) => dtypes.get(name).copied(),
        }
    }
}

/// Options of an import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Concrete shapes for graph inputs, by name.
    pub shapes: BTreeMap<String, Vec<usize>>,
    pub dtypes: DTypeOverrides,
    /// Opset used to pick conversion rules; the model's own opset when absent.
    pub opset: Option<usize>,
    /// Bind initializers as constants instead of function parameters.
    pub freeze_params: bool,
}

impl ImportConfig {
    /// Loads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
