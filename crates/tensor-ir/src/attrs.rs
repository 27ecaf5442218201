use std::collections::BTreeMap;

use crate::{DType, IrError};

/// A keyword argument of an IR operator.
#[derive(Debug, Clone, PartialEq)]
pub enum OpAttr {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
    DType(DType),
}

impl From<i64> for OpAttr {
    fn from(value: i64) -> Self {
        OpAttr::Int(value)
    }
}

impl From<f64> for OpAttr {
    fn from(value: f64) -> Self {
        OpAttr::Float(value)
    }
}

impl From<bool> for OpAttr {
    fn from(value: bool) -> Self {
        OpAttr::Bool(value)
    }
}

impl From<&str> for OpAttr {
    fn from(value: &str) -> Self {
        OpAttr::Str(value.to_string())
    }
}

impl From<Vec<i64>> for OpAttr {
    fn from(value: Vec<i64>) -> Self {
        OpAttr::Ints(value)
    }
}

impl From<Vec<f64>> for OpAttr {
    fn from(value: Vec<f64>) -> Self {
        OpAttr::Floats(value)
    }
}

impl From<DType> for OpAttr {
    fn from(value: DType) -> Self {
        OpAttr::DType(value)
    }
}

impl core::fmt::Display for OpAttr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            OpAttr::Int(value) => write!(f, "{value}"),
            OpAttr::Float(value) => write!(f, "{value:?}f"),
            OpAttr::Bool(value) => write!(f, "{value}"),
            OpAttr::Str(value) => write!(f, "{value:?}"),
            OpAttr::Ints(values) => write!(f, "{values:?}"),
            OpAttr::Floats(values) => write!(f, "{values:?}"),
            OpAttr::Strs(values) => write!(f, "{values:?}"),
            OpAttr::DType(value) => write!(f, "\"{value}\""),
        }
    }
}

/// Ordered keyword arguments of an IR call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpAttrs(BTreeMap<String, OpAttr>);

impl OpAttrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OpAttr>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<OpAttr>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&OpAttr> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OpAttr)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, IrError> {
        match self.get(name) {
            None => Ok(None),
            Some(OpAttr::Int(value)) => Ok(Some(*value)),
            Some(OpAttr::Bool(value)) => Ok(Some(*value as i64)),
            Some(other) => Err(kind_error(name, "an integer", other)),
        }
    }

    pub fn int_or(&self, name: &str, default: i64) -> Result<i64, IrError> {
        Ok(self.int(name)?.unwrap_or(default))
    }

    pub fn float_or(&self, name: &str, default: f64) -> Result<f64, IrError> {
        match self.get(name) {
            None => Ok(default),
            Some(OpAttr::Float(value)) => Ok(*value),
            Some(OpAttr::Int(value)) => Ok(*value as f64),
            Some(other) => Err(kind_error(name, "a float", other)),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, IrError> {
        match self.get(name) {
            None => Ok(default),
            Some(OpAttr::Bool(value)) => Ok(*value),
            Some(OpAttr::Int(value)) => Ok(*value != 0),
            Some(other) => Err(kind_error(name, "a boolean", other)),
        }
    }

    /// Integer list; a single integer is read as a list of one.
    pub fn ints(&self, name: &str) -> Result<Option<Vec<i64>>, IrError> {
        match self.get(name) {
            None => Ok(None),
            Some(OpAttr::Ints(values)) => Ok(Some(values.clone())),
            Some(OpAttr::Int(value)) => Ok(Some(vec![*value])),
            Some(other) => Err(kind_error(name, "a list of integers", other)),
        }
    }

    pub fn dtype(&self, name: &str) -> Result<Option<DType>, IrError> {
        match self.get(name) {
            None => Ok(None),
            Some(OpAttr::DType(value)) => Ok(Some(*value)),
            Some(OpAttr::Str(value)) => value
                .parse()
                .map(Some)
                .map_err(|_| IrError::invalid_attribute("attrs", name, "unknown dtype")),
            Some(other) => Err(kind_error(name, "a dtype", other)),
        }
    }
}

fn kind_error(name: &str, expected: &str, found: &OpAttr) -> IrError {
    IrError::invalid_attribute("attrs", name, format!("expected {expected}, found {found}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_ints_read_as_single_element_lists() {
        let attrs = OpAttrs::new().with("axis", 2i64).with("axes", vec![0i64, 1]);

        assert_eq!(attrs.ints("axis").unwrap(), Some(vec![2]));
        assert_eq!(attrs.ints("axes").unwrap(), Some(vec![0, 1]));
        assert_eq!(attrs.ints("missing").unwrap(), None);
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let attrs = OpAttrs::new().with("axes", vec![0i64, 1]);
        assert!(attrs.int("axes").is_err());
    }

    #[test]
    fn dtype_parses_from_strings() {
        let attrs = OpAttrs::new().with("dtype", "int32");
        assert_eq!(attrs.dtype("dtype").unwrap(), Some(DType::Int32));
    }
}
