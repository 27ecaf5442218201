use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Element type of a tensor.
///
/// Names parse and print in lowercase (`float32`, `int64`, ...), which is also the form
/// used in configuration files.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
    Uint8,
    Bool,
}

impl DType {
    /// Returns true for floating point types.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Returns true for signed and unsigned integer types.
    pub fn is_int(&self) -> bool {
        matches!(
            self,
            DType::Int8 | DType::Int32 | DType::Int64 | DType::Uint8
        )
    }

    /// Returns true for every type arithmetic is defined on.
    pub fn is_numeric(&self) -> bool {
        self.is_float() || self.is_int()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names_round_trip_in_lowercase() {
        assert_eq!(DType::from_str("float32").unwrap(), DType::Float32);
        assert_eq!(DType::from_str("uint8").unwrap(), DType::Uint8);
        assert_eq!(DType::Int64.to_string(), "int64");
        assert!(DType::from_str("Float32").is_err());
    }

    #[test]
    fn categories() {
        assert!(DType::Float64.is_float());
        assert!(DType::Uint8.is_int());
        assert!(!DType::Bool.is_numeric());
    }
}
