//! Closed set of value kinds a published variable can hold.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a variable, resolved once when the registry is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantType {
    /// 64-bit floating point scalar
    #[serde(alias = "Double")]
    Float,
    /// Unsigned 32-bit integer
    UInt32,
    /// Boolean flag
    Boolean,
    /// UTF-8 string
    String,
    /// Sequence of floating point values (spectra, calibration arrays)
    FloatArray,
}

impl VariantType {
    /// Value a freshly created variable of this type starts with.
    pub fn zero_value(self) -> Variant {
        match self {
            VariantType::Float => Variant::Float(0.0),
            VariantType::UInt32 => Variant::UInt32(0),
            VariantType::Boolean => Variant::Boolean(false),
            VariantType::String => Variant::String(String::new()),
            VariantType::FloatArray => Variant::FloatArray(Vec::new()),
        }
    }

    /// Scalar numeric types usable as a trigger level.
    pub fn is_numeric(self) -> bool {
        matches!(self, VariantType::Float | VariantType::UInt32)
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantType::Float => "Float",
            VariantType::UInt32 => "UInt32",
            VariantType::Boolean => "Boolean",
            VariantType::String => "String",
            VariantType::FloatArray => "FloatArray",
        };
        f.write_str(name)
    }
}

/// A typed value as stored in the registry and seen by protocol consumers.
///
/// Serializes untagged so registry snapshots read as plain JSON values.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Variant {
    /// Double-precision float
    Float(f64),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Boolean flag
    Boolean(bool),
    /// UTF-8 string
    String(String),
    /// Array of doubles
    FloatArray(Vec<f64>),
}

impl Variant {
    /// The type tag of this value.
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Float(_) => VariantType::Float,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::String(_) => VariantType::String,
            Variant::FloatArray(_) => VariantType::FloatArray,
        }
    }

    /// Numeric view of scalar values, `None` for everything else.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Float(v) => Some(*v),
            Variant::UInt32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// The boolean payload, if this is a `Boolean`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// The integer payload, if this is a `UInt32`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Variant::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    /// The string payload, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) => Some(v),
            _ => None,
        }
    }

    /// The array payload, if this is a `FloatArray`.
    pub fn as_float_array(&self) -> Option<&[f64]> {
        match self {
            Variant::FloatArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Float(value)
    }
}

impl From<u32> for Variant {
    fn from(value: u32) -> Self {
        Variant::UInt32(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Boolean(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<Vec<f64>> for Variant {
    fn from(value: Vec<f64>) -> Self {
        Variant::FloatArray(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_match_type() {
        for ty in [
            VariantType::Float,
            VariantType::UInt32,
            VariantType::Boolean,
            VariantType::String,
            VariantType::FloatArray,
        ] {
            assert_eq!(ty.zero_value().variant_type(), ty);
        }
        assert_eq!(VariantType::FloatArray.zero_value(), Variant::FloatArray(vec![]));
        assert_eq!(VariantType::String.zero_value(), Variant::String(String::new()));
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(Variant::UInt32(3).as_f64(), Some(3.0));
        assert_eq!(Variant::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(Variant::Boolean(true).as_f64(), None);
        assert!(VariantType::UInt32.is_numeric());
        assert!(!VariantType::FloatArray.is_numeric());
    }

    #[test]
    fn test_type_names_deserialize() {
        #[derive(Deserialize)]
        struct Holder {
            ty: VariantType,
        }
        let holder: Holder = serde_json::from_str(r#"{"ty": "Double"}"#).unwrap();
        assert_eq!(holder.ty, VariantType::Float);
        let holder: Holder = serde_json::from_str(r#"{"ty": "FloatArray"}"#).unwrap();
        assert_eq!(holder.ty, VariantType::FloatArray);
    }

    #[test]
    fn test_snapshot_serialization_is_plain() {
        let json = serde_json::to_value(Variant::FloatArray(vec![1.0, 2.5])).unwrap();
        assert_eq!(json, serde_json::json!([1.0, 2.5]));
    }
}
