//! Semantic type tags.
//!
//! The engine only knows doubles, strings, booleans and objects; a
//! [`ValueType`] tells the marshaller which native representation the caller
//! expects so that, for example, `1.5 + 2` can be read either as `3.5` or as
//! the truncated integer `3`.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// Pick the most specific representation from the engine's runtime tag
    #[default]
    Any,
    /// No value; results are discarded and read back as null
    Void,
    Bool,
    I32,
    I64,
    F64,
    Str,
    Array(Box<ValueType>),
    Object,
    Function,
    /// A native object exposed to the engine through a proxy
    Native,
    /// Either null/undefined or the inner type
    Optional(Box<ValueType>),
}

impl ValueType {
    pub fn array(element: ValueType) -> Self {
        ValueType::Array(Box::new(element))
    }

    pub fn optional(inner: ValueType) -> Self {
        ValueType::Optional(Box::new(inner))
    }

    /// Primitive types that cannot hold null unless wrapped in `Optional`.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ValueType::Bool | ValueType::I32 | ValueType::I64 | ValueType::F64 | ValueType::Str
        )
    }

    /// Whether null/undefined is an acceptable value for this type.
    pub fn accepts_null(&self) -> bool {
        !self.is_primitive()
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Any => f.write_str("any"),
            ValueType::Void => f.write_str("void"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::I32 => f.write_str("i32"),
            ValueType::I64 => f.write_str("i64"),
            ValueType::F64 => f.write_str("f64"),
            ValueType::Str => f.write_str("string"),
            ValueType::Array(element) => write!(f, "array<{element}>"),
            ValueType::Object => f.write_str("object"),
            ValueType::Function => f.write_str("function"),
            ValueType::Native => f.write_str("native"),
            ValueType::Optional(inner) => write!(f, "{inner}?"),
        }
    }
}

impl FromStr for ValueType {
    type Err = BridgeError;

    /// Parses the textual form produced by `Display` (`i32`, `array<f64>`,
    /// `string?`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix('?') {
            return Ok(ValueType::optional(inner.parse()?));
        }
        if let Some(inner) = s.strip_prefix("array<").and_then(|rest| rest.strip_suffix('>')) {
            return Ok(ValueType::array(inner.parse()?));
        }

        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(ValueType::Any),
            "void" => Ok(ValueType::Void),
            "bool" | "boolean" => Ok(ValueType::Bool),
            "i32" | "int" => Ok(ValueType::I32),
            "i64" | "long" => Ok(ValueType::I64),
            "f64" | "double" | "number" => Ok(ValueType::F64),
            "str" | "string" => Ok(ValueType::Str),
            "array" => Ok(ValueType::array(ValueType::Any)),
            "object" => Ok(ValueType::Object),
            "function" => Ok(ValueType::Function),
            "native" => Ok(ValueType::Native),
            other => Err(BridgeError::TypeConversion(format!(
                "unknown value type '{other}'"
            ))),
        }
    }
}
