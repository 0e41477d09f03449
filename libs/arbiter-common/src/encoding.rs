//! Line encoding shared by test case inputs and harness output.
//!
//! One value per line: numbers in decimal, booleans as `true`/`false`,
//! strings raw, arrays as `[a,b,c]` with string elements JSON-quoted.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Null values cannot be encoded")]
    Null,
    #[error("Objects cannot be encoded as parameters")]
    Object,
    #[error("Nested arrays are not supported")]
    NestedArray,
    #[error("String parameters cannot contain line breaks")]
    Multiline,
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
}

/// Scalar element types of the parameter vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// 32-bit in the compiled drivers
    Integer,
    /// 64-bit in the compiled drivers
    Long,
    Float,
    Boolean,
    String,
}

/// Closed parameter/return type vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Some(Self::Integer),
            "long" | "int64" => Some(Self::Long),
            "float" | "double" => Some(Self::Float),
            "boolean" | "bool" => Some(Self::Boolean),
            "string" | "str" => Some(Self::String),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
        }
    }
}

impl FromStr for ParamType {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let lower = name.to_ascii_lowercase();

        let element = if let Some(inner) = lower.strip_suffix("[]") {
            Some(inner.to_string())
        } else {
            ["list<", "array<"].iter().find_map(|prefix| {
                lower
                    .strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix('>'))
                    .map(str::to_string)
            })
        };

        let unsupported = || EncodingError::UnsupportedType(name.to_string());
        match element {
            Some(inner) => ScalarType::parse(&inner)
                .map(ParamType::Array)
                .ok_or_else(unsupported),
            None => ScalarType::parse(&lower)
                .map(ParamType::Scalar)
                .ok_or_else(unsupported),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Scalar(s) => f.write_str(s.as_str()),
            ParamType::Array(s) => write!(f, "{}[]", s.as_str()),
        }
    }
}

fn encode_element(value: &Value) -> Result<String, EncodingError> {
    match value {
        Value::Null => Err(EncodingError::Null),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(Value::String(s.clone()).to_string()),
        Value::Array(_) => Err(EncodingError::NestedArray),
        Value::Object(_) => Err(EncodingError::Object),
    }
}

/// Encode a single parameter value to its line form
pub fn encode_value(value: &Value) -> Result<String, EncodingError> {
    match value {
        Value::String(s) if s.contains('\n') || s.contains('\r') => Err(EncodingError::Multiline),
        Value::String(s) => Ok(s.clone()),
        Value::Array(items) => {
            let parts = items
                .iter()
                .map(encode_element)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", parts.join(",")))
        }
        other => encode_element(other),
    }
}

/// Encode ordered parameter values into the input stream read by a harness
pub fn encode_input(values: &[Value]) -> Result<String, EncodingError> {
    let mut input = String::new();
    for value in values {
        input.push_str(&encode_value(value)?);
        input.push('\n');
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(encode_value(&json!(42)).unwrap(), "42");
        assert_eq!(encode_value(&json!(-1.5)).unwrap(), "-1.5");
        assert_eq!(encode_value(&json!(true)).unwrap(), "true");
        assert_eq!(encode_value(&json!("hello world")).unwrap(), "hello world");
        assert_eq!(encode_value(&json!("")).unwrap(), "");
    }

    #[test]
    fn test_array_encoding() {
        assert_eq!(encode_value(&json!([1, 2, 3])).unwrap(), "[1,2,3]");
        assert_eq!(encode_value(&json!([])).unwrap(), "[]");
        assert_eq!(encode_value(&json!(["a", "b\"c"])).unwrap(), r#"["a","b\"c"]"#);
        assert_eq!(encode_value(&json!([true, false])).unwrap(), "[true,false]");
    }

    #[test]
    fn test_rejected_values() {
        assert_eq!(encode_value(&json!(null)), Err(EncodingError::Null));
        assert_eq!(encode_value(&json!([[1]])), Err(EncodingError::NestedArray));
        assert_eq!(encode_value(&json!({"a": 1})), Err(EncodingError::Object));
        assert_eq!(encode_value(&json!("a\nb")), Err(EncodingError::Multiline));
    }

    #[test]
    fn test_encode_input_one_line_per_value() {
        let input = encode_input(&[json!(1), json!(2)]).unwrap();
        assert_eq!(input, "1\n2\n");
    }

    #[test]
    fn test_param_type_vocabulary() {
        assert_eq!("integer".parse::<ParamType>().unwrap(), ParamType::Scalar(ScalarType::Integer));
        assert_eq!("Double".parse::<ParamType>().unwrap(), ParamType::Scalar(ScalarType::Float));
        assert_eq!("long".parse::<ParamType>().unwrap(), ParamType::Scalar(ScalarType::Long));
        assert_eq!("long[]".parse::<ParamType>().unwrap(), ParamType::Array(ScalarType::Long));
        assert_eq!("int[]".parse::<ParamType>().unwrap(), ParamType::Array(ScalarType::Integer));
        assert_eq!(
            "List<String>".parse::<ParamType>().unwrap(),
            ParamType::Array(ScalarType::String)
        );
        assert_eq!(
            "array<bool>".parse::<ParamType>().unwrap(),
            ParamType::Array(ScalarType::Boolean)
        );
        assert_eq!(
            "map<int,int>".parse::<ParamType>(),
            Err(EncodingError::UnsupportedType("map<int,int>".to_string()))
        );
        assert!("int[][]".parse::<ParamType>().is_err());
        assert!("void".parse::<ParamType>().is_err());
    }

    #[test]
    fn test_param_type_display() {
        assert_eq!(ParamType::Array(ScalarType::Float).to_string(), "float[]");
        assert_eq!(ParamType::Scalar(ScalarType::String).to_string(), "string");
        assert_eq!(ParamType::Array(ScalarType::Long).to_string(), "long[]");
    }
}
