use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KbError, KbResult};

/// Built-in primitive ranges for data properties.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Datatype {
    String,
    Number,
    /// A specialisation of `Number`.
    Integer,
}

impl Datatype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Integer => "Integer",
        }
    }

    /// Recognise a datatype name as users write it (`String` or `string`).
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "String" | "string" => Some(Self::String),
            "Number" | "number" => Some(Self::Number),
            "Integer" | "integer" => Some(Self::Integer),
            _ => None,
        }
    }

    /// Decode a stored datatype code.
    pub fn parse(s: &str) -> KbResult<Self> {
        Self::from_name(s).ok_or_else(|| KbError::UnknownType(s.to_string()))
    }

    /// Whether a JSON value is acceptable for this range.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_names_in_either_case() {
        assert_eq!(Datatype::from_name("Integer"), Some(Datatype::Integer));
        assert_eq!(Datatype::from_name("number"), Some(Datatype::Number));
        assert_eq!(Datatype::from_name("Sensor"), None);
    }

    #[test]
    fn unknown_stored_code_is_unknown_type() {
        assert!(matches!(Datatype::parse("Float"), Err(KbError::UnknownType(t)) if t == "Float"));
    }

    #[test]
    fn integer_rejects_fractions() {
        assert!(Datatype::Integer.accepts(&json!(3)));
        assert!(!Datatype::Integer.accepts(&json!(3.5)));
        assert!(Datatype::Number.accepts(&json!(3.5)));
        assert!(!Datatype::String.accepts(&json!(3)));
    }
}
