use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A live parameter value as it travels over the wire. Numbers are always
/// carried as `f64` so `5` and `5.0` compare equal.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ControlValue {
    pub fn as_number(&self) -> Option<f64> {
        if let ControlValue::Number(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let ControlValue::Bool(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let ControlValue::Text(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Reads a scalar JSON value. Anything else comes back as the name of
    /// its JSON type.
    pub fn from_json(value: &Value) -> Result<Self, &'static str> {
        match value {
            Value::Bool(v) => Ok(Self::Bool(*v)),
            Value::Number(v) => v.as_f64().map(Self::Number).ok_or("number"),
            Value::String(v) => Ok(Self::Text(v.clone())),
            Value::Null => Err("null"),
            Value::Array(_) => Err("array"),
            Value::Object(_) => Err("object"),
        }
    }

    /// Non-finite numbers have no JSON form and become `null`
    pub fn to_json(&self) -> Value {
        match self {
            ControlValue::Bool(v) => Value::Bool(*v),
            ControlValue::Number(v) => {
                Number::from_f64(*v).map_or(Value::Null, Value::Number)
            }
            ControlValue::Text(v) => Value::String(v.clone()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ControlValue::Bool(_) => "boolean",
            ControlValue::Number(_) => "number",
            ControlValue::Text(_) => "string",
        }
    }
}

impl Default for ControlValue {
    fn default() -> Self {
        Self::Number(0.0)
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for ControlValue {
    fn from(value: f32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for ControlValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for ControlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ControlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Key to live value, kept in schema declaration order
pub type ValueMap = IndexMap<String, ControlValue>;
