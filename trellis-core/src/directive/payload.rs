//! Payloads
//!
//! Raw directive values arrive as [`serde_json::Value`]. They are classified
//! once, at the boundary, into a [`Payload`] so the engine never inspects a
//! raw value's shape itself.

use serde_json::Value;

/// A classified directive payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A boolean.
    Flag(bool),

    /// An ordered sequence of items.
    Items(Vec<Value>),

    /// A string. Projection reads it as a selector.
    Text(String),

    /// Anything else (null, numbers, objects).
    Other(Value),
}

impl Payload {
    /// Truthiness of the payload. See [`is_truthy`].
    pub fn truthy(&self) -> bool {
        match self {
            Payload::Flag(flag) => *flag,
            Payload::Items(_) => true,
            Payload::Text(text) => !text.is_empty(),
            Payload::Other(value) => is_truthy(value),
        }
    }

    /// The JSON type name of the payload, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Flag(_) => "boolean",
            Payload::Items(_) => "array",
            Payload::Text(_) => "string",
            Payload::Other(value) => type_name(value),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(flag) => Payload::Flag(flag),
            Value::Array(items) => Payload::Items(items),
            Value::String(text) => Payload::Text(text),
            other => Payload::Other(other),
        }
    }
}

/// Truthiness of a raw value.
///
/// `null`, `false`, `0`, `NaN` and the empty string are falsy. Everything
/// else, including empty arrays and objects, is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The JSON type name of a raw value.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
