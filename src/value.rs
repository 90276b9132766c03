//! Live values and qualifier mappings.
//!
//! Devices report status as loosely typed values: a numeric level, a text
//! label, or an enumerated tag such as `"On"`. [`Value`] covers all of them and
//! compares structurally so the status store can detect changes.
//!
//! A [`Qualifier`] disambiguates several instances of one command on the same
//! device (e.g. `{"Device ID": "2"}` or `{"Input": 3, "Output": 1}`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A live status value reported by (or sent to) a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag
    Bool(bool),
    /// Integer level (volume, input number, ...)
    Int(i64),
    /// Floating point reading
    Float(f64),
    /// Free text or enumerated tag (`"On"`, `"HDMI 1"`, ...)
    Text(String),
}

impl Value {
    /// Text or tag contents, if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value (integers widen to f64).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer contents, if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Structured key selecting one instance of a command on a device.
///
/// Parameters are looked up by name; extra parameters that a command does not
/// declare are ignored during resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qualifier(BTreeMap<String, Value>);

impl Qualifier {
    /// Empty qualifier, used for commands without qualifier parameters.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, param: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(param.into(), value.into());
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, param: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(param.into(), value.into());
    }

    /// Look up a parameter value.
    pub fn get(&self, param: &str) -> Option<&Value> {
        self.0.get(param)
    }

    /// Whether no parameters are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Qualifier
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
