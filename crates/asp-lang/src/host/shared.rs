use std::fmt::{self, Display, Formatter};

use crate::{array::VbArray, eval::error::EvalError, value::Value};

/// The thread-safe form of a value stored across requests in the
/// application or session contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SharedValue {
    #[default]
    Empty,
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array { lower: i64, values: Vec<SharedValue> },
}

impl TryFrom<&Value> for SharedValue {
    type Error = EvalError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Empty => SharedValue::Empty,
            Value::Null => SharedValue::Null,
            Value::Bool(b) => SharedValue::Bool(*b),
            Value::Integer(n) => SharedValue::Integer(*n),
            Value::Float(n) => SharedValue::Float(*n),
            Value::String(s) => SharedValue::String(s.clone()),
            Value::Array(array) => {
                let array = array.borrow();
                SharedValue::Array {
                    lower: array.lower(),
                    values: array
                        .values()
                        .iter()
                        .map(SharedValue::try_from)
                        .collect::<Result<_, _>>()?,
                }
            }
            Value::Nothing | Value::Object(_) | Value::Instance(_) | Value::Callable(_) => {
                return Err(EvalError::NotShareable);
            }
        })
    }
}

impl From<&SharedValue> for Value {
    fn from(value: &SharedValue) -> Self {
        match value {
            SharedValue::Empty => Value::Empty,
            SharedValue::Null => Value::Null,
            SharedValue::Bool(b) => Value::Bool(*b),
            SharedValue::Integer(n) => Value::Integer(*n),
            SharedValue::Float(n) => Value::Float(*n),
            SharedValue::String(s) => Value::String(s.clone()),
            SharedValue::Array { lower, values } => Value::from(VbArray::new(
                *lower,
                values.iter().map(Value::from).collect(),
            )),
        }
    }
}

impl From<&str> for SharedValue {
    fn from(s: &str) -> Self {
        SharedValue::String(s.to_string())
    }
}

impl From<i64> for SharedValue {
    fn from(n: i64) -> Self {
        SharedValue::Integer(n)
    }
}

impl Display for SharedValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::from(self))
    }
}

/// Case-insensitive, insertion-ordered contents shared by the application
/// store and sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contents {
    entries: Vec<(String, SharedValue)>,
}

impl Contents {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    pub fn get(&self, key: &str) -> Option<&SharedValue> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    /// Looks up by name, or by 1-based position for numeric keys.
    pub fn item(&self, key: &Value) -> Value {
        let found = match key {
            Value::Integer(_) | Value::Float(_) => usize::try_from(key.to_int() - 1)
                .ok()
                .and_then(|i| self.entries.get(i))
                .map(|(_, value)| value),
            _ => self.get(&key.to_string()),
        };
        found.map(Value::from).unwrap_or_default()
    }

    pub fn insert(&mut self, key: &str, value: SharedValue) {
        match self.position(key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<SharedValue> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|(key, _)| Value::from(key.as_str()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SharedValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
