use smol_str::SmolStr;

use super::{Object, arg, not_found};
use crate::{eval::error::EvalError, value::Value};

/// A read-only, case-insensitive name/value collection such as
/// `Request.QueryString`. Repeated names join their values with `", "`.
#[derive(Debug, Clone, Default)]
pub struct StringCollection {
    name: SmolStr,
    entries: Vec<(SmolStr, Vec<String>)>,
}

impl StringCollection {
    pub fn new(name: &str) -> Self {
        Self {
            name: SmolStr::new(name),
            entries: Vec::new(),
        }
    }

    pub fn from_pairs<K, V>(name: &str, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut collection = Self::new(name);
        for (key, value) in pairs {
            collection.push(key.as_ref(), value.into());
        }
        collection
    }

    pub fn push(&mut self, key: &str, value: String) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some((_, values)) => values.push(value),
            None => self.entries.push((SmolStr::new(key), vec![value])),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, values)| values.join(", "))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up by name, or by 1-based position for numeric keys.
    fn item(&self, key: &Value) -> Value {
        let found = match key {
            Value::Integer(_) | Value::Float(_) => usize::try_from(key.to_int() - 1)
                .ok()
                .and_then(|i| self.entries.get(i))
                .map(|(_, values)| values.join(", ")),
            _ => self.get(&key.to_string()),
        };
        found.map(Value::from).unwrap_or_default()
    }
}

impl Object for StringCollection {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "count" => Ok(Value::from(self.len())),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, _value: Value) -> Result<(), EvalError> {
        Err(EvalError::PropertyNotWritable(format!("{}.{}", self.name, name)))
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "item" | "" => Ok(self.item(arg(args, 0))),
            "key" => Ok(usize::try_from(arg(args, 0).to_int() - 1)
                .ok()
                .and_then(|i| self.entries.get(i))
                .map(|(k, _)| Value::from(k.as_str()))
                .unwrap_or_default()),
            "count" => Ok(Value::from(self.len())),
            _ => Err(not_found(self, name)),
        }
    }

    fn enumerate(&self) -> Option<Vec<Value>> {
        Some(
            self.entries
                .iter()
                .map(|(k, _)| Value::from(k.as_str()))
                .collect(),
        )
    }
}
