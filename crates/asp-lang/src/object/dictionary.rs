use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;
use smol_str::{SmolStr, format_smolstr};

use super::{Object, arg, not_found};
use crate::{
    eval::error::EvalError,
    value::{CompareMode, Value},
};

/// `Scripting.Dictionary`: an insertion-ordered map keyed by value.
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: RefCell<Vec<(Value, Value)>>,
    index: RefCell<FxHashMap<SmolStr, usize>>,
    compare_mode: Cell<CompareMode>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    // Strings and numbers are distinct keys even when they print alike.
    fn key_of(&self, key: &Value) -> SmolStr {
        let tag = if key.to_numeric().is_some() && !key.is_string() {
            'n'
        } else {
            's'
        };
        let text = match self.compare_mode.get() {
            CompareMode::Binary => key.to_string(),
            CompareMode::Text => key.to_string().to_lowercase(),
        };
        format_smolstr!("{}:{}", tag, text)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn add(&self, key: Value, item: Value) -> Result<(), EvalError> {
        let k = self.key_of(&key);
        if self.index.borrow().contains_key(&k) {
            return Err(EvalError::DuplicateKey(key.to_string()));
        }

        let mut entries = self.entries.borrow_mut();
        self.index.borrow_mut().insert(k, entries.len());
        entries.push((key, item));
        Ok(())
    }

    pub fn exists(&self, key: &Value) -> bool {
        self.index.borrow().contains_key(&self.key_of(key))
    }

    pub fn item(&self, key: &Value) -> Value {
        self.index
            .borrow()
            .get(&self.key_of(key))
            .and_then(|i| self.entries.borrow().get(*i).map(|(_, item)| item.clone()))
            .unwrap_or_default()
    }

    /// Replaces the item under `key`, adding the key when it is new.
    pub fn insert(&self, key: Value, item: Value) {
        let k = self.key_of(&key);
        let existing = self.index.borrow().get(&k).copied();

        match existing {
            Some(i) => self.entries.borrow_mut()[i].1 = item,
            None => {
                let mut entries = self.entries.borrow_mut();
                self.index.borrow_mut().insert(k, entries.len());
                entries.push((key, item));
            }
        }
    }

    pub fn remove(&self, key: &Value) -> Result<(), EvalError> {
        let removed = self.index.borrow_mut().remove(&self.key_of(key));
        match removed {
            Some(i) => {
                self.entries.borrow_mut().remove(i);
                self.reindex();
                Ok(())
            }
            None => Err(EvalError::InvalidArgument(format!(
                "key '{}' not found",
                key
            ))),
        }
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.index.borrow_mut().clear();
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.entries.borrow().iter().map(|(_, v)| v.clone()).collect()
    }

    fn reindex(&self) {
        let index = self
            .entries
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, (key, _))| (self.key_of(key), i))
            .collect();
        *self.index.borrow_mut() = index;
    }
}

impl Object for Dictionary {
    fn type_name(&self) -> &str {
        "Dictionary"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "count" => Ok(Value::from(self.len())),
            "comparemode" => Ok(Value::from(match self.compare_mode.get() {
                CompareMode::Binary => 0,
                CompareMode::Text => 1,
            })),
            "keys" => Ok(Value::from(self.keys())),
            "items" => Ok(Value::from(self.items())),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), EvalError> {
        match name {
            // Changing the mode of a populated dictionary would orphan keys.
            "comparemode" if self.is_empty() => {
                self.compare_mode.set(CompareMode::from_value(&value));
                Ok(())
            }
            "comparemode" => Err(EvalError::InvalidArgument("CompareMode".to_string())),
            _ => Err(not_found(self, name)),
        }
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "add" => {
                self.add(arg(args, 0).clone(), arg(args, 1).clone())?;
                Ok(Value::Empty)
            }
            "exists" => Ok(Value::from(self.exists(arg(args, 0)))),
            "item" | "" => Ok(self.item(arg(args, 0))),
            "remove" => {
                self.remove(arg(args, 0))?;
                Ok(Value::Empty)
            }
            "removeall" => {
                self.clear();
                Ok(Value::Empty)
            }
            "keys" => Ok(Value::from(self.keys())),
            "items" => Ok(Value::from(self.items())),
            "count" => Ok(Value::from(self.len())),
            _ => Err(not_found(self, name)),
        }
    }

    fn enumerate(&self) -> Option<Vec<Value>> {
        Some(self.keys())
    }

    fn set_item(&self, args: &[Value], value: Value) -> Result<(), EvalError> {
        self.insert(arg(args, 0).clone(), value);
        Ok(())
    }
}
