use std::cell::{Cell, RefCell};

use super::{Object, arg, not_found};
use crate::{eval::error::EvalError, value::Value};

/// The script-visible `Err` object filled in by `On Error Resume Next`.
#[derive(Debug, Default)]
pub struct ErrObject {
    number: Cell<i64>,
    description: RefCell<String>,
    source: RefCell<String>,
}

impl ErrObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: &EvalError) {
        self.number.set(error.number());
        *self.description.borrow_mut() = error.to_string();
        *self.source.borrow_mut() = error.source_name().to_string();
    }

    pub fn clear(&self) {
        self.number.set(0);
        self.description.borrow_mut().clear();
        self.source.borrow_mut().clear();
    }

    pub fn number(&self) -> i64 {
        self.number.get()
    }

    pub fn description(&self) -> String {
        self.description.borrow().clone()
    }

    fn raise(&self, args: &[Value]) -> EvalError {
        let number = arg(args, 0).to_int();
        let origin = match arg(args, 1) {
            Value::Empty => "VBScript".to_string(),
            source => source.to_string(),
        };
        let description = match arg(args, 2) {
            Value::Empty => "Unknown runtime error".to_string(),
            description => description.to_string(),
        };

        EvalError::Raised {
            number,
            origin,
            description,
        }
    }
}

impl Object for ErrObject {
    fn type_name(&self) -> &str {
        "ErrObject"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        match name {
            "number" | "" => Ok(Value::from(self.number())),
            "description" => Ok(Value::from(self.description())),
            "source" => Ok(Value::from(self.source.borrow().as_str())),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), EvalError> {
        match name {
            "number" => self.number.set(value.to_int()),
            "description" => *self.description.borrow_mut() = value.to_string(),
            "source" => *self.source.borrow_mut() = value.to_string(),
            _ => return Err(not_found(self, name)),
        }
        Ok(())
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "clear" => {
                self.clear();
                Ok(Value::Empty)
            }
            "raise" => Err(self.raise(args)),
            "" => self.get_property("number"),
            _ => Err(not_found(self, name)),
        }
    }
}
