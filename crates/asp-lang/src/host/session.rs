use std::{cell::RefCell, rc::Rc};

use super::shared::{Contents, SharedValue};
use crate::{
    eval::error::EvalError,
    object::{Object, arg, not_found},
    value::Value,
};

/// Session state handed in at the start of a request and handed back at
/// its end. Persisting it between requests is up to the embedder.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub id: String,
    pub contents: Contents,
    /// Minutes of inactivity before the embedder may drop the session.
    pub timeout: i64,
    /// Set by `Session.Abandon`.
    pub abandoned: bool,
    /// True until the first request using this session has finished.
    pub is_new: bool,
}

impl SessionData {
    pub const DEFAULT_TIMEOUT: i64 = 20;

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            contents: Contents::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            abandoned: false,
            is_new: true,
        }
    }
}

/// The script-visible `Session` object.
#[derive(Debug, Clone)]
pub struct SessionObject {
    data: Rc<RefCell<SessionData>>,
}

impl SessionObject {
    pub fn new(data: SessionData) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
        }
    }

    pub fn is_new(&self) -> bool {
        self.data.borrow().is_new
    }

    /// The session as it stands now, ready to hand back to the embedder.
    pub fn snapshot(&self) -> SessionData {
        self.data.borrow().clone()
    }
}

impl Object for SessionObject {
    fn type_name(&self) -> &str {
        "ISessionObject"
    }

    fn get_property(&self, name: &str) -> Result<Value, EvalError> {
        let data = self.data.borrow();
        match name {
            "sessionid" => Ok(Value::from(data.id.as_str())),
            "timeout" => Ok(Value::from(data.timeout)),
            "count" => Ok(Value::from(data.contents.len())),
            "contents" => Ok(Value::Object(Rc::new(self.clone()))),
            _ => Err(not_found(self, name)),
        }
    }

    fn set_property(&self, name: &str, value: Value) -> Result<(), EvalError> {
        match name {
            "timeout" => match value.to_int() {
                minutes if minutes > 0 => {
                    self.data.borrow_mut().timeout = minutes;
                    Ok(())
                }
                _ => Err(EvalError::InvalidArgument("Session.Timeout".to_string())),
            },
            _ => Err(not_found(self, name)),
        }
    }

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match name {
            "abandon" => {
                self.data.borrow_mut().abandoned = true;
                Ok(Value::Empty)
            }
            "contents" if args.is_empty() => self.get_property(name),
            "contents" | "item" | "" => Ok(self.data.borrow().contents.item(arg(args, 0))),
            "remove" => {
                self.data
                    .borrow_mut()
                    .contents
                    .remove(&arg(args, 0).to_string());
                Ok(Value::Empty)
            }
            "removeall" => {
                self.data.borrow_mut().contents.clear();
                Ok(Value::Empty)
            }
            "sessionid" | "timeout" | "count" => self.get_property(name),
            _ => Err(not_found(self, name)),
        }
    }

    fn enumerate(&self) -> Option<Vec<Value>> {
        Some(self.data.borrow().contents.keys())
    }

    fn set_item(&self, args: &[Value], value: Value) -> Result<(), EvalError> {
        let value = SharedValue::try_from(&value)?;
        self.data
            .borrow_mut()
            .contents
            .insert(&arg(args, 0).to_string(), value);
        Ok(())
    }
}
