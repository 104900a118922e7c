use std::{fmt::Debug, rc::Rc};

use crate::{eval::error::EvalError, value::Value};

mod collection;
mod dictionary;
mod err;

pub use collection::StringCollection;
pub use dictionary::Dictionary;
pub use err::ErrObject;

pub type ObjectRef = Rc<dyn Object>;

/// The capability set every built-in object exposes to scripts.
///
/// Member names arrive lowercased. An empty method name addresses the
/// object's default member, which is what `obj(key)` calls.
pub trait Object: Debug {
    /// The name `TypeName` reports.
    fn type_name(&self) -> &str;

    fn get_property(&self, name: &str) -> Result<Value, EvalError>;

    fn set_property(&self, name: &str, value: Value) -> Result<(), EvalError>;

    fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, EvalError>;

    /// Values visited by `For Each`, or `None` when the object cannot be enumerated.
    fn enumerate(&self) -> Option<Vec<Value>> {
        None
    }

    /// `obj(key) = value`
    fn set_item(&self, args: &[Value], value: Value) -> Result<(), EvalError> {
        let _ = (args, value);
        Err(EvalError::NotSupported(self.type_name().to_string()))
    }
}

/// `CreateObject(progId)` for the object kinds this runtime provides.
pub fn create_object(prog_id: &str) -> Result<ObjectRef, EvalError> {
    match prog_id.trim().to_lowercase().as_str() {
        "scripting.dictionary" => Ok(Rc::new(Dictionary::new())),
        _ => Err(EvalError::CannotCreateObject(prog_id.to_string())),
    }
}

/// The `index`-th argument, or Empty when the caller left it out.
#[inline(always)]
pub(crate) fn arg(args: &[Value], index: usize) -> &Value {
    const EMPTY: &Value = &Value::Empty;
    args.get(index).unwrap_or(EMPTY)
}

pub(crate) fn not_found(object: &dyn Object, member: &str) -> EvalError {
    EvalError::NotSupported(format!("{}.{}", object.type_name(), member))
}
