use std::{
    borrow::Cow,
    cell::RefCell,
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

use crate::{
    array::{ArrayRef, VbArray},
    ast::{Shared, node::Procedure},
    eval::class::{ClassDef, ClassInstance},
    object::ObjectRef,
};

mod coerce;
mod compare;

pub use coerce::{Numeric, format_float, parse_numeric};
pub use compare::{CompareMode, compare_equal, compare_less, compare_strings};

/// A dynamically-typed guest-language value.
#[derive(Clone, Default)]
pub enum Value {
    /// An uninitialized variable.
    #[default]
    Empty,
    Null,
    /// The empty object reference.
    Nothing,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(ArrayRef),
    /// A built-in object reached through the [`crate::Object`] capability set.
    Object(ObjectRef),
    /// An instance of a script-defined class.
    Instance(Rc<ClassInstance>),
    Callable(Callable),
}

/// A declaration stored under its own name so it can be resolved at call time.
#[derive(Clone)]
pub enum Callable {
    Procedure(Shared<Procedure>),
    Class(Rc<ClassDef>),
}

impl Callable {
    pub fn name(&self) -> String {
        match self {
            Callable::Procedure(procedure) => procedure.name.as_str(),
            Callable::Class(class) => class.name.to_string(),
        }
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Callable::Procedure(a), Callable::Procedure(b)) => Shared::ptr_eq(a, b),
            (Callable::Class(a), Callable::Class(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// Scalars compare structurally, references by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Empty, Value::Empty) => true,
            (Value::Null, Value::Null) => true,
            (Value::Nothing, Value::Nothing) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => same_object(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Callable(a), Value::Callable(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        i64::try_from(n).map_or(Value::Float(n as f64), Value::Integer)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<VbArray> for Value {
    fn from(array: VbArray) -> Self {
        Value::Array(Rc::new(RefCell::new(array)))
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::from(VbArray::from(values))
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<Numeric> for Value {
    fn from(n: Numeric) -> Self {
        match n {
            Numeric::Int(i) => Value::Integer(i),
            Numeric::Float(f) => Value::Float(f),
        }
    }
}

/// The string coercion: `"True"`/`"False"` for booleans, whole floats
/// without a fractional part, empty string for the no-data kinds.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let value: Cow<'_, str> = match self {
            Value::Empty | Value::Null | Value::Nothing | Value::Array(_) => Cow::Borrowed(""),
            Value::Bool(true) => Cow::Borrowed("True"),
            Value::Bool(false) => Cow::Borrowed("False"),
            Value::Integer(n) => Cow::Owned(n.to_string()),
            Value::Float(n) => Cow::Owned(format_float(*n)),
            Value::String(s) => Cow::Borrowed(s),
            Value::Object(_) | Value::Instance(_) | Value::Callable(_) => {
                Cow::Owned(self.type_name())
            }
        };
        write!(f, "{}", value)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Null => write!(f, "Null"),
            Value::Nothing => write!(f, "Nothing"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Integer(n) => write!(f, "Integer({})", n),
            Value::Float(n) => write!(f, "Float({})", n),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::Array(array) => {
                let array = array.borrow();
                write!(f, "Array[{}..{}]{:?}", array.lower(), array.upper(), array.values())
            }
            Value::Object(object) => write!(f, "Object({})", object.type_name()),
            Value::Instance(instance) => write!(f, "Instance({})", instance.class().name),
            Value::Callable(callable) => write!(f, "Callable({})", callable.name()),
        }
    }
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    /// The name reported by `TypeName`.
    pub fn type_name(&self) -> String {
        match self {
            Value::Empty => "Empty".to_string(),
            Value::Null => "Null".to_string(),
            Value::Nothing => "Nothing".to_string(),
            Value::Bool(_) => "Boolean".to_string(),
            Value::Integer(n) if i16::try_from(*n).is_ok() => "Integer".to_string(),
            Value::Integer(_) => "Long".to_string(),
            Value::Float(_) => "Double".to_string(),
            Value::String(_) => "String".to_string(),
            Value::Array(_) => "Variant()".to_string(),
            Value::Object(object) => object.type_name().to_string(),
            Value::Instance(instance) => instance.class().name.to_string(),
            Value::Callable(_) => "Object".to_string(),
        }
    }

    /// The code reported by `VarType`.
    pub fn var_type(&self) -> i64 {
        match self {
            Value::Empty => 0,
            Value::Null => 1,
            Value::Integer(n) if i16::try_from(*n).is_ok() => 2,
            Value::Integer(_) => 3,
            Value::Float(_) => 5,
            Value::String(_) => 8,
            Value::Nothing | Value::Object(_) | Value::Instance(_) | Value::Callable(_) => 9,
            Value::Bool(_) => 11,
            Value::Array(_) => 8204,
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline(always)]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Instance(_) | Value::Nothing)
    }

    #[inline(always)]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Copies arrays (recursively) so the result shares no storage with `self`.
    /// Other kinds are cloned, which for objects keeps the reference.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(array) => Value::from(array.borrow().deep_copy()),
            other => other.clone(),
        }
    }

    /// Identity comparison for the `Is` operator.
    pub fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Object(a), Value::Object(b)) => same_object(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
