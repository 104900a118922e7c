use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::{class::ClassInstance, error::EvalError, flow::RequestControl};
use crate::{Ident, value::CompareMode, value::Value};

type Frame = FxHashMap<Ident, Value>;

#[derive(Debug, Default)]
struct Scope {
    variables: Frame,
    constants: Frame,
}

/// Where a name was found by [`ExecutionContext::resolve`].
#[derive(Debug, Clone)]
pub enum Resolved {
    Value(Value),
    /// The name is a procedure or property of the current object and has to
    /// be run on it.
    Member(Rc<ClassInstance>),
    Missing,
}

/// Result of a write that may have to go through a property accessor.
#[derive(Debug)]
pub enum Assigned {
    Done,
    /// The current object exposes the name as a `Property Let`/`Set`; the
    /// evaluator runs the accessor with the value handed back here.
    Accessor(Rc<ClassInstance>, Value),
}

/// Variable storage for one request.
///
/// Reads look at constants, the scope stack from the top down, the current
/// object's members and finally the globals. Writes never create a name in
/// an intermediate frame: a name missing from every frame and from the
/// current object lands in the globals.
#[derive(Debug)]
pub struct ExecutionContext {
    scopes: Vec<Scope>,
    globals: Frame,
    constants: Frame,
    current_object: Option<Rc<ClassInstance>>,
    control: Rc<RequestControl>,
    compare_mode: CompareMode,
    option_base: i64,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(Rc::new(RequestControl::default()))
    }
}

impl ExecutionContext {
    pub fn new(control: Rc<RequestControl>) -> Self {
        Self {
            scopes: Vec::new(),
            globals: FxHashMap::default(),
            constants: builtin_constants(),
            current_object: None,
            control,
            compare_mode: CompareMode::default(),
            option_base: 0,
        }
    }

    pub fn control(&self) -> &Rc<RequestControl> {
        &self.control
    }

    #[inline(always)]
    pub fn check_deadline(&self) -> Result<(), EvalError> {
        if self.control.is_expired() {
            Err(EvalError::Timeout)
        } else {
            Ok(())
        }
    }

    pub fn compare_mode(&self) -> CompareMode {
        self.compare_mode
    }

    pub fn set_compare_mode(&mut self, mode: CompareMode) {
        self.compare_mode = mode;
    }

    pub fn option_base(&self) -> i64 {
        self.option_base
    }

    pub fn set_option_base(&mut self, base: i64) {
        self.option_base = base;
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Number of active procedure frames.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn current_object(&self) -> Option<&Rc<ClassInstance>> {
        self.current_object.as_ref()
    }

    /// Binds `Me`, returning the previous binding so the caller can restore it.
    pub fn set_current_object(
        &mut self,
        object: Option<Rc<ClassInstance>>,
    ) -> Option<Rc<ClassInstance>> {
        std::mem::replace(&mut self.current_object, object)
    }

    pub fn lookup_constant(&self, name: Ident) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.constants.get(&name))
            .or_else(|| self.constants.get(&name))
    }

    #[inline(always)]
    pub fn is_constant(&self, name: Ident) -> bool {
        self.lookup_constant(name).is_some()
    }

    /// Finds `name` following the four-tier read order.
    pub fn resolve(&self, name: Ident) -> Resolved {
        if let Some(value) = self.lookup_constant(name) {
            return Resolved::Value(value.clone());
        }

        if let Some(value) = self
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(&name))
        {
            return Resolved::Value(value.clone());
        }

        if let Some(instance) = &self.current_object {
            if let Some(value) = instance.get_field(name) {
                return Resolved::Value(value);
            }
            if instance.class().has_procedure(name) {
                return Resolved::Member(Rc::clone(instance));
            }
        }

        match self.globals.get(&name) {
            Some(value) => Resolved::Value(value.clone()),
            None => Resolved::Missing,
        }
    }

    /// The stored value of `name`, ignoring accessors. Missing names read Empty.
    pub fn get_variable(&self, name: Ident) -> Value {
        self.lookup(name).unwrap_or_default()
    }

    pub fn lookup(&self, name: Ident) -> Option<Value> {
        match self.resolve(name) {
            Resolved::Value(value) => Some(value),
            Resolved::Member(_) | Resolved::Missing => None,
        }
    }

    /// Reads `name` from the top frame only.
    pub fn lookup_local(&self, name: Ident) -> Option<&Value> {
        match self.scopes.last() {
            Some(scope) => scope.variables.get(&name),
            None => self.globals.get(&name),
        }
    }

    pub fn lookup_global(&self, name: Ident) -> Option<&Value> {
        self.globals.get(&name)
    }

    /// Whether the active scope already declares `name`.
    pub fn contains_in_active_scope(&self, name: Ident) -> bool {
        self.lookup_local(name).is_some()
    }

    /// Assigns an existing variable, the current object's member or a global.
    pub fn set_variable(&mut self, name: Ident, value: Value) -> Result<Assigned, EvalError> {
        if self.is_constant(name) {
            return Err(EvalError::AssignToConstant(name.as_str()));
        }

        if let Some(slot) = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.variables.get_mut(&name))
        {
            *slot = value;
            return Ok(Assigned::Done);
        }

        if let Some(instance) = &self.current_object {
            if instance.has_field(name) {
                instance.set_field(name, value);
                return Ok(Assigned::Done);
            }
            if instance.class().has_writer(name) {
                return Ok(Assigned::Accessor(Rc::clone(instance), value));
            }
        }

        self.globals.insert(name, value);
        Ok(Assigned::Done)
    }

    /// Writes a by-reference parameter back into the caller's view of `name`.
    /// Constants are left untouched.
    pub fn write_back(&mut self, name: Ident, value: Value) -> Result<Assigned, EvalError> {
        if self.is_constant(name) {
            return Ok(Assigned::Done);
        }
        self.set_variable(name, value)
    }

    /// Creates `name` in the top frame, or in the globals at top level.
    pub fn define_variable(&mut self, name: Ident, value: Value) -> Result<(), EvalError> {
        let defined_as_constant = match self.scopes.last() {
            Some(scope) => scope.constants.contains_key(&name),
            None => self.constants.contains_key(&name),
        };
        if defined_as_constant {
            return Err(EvalError::ConstantAlreadyDefined(name.as_str()));
        }

        match self.scopes.last_mut() {
            Some(scope) => scope.variables.insert(name, value),
            None => self.globals.insert(name, value),
        };
        Ok(())
    }

    /// `Dim`: defines `name` unless the active scope already has it.
    pub fn declare(&mut self, name: Ident, value: Value) -> Result<(), EvalError> {
        if self.contains_in_active_scope(name) {
            return Ok(());
        }
        self.define_variable(name, value)
    }

    pub fn define_global(&mut self, name: Ident, value: Value) {
        self.globals.insert(name, value);
    }

    pub fn set_constant(&mut self, name: Ident, value: Value) -> Result<(), EvalError> {
        let (constants, variables) = match self.scopes.last_mut() {
            Some(scope) => (&mut scope.constants, &scope.variables),
            None => (&mut self.constants, &self.globals),
        };

        if constants.contains_key(&name) {
            return Err(EvalError::ConstantAlreadyDefined(name.as_str()));
        }
        if variables.contains_key(&name) {
            return Err(EvalError::ConstantShadowsVariable(name.as_str()));
        }

        constants.insert(name, value);
        Ok(())
    }

    /// Removes every global, leaving the constants in place.
    pub fn clear_globals(&mut self) {
        self.globals.clear();
    }
}

fn builtin_constants() -> Frame {
    let strings = [
        ("vbcrlf", "\r\n"),
        ("vbcr", "\r"),
        ("vblf", "\n"),
        ("vbnewline", "\r\n"),
        ("vbtab", "\t"),
        ("vbnullchar", "\0"),
        ("vbnullstring", ""),
        ("vbback", "\u{8}"),
        ("vbformfeed", "\u{c}"),
        ("vbverticaltab", "\u{b}"),
    ];
    let numbers: [(&str, i64); 26] = [
        ("vbbinarycompare", 0),
        ("vbtextcompare", 1),
        ("vbdatabasecompare", 2),
        ("vbtrue", -1),
        ("vbfalse", 0),
        ("vbusesystemdayofweek", 0),
        ("vbsunday", 1),
        ("vbmonday", 2),
        ("vbgeneraldate", 0),
        ("vblongdate", 1),
        ("vbshortdate", 2),
        ("vblongtime", 3),
        ("vbshorttime", 4),
        ("vbempty", 0),
        ("vbnull", 1),
        ("vbinteger", 2),
        ("vblong", 3),
        ("vbsingle", 4),
        ("vbdouble", 5),
        ("vbcurrency", 6),
        ("vbdate", 7),
        ("vbstring", 8),
        ("vbobject", 9),
        ("vbboolean", 11),
        ("vbvariant", 12),
        ("vbarray", 8192),
    ];

    strings
        .into_iter()
        .map(|(name, value)| (Ident::new(name), Value::from(value)))
        .chain(
            numbers
                .into_iter()
                .map(|(name, value)| (Ident::new(name), Value::from(value))),
        )
        .chain([
            (Ident::new("vbobjecterror"), Value::from(-2147221504_i64)),
            (Ident::new("vbbyte"), Value::from(17)),
        ])
        .collect()
}
