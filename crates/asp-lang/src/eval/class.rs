use std::{
    cell::RefCell,
    fmt::{self, Debug, Formatter},
    rc::Rc,
};

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use super::{Arguments, Evaluator, error::EvalError};
use crate::{
    Ident,
    ast::{
        Shared,
        node::{Access, ClassDecl, ClassMember, Expr, Procedure, ProcedureKind},
    },
    value::{Callable, Value},
};

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub access: Access,
    /// Upper bounds when the field is declared as an array.
    pub dims: Option<Vec<Expr>>,
}

/// The `Get`/`Let`/`Set` accessors sharing one property name.
#[derive(Debug, Clone, Default)]
pub struct PropertyGroup {
    pub get: Option<Shared<Procedure>>,
    pub let_: Option<Shared<Procedure>>,
    pub set: Option<Shared<Procedure>>,
}

impl PropertyGroup {
    fn slot(&mut self, kind: ProcedureKind) -> &mut Option<Shared<Procedure>> {
        match kind {
            ProcedureKind::PropertyLet => &mut self.let_,
            ProcedureKind::PropertySet => &mut self.set,
            _ => &mut self.get,
        }
    }

    /// The accessor for a write: `Set` assignments prefer `Property Set`,
    /// plain ones `Property Let`, each falling back to the other.
    fn writer(&self, set: bool) -> Option<&Shared<Procedure>> {
        if set {
            self.set.as_ref().or(self.let_.as_ref())
        } else {
            self.let_.as_ref().or(self.set.as_ref())
        }
    }
}

/// A script-defined class, built once from its declaration and shared by
/// every instance.
#[derive(Debug)]
pub struct ClassDef {
    /// The class name as declared.
    pub name: SmolStr,
    decl: Shared<ClassDecl>,
    fields: FxHashMap<Ident, FieldDef>,
    /// Subs and functions.
    procedures: FxHashMap<Ident, Shared<Procedure>>,
    properties: FxHashMap<Ident, PropertyGroup>,
    default_member: Option<Ident>,
}

impl ClassDef {
    /// Collects the members of `decl`, rejecting names declared twice.
    pub fn from_decl(decl: &Shared<ClassDecl>) -> Result<Self, EvalError> {
        let mut class = Self {
            name: decl.name.clone(),
            decl: Shared::clone(decl),
            fields: FxHashMap::default(),
            procedures: FxHashMap::default(),
            properties: FxHashMap::default(),
            default_member: None,
        };

        for member in &decl.members {
            match member {
                ClassMember::Field { access, decl: var } => {
                    class.ensure_unused(var.name, false)?;
                    class.fields.insert(
                        var.name,
                        FieldDef {
                            access: *access,
                            dims: var.dims.clone(),
                        },
                    );
                }
                ClassMember::Procedure(procedure) => class.add_procedure(procedure)?,
            }
        }

        Ok(class)
    }

    fn add_procedure(&mut self, procedure: &Shared<Procedure>) -> Result<(), EvalError> {
        let name = procedure.name;

        match procedure.kind {
            ProcedureKind::Sub | ProcedureKind::Function => {
                self.ensure_unused(name, false)?;
                self.procedures.insert(name, Shared::clone(procedure));
            }
            kind => {
                self.ensure_unused(name, true)?;
                let slot = self.properties.entry(name).or_default().slot(kind);
                if slot.is_some() {
                    return Err(self.duplicate(name));
                }
                *slot = Some(Shared::clone(procedure));
            }
        }

        if procedure.is_default {
            if self.default_member.is_some_and(|current| current != name) {
                return Err(self.duplicate(Ident::default()));
            }
            self.default_member = Some(name);
        }
        Ok(())
    }

    // Property groups may be extended by further accessors of the same name.
    fn ensure_unused(&self, name: Ident, property: bool) -> Result<(), EvalError> {
        if self.fields.contains_key(&name)
            || self.procedures.contains_key(&name)
            || (!property && self.properties.contains_key(&name))
        {
            Err(self.duplicate(name))
        } else {
            Ok(())
        }
    }

    fn duplicate(&self, name: Ident) -> EvalError {
        EvalError::DuplicateMember(name.as_str(), self.name.to_string())
    }

    pub fn decl(&self) -> &Shared<ClassDecl> {
        &self.decl
    }

    pub fn fields(&self) -> impl Iterator<Item = (&Ident, &FieldDef)> {
        self.fields.iter()
    }

    pub fn field(&self, name: Ident) -> Option<&FieldDef> {
        self.fields.get(&name)
    }

    pub fn procedure(&self, name: Ident) -> Option<&Shared<Procedure>> {
        self.procedures.get(&name)
    }

    pub fn property(&self, name: Ident) -> Option<&PropertyGroup> {
        self.properties.get(&name)
    }

    /// Whether `name` is a sub, function or property of this class.
    pub fn has_procedure(&self, name: Ident) -> bool {
        self.procedures.contains_key(&name) || self.properties.contains_key(&name)
    }

    /// Whether `name` can be assigned through a `Property Let` or `Set`.
    pub fn has_writer(&self, name: Ident) -> bool {
        self.properties
            .get(&name)
            .is_some_and(|group| group.writer(false).is_some())
    }

    pub fn default_member(&self) -> Option<Ident> {
        self.default_member
    }
}

/// A live object of a script-defined class.
pub struct ClassInstance {
    class: Rc<ClassDef>,
    fields: RefCell<FxHashMap<Ident, Value>>,
    /// Property `Get`s currently running on this instance.
    executing: RefCell<FxHashSet<Ident>>,
}

// Fields may refer back to the instance, so only the class is printed.
impl Debug for ClassInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassInstance")
            .field("class", &self.class.name)
            .finish_non_exhaustive()
    }
}

impl ClassInstance {
    pub fn new(class: Rc<ClassDef>, fields: FxHashMap<Ident, Value>) -> Self {
        Self {
            class,
            fields: RefCell::new(fields),
            executing: RefCell::new(FxHashSet::default()),
        }
    }

    pub fn class(&self) -> &Rc<ClassDef> {
        &self.class
    }

    pub fn has_field(&self, name: Ident) -> bool {
        self.fields.borrow().contains_key(&name)
    }

    /// Reads a field regardless of its visibility.
    pub fn get_field(&self, name: Ident) -> Option<Value> {
        self.fields.borrow().get(&name).cloned()
    }

    /// Writes a declared field regardless of its visibility.
    pub fn set_field(&self, name: Ident, value: Value) -> bool {
        match self.fields.borrow_mut().get_mut(&name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn enter_getter(&self, name: Ident) -> bool {
        self.executing.borrow_mut().insert(name)
    }

    fn leave_getter(&self, name: Ident) {
        self.executing.borrow_mut().remove(&name);
    }
}

/// Which members an access may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reach {
    /// Access from outside the class: private members are invisible.
    Public,
    /// Access through `Me` or the member tier of name resolution.
    Internal,
}

impl Reach {
    #[inline(always)]
    fn allows(self, access: Access) -> bool {
        self == Reach::Internal || access == Access::Public
    }
}

impl Evaluator {
    /// `New ClassName`: initializes the fields, then runs `Class_Initialize`.
    pub(crate) fn instantiate(&mut self, name: Ident) -> Result<Value, EvalError> {
        let class = match self.ctx.lookup(name) {
            Some(Value::Callable(Callable::Class(class))) => class,
            Some(_) => return Err(EvalError::NotAClass(name.as_str())),
            None => return Err(EvalError::ClassNotDefined(name.as_str())),
        };

        let mut fields = FxHashMap::default();
        for (field, def) in class.fields() {
            let value = match &def.dims {
                Some(dims) => self.new_array(dims)?,
                None => Value::Empty,
            };
            fields.insert(*field, value);
        }

        let instance = Rc::new(ClassInstance::new(Rc::clone(&class), fields));
        if let Some(initialize) = class.procedure(Ident::new("class_initialize")) {
            self.call_procedure(initialize, Some(&instance), Arguments::default())?;
        }

        Ok(Value::Instance(instance))
    }

    /// Reads `instance.name`: a field, a property `Get` or a parameterless
    /// sub or function.
    pub(crate) fn read_member(
        &mut self,
        instance: &Rc<ClassInstance>,
        name: Ident,
        reach: Reach,
    ) -> Result<Value, EvalError> {
        let class = Rc::clone(instance.class());

        if let Some(field) = class.field(name) {
            if reach.allows(field.access) {
                return Ok(instance.get_field(name).unwrap_or_default());
            }
        } else if let Some(getter) = class
            .property(name)
            .and_then(|group| group.get.as_ref())
            .filter(|getter| reach.allows(getter.access))
        {
            return self.run_getter(instance, name, getter, Arguments::default());
        } else if let Some(procedure) = class
            .procedure(name)
            .filter(|procedure| reach.allows(procedure.access))
        {
            return self.call_procedure(procedure, Some(instance), Arguments::default());
        }

        Err(EvalError::MemberNotFound(name.as_str()))
    }

    /// Calls `instance.name(args)`. An empty name addresses the default member.
    pub(crate) fn call_member(
        &mut self,
        instance: &Rc<ClassInstance>,
        name: Ident,
        args: Arguments,
        reach: Reach,
    ) -> Result<Value, EvalError> {
        let class = Rc::clone(instance.class());
        let name = self.member_name(&class, name)?;

        if let Some(procedure) = class
            .procedure(name)
            .filter(|procedure| reach.allows(procedure.access))
        {
            return self.call_procedure(procedure, Some(instance), args);
        }

        if let Some(getter) = class
            .property(name)
            .and_then(|group| group.get.as_ref())
            .filter(|getter| reach.allows(getter.access))
        {
            return self.run_getter(instance, name, getter, args);
        }

        if class
            .field(name)
            .is_some_and(|field| reach.allows(field.access))
        {
            let value = instance.get_field(name).unwrap_or_default();
            return self.index_value(&value, &args.values, name);
        }

        Err(EvalError::MethodNotFound(name.as_str()))
    }

    /// Assigns `instance.name(index) = value`: a field (or an element of an
    /// array held in it), a `Property Let`/`Set`, or an element of whatever
    /// the property `Get` returns.
    pub(crate) fn write_member(
        &mut self,
        instance: &Rc<ClassInstance>,
        name: Ident,
        index: Vec<Value>,
        value: Value,
        set: bool,
        reach: Reach,
    ) -> Result<(), EvalError> {
        let class = Rc::clone(instance.class());
        let name = self.member_name(&class, name)?;

        if class
            .field(name)
            .is_some_and(|field| reach.allows(field.access))
        {
            if index.is_empty() {
                instance.set_field(name, value);
                return Ok(());
            }
            let container = instance.get_field(name).unwrap_or_default();
            return self.store_element(&container, &index, value, name);
        }

        let group = class.property(name);
        if let Some(writer) = group
            .and_then(|group| group.writer(set))
            .filter(|writer| reach.allows(writer.access))
        {
            let mut values = index;
            values.push(value);
            self.call_procedure(writer, Some(instance), Arguments::from(values))?;
            return Ok(());
        }

        if !index.is_empty()
            && let Some(getter) = group
                .and_then(|group| group.get.as_ref())
                .filter(|getter| reach.allows(getter.access))
        {
            let container = self.run_getter(instance, name, getter, Arguments::default())?;
            return self.store_element(&container, &index, value, name);
        }

        Err(EvalError::PropertyNotWritable(name.as_str()))
    }

    fn member_name(&self, class: &ClassDef, name: Ident) -> Result<Ident, EvalError> {
        if name.is_empty() {
            class
                .default_member()
                .ok_or_else(|| EvalError::NotSupported(format!("{} default member", class.name)))
        } else {
            Ok(name)
        }
    }

    /// Runs a property `Get`. A `Get` that re-enters itself on the same
    /// instance reads Empty instead of recursing.
    fn run_getter(
        &mut self,
        instance: &Rc<ClassInstance>,
        name: Ident,
        getter: &Shared<Procedure>,
        args: Arguments,
    ) -> Result<Value, EvalError> {
        if !instance.enter_getter(name) {
            return Ok(Value::Empty);
        }
        let result = self.call_procedure(getter, Some(instance), args);
        instance.leave_getter(name);
        result
    }
}
