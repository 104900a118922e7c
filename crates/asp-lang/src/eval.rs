use std::{rc::Rc, time::Duration};

use itertools::Itertools;
use smallvec::SmallVec;

pub mod builtin;
pub mod class;
pub mod context;
pub mod error;
pub mod flow;
pub mod operator;

use crate::{
    Ident,
    array::VbArray,
    ast::{
        Shared,
        node::{
            CaseClause, CaseTest, ClassDecl, Expr, ExitKind, Literal, LoopCondition, LoopTest,
            Procedure, Stmt, StmtKind, TestPosition, VarDecl,
        },
    },
    object::{ErrObject, ObjectRef},
    range::Range,
    value::{Callable, Value, compare_equal, compare_less},
};
use builtin::FunctionTables;
use class::{ClassDef, ClassInstance, Reach};
use context::{Assigned, ExecutionContext, Resolved};
use error::EvalError;
use flow::{Flow, RequestControl};

/// Configuration options for the evaluator.
#[derive(Debug, Clone)]
pub struct Options {
    /// Maximum number of nested procedure calls before the request is
    /// aborted with a recursion error.
    pub max_call_stack_depth: u32,
    /// Wall-clock budget of a request. `None` lets it run unbounded.
    pub timeout: Option<Duration>,
    /// Lower bound of the arrays created by `Dim` and `ReDim`.
    pub option_base: i64,
}

#[cfg(debug_assertions)]
impl Default for Options {
    fn default() -> Self {
        Self {
            max_call_stack_depth: 32,
            timeout: Some(Duration::from_secs(90)),
            option_base: 0,
        }
    }
}

#[cfg(not(debug_assertions))]
impl Default for Options {
    fn default() -> Self {
        Self {
            max_call_stack_depth: 192,
            timeout: Some(Duration::from_secs(90)),
            option_base: 0,
        }
    }
}

/// Evaluated call arguments together with the variable each one was read
/// from, so by-reference parameters can be written back after the call.
#[derive(Debug, Clone, Default)]
pub(crate) struct Arguments {
    pub(crate) values: Vec<Value>,
    refs: SmallVec<[Option<Ident>; 4]>,
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self {
            values,
            refs: SmallVec::new(),
        }
    }
}

/// What a finished procedure body leaves behind.
struct Invocation {
    value: Value,
    params: Vec<Value>,
}

/// Executes statements and evaluates expressions against one request's
/// [`ExecutionContext`].
#[derive(Debug)]
pub struct Evaluator {
    ctx: ExecutionContext,
    functions: FunctionTables,
    /// The script-visible `Err` object.
    err: Rc<ErrObject>,
    /// Targets of the enclosing `With` blocks, innermost last.
    with_stack: Vec<Value>,
    /// `On Error Resume Next` is active in the running procedure.
    resume_next: bool,
    /// The procedure whose body is running, used to tell a recursive call
    /// from a read of the return slot.
    current_procedure: Option<Shared<Procedure>>,
    call_stack_depth: u32,
    /// Location of the statement that raised the error being propagated.
    error_range: Option<Range>,
    pub(crate) options: Options,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

impl Evaluator {
    pub fn new(options: Options) -> Self {
        let control = Rc::new(RequestControl::new(options.timeout));
        Self::with_control(options, control)
    }

    /// Creates an evaluator driven by a request control shared with the
    /// host objects that can end or re-time the request.
    pub fn with_control(options: Options, control: Rc<RequestControl>) -> Self {
        let mut ctx = ExecutionContext::new(control);
        ctx.set_option_base(options.option_base);

        let err = Rc::new(ErrObject::new());
        let err_object: ObjectRef = Rc::clone(&err) as ObjectRef;
        ctx.define_global(Ident::new("err"), Value::Object(err_object));

        Self {
            ctx,
            functions: FunctionTables::default(),
            err,
            with_stack: Vec::new(),
            resume_next: false,
            current_procedure: None,
            call_stack_depth: 0,
            error_range: None,
            options,
        }
    }

    pub fn with_functions(mut self, functions: FunctionTables) -> Self {
        self.functions = functions;
        self
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.ctx
    }

    pub fn control(&self) -> &Rc<RequestControl> {
        self.ctx.control()
    }

    pub fn err(&self) -> &Rc<ErrObject> {
        &self.err
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.ctx.define_global(Ident::new(name), value);
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.ctx.lookup_global(Ident::new(name)).cloned()
    }

    /// The range of the statement that raised the last propagated error.
    pub fn take_error_range(&mut self) -> Option<Range> {
        self.error_range.take()
    }

    /// Hoists the declarations of `program` and runs it at top level.
    pub fn run(&mut self, program: &[Stmt]) -> Result<Flow, EvalError> {
        self.hoist(program)?;
        self.exec_block(program)
    }

    /// Defines every sub, function and class declared at the top of a unit,
    /// so calls may precede declarations.
    pub fn hoist<'a>(&mut self, statements: impl IntoIterator<Item = &'a Stmt>) -> Result<(), EvalError> {
        for stmt in statements {
            match &stmt.kind {
                StmtKind::Procedure(procedure) => self.define_procedure(procedure)?,
                StmtKind::Class(decl) => self.define_class(decl)?,
                _ => {}
            }
        }
        Ok(())
    }

    pub fn exec_block(&mut self, block: &[Stmt]) -> Result<Flow, EvalError> {
        for stmt in block {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    pub fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, EvalError> {
        if let Some(halt) = self.ctx.control().halted() {
            return Ok(Flow::Halt(halt));
        }

        let result = self
            .ctx
            .check_deadline()
            .and_then(|()| self.exec_kind(&stmt.kind));

        match self.settle(result, stmt.range)? {
            Some(Flow::Normal) | None => Ok(self
                .ctx
                .control()
                .halted()
                .map_or(Flow::Normal, Flow::Halt)),
            Some(flow) => Ok(flow),
        }
    }

    /// Evaluates a `<%= expr %>` block. `None` means the error was recorded
    /// under `On Error Resume Next` and nothing should be written.
    pub fn eval_output(&mut self, expr: &Expr, range: Range) -> Result<Option<Value>, EvalError> {
        let result = self
            .ctx
            .check_deadline()
            .and_then(|()| self.eval_expr(expr));
        self.settle(result, range)
    }

    /// Calls a top-level sub or function by name, as the host does for
    /// `Application_OnStart` and friends. `None` when no such procedure exists.
    pub fn call_procedure_by_name(
        &mut self,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, EvalError> {
        match self.ctx.lookup(Ident::new(name)) {
            Some(Value::Callable(Callable::Procedure(procedure))) => self
                .call_procedure(&procedure, None, Arguments::from(args))
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Applies `On Error Resume Next` to the outcome of one statement.
    fn settle<T>(&mut self, result: Result<T, EvalError>, range: Range) -> Result<Option<T>, EvalError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_fatal() || !self.resume_next => {
                self.error_range.get_or_insert(range);
                Err(error)
            }
            Err(error) => {
                tracing::trace!(
                    line = range.start.line,
                    number = error.number(),
                    "error resumed: {}",
                    error
                );
                self.err.record(&error);
                self.error_range = None;
                Ok(None)
            }
        }
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> Result<Flow, EvalError> {
        match kind {
            StmtKind::Call(expr) => self.exec_call(expr)?,
            StmtKind::Assign { target, value, set } => {
                let value = self.eval_expr(value)?;
                let value = match value {
                    Value::Object(_) | Value::Instance(_) | Value::Nothing if *set => value,
                    _ if *set => return Err(EvalError::ObjectRequired(target_name(target))),
                    value => value.deep_copy(),
                };
                self.assign(target, value, *set)?;
            }
            StmtKind::Dim(decls) => {
                for decl in decls {
                    let value = self.declared_value(decl)?;
                    self.ctx.declare(decl.name, value)?;
                }
            }
            StmtKind::ReDim { preserve, decls } => self.exec_redim(*preserve, decls)?,
            StmtKind::Const(decls) => {
                for decl in decls {
                    let value = self.eval_expr(&decl.value)?;
                    self.ctx.set_constant(decl.name, value)?;
                }
            }
            StmtKind::Erase(names) => {
                for name in names {
                    match self.ctx.lookup(*name) {
                        Some(Value::Array(array)) => array.borrow_mut().erase(),
                        Some(other) => {
                            return Err(EvalError::TypeMismatch(format!(
                                "Erase of {}",
                                other.type_name()
                            )));
                        }
                        None => return Err(EvalError::UndefinedVariable(name.as_str())),
                    }
                }
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for branch in branches {
                    if self.eval_expr(&branch.condition)?.is_truthy() {
                        return self.exec_block(&branch.body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            StmtKind::For {
                counter,
                start,
                end,
                step,
                body,
            } => return self.exec_for(*counter, start, end, step.as_ref(), body),
            StmtKind::ForEach {
                element,
                group,
                body,
            } => return self.exec_for_each(*element, group, body),
            StmtKind::Do { condition, body } => return self.exec_do(condition.as_ref(), body),
            StmtKind::While { condition, body } => return self.exec_while(condition, body),
            StmtKind::Select {
                subject,
                cases,
                otherwise,
            } => return self.exec_select(subject, cases, otherwise.as_deref()),
            StmtKind::With { object, body } => {
                let target = self.eval_expr(object)?;
                self.with_stack.push(target);
                let result = self.exec_block(body);
                self.with_stack.pop();
                return result;
            }
            StmtKind::Exit(kind) => return Ok(Flow::Exit(*kind)),
            StmtKind::Procedure(procedure) => self.define_procedure(procedure)?,
            StmtKind::Class(decl) => self.define_class(decl)?,
            StmtKind::OnError(mode) => {
                self.resume_next = matches!(mode, crate::ast::node::ErrorMode::ResumeNext);
                self.err.clear();
            }
            StmtKind::OptionExplicit => {}
            StmtKind::OptionCompare(mode) => self.ctx.set_compare_mode(*mode),
        }

        Ok(Flow::Normal)
    }

    fn exec_call(&mut self, expr: &Expr) -> Result<(), EvalError> {
        match expr {
            Expr::Call(callee, args) => self.eval_call(callee, args).map(drop),
            Expr::Ident(name) => self.call_name(*name, &[]).map(drop),
            Expr::Member(object, name) => {
                let target = self.eval_expr(object)?;
                self.call_on(&target, *name, &[]).map(drop)
            }
            Expr::WithMember(name) => {
                let target = self.with_target(*name)?;
                self.call_on(&target, *name, &[]).map(drop)
            }
            other => self.eval_expr(other).map(drop),
        }
    }

    fn exec_for(
        &mut self,
        counter: Ident,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
    ) -> Result<Flow, EvalError> {
        let start = self.eval_expr(start)?;
        let end = self.eval_expr(end)?.to_float();
        let step = match step {
            Some(step) => self.eval_expr(step)?,
            None => Value::Integer(1),
        };

        let integral = start.coerce_numeric().is_int() && step.coerce_numeric().is_int();
        let step = step.to_float();
        if step == 0.0 {
            return Ok(Flow::Normal);
        }

        let mut current = start.to_float();
        loop {
            self.ctx.check_deadline()?;
            let value = if integral {
                Value::Integer(current as i64)
            } else {
                Value::Float(current)
            };
            self.assign_name(counter, value, false)?;

            if (step > 0.0 && current > end) || (step < 0.0 && current < end) {
                break;
            }

            match self.exec_block(body)? {
                Flow::Normal => {}
                Flow::Exit(ExitKind::For) => break,
                flow => return Ok(flow),
            }

            current = self.ctx.get_variable(counter).to_float() + step;
        }

        Ok(Flow::Normal)
    }

    fn exec_for_each(&mut self, element: Ident, group: &Expr, body: &[Stmt]) -> Result<Flow, EvalError> {
        let group = self.eval_expr(group)?;
        let items = match &group {
            Value::Array(array) => array.borrow().flatten(),
            Value::Object(object) => object.enumerate().ok_or_else(|| {
                EvalError::NotSupported(format!("For Each over {}", object.type_name()))
            })?,
            other => {
                return Err(EvalError::TypeMismatch(format!(
                    "For Each over {}",
                    other.type_name()
                )));
            }
        };

        for item in items {
            self.ctx.check_deadline()?;
            self.assign_name(element, item, false)?;
            match self.exec_block(body)? {
                Flow::Normal => {}
                Flow::Exit(ExitKind::For) => break,
                flow => return Ok(flow),
            }
        }

        Ok(Flow::Normal)
    }

    fn exec_do(&mut self, condition: Option<&LoopCondition>, body: &[Stmt]) -> Result<Flow, EvalError> {
        let test_at = |position: TestPosition| condition.filter(|c| c.position == position);

        loop {
            self.ctx.check_deadline()?;
            if let Some(condition) = test_at(TestPosition::Pre)
                && !self.loop_continues(condition)?
            {
                break;
            }

            match self.exec_block(body)? {
                Flow::Normal => {}
                Flow::Exit(ExitKind::Do) => break,
                flow => return Ok(flow),
            }

            if let Some(condition) = test_at(TestPosition::Post)
                && !self.loop_continues(condition)?
            {
                break;
            }
        }

        Ok(Flow::Normal)
    }

    fn loop_continues(&mut self, condition: &LoopCondition) -> Result<bool, EvalError> {
        let truthy = self.eval_expr(&condition.expr)?.is_truthy();
        Ok(match condition.test {
            LoopTest::While => truthy,
            LoopTest::Until => !truthy,
        })
    }

    fn exec_while(&mut self, condition: &Expr, body: &[Stmt]) -> Result<Flow, EvalError> {
        loop {
            self.ctx.check_deadline()?;
            if !self.eval_expr(condition)?.is_truthy() {
                break;
            }
            match self.exec_block(body)? {
                Flow::Normal => {}
                Flow::Exit(ExitKind::While) => break,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_select(
        &mut self,
        subject: &Expr,
        cases: &[CaseClause],
        otherwise: Option<&[Stmt]>,
    ) -> Result<Flow, EvalError> {
        let subject = self.eval_expr(subject)?;

        let mut body = otherwise;
        for case in cases {
            if self.case_matches(&subject, &case.tests)? {
                body = Some(case.body.as_slice());
                break;
            }
        }

        match body {
            Some(body) => match self.exec_block(body)? {
                Flow::Exit(ExitKind::Select) => Ok(Flow::Normal),
                flow => Ok(flow),
            },
            None => Ok(Flow::Normal),
        }
    }

    fn case_matches(&mut self, subject: &Value, tests: &[CaseTest]) -> Result<bool, EvalError> {
        let mode = self.ctx.compare_mode();
        for test in tests {
            let matched = match test {
                CaseTest::Value(expr) => {
                    let value = self.eval_expr(expr)?;
                    compare_equal(subject, &value, mode)
                }
                CaseTest::Range(low, high) => {
                    let low = self.eval_expr(low)?;
                    let high = self.eval_expr(high)?;
                    !compare_less(subject, &low, mode) && !compare_less(&high, subject, mode)
                }
                CaseTest::Is(op, expr) => {
                    let value = self.eval_expr(expr)?;
                    operator::binary(*op, subject, &value, mode)?.is_truthy()
                }
            };
            if matched {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn exec_redim(&mut self, preserve: bool, decls: &[VarDecl]) -> Result<(), EvalError> {
        for decl in decls {
            let uppers = self.eval_dims(decl.dims.as_deref().unwrap_or_default())?;
            let existing = if preserve {
                self.ctx.lookup(decl.name)
            } else {
                None
            };

            match existing {
                Some(Value::Array(array)) => {
                    let resized = array.borrow().resize_preserve(&uppers);
                    *array.borrow_mut() = resized;
                }
                _ => {
                    let value = Value::from(VbArray::with_dimensions(self.ctx.option_base(), &uppers));
                    if matches!(self.ctx.resolve(decl.name), Resolved::Missing) {
                        self.ctx.define_variable(decl.name, value)?;
                    } else {
                        self.assign_name(decl.name, value, false)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn define_procedure(&mut self, procedure: &Shared<Procedure>) -> Result<(), EvalError> {
        self.ctx.define_variable(
            procedure.name,
            Value::Callable(Callable::Procedure(Shared::clone(procedure))),
        )
    }

    fn define_class(&mut self, decl: &Shared<ClassDecl>) -> Result<(), EvalError> {
        let name = decl.ident();
        let defined = matches!(
            self.ctx.lookup_local(name),
            Some(Value::Callable(Callable::Class(existing))) if Shared::ptr_eq(existing.decl(), decl)
        );
        if defined {
            return Ok(());
        }

        let class = ClassDef::from_decl(decl)?;
        tracing::trace!(class = %class.name, "class defined");
        self.ctx
            .define_variable(name, Value::Callable(Callable::Class(Rc::new(class))))
    }

    /// Declares the scalar `Dim`s of a procedure body up front, so a use of a
    /// local before its `Dim` still lands in the procedure's frame.
    fn hoist_dims(&mut self, block: &[Stmt]) -> Result<(), EvalError> {
        for stmt in block {
            match &stmt.kind {
                StmtKind::Dim(decls) => {
                    for decl in decls.iter().filter(|decl| decl.dims.is_none()) {
                        self.ctx.declare(decl.name, Value::Empty)?;
                    }
                }
                StmtKind::If {
                    branches,
                    otherwise,
                } => {
                    for branch in branches {
                        self.hoist_dims(&branch.body)?;
                    }
                    if let Some(body) = otherwise {
                        self.hoist_dims(body)?;
                    }
                }
                StmtKind::Select {
                    cases, otherwise, ..
                } => {
                    for case in cases {
                        self.hoist_dims(&case.body)?;
                    }
                    if let Some(body) = otherwise {
                        self.hoist_dims(body)?;
                    }
                }
                StmtKind::For { body, .. }
                | StmtKind::ForEach { body, .. }
                | StmtKind::Do { body, .. }
                | StmtKind::While { body, .. }
                | StmtKind::With { body, .. } => self.hoist_dims(body)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn declared_value(&mut self, decl: &VarDecl) -> Result<Value, EvalError> {
        match &decl.dims {
            Some(dims) => self.new_array(dims),
            None => Ok(Value::Empty),
        }
    }

    fn eval_dims(&mut self, dims: &[Expr]) -> Result<Vec<i64>, EvalError> {
        dims.iter()
            .map(|dim| self.eval_expr(dim).map(|value| value.to_int()))
            .collect()
    }

    /// A fresh array with the given upper bounds, or an empty dynamic array
    /// when no bounds are given.
    pub(crate) fn new_array(&mut self, dims: &[Expr]) -> Result<Value, EvalError> {
        let uppers = self.eval_dims(dims)?;
        Ok(Value::from(VbArray::with_dimensions(
            self.ctx.option_base(),
            &uppers,
        )))
    }

    fn assign(&mut self, target: &Expr, value: Value, set: bool) -> Result<(), EvalError> {
        match target {
            Expr::Ident(name) => self.assign_name(*name, value, set),
            Expr::Call(callee, index) => {
                let index = self.eval_arguments(index)?.values;
                match callee.as_ref() {
                    Expr::Ident(name) => self.assign_indexed_name(*name, index, value, set),
                    Expr::Member(object, name) => {
                        let target = self.eval_expr(object)?;
                        self.assign_on(&target, *name, index, value, set)
                    }
                    Expr::WithMember(name) => {
                        let target = self.with_target(*name)?;
                        self.assign_on(&target, *name, index, value, set)
                    }
                    other => {
                        let container = self.eval_expr(other)?;
                        self.store_element(&container, &index, value, Ident::default())
                    }
                }
            }
            Expr::Member(object, name) => {
                let target = self.eval_expr(object)?;
                self.assign_on(&target, *name, Vec::new(), value, set)
            }
            Expr::WithMember(name) => {
                let target = self.with_target(*name)?;
                self.assign_on(&target, *name, Vec::new(), value, set)
            }
            _ => Err(EvalError::Runtime("invalid assignment target".to_string())),
        }
    }

    fn assign_name(&mut self, name: Ident, value: Value, set: bool) -> Result<(), EvalError> {
        match self.ctx.set_variable(name, value)? {
            Assigned::Done => Ok(()),
            Assigned::Accessor(instance, value) => {
                self.write_member(&instance, name, Vec::new(), value, set, Reach::Internal)
            }
        }
    }

    fn assign_indexed_name(
        &mut self,
        name: Ident,
        index: Vec<Value>,
        value: Value,
        set: bool,
    ) -> Result<(), EvalError> {
        match self.ctx.resolve(name) {
            Resolved::Value(container) => self.store_element(&container, &index, value, name),
            Resolved::Member(instance) => {
                self.write_member(&instance, name, index, value, set, Reach::Internal)
            }
            Resolved::Missing => Err(EvalError::UndefinedVariable(name.as_str())),
        }
    }

    fn assign_on(
        &mut self,
        target: &Value,
        name: Ident,
        index: Vec<Value>,
        value: Value,
        set: bool,
    ) -> Result<(), EvalError> {
        match target {
            Value::Instance(instance) => {
                let reach = self.reach_for(instance);
                self.write_member(instance, name, index, value, set, reach)
            }
            Value::Object(object) => {
                let member = name.as_str();
                if index.is_empty() {
                    return object.set_property(&member, value);
                }
                let container = match object.get_property(&member) {
                    Err(EvalError::NotSupported(_)) => object.call_method(&member, &[])?,
                    result => result?,
                };
                self.store_element(&container, &index, value, name)
            }
            _ => Err(EvalError::ObjectRequired(name.as_str())),
        }
    }

    /// `container(index) = value` on an already evaluated container.
    pub(crate) fn store_element(
        &mut self,
        container: &Value,
        index: &[Value],
        value: Value,
        name: Ident,
    ) -> Result<(), EvalError> {
        match container {
            Value::Array(array) => {
                let indices = index.iter().map(Value::to_int).collect_vec();
                if array.borrow_mut().set_path(&indices, value) {
                    Ok(())
                } else {
                    Err(EvalError::SubscriptOutOfRange)
                }
            }
            Value::Object(object) => object.set_item(index, value),
            Value::Instance(instance) => self.write_member(
                instance,
                Ident::default(),
                index.to_vec(),
                value,
                false,
                Reach::Public,
            ),
            _ => Err(EvalError::TypeMismatch(name.as_str())),
        }
    }

    /// `target(args)` on an already evaluated value: an element read, or a
    /// default member call on an object.
    pub(crate) fn index_value(
        &mut self,
        target: &Value,
        args: &[Value],
        name: Ident,
    ) -> Result<Value, EvalError> {
        if args.is_empty() {
            return Ok(target.clone());
        }

        match target {
            Value::Array(array) => {
                let indices = args.iter().map(Value::to_int).collect_vec();
                Ok(array.borrow().get_path(&indices).unwrap_or_default())
            }
            Value::Object(object) => object.call_method("", args),
            Value::Instance(instance) => self.call_member(
                instance,
                Ident::default(),
                Arguments::from(args.to_vec()),
                Reach::Public,
            ),
            _ => Err(EvalError::TypeMismatch(name.as_str())),
        }
    }

    fn with_target(&self, name: Ident) -> Result<Value, EvalError> {
        self.with_stack
            .last()
            .cloned()
            .ok_or_else(|| EvalError::WithOutsideBlock(name.as_str()))
    }

    /// Private members are reachable through `Me` only.
    fn reach_for(&self, instance: &Rc<ClassInstance>) -> Reach {
        match self.ctx.current_object() {
            Some(current) if Rc::ptr_eq(current, instance) => Reach::Internal,
            _ => Reach::Public,
        }
    }

    pub fn eval_expr(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(literal) => Ok(Self::eval_literal(literal)),
            Expr::Ident(name) => self.eval_ident(*name),
            Expr::Me => self
                .ctx
                .current_object()
                .cloned()
                .map(Value::Instance)
                .ok_or(EvalError::MeOutsideClass),
            Expr::Unary(op, operand) => {
                let operand = self.eval_expr(operand)?;
                operator::unary(*op, &operand)
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(lhs)?;
                let rhs = self.eval_expr(rhs)?;
                operator::binary(*op, &lhs, &rhs, self.ctx.compare_mode())
            }
            Expr::Call(callee, args) => self.eval_call(callee, args),
            Expr::Member(object, name) => {
                let target = self.eval_expr(object)?;
                self.read_on(&target, *name)
            }
            Expr::WithMember(name) => {
                let target = self.with_target(*name)?;
                self.read_on(&target, *name)
            }
            Expr::New(class) => self.instantiate(*class),
            Expr::Missing => Ok(Value::Empty),
        }
    }

    fn eval_literal(literal: &Literal) -> Value {
        match literal {
            Literal::Empty => Value::Empty,
            Literal::Null => Value::Null,
            Literal::Nothing => Value::Nothing,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Integer(n) => Value::Integer(*n),
            Literal::Float(n) => Value::Float(*n),
            Literal::String(s) => Value::String(s.to_string()),
        }
    }

    fn eval_ident(&mut self, name: Ident) -> Result<Value, EvalError> {
        match self.ctx.resolve(name) {
            Resolved::Value(Value::Callable(Callable::Procedure(procedure))) => {
                self.call_procedure(&procedure, None, Arguments::default())
            }
            Resolved::Value(value) => Ok(value),
            Resolved::Member(instance) => self.read_member(&instance, name, Reach::Internal),
            Resolved::Missing => match self.functions.call(&name.as_str(), &[]) {
                Ok(value) => Ok(value.unwrap_or_default()),
                Err(EvalError::InvalidNumberOfArguments(_)) => Ok(Value::Empty),
                Err(error) => Err(error),
            },
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, EvalError> {
        match callee {
            Expr::Ident(name) => self.call_name(*name, args),
            Expr::Member(object, name) => {
                let target = self.eval_expr(object)?;
                self.call_on(&target, *name, args)
            }
            Expr::WithMember(name) => {
                let target = self.with_target(*name)?;
                self.call_on(&target, *name, args)
            }
            other => {
                let target = self.eval_expr(other)?;
                let args = self.eval_arguments(args)?;
                self.index_value(&target, &args.values, Ident::default())
            }
        }
    }

    /// `name(args)`, resolved at call time.
    fn call_name(&mut self, name: Ident, arg_exprs: &[Expr]) -> Result<Value, EvalError> {
        if !arg_exprs.is_empty()
            && let Some(procedure) = self.recursive_target(name)
        {
            let args = self.eval_arguments(arg_exprs)?;
            let this = self.ctx.current_object().cloned();
            return self.call_procedure(&procedure, this.as_ref(), args);
        }

        match self.ctx.resolve(name) {
            Resolved::Value(Value::Callable(Callable::Procedure(procedure))) => {
                let args = self.eval_arguments(arg_exprs)?;
                self.call_procedure(&procedure, None, args)
            }
            Resolved::Value(Value::Callable(Callable::Class(_))) => {
                Err(EvalError::TypeMismatch(name.as_str()))
            }
            Resolved::Value(target) => {
                let args = self.eval_arguments(arg_exprs)?;
                self.index_value(&target, &args.values, name)
            }
            Resolved::Member(instance) => {
                let args = self.eval_arguments(arg_exprs)?;
                self.call_member(&instance, name, args, Reach::Internal)
            }
            Resolved::Missing => {
                let args = self.eval_arguments(arg_exprs)?;
                self.functions
                    .call(&name.as_str(), &args.values)?
                    .ok_or_else(|| EvalError::UndefinedFunction(name.as_str()))
            }
        }
    }

    /// Inside a function, `F(args)` calls `F` again while a bare `F` reads
    /// the return slot.
    fn recursive_target(&self, name: Ident) -> Option<Shared<Procedure>> {
        self.current_procedure
            .as_ref()
            .filter(|procedure| procedure.name == name && procedure.kind.returns_value())
            .cloned()
    }

    fn call_on(&mut self, target: &Value, name: Ident, arg_exprs: &[Expr]) -> Result<Value, EvalError> {
        match target {
            Value::Instance(instance) => {
                let args = self.eval_arguments(arg_exprs)?;
                let reach = self.reach_for(instance);
                self.call_member(instance, name, args, reach)
            }
            Value::Object(object) => {
                let args = self.eval_arguments(arg_exprs)?;
                self.call_object(object, name, &args.values)
            }
            _ => Err(EvalError::ObjectRequired(name.as_str())),
        }
    }

    /// A method call on a built-in object, falling back to an indexed
    /// property read for members such as `Request.QueryString("id")`.
    fn call_object(&mut self, object: &ObjectRef, name: Ident, args: &[Value]) -> Result<Value, EvalError> {
        let member = name.as_str();
        match object.call_method(&member, args) {
            Err(EvalError::NotSupported(_)) => {
                let value = object.get_property(&member)?;
                self.index_value(&value, args, name)
            }
            result => result,
        }
    }

    fn read_on(&mut self, target: &Value, name: Ident) -> Result<Value, EvalError> {
        match target {
            Value::Instance(instance) => {
                let reach = self.reach_for(instance);
                self.read_member(instance, name, reach)
            }
            Value::Object(object) => {
                let member = name.as_str();
                match object.get_property(&member) {
                    Err(EvalError::NotSupported(_)) => object.call_method(&member, &[]),
                    result => result,
                }
            }
            _ => Err(EvalError::ObjectRequired(name.as_str())),
        }
    }

    fn eval_arguments(&mut self, arg_exprs: &[Expr]) -> Result<Arguments, EvalError> {
        let mut values = Vec::with_capacity(arg_exprs.len());
        let mut refs = SmallVec::with_capacity(arg_exprs.len());
        for expr in arg_exprs {
            refs.push(match expr {
                Expr::Ident(name) if self.is_variable(*name) => Some(*name),
                _ => None,
            });
            values.push(self.eval_expr(expr)?);
        }
        Ok(Arguments { values, refs })
    }

    /// Invokes a procedure, on `this` when it is a class member, then writes
    /// by-reference parameters back to the variables they were read from.
    pub(crate) fn call_procedure(
        &mut self,
        procedure: &Shared<Procedure>,
        this: Option<&Rc<ClassInstance>>,
        args: Arguments,
    ) -> Result<Value, EvalError> {
        let Arguments { values, refs } = args;
        if values.len() > procedure.params.len() {
            return Err(EvalError::InvalidNumberOfArguments(procedure.name.as_str()));
        }

        let invocation = self.invoke(procedure, this, values)?;

        for ((param, target), value) in procedure.params.iter().zip(refs).zip(invocation.params) {
            if let (false, Some(name)) = (param.by_val, target) {
                self.write_back(name, value)?;
            }
        }

        Ok(invocation.value)
    }

    /// Whether a by-reference parameter bound to `name` may write back to
    /// it. Procedures and function-table names are read, never written.
    fn is_variable(&self, name: Ident) -> bool {
        match self.ctx.resolve(name) {
            Resolved::Value(Value::Callable(_)) | Resolved::Member(_) => false,
            Resolved::Value(_) => true,
            Resolved::Missing => !self.functions.contains(&name.as_str()),
        }
    }

    fn write_back(&mut self, name: Ident, value: Value) -> Result<(), EvalError> {
        match self.ctx.write_back(name, value)? {
            Assigned::Done => Ok(()),
            Assigned::Accessor(instance, value) => {
                self.write_member(&instance, name, Vec::new(), value, false, Reach::Internal)
            }
        }
    }

    fn invoke(
        &mut self,
        procedure: &Shared<Procedure>,
        this: Option<&Rc<ClassInstance>>,
        values: Vec<Value>,
    ) -> Result<Invocation, EvalError> {
        self.enter_scope()?;
        self.ctx.push_scope();
        let object = self.ctx.set_current_object(this.cloned());
        let caller = self.current_procedure.replace(Shared::clone(procedure));
        let resume_next = std::mem::replace(&mut self.resume_next, false);
        let with_stack = std::mem::take(&mut self.with_stack);

        let result = self.run_body(procedure, values);

        self.with_stack = with_stack;
        self.resume_next = resume_next;
        self.current_procedure = caller;
        self.ctx.set_current_object(object);
        self.ctx.pop_scope();
        self.exit_scope();

        result
    }

    fn run_body(&mut self, procedure: &Procedure, values: Vec<Value>) -> Result<Invocation, EvalError> {
        let mut values = values.into_iter();
        for param in &procedure.params {
            let value = values.next().unwrap_or_default();
            let value = if param.by_val { value.deep_copy() } else { value };
            self.ctx.define_variable(param.name, value)?;
        }

        let returns_value = procedure.kind.returns_value();
        if returns_value {
            self.ctx.define_variable(procedure.name, Value::Empty)?;
        }

        self.hoist_dims(&procedure.body)?;
        // Exits and halts both end the body; a halt is picked up again by the
        // caller's next statement.
        self.exec_block(&procedure.body)?;

        let value = if returns_value {
            self.ctx.lookup_local(procedure.name).cloned().unwrap_or_default()
        } else {
            Value::Empty
        };
        let params = procedure
            .params
            .iter()
            .map(|param| self.ctx.lookup_local(param.name).cloned().unwrap_or_default())
            .collect();

        Ok(Invocation { value, params })
    }

    #[inline(always)]
    fn enter_scope(&mut self) -> Result<(), EvalError> {
        if self.call_stack_depth >= self.options.max_call_stack_depth {
            return Err(EvalError::RecursionError(self.options.max_call_stack_depth));
        }
        self.call_stack_depth += 1;
        Ok(())
    }

    #[inline(always)]
    fn exit_scope(&mut self) {
        if self.call_stack_depth > 0 {
            self.call_stack_depth -= 1;
        }
    }
}

/// The name an assignment target is reported under.
fn target_name(target: &Expr) -> String {
    match target {
        Expr::Ident(name) | Expr::Member(_, name) | Expr::WithMember(name) => name.as_str(),
        Expr::Call(callee, _) => target_name(callee),
        _ => "Set".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::node::{
        BinaryOp, Branch, ClassMember, ConstDecl, ErrorMode, Param, ProcedureKind,
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn evaluator() -> Evaluator {
        Evaluator::new(Options {
            timeout: None,
            ..Options::default()
        })
    }

    fn run(evaluator: &mut Evaluator, program: Vec<Stmt>) -> Result<Flow, EvalError> {
        evaluator.run(&program)
    }

    fn global(evaluator: &Evaluator, name: &str) -> Value {
        evaluator.get_global(name).unwrap_or_default()
    }

    fn concat(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Concat, lhs, rhs)
    }

    fn function(name: &str, params: Vec<Param>, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::Procedure(Shared::new(Procedure::new(
            ProcedureKind::Function,
            name,
            params,
            body,
        ))))
    }

    fn sub(name: &str, params: Vec<Param>, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::Procedure(Shared::new(Procedure::new(
            ProcedureKind::Sub,
            name,
            params,
            body,
        ))))
    }

    fn for_loop(counter: &str, start: i64, end: i64, step: Option<i64>, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::For {
            counter: Ident::new(counter),
            start: Expr::int(start),
            end: Expr::int(end),
            step: step.map(Expr::int),
            body,
        })
    }

    #[rstest]
    #[case::ascending(1, 3, None, "123")]
    #[case::descending(3, 1, Some(-1), "321")]
    #[case::stepped(0, 10, Some(5), "0510")]
    #[case::empty_range(3, 1, None, "")]
    #[case::zero_step(1, 3, Some(0), "")]
    fn test_for_loop(
        mut evaluator: Evaluator,
        #[case] start: i64,
        #[case] end: i64,
        #[case] step: Option<i64>,
        #[case] expected: &str,
    ) {
        let program = vec![
            Stmt::assign(Expr::ident("out"), Expr::string("")),
            for_loop(
                "i",
                start,
                end,
                step,
                vec![Stmt::assign(
                    Expr::ident("out"),
                    concat(Expr::ident("out"), Expr::ident("i")),
                )],
            ),
        ];
        assert_eq!(run(&mut evaluator, program), Ok(Flow::Normal));
        assert_eq!(global(&evaluator, "out"), Value::from(expected));
    }

    #[rstest]
    fn test_for_counter_after_loop(mut evaluator: Evaluator) {
        let program = vec![for_loop("i", 1, 3, None, vec![])];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "i"), Value::from(4));
    }

    #[rstest]
    fn test_exit_for_stops_only_the_loop(mut evaluator: Evaluator) {
        let program = vec![
            for_loop(
                "i",
                1,
                10,
                None,
                vec![Stmt::new(StmtKind::If {
                    branches: vec![Branch {
                        condition: Expr::binary(BinaryOp::Eq, Expr::ident("i"), Expr::int(3)),
                        body: vec![Stmt::new(StmtKind::Exit(ExitKind::For))],
                    }],
                    otherwise: None,
                })],
            ),
            Stmt::assign(Expr::ident("after"), Expr::bool(true)),
        ];
        assert_eq!(run(&mut evaluator, program), Ok(Flow::Normal));
        assert_eq!(global(&evaluator, "i"), Value::from(3));
        assert_eq!(global(&evaluator, "after"), Value::TRUE);
    }

    #[rstest]
    fn test_exit_of_another_kind_propagates(mut evaluator: Evaluator) {
        let program = vec![for_loop(
            "i",
            1,
            3,
            None,
            vec![Stmt::new(StmtKind::Exit(ExitKind::Do))],
        )];
        assert_eq!(run(&mut evaluator, program), Ok(Flow::Exit(ExitKind::Do)));
    }

    #[rstest]
    #[case::pre_while(LoopTest::While, TestPosition::Pre, 0, 3)]
    #[case::pre_until(LoopTest::Until, TestPosition::Pre, 5, 5)]
    #[case::post_until(LoopTest::Until, TestPosition::Post, 5, 6)]
    fn test_do_loop(
        mut evaluator: Evaluator,
        #[case] test: LoopTest,
        #[case] position: TestPosition,
        #[case] start: i64,
        #[case] expected: i64,
    ) {
        let limit = match test {
            LoopTest::While => Expr::binary(BinaryOp::Lt, Expr::ident("n"), Expr::int(3)),
            LoopTest::Until => Expr::binary(BinaryOp::Ge, Expr::ident("n"), Expr::int(3)),
        };
        let program = vec![
            Stmt::assign(Expr::ident("n"), Expr::int(start)),
            Stmt::new(StmtKind::Do {
                condition: Some(LoopCondition {
                    test,
                    position,
                    expr: limit,
                }),
                body: vec![Stmt::assign(
                    Expr::ident("n"),
                    Expr::binary(BinaryOp::Add, Expr::ident("n"), Expr::int(1)),
                )],
            }),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "n"), Value::from(expected));
    }

    fn select(subject: i64) -> Vec<Stmt> {
        let assign = |s: &str| vec![Stmt::assign(Expr::ident("result"), Expr::string(s))];
        vec![Stmt::new(StmtKind::Select {
            subject: Expr::int(subject),
            cases: vec![
                CaseClause {
                    tests: vec![CaseTest::Range(Expr::int(1), Expr::int(5))],
                    body: assign("low"),
                },
                CaseClause {
                    tests: vec![CaseTest::Is(BinaryOp::Gt, Expr::int(10))],
                    body: assign("high"),
                },
                CaseClause {
                    tests: vec![CaseTest::Value(Expr::int(8)), CaseTest::Value(Expr::int(9))],
                    body: assign("list"),
                },
            ],
            otherwise: Some(assign("else")),
        })]
    }

    #[rstest]
    #[case::range_low(1, "low")]
    #[case::range_high(5, "low")]
    #[case::is(11, "high")]
    #[case::is_boundary(10, "else")]
    #[case::list(9, "list")]
    #[case::otherwise(7, "else")]
    fn test_select_case(mut evaluator: Evaluator, #[case] subject: i64, #[case] expected: &str) {
        run(&mut evaluator, select(subject)).unwrap();
        assert_eq!(global(&evaluator, "result"), Value::from(expected));
    }

    #[rstest]
    fn test_function_slot_is_not_recursion(mut evaluator: Evaluator) {
        let program = vec![
            function(
                "f",
                vec![Param::by_val("x")],
                vec![
                    Stmt::assign(Expr::ident("f"), concat(Expr::ident("f"), Expr::ident("x"))),
                    Stmt::assign(Expr::ident("f"), concat(Expr::ident("f"), Expr::ident("x"))),
                ],
            ),
            Stmt::assign(Expr::ident("a"), Expr::call(Expr::ident("f"), [Expr::string("ab")])),
            Stmt::assign(Expr::ident("b"), Expr::call(Expr::ident("f"), [Expr::string("c")])),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "a"), Value::from("abab"));
        assert_eq!(global(&evaluator, "b"), Value::from("cc"));
    }

    #[rstest]
    fn test_recursive_function(mut evaluator: Evaluator) {
        let n = || Expr::ident("n");
        let program = vec![
            function(
                "fact",
                vec![Param::by_val("n")],
                vec![Stmt::new(StmtKind::If {
                    branches: vec![Branch {
                        condition: Expr::binary(BinaryOp::Le, n(), Expr::int(1)),
                        body: vec![Stmt::assign(Expr::ident("fact"), Expr::int(1))],
                    }],
                    otherwise: Some(vec![Stmt::assign(
                        Expr::ident("fact"),
                        Expr::binary(
                            BinaryOp::Mul,
                            n(),
                            Expr::call(
                                Expr::ident("fact"),
                                [Expr::binary(BinaryOp::Sub, n(), Expr::int(1))],
                            ),
                        ),
                    )]),
                })],
            ),
            Stmt::assign(Expr::ident("r"), Expr::call(Expr::ident("fact"), [Expr::int(5)])),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::from(120));
    }

    #[rstest]
    fn test_recursion_limit_is_fatal(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::new(StmtKind::OnError(ErrorMode::ResumeNext)),
            sub("loopy", vec![], vec![Stmt::call(Expr::ident("loopy"))]),
            Stmt::call(Expr::ident("loopy")),
        ];
        let limit = evaluator.options.max_call_stack_depth;
        assert_eq!(
            run(&mut evaluator, program),
            Err(EvalError::RecursionError(limit))
        );
    }

    #[rstest]
    fn test_by_ref_write_back(mut evaluator: Evaluator) {
        let program = vec![
            sub(
                "bump",
                vec![Param::by_ref("a"), Param::by_val("b")],
                vec![
                    Stmt::assign(Expr::ident("a"), Expr::int(10)),
                    Stmt::assign(Expr::ident("b"), Expr::int(20)),
                ],
            ),
            Stmt::assign(Expr::ident("x"), Expr::int(1)),
            Stmt::assign(Expr::ident("y"), Expr::int(2)),
            Stmt::call(Expr::call(Expr::ident("bump"), [Expr::ident("x"), Expr::ident("y")])),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "x"), Value::from(10));
        assert_eq!(global(&evaluator, "y"), Value::from(2));
    }

    #[rstest]
    fn test_by_ref_write_back_to_absent_name_lands_in_globals(mut evaluator: Evaluator) {
        let program = vec![
            sub(
                "set_it",
                vec![Param::by_ref("a")],
                vec![Stmt::assign(Expr::ident("a"), Expr::string("set"))],
            ),
            sub(
                "outer",
                vec![],
                vec![Stmt::call(Expr::call(Expr::ident("set_it"), [Expr::ident("fresh")]))],
            ),
            Stmt::call(Expr::ident("outer")),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "fresh"), Value::from("set"));
    }

    #[rstest]
    fn test_zero_argument_builtin_is_not_written_back(mut evaluator: Evaluator) {
        let program = vec![
            sub(
                "overwrite",
                vec![Param::by_ref("v")],
                vec![Stmt::assign(Expr::ident("v"), Expr::string("frozen"))],
            ),
            Stmt::call(Expr::call(Expr::ident("overwrite"), [Expr::ident("Now")])),
            Stmt::assign(Expr::ident("r"), Expr::ident("now")),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(evaluator.get_global("now"), None);
        assert_ne!(global(&evaluator, "r"), Value::from("frozen"));
        assert!(!global(&evaluator, "r").to_string().is_empty());
    }

    #[rstest]
    fn test_dim_after_use_keeps_value(mut evaluator: Evaluator) {
        let program = vec![
            function(
                "f",
                vec![],
                vec![
                    Stmt::assign(Expr::ident("x"), Expr::int(5)),
                    Stmt::dim(&["x"]),
                    Stmt::assign(Expr::ident("f"), Expr::ident("x")),
                ],
            ),
            Stmt::assign(Expr::ident("r"), Expr::call(Expr::ident("f"), [])),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::from(5));
        assert_eq!(evaluator.get_global("x"), None);
    }

    #[rstest]
    fn test_calls_may_precede_declarations(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::assign(Expr::ident("r"), Expr::call(Expr::ident("later"), [])),
            function(
                "later",
                vec![],
                vec![Stmt::assign(Expr::ident("later"), Expr::string("hoisted"))],
            ),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::from("hoisted"));
    }

    #[rstest]
    fn test_arrays_copy_on_assignment(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::new(StmtKind::Dim(vec![VarDecl::array("a", vec![Expr::int(2)])])),
            Stmt::assign(Expr::call(Expr::ident("a"), [Expr::int(0)]), Expr::string("first")),
            Stmt::assign(Expr::ident("b"), Expr::ident("a")),
            Stmt::assign(Expr::call(Expr::ident("b"), [Expr::int(0)]), Expr::string("changed")),
            Stmt::assign(Expr::ident("r"), Expr::call(Expr::ident("a"), [Expr::int(0)])),
            Stmt::assign(Expr::ident("missing"), Expr::call(Expr::ident("a"), [Expr::int(9)])),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::from("first"));
        assert_eq!(global(&evaluator, "missing"), Value::Empty);
    }

    #[rstest]
    #[case::out_of_range(
        vec![
            Stmt::new(StmtKind::Dim(vec![VarDecl::array("a", vec![Expr::int(1)])])),
            Stmt::assign(Expr::call(Expr::ident("a"), [Expr::int(5)]), Expr::int(1)),
        ],
        EvalError::SubscriptOutOfRange,
    )]
    #[case::undefined_container(
        vec![Stmt::assign(Expr::call(Expr::ident("nope"), [Expr::int(0)]), Expr::int(1))],
        EvalError::UndefinedVariable("nope".to_string()),
    )]
    #[case::me_outside_class(
        vec![Stmt::assign(Expr::ident("x"), Expr::Me)],
        EvalError::MeOutsideClass,
    )]
    #[case::with_outside_block(
        vec![Stmt::assign(Expr::ident("x"), Expr::WithMember(Ident::new("name")))],
        EvalError::WithOutsideBlock("name".to_string()),
    )]
    #[case::undefined_function(
        vec![Stmt::call(Expr::call(Expr::ident("nothere"), [Expr::int(1)]))],
        EvalError::UndefinedFunction("nothere".to_string()),
    )]
    #[case::class_not_defined(
        vec![Stmt::set(Expr::ident("x"), Expr::new_object("Ghost"))],
        EvalError::ClassNotDefined("ghost".to_string()),
    )]
    #[case::set_array_into_itself(
        vec![
            Stmt::new(StmtKind::Dim(vec![VarDecl::array("a", vec![Expr::int(1)])])),
            Stmt::set(Expr::call(Expr::ident("a"), [Expr::int(0)]), Expr::ident("a")),
        ],
        EvalError::ObjectRequired("a".to_string()),
    )]
    #[case::set_scalar(
        vec![Stmt::set(Expr::ident("x"), Expr::int(1))],
        EvalError::ObjectRequired("x".to_string()),
    )]
    #[case::assign_to_constant(
        vec![
            Stmt::new(StmtKind::Const(vec![ConstDecl { name: Ident::new("k"), value: Expr::int(1) }])),
            Stmt::assign(Expr::ident("k"), Expr::int(2)),
        ],
        EvalError::AssignToConstant("k".to_string()),
    )]
    fn test_runtime_errors(
        mut evaluator: Evaluator,
        #[case] program: Vec<Stmt>,
        #[case] expected: EvalError,
    ) {
        assert_eq!(run(&mut evaluator, program), Err(expected));
    }

    #[rstest]
    fn test_error_range_points_at_failing_statement(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::assign(Expr::ident("a"), Expr::int(1)).at(Range::line(1)),
            Stmt::assign(
                Expr::ident("b"),
                Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0)),
            )
            .at(Range::line(2)),
        ];
        assert_eq!(run(&mut evaluator, program), Err(EvalError::DivisionByZero));
        assert_eq!(evaluator.take_error_range(), Some(Range::line(2)));
    }

    #[rstest]
    fn test_resume_next_records_err(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::new(StmtKind::OnError(ErrorMode::ResumeNext)),
            Stmt::assign(
                Expr::ident("x"),
                Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0)),
            ),
            Stmt::assign(Expr::ident("n"), Expr::member(Expr::ident("err"), "number")),
            Stmt::assign(Expr::ident("after"), Expr::bool(true)),
        ];
        assert_eq!(run(&mut evaluator, program), Ok(Flow::Normal));
        assert_eq!(global(&evaluator, "n"), Value::from(11));
        assert_eq!(global(&evaluator, "after"), Value::TRUE);
    }

    #[rstest]
    fn test_resume_next_is_per_procedure(mut evaluator: Evaluator) {
        let program = vec![
            sub(
                "fails",
                vec![],
                vec![Stmt::assign(
                    Expr::ident("x"),
                    Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0)),
                )],
            ),
            Stmt::new(StmtKind::OnError(ErrorMode::ResumeNext)),
            Stmt::call(Expr::ident("fails")),
            Stmt::assign(Expr::ident("after"), Expr::bool(true)),
        ];
        assert_eq!(run(&mut evaluator, program), Ok(Flow::Normal));
        assert_eq!(global(&evaluator, "after"), Value::TRUE);
        assert_eq!(evaluator.err().number(), 11);
    }

    #[rstest]
    fn test_with_block(mut evaluator: Evaluator) {
        let class = ClassDecl {
            name: "Point".into(),
            members: vec![ClassMember::Field {
                access: crate::ast::node::Access::Public,
                decl: VarDecl::scalar("x"),
            }],
        };
        let program = vec![
            Stmt::new(StmtKind::Class(Shared::new(class))),
            Stmt::set(Expr::ident("p"), Expr::new_object("Point")),
            Stmt::new(StmtKind::With {
                object: Expr::ident("p"),
                body: vec![Stmt::assign(Expr::WithMember(Ident::new("x")), Expr::int(7))],
            }),
            Stmt::assign(Expr::ident("r"), Expr::member(Expr::ident("p"), "x")),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::from(7));
    }

    #[rstest]
    fn test_redim_preserve(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::new(StmtKind::Dim(vec![VarDecl::array("a", vec![])])),
            Stmt::new(StmtKind::ReDim {
                preserve: false,
                decls: vec![VarDecl::array("a", vec![Expr::int(1)])],
            }),
            Stmt::assign(Expr::call(Expr::ident("a"), [Expr::int(1)]), Expr::string("kept")),
            Stmt::new(StmtKind::ReDim {
                preserve: true,
                decls: vec![VarDecl::array("a", vec![Expr::int(3)])],
            }),
            Stmt::assign(Expr::ident("r"), Expr::call(Expr::ident("a"), [Expr::int(1)])),
            Stmt::assign(
                Expr::ident("n"),
                Expr::call(Expr::ident("ubound"), [Expr::ident("a")]),
            ),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::from("kept"));
        assert_eq!(global(&evaluator, "n"), Value::from(3));
    }

    #[rstest]
    fn test_for_each_over_array(mut evaluator: Evaluator) {
        let program = vec![
            Stmt::assign(
                Expr::ident("items"),
                Expr::call(Expr::ident("array"), [Expr::int(1), Expr::int(2), Expr::int(3)]),
            ),
            Stmt::assign(Expr::ident("sum"), Expr::int(0)),
            Stmt::new(StmtKind::ForEach {
                element: Ident::new("item"),
                group: Expr::ident("items"),
                body: vec![Stmt::assign(
                    Expr::ident("sum"),
                    Expr::binary(BinaryOp::Add, Expr::ident("sum"), Expr::ident("item")),
                )],
            }),
        ];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "sum"), Value::from(6));
    }

    #[rstest]
    fn test_unknown_identifier_reads_empty(mut evaluator: Evaluator) {
        let program = vec![Stmt::assign(Expr::ident("r"), Expr::ident("undeclared"))];
        run(&mut evaluator, program).unwrap();
        assert_eq!(global(&evaluator, "r"), Value::Empty);
    }

    #[rstest]
    fn test_call_procedure_by_name(mut evaluator: Evaluator) {
        let program = vec![sub(
            "application_onstart",
            vec![],
            vec![Stmt::assign(Expr::ident("started"), Expr::bool(true))],
        )];
        run(&mut evaluator, program).unwrap();
        assert_eq!(
            evaluator.call_procedure_by_name("Application_OnStart", vec![]),
            Ok(Some(Value::Empty))
        );
        assert_eq!(global(&evaluator, "started"), Value::TRUE);
        assert_eq!(evaluator.call_procedure_by_name("missing", vec![]), Ok(None));
    }

    #[rstest]
    fn test_timeout_aborts_loop() {
        let mut evaluator = Evaluator::new(Options {
            timeout: Some(Duration::from_millis(20)),
            ..Options::default()
        });
        let program = vec![Stmt::new(StmtKind::Do {
            condition: None,
            body: vec![],
        })];
        assert_eq!(run(&mut evaluator, program), Err(EvalError::Timeout));
    }
}
