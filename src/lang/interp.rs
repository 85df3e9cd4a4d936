//! Tree-walking evaluator.
//!
//! The interpreter owns nothing dangerous itself: every host capability
//! reaches the guest through the builtins table it is constructed with.
//! Resource accounting is delegated to a [`Governor`] polled on every
//! statement, loop iteration and call.

use super::ast::*;
use super::compile::compile;
use super::methods;
use super::parser::{parse_expression, parse_program};
use super::value::*;
use crate::config::types::{GuestException, ResourceViolation};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

/// Guest call depth limit, well below what the guest thread's stack holds.
pub const MAX_CALL_DEPTH: usize = 200;

/// Exception classes guest code can raise and catch.
pub const EXCEPTION_CLASSES: &[&str] = &[
    "Exception",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "EOFError",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "NameError",
    "NotImplementedError",
    "OSError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "StopIteration",
    "SyntaxError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

fn exception_parent(kind: &str) -> Option<&'static str> {
    match kind {
        "Exception" => None,
        "ZeroDivisionError" | "OverflowError" => Some("ArithmeticError"),
        "KeyError" | "IndexError" => Some("LookupError"),
        "RecursionError" | "NotImplementedError" => Some("RuntimeError"),
        _ => Some("Exception"),
    }
}

/// Does an exception of `kind` match an `except <handler>` clause?
pub fn exception_matches(kind: &str, handler: &str) -> bool {
    let handler = handler.rsplit('.').next().unwrap_or(handler);
    if handler == "BaseException" {
        return true;
    }
    let mut current = Some(kind);
    while let Some(k) = current {
        if k == handler {
            return true;
        }
        current = exception_parent(k);
    }
    false
}

/// Resource accounting hook polled by the interpreter.
pub trait Governor {
    /// Called on every statement, loop iteration and call.
    fn check(&mut self) -> Result<(), ResourceViolation>;

    /// Called before an allocation of `bytes` whose size is known up front.
    fn reserve(&mut self, bytes: u64) -> Result<(), ResourceViolation>;

    /// Sleep without becoming uninterruptible.
    fn sleep(&mut self, duration: Duration) -> Result<(), ResourceViolation>;
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

type Env<'a> = Option<&'a Rc<Scope>>;

/// Lazily produced items of a `for` loop or builtin consuming an iterable.
pub enum GuestIter {
    Range { range: RangeValue, index: usize },
    Items { items: Vec<Value>, index: usize },
}

impl Iterator for GuestIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            GuestIter::Range { range, index } => {
                let v = range.nth(*index)?;
                *index += 1;
                Some(Value::Int(v))
            }
            GuestIter::Items { items, index } => {
                let v = items.get(*index)?.clone();
                *index += 1;
                Some(v)
            }
        }
    }
}

pub struct Interpreter {
    globals: Namespace,
    builtins: HashMap<String, Value>,
    governor: Box<dyn Governor>,
    depth: usize,
    handling: Vec<GuestException>,
}

impl Interpreter {
    pub fn new(builtins: HashMap<String, Value>, governor: Box<dyn Governor>) -> Self {
        let globals = new_namespace();
        globals
            .borrow_mut()
            .insert("__name__".to_string(), Value::from("__main__"));
        Self {
            globals,
            builtins,
            governor,
            depth: 0,
            handling: Vec::new(),
        }
    }

    pub fn globals(&self) -> &Namespace {
        &self.globals
    }

    pub fn builtins(&self) -> &HashMap<String, Value> {
        &self.builtins
    }

    pub fn check_budget(&mut self) -> EvalResult<()> {
        self.governor.check().map_err(Unwind::Exceeded)
    }

    pub fn reserve(&mut self, bytes: u64) -> EvalResult<()> {
        self.governor.reserve(bytes).map_err(Unwind::Exceeded)
    }

    pub fn sleep(&mut self, duration: Duration) -> EvalResult<()> {
        self.governor.sleep(duration).map_err(Unwind::Exceeded)
    }

    /// `==` on guest values, polling the governor as it walks.
    pub fn equal(&mut self, a: &Value, b: &Value) -> EvalResult<bool> {
        equal_in(a, b, self.governor.as_mut())
    }

    /// `repr(value)` charged to the governor.
    pub fn repr(&mut self, value: &Value) -> EvalResult<String> {
        value.repr_in(self.governor.as_mut())
    }

    /// `str(value)` charged to the governor.
    pub fn text(&mut self, value: &Value) -> EvalResult<String> {
        value.to_text_in(self.governor.as_mut())
    }

    /// Reserve room for `count` values.
    pub fn reserve_values(&mut self, count: usize) -> EvalResult<()> {
        let bytes = (count as u64).saturating_mul(std::mem::size_of::<Value>() as u64);
        self.reserve(bytes)
    }

    pub fn run_program(&mut self, program: &Program) -> EvalResult<()> {
        self.exec_block(&program.body, None).map(|_| ())
    }

    pub fn eval_expression(&mut self, expr: &Expr) -> EvalResult {
        self.eval(expr, None)
    }

    /// `exec(source)` against the module namespace.
    pub fn exec_source(&mut self, source: &str) -> EvalResult<()> {
        let program = parse_program(source).map_err(syntax_error)?;
        compile(&program).map_err(syntax_error)?;
        self.run_program(&program)
    }

    /// `eval(source)` against the module namespace.
    pub fn eval_source(&mut self, source: &str) -> EvalResult {
        let expr = parse_expression(source).map_err(syntax_error)?;
        self.eval(&expr, None)
    }

    // ---- statements -------------------------------------------------------

    fn exec_block(&mut self, body: &[Stmt], env: Env) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: Env) -> EvalResult<Flow> {
        self.check_budget()?;
        self.exec_stmt_inner(stmt, env).map_err(|unwind| match unwind {
            Unwind::Raise(exc) => Unwind::Raise(exc.at_line(stmt.line)),
            other => other,
        })
    }

    fn exec_stmt_inner(&mut self, stmt: &Stmt, env: Env) -> EvalResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, env)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, env)?;
                for target in targets {
                    self.assign(target, value.clone(), env)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, env)?,
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test, env)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch, env);
            }
            StmtKind::While { test, body } => loop {
                self.check_budget()?;
                if !self.eval(test, env)?.truthy() {
                    break;
                }
                match self.exec_block(body, env)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, env)?;
                for item in self.iterate(&iterable)? {
                    self.check_budget()?;
                    self.assign(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::FunctionDef(def) => {
                let func = self.make_function(def, env)?;
                self.store(&def.name, func, env);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.import(alias, env)?;
                }
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names, env)?,
            StmtKind::Raise(value) => return Err(self.raise_stmt(value.as_ref(), env)?),
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => return self.exec_try(body, handlers, finalbody, env),
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target, env)?;
                }
            }
            StmtKind::Global(names) => {
                if let Some(scope) = env {
                    scope
                        .globals_declared
                        .borrow_mut()
                        .extend(names.iter().cloned());
                }
            }
            StmtKind::Assert { test, msg } => {
                if !self.eval(test, env)?.truthy() {
                    let message = match msg {
                        Some(m) => {
                            let message = self.eval(m, env)?;
                            self.text(&message)?
                        }
                        None => String::new(),
                    };
                    return Err(raise("AssertionError", message));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn raise_stmt(&mut self, value: Option<&Expr>, env: Env) -> EvalResult<Unwind> {
        let value = match value {
            Some(expr) => self.eval(expr, env)?,
            None => {
                return Ok(match self.handling.last() {
                    Some(exc) => Unwind::Raise(exc.clone()),
                    None => raise("RuntimeError", "No active exception to reraise"),
                })
            }
        };
        Ok(match value {
            Value::Exception(exc) => Unwind::Raise((*exc).clone()),
            Value::Class(name) if EXCEPTION_CLASSES.contains(&&*name) => {
                Unwind::Raise(GuestException::new(&*name, ""))
            }
            other => raise(
                "TypeError",
                format!(
                    "exceptions must derive from BaseException, not {}",
                    other.type_name()
                ),
            ),
        })
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        finalbody: &[Stmt],
        env: Env,
    ) -> EvalResult<Flow> {
        let outcome = match self.exec_block(body, env) {
            Err(Unwind::Raise(exc)) => {
                let handler = handlers.iter().find(|h| match &h.kind {
                    Some(kind) => exception_matches(&exc.kind, kind),
                    None => true,
                });
                match handler {
                    Some(handler) => {
                        if let Some(name) = &handler.name {
                            self.store(name, Value::Exception(Rc::new(exc.clone())), env);
                        }
                        self.handling.push(exc);
                        let result = self.exec_block(&handler.body, env);
                        self.handling.pop();
                        result
                    }
                    None => Err(Unwind::Raise(exc)),
                }
            }
            other => other,
        };
        // A tripped budget or a denial ends the run; guest cleanup does not get to run.
        if finalbody.is_empty() || matches!(outcome, Err(Unwind::Denied(_) | Unwind::Exceeded(_))) {
            return outcome;
        }
        match self.exec_block(finalbody, env)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn import(&mut self, alias: &Alias, env: Env) -> EvalResult<()> {
        let importer = self.importer()?;
        let root = self.call(&importer, CallArgs::new(vec![Value::from(alias.name.as_str())]))?;
        match &alias.asname {
            Some(asname) => {
                let mut module = root;
                for part in alias.name.split('.').skip(1) {
                    module = self.get_attr(&module, part)?;
                }
                self.store(asname, module, env);
            }
            None => {
                let first = alias.name.split('.').next().unwrap_or(&alias.name);
                self.store(first, root, env);
            }
        }
        Ok(())
    }

    fn import_from(&mut self, module: &str, names: &[Alias], env: Env) -> EvalResult<()> {
        let importer = self.importer()?;
        let fromlist = Value::list(names.iter().map(|a| Value::from(a.name.as_str())).collect());
        let leaf = self.call(
            &importer,
            CallArgs::new(vec![Value::from(module), fromlist]),
        )?;
        for alias in names {
            let value = match self.get_attr(&leaf, &alias.name) {
                Err(Unwind::Raise(exc)) if exc.kind == "AttributeError" => {
                    return Err(raise(
                        "ImportError",
                        format!("cannot import name '{}' from '{}'", alias.name, module),
                    ))
                }
                other => other?,
            };
            self.store(alias.asname.as_ref().unwrap_or(&alias.name), value, env);
        }
        Ok(())
    }

    fn importer(&self) -> EvalResult {
        self.builtins
            .get("__import__")
            .cloned()
            .ok_or_else(|| raise("ImportError", "__import__ not found"))
    }

    // ---- names ------------------------------------------------------------

    fn lookup(&self, name: &str, env: Env) -> EvalResult {
        if let Some(scope) = env {
            if !scope.is_global(name) {
                if let Some(v) = scope.lookup(name) {
                    return Ok(v);
                }
            }
        }
        if let Some(v) = self.globals.borrow().get(name) {
            return Ok(v.clone());
        }
        self.builtins
            .get(name)
            .cloned()
            .ok_or_else(|| raise("NameError", format!("name '{}' is not defined", name)))
    }

    fn store(&mut self, name: &str, value: Value, env: Env) {
        match env {
            Some(scope) if !scope.is_global(name) => {
                scope.vars.borrow_mut().insert(name.to_string(), value);
            }
            _ => {
                self.globals.borrow_mut().insert(name.to_string(), value);
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, env: Env) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.store(name, value, env);
                Ok(())
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, env)?;
                self.set_attr(&obj, attr, value)
            }
            ExprKind::Subscript { value: obj, index } => {
                let obj = self.eval(obj, env)?;
                if matches!(index.kind, ExprKind::Slice { .. }) {
                    return Err(raise("TypeError", "slice assignment is not supported"));
                }
                let index = self.eval(index, env)?;
                self.set_item(&obj, index, value)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = self.collect(&value)?;
                if items.len() < targets.len() {
                    return Err(raise(
                        "ValueError",
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    ));
                }
                if items.len() > targets.len() {
                    return Err(raise(
                        "ValueError",
                        format!("too many values to unpack (expected {})", targets.len()),
                    ));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v, env)?;
                }
                Ok(())
            }
            _ => Err(raise("SyntaxError", "cannot assign to expression")),
        }
    }

    fn aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr, env: Env) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.lookup(name, env)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.store(name, result, env);
            }
            ExprKind::Attribute { value: obj, attr } => {
                let obj = self.eval(obj, env)?;
                let current = self.get_attr(&obj, attr)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_attr(&obj, attr, result)?;
            }
            ExprKind::Subscript { value: obj, index } => {
                let obj = self.eval(obj, env)?;
                let index = self.eval(index, env)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(value, env)?;
                let result = self.inplace_op(op, current, rhs)?;
                self.set_item(&obj, index, result)?;
            }
            _ => return Err(raise("SyntaxError", "illegal expression for augmented assignment")),
        }
        Ok(())
    }

    fn inplace_op(&mut self, op: BinOp, current: Value, rhs: Value) -> EvalResult {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = self.collect(&rhs)?;
            self.reserve_values(items.borrow().len() + extra.len())?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary_op(op, &current, &rhs)
    }

    fn delete(&mut self, target: &Expr, env: Env) -> EvalResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let removed = match env {
                    Some(scope) if !scope.is_global(name) => {
                        scope.vars.borrow_mut().remove(name.as_str())
                    }
                    _ => self.globals.borrow_mut().remove(name.as_str()),
                };
                removed
                    .map(|_| ())
                    .ok_or_else(|| raise("NameError", format!("name '{}' is not defined", name)))
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval(value, env)?;
                let index = self.eval(index, env)?;
                self.del_item(&obj, &index)
            }
            ExprKind::Attribute { value, attr } => match self.eval(value, env)? {
                Value::Module(module) => module
                    .remove(attr)
                    .map(|_| ())
                    .ok_or_else(|| raise("AttributeError", attr.clone())),
                other => Err(raise(
                    "AttributeError",
                    format!("cannot delete attribute '{}' of {}", attr, other.type_name()),
                )),
            },
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                items.iter().try_for_each(|item| self.delete(item, env))
            }
            _ => Err(raise("SyntaxError", "cannot delete expression")),
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, env: Env) -> EvalResult {
        let mut defaults = Vec::new();
        for param in &def.params {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default, env)?);
            }
        }
        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            globals: self.globals.clone(),
            closure: env.cloned(),
        })))
    }

    // ---- expressions ------------------------------------------------------

    fn eval(&mut self, expr: &Expr, env: Env) -> EvalResult {
        match &expr.kind {
            ExprKind::Constant(c) => Ok(match c {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Name(name) => self.lookup(name, env),
            ExprKind::List(items) => {
                let items = self.eval_all(items, env)?;
                Ok(Value::list(items))
            }
            ExprKind::Tuple(items) => {
                let items = self.eval_all(items, env)?;
                Ok(Value::tuple(items))
            }
            ExprKind::Dict(pairs) => {
                let mut dict = Dict::new();
                for (k, v) in pairs {
                    let key = self.eval(k, env)?;
                    ensure_hashable(&key)?;
                    let value = self.eval(v, env)?;
                    dict.insert(key, value);
                }
                Ok(Value::dict(dict))
            }
            ExprKind::Attribute { value, attr } => {
                let obj = self.eval(value, env)?;
                self.get_attr(&obj, attr)
            }
            ExprKind::Subscript { value, index } => {
                let obj = self.eval(value, env)?;
                match &index.kind {
                    ExprKind::Slice { lower, upper, step } => {
                        let lower = self.eval_bound(lower.as_deref(), env)?;
                        let upper = self.eval_bound(upper.as_deref(), env)?;
                        let step = self.eval_bound(step.as_deref(), env)?;
                        self.slice(&obj, lower, upper, step)
                    }
                    _ => {
                        let index = self.eval(index, env)?;
                        self.get_item(&obj, &index)
                    }
                }
            }
            ExprKind::Slice { .. } => Err(raise("SyntaxError", "invalid slice")),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                let callee = self.eval(func, env)?;
                let positional = self.eval_all(args, env)?;
                let mut kw = Vec::with_capacity(keywords.len());
                for (name, value) in keywords {
                    kw.push((name.clone(), self.eval(value, env)?));
                }
                self.call(
                    &callee,
                    CallArgs {
                        positional,
                        keywords: kw,
                    },
                )
            }
            ExprKind::BinOp { left, op, right } => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                self.binary_op(*op, &l, &r)
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(operand, env)?;
                unary_op(*op, &v)
            }
            ExprKind::And(left, right) => {
                let l = self.eval(left, env)?;
                if !l.truthy() {
                    return Ok(l);
                }
                self.eval(right, env)
            }
            ExprKind::Or(left, right) => {
                let l = self.eval(left, env)?;
                if l.truthy() {
                    return Ok(l);
                }
                self.eval(right, env)
            }
            ExprKind::Compare { left, ops } => {
                let mut lhs = self.eval(left, env)?;
                for (op, right) in ops {
                    let rhs = self.eval(right, env)?;
                    if !self.compare(*op, &lhs, &rhs)? {
                        return Ok(Value::Bool(false));
                    }
                    lhs = rhs;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(body, env)
                } else {
                    self.eval(orelse, env)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, env),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr], env: Env) -> EvalResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, env)).collect()
    }

    fn eval_bound(&mut self, expr: Option<&Expr>, env: Env) -> EvalResult<Option<i64>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        match self.eval(expr, env)? {
            Value::None => Ok(None),
            v => v.as_int().map(Some).ok_or_else(|| {
                raise(
                    "TypeError",
                    "slice indices must be integers or None",
                )
            }),
        }
    }

    // ---- calls ------------------------------------------------------------

    pub fn call(&mut self, callee: &Value, args: CallArgs) -> EvalResult {
        self.check_budget()?;
        self.depth += 1;
        let result = if self.depth > MAX_CALL_DEPTH {
            Err(raise("RecursionError", "maximum recursion depth exceeded"))
        } else {
            self.dispatch(callee, args)
        };
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, callee: &Value, args: CallArgs) -> EvalResult {
        match callee {
            Value::Function(func) => self.call_function(func, args),
            Value::Native(native) => {
                let func = native.func.clone();
                (*func)(self, args)
            }
            Value::BoundMethod(method) => {
                methods::call_method(self, &method.receiver, &method.name, args)
            }
            Value::Class(name) => self.instantiate(name, args),
            Value::Object(obj) => obj.clone().call(self, args),
            other => Err(raise(
                "TypeError",
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(&mut self, func: &Rc<Function>, args: CallArgs) -> EvalResult {
        let def = &func.def;
        let params = &def.params;
        if args.positional.len() > params.len() {
            return Err(raise(
                "TypeError",
                format!(
                    "{}() takes {} positional arguments but {} were given",
                    def.name,
                    params.len(),
                    args.positional.len()
                ),
            ));
        }
        let scope = Scope::new(func.closure.clone());
        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }
        for (name, value) in args.keywords {
            let index = params.iter().position(|p| p.name == name).ok_or_else(|| {
                raise(
                    "TypeError",
                    format!("{}() got an unexpected keyword argument '{}'", def.name, name),
                )
            })?;
            if bound[index].is_some() {
                return Err(raise(
                    "TypeError",
                    format!("{}() got multiple values for argument '{}'", def.name, name),
                ));
            }
            bound[index] = Some(value);
        }
        let first_default = params.len() - func.defaults.len();
        {
            let mut vars = scope.vars.borrow_mut();
            for (i, (param, value)) in params.iter().zip(bound).enumerate() {
                let value = match value {
                    Some(v) => v,
                    None if i >= first_default => func.defaults[i - first_default].clone(),
                    None => {
                        return Err(raise(
                            "TypeError",
                            format!(
                                "{}() missing required argument: '{}'",
                                def.name, param.name
                            ),
                        ))
                    }
                };
                vars.insert(param.name.clone(), value);
            }
        }
        match self.exec_block(&def.body, Some(&scope))? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    fn instantiate(&mut self, name: &str, args: CallArgs) -> EvalResult {
        if EXCEPTION_CLASSES.contains(&name) {
            let message = match args.positional.as_slice() {
                [] => String::new(),
                [single] => self.text(single)?,
                many => self.repr(&Value::tuple(many.to_vec()))?,
            };
            return Ok(Value::Exception(Rc::new(GuestException::new(name, message))));
        }
        match self.builtins.get(name).cloned() {
            Some(constructor @ Value::Native(_)) => self.call(&constructor, args),
            _ => Err(raise(
                "TypeError",
                format!("cannot create '{}' instances", name),
            )),
        }
    }

    // ---- attributes and items ---------------------------------------------

    pub fn get_attr(&mut self, obj: &Value, name: &str) -> EvalResult {
        let missing = || {
            raise(
                "AttributeError",
                format!("'{}' object has no attribute '{}'", obj.type_name(), name),
            )
        };
        match obj {
            Value::Module(module) => {
                let found = if is_reserved_name(name) {
                    module.reserved_attr(name)
                } else {
                    module.get(name)
                };
                found.ok_or_else(|| {
                    raise(
                        "AttributeError",
                        format!("module '{}' has no attribute '{}'", module.name(), name),
                    )
                })
            }
            Value::Object(o) => o.get_attr(name),
            Value::Function(func) => match name {
                "__name__" => Ok(Value::from(func.def.name.as_str())),
                "__doc__" => Ok(func
                    .def
                    .doc
                    .as_deref()
                    .map(Value::from)
                    .unwrap_or(Value::None)),
                "__globals__" => {
                    let mut dict = Dict::new();
                    for (k, v) in func.globals.borrow().iter() {
                        dict.insert(Value::from(k.as_str()), v.clone());
                    }
                    Ok(Value::dict(dict))
                }
                "__class__" => Ok(Value::Class(Rc::from("function"))),
                _ => Err(missing()),
            },
            Value::Native(native) => match name {
                "__name__" => Ok(Value::from(
                    native.name.rsplit('.').next().unwrap_or(&native.name),
                )),
                "__class__" => Ok(Value::Class(Rc::from("builtin_function_or_method"))),
                _ => Err(missing()),
            },
            Value::Class(class) => match name {
                "__name__" => Ok(Value::Str(class.clone())),
                "__class__" => Ok(Value::Class(Rc::from("type"))),
                _ => Err(missing()),
            },
            Value::Exception(exc) => match name {
                "args" => Ok(Value::tuple(vec![Value::from(exc.message.as_str())])),
                "__class__" => Ok(Value::Class(Rc::from(exc.kind.as_str()))),
                _ => Err(missing()),
            },
            _ if name == "__class__" => Ok(Value::Class(Rc::from(obj.type_name().as_str()))),
            _ if methods::has_method(obj, name) => Ok(Value::BoundMethod(Rc::new(BoundMethod {
                receiver: obj.clone(),
                name: Rc::from(name),
            }))),
            _ => Err(missing()),
        }
    }

    pub fn set_attr(&mut self, obj: &Value, name: &str, value: Value) -> EvalResult<()> {
        match obj {
            Value::Module(module) => {
                module.set(name, value);
                Ok(())
            }
            Value::Object(o) => o.set_attr(name, value),
            other => Err(raise(
                "AttributeError",
                format!(
                    "'{}' object attribute '{}' is read-only",
                    other.type_name(),
                    name
                ),
            )),
        }
    }

    pub fn get_item(&mut self, obj: &Value, index: &Value) -> EvalResult {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let i = seq_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = seq_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let count = s.chars().count();
                let i = seq_index(index, count, "string")?;
                Ok(s.chars().nth(i).map(|c| Value::from(c.to_string())).unwrap_or(Value::None))
            }
            Value::Range(r) => {
                let i = seq_index(index, r.len(), "range object")?;
                Ok(r.nth(i).map(Value::Int).unwrap_or(Value::None))
            }
            Value::Dict(dict) => {
                ensure_hashable(index)?;
                dict.borrow()
                    .get(index)
                    .cloned()
                    .ok_or_else(|| raise("KeyError", index.repr()))
            }
            other => Err(raise(
                "TypeError",
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    pub fn set_item(&mut self, obj: &Value, index: Value, value: Value) -> EvalResult<()> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = seq_index(&index, items.len(), "list")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                ensure_hashable(&index)?;
                dict.borrow_mut().insert(index, value);
                Ok(())
            }
            other => Err(raise(
                "TypeError",
                format!(
                    "'{}' object does not support item assignment",
                    other.type_name()
                ),
            )),
        }
    }

    fn del_item(&mut self, obj: &Value, index: &Value) -> EvalResult<()> {
        match obj {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let i = seq_index(index, items.len(), "list")?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(dict) => dict
                .borrow_mut()
                .remove(index)
                .map(|_| ())
                .ok_or_else(|| raise("KeyError", index.repr())),
            other => Err(raise(
                "TypeError",
                format!(
                    "'{}' object does not support item deletion",
                    other.type_name()
                ),
            )),
        }
    }

    fn slice(
        &mut self,
        obj: &Value,
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    ) -> EvalResult {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err(raise("ValueError", "slice step cannot be zero"));
        }
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let picked = slice_indices(items.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect();
                Ok(Value::list(picked))
            }
            Value::Tuple(items) => {
                let picked = slice_indices(items.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| items[i].clone())
                    .collect();
                Ok(Value::tuple(picked))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked: String = slice_indices(chars.len(), lower, upper, step)
                    .into_iter()
                    .map(|i| chars[i])
                    .collect();
                Ok(Value::from(picked))
            }
            other => Err(raise(
                "TypeError",
                format!("'{}' object is not subscriptable", other.type_name()),
            )),
        }
    }

    // ---- iteration --------------------------------------------------------

    pub fn iterate(&mut self, value: &Value) -> EvalResult<GuestIter> {
        let items = match value {
            Value::Range(range) => {
                return Ok(GuestIter::Range {
                    range: *range,
                    index: 0,
                })
            }
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::from(c.to_string())).collect(),
            Value::Dict(dict) => dict.borrow().keys(),
            other => {
                return Err(raise(
                    "TypeError",
                    format!("'{}' object is not iterable", other.type_name()),
                ))
            }
        };
        Ok(GuestIter::Items { items, index: 0 })
    }

    /// Materialise an iterable, accounting for its size first.
    pub fn collect(&mut self, value: &Value) -> EvalResult<Vec<Value>> {
        if let Value::Range(range) = value {
            self.reserve_values(range.len())?;
        }
        Ok(self.iterate(value)?.collect())
    }

    // ---- operators --------------------------------------------------------

    pub fn binary_op(&mut self, op: BinOp, l: &Value, r: &Value) -> EvalResult {
        if let (Value::Int(a), Value::Int(b)) = (l, r) {
            return int_op(op, *a, *b);
        }
        match (op, l, r) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                self.reserve((a.len() + b.len()) as u64)?;
                Ok(Value::from(format!("{}{}", a, b)))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                self.reserve_values(a.len() + b.len())?;
                Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                self.reserve_values(a.len() + b.len())?;
                Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
            }
            (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
                let count = n.as_int().unwrap_or(0).max(0) as u64;
                self.reserve((s.len() as u64).saturating_mul(count))?;
                Ok(Value::from(s.repeat(count as usize)))
            }
            (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
                if n.as_int().is_some() =>
            {
                let count = n.as_int().unwrap_or(0).max(0) as usize;
                let items = items.borrow();
                if items.is_empty() {
                    return Ok(Value::list(Vec::new()));
                }
                self.reserve_values(items.len().saturating_mul(count))?;
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend(items.iter().cloned());
                }
                Ok(Value::list(out))
            }
            (BinOp::Mod, Value::Str(fmt), args) => methods::percent_format(fmt, args),
            _ => match (l.as_float(), r.as_float()) {
                (Some(a), Some(b)) => float_op(op, a, b),
                _ => Err(raise(
                    "TypeError",
                    format!(
                        "unsupported operand type(s) for {}: '{}' and '{}'",
                        op.symbol(),
                        l.type_name(),
                        r.type_name()
                    ),
                )),
            },
        }
    }

    fn compare(&mut self, op: CmpOp, l: &Value, r: &Value) -> EvalResult<bool> {
        Ok(match op {
            CmpOp::Eq => self.equal(l, r)?,
            CmpOp::NotEq => !self.equal(l, r)?,
            CmpOp::Is => identical(l, r),
            CmpOp::IsNot => !identical(l, r),
            CmpOp::In => contains(self, r, l)?,
            CmpOp::NotIn => !contains(self, r, l)?,
            CmpOp::Lt => compare_values(self, l, r)? == Ordering::Less,
            CmpOp::LtE => compare_values(self, l, r)? != Ordering::Greater,
            CmpOp::Gt => compare_values(self, l, r)? == Ordering::Greater,
            CmpOp::GtE => compare_values(self, l, r)? != Ordering::Less,
        })
    }
}

pub fn syntax_error(err: crate::config::types::ParseError) -> Unwind {
    Unwind::Raise(GuestException::new("SyntaxError", err.to_string()))
}

/// `__name__`-style names.
pub fn is_reserved_name(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn seq_index(index: &Value, len: usize, what: &str) -> EvalResult<usize> {
    let i = index.as_int().ok_or_else(|| {
        raise(
            "TypeError",
            format!("{} indices must be integers, not {}", what, index.type_name()),
        )
    })?;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(raise("IndexError", format!("{} index out of range", what)));
    }
    Ok(resolved as usize)
}

fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let clamp = |v: i64, low: i64, high: i64| v.max(low).min(high);
    let resolve = |v: i64| if v < 0 { v + len } else { v };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |v| clamp(resolve(v), 0, len));
        let stop = upper.map_or(len, |v| clamp(resolve(v), 0, len));
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = lower.map_or(len - 1, |v| clamp(resolve(v), -1, len - 1));
        let stop = upper.map_or(-1, |v| clamp(resolve(v), -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

fn overflow() -> Unwind {
    raise("OverflowError", "integer overflow")
}

fn int_op(op: BinOp, a: i64, b: i64) -> EvalResult {
    let zero_div = || raise("ZeroDivisionError", "integer division or modulo by zero");
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(raise("ZeroDivisionError", "division by zero"));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_div());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_div());
            }
            let r = a.checked_rem(b).unwrap_or(0);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(raise(
                        "ZeroDivisionError",
                        "0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(value))
}

fn float_op(op: BinOp, a: f64, b: f64) -> EvalResult {
    let zero = || raise("ZeroDivisionError", "float division by zero");
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(raise("ZeroDivisionError", "float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(raise(
                    "ZeroDivisionError",
                    "0.0 cannot be raised to a negative power",
                ));
            }
            a.powf(b)
        }
    };
    if value.is_infinite() && a.is_finite() && b.is_finite() {
        return Err(raise("OverflowError", "numerical result out of range"));
    }
    Ok(Value::Float(value))
}

fn unary_op(op: UnaryOp, v: &Value) -> EvalResult {
    match (op, v) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(overflow),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (_, v) => Err(raise(
            "TypeError",
            format!(
                "bad operand type for unary {}: '{}'",
                if op == UnaryOp::Neg { "-" } else { "+" },
                v.type_name()
            ),
        )),
    }
}

/// Membership test (`item in container`).
pub fn contains(interp: &mut Interpreter, container: &Value, item: &Value) -> EvalResult<bool> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(&**needle)),
            other => Err(raise(
                "TypeError",
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            )),
        },
        Value::List(items) => contains_equal(interp, &items.borrow(), item),
        Value::Tuple(items) => contains_equal(interp, items, item),
        Value::Dict(dict) => Ok(dict.borrow().get(item).is_some()),
        Value::Range(r) => Ok(match item.as_int() {
            Some(i) => {
                let offset = i as i128 - r.start as i128;
                let in_bounds = if r.step > 0 {
                    i >= r.start && i < r.stop
                } else {
                    i <= r.start && i > r.stop
                };
                in_bounds && offset % r.step as i128 == 0
            }
            None => false,
        }),
        other => Err(raise(
            "TypeError",
            format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ),
        )),
    }
}

fn contains_equal(interp: &mut Interpreter, items: &[Value], item: &Value) -> EvalResult<bool> {
    for candidate in items {
        if interp.equal(candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Ordering for `<`, `sorted`, `min` and `max`.
pub fn compare_values(interp: &mut Interpreter, l: &Value, r: &Value) -> EvalResult<Ordering> {
    order_at(interp, l, r, 0)
}

fn order_at(interp: &mut Interpreter, l: &Value, r: &Value, depth: usize) -> EvalResult<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => compare_seq(interp, &a.borrow(), &b.borrow(), depth),
        (Value::Tuple(a), Value::Tuple(b)) => compare_seq(interp, a, b, depth),
        _ => match (l.as_float(), r.as_float()) {
            (Some(a), Some(b)) => Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal)),
            _ => Err(raise(
                "TypeError",
                format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    l.type_name(),
                    r.type_name()
                ),
            )),
        },
    }
}

fn compare_seq(
    interp: &mut Interpreter,
    a: &[Value],
    b: &[Value],
    depth: usize,
) -> EvalResult<Ordering> {
    if depth >= MAX_WALK_DEPTH {
        return Err(raise(
            "RecursionError",
            "maximum recursion depth exceeded in comparison",
        ));
    }
    for (x, y) in a.iter().zip(b) {
        interp.check_budget()?;
        if interp.equal(x, y)? {
            continue;
        }
        return order_at(interp, x, y, depth + 1);
    }
    Ok(a.len().cmp(&b.len()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Governor that never trips, for pure language tests.
    pub(crate) struct Unmetered;

    impl Governor for Unmetered {
        fn check(&mut self) -> Result<(), ResourceViolation> {
            Ok(())
        }

        fn reserve(&mut self, _bytes: u64) -> Result<(), ResourceViolation> {
            Ok(())
        }

        fn sleep(&mut self, _duration: Duration) -> Result<(), ResourceViolation> {
            Ok(())
        }
    }

    fn interpreter() -> Interpreter {
        let mut builtins = HashMap::new();
        for name in EXCEPTION_CLASSES {
            builtins.insert(name.to_string(), Value::Class(Rc::from(*name)));
        }
        builtins.insert(
            "len".to_string(),
            Value::native("len", |interp, args| {
                let items = interp.collect(&args.positional[0])?;
                Ok(Value::Int(items.len() as i64))
            }),
        );
        Interpreter::new(builtins, Box::new(Unmetered))
    }

    fn run(source: &str) -> Result<Interpreter, Unwind> {
        let mut interp = interpreter();
        let program = parse_program(source).unwrap();
        compile(&program).unwrap();
        interp.run_program(&program)?;
        Ok(interp)
    }

    fn global(interp: &Interpreter, name: &str) -> Value {
        interp.globals().borrow().get(name).cloned().unwrap()
    }

    #[test]
    fn test_arithmetic_follows_floor_semantics() {
        let interp = run("a = -7 // 2\nb = -7 % 3\nc = 7 / 2\nd = 2 ** 10\n").unwrap();
        assert_eq!(global(&interp, "a").repr(), "-4");
        assert_eq!(global(&interp, "b").repr(), "2");
        assert_eq!(global(&interp, "c").repr(), "3.5");
        assert_eq!(global(&interp, "d").repr(), "1024");
    }

    #[test]
    fn test_integer_overflow_is_a_guest_error() {
        match run("x = 2 ** 64\n") {
            Err(Unwind::Raise(exc)) => {
                assert_eq!(exc.kind, "OverflowError");
                assert_eq!(exc.line, Some(1));
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_functions_closures_and_defaults() {
        let interp = run(concat!(
            "def make(n, step=2):\n",
            "    def add(x):\n",
            "        return x + n * step\n",
            "    return add\n",
            "f = make(10)\n",
            "r = f(1)\n",
            "g = lambda a, b=3: a * b\n",
            "s = g(4)\n",
        ))
        .unwrap();
        assert_eq!(global(&interp, "r").repr(), "21");
        assert_eq!(global(&interp, "s").repr(), "12");
    }

    #[test]
    fn test_try_except_finally_and_hierarchy() {
        let interp = run(concat!(
            "log = []\n",
            "try:\n",
            "    1 / 0\n",
            "except ArithmeticError as e:\n",
            "    log = log + ['caught']\n",
            "finally:\n",
            "    log = log + ['finally']\n",
            "try:\n",
            "    {}['k']\n",
            "except LookupError:\n",
            "    log = log + ['key']\n",
        ))
        .unwrap();
        assert_eq!(global(&interp, "log").repr(), "['caught', 'finally', 'key']");
    }

    #[test]
    fn test_uncaught_exception_carries_innermost_line() {
        match run("def f():\n    return [][3]\nx = 1\nf()\n") {
            Err(Unwind::Raise(exc)) => {
                assert_eq!(exc.kind, "IndexError");
                assert_eq!(exc.line, Some(2));
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_recursion_is_bounded() {
        // the default test thread stack is too small for a full-depth guest recursion
        let kind = std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| match run("def f(n):\n    return f(n + 1)\nf(0)\n") {
                Err(Unwind::Raise(exc)) => exc.kind,
                _ => String::new(),
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(kind, "RecursionError");
    }

    #[test]
    fn test_loops_and_unpacking() {
        let interp = run(concat!(
            "total = 0\n",
            "for a, b in [(1, 2), (3, 4)]:\n",
            "    total += a * b\n",
            "n = 0\n",
            "while True:\n",
            "    n += 1\n",
            "    if n >= 5:\n",
            "        break\n",
            "s = 'hello'[1:4]\n",
            "r = [1, 2, 3, 4][::-1]\n",
        ))
        .unwrap();
        assert_eq!(global(&interp, "total").repr(), "14");
        assert_eq!(global(&interp, "n").repr(), "5");
        assert_eq!(global(&interp, "s").repr(), "'ell'");
        assert_eq!(global(&interp, "r").repr(), "[4, 3, 2, 1]");
    }

    #[test]
    fn test_global_declaration() {
        let interp = run("count = 0\ndef bump():\n    global count\n    count += 1\nbump()\nbump()\n")
            .unwrap();
        assert_eq!(global(&interp, "count").repr(), "2");
    }

    #[test]
    fn test_import_without_importer_fails_cleanly() {
        match run("import math\n") {
            Err(Unwind::Raise(exc)) => assert_eq!(exc.kind, "ImportError"),
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_bare_raise_reraises_current_exception() {
        match run("try:\n    raise ValueError('bad')\nexcept ValueError:\n    raise\n") {
            Err(Unwind::Raise(exc)) => {
                assert_eq!(exc.kind, "ValueError");
                assert_eq!(exc.message, "bad");
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_exception_matching() {
        assert!(exception_matches("KeyError", "Exception"));
        assert!(exception_matches("ZeroDivisionError", "ArithmeticError"));
        assert!(!exception_matches("ValueError", "LookupError"));
        assert!(is_reserved_name("__dict__"));
        assert!(!is_reserved_name("____"));
        assert!(!is_reserved_name("_private"));
    }
}
