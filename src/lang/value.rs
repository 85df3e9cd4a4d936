//! Runtime values of the guest dialect.
use super::ast::FunctionDef;
use super::interp::{Governor, Interpreter};
use crate::config::types::{
    CapabilityDenied, GuestException, ResourceKind, ResourceViolation,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Containers nested deeper than this are printed as `...` and refuse to
/// compare.
pub(crate) const MAX_WALK_DEPTH: usize = 64;

/// Values visited between governor polls during a walk.
const WALK_POLL_INTERVAL: usize = 1024;

/// Renderings shorter than this are not reserved for.
const RENDER_RESERVE_CHUNK: usize = 64 * 1024;

/// Walks that run without an interpreter stop after this many values...
const UNGOVERNED_WALK_VALUES: usize = 1 << 20;

/// ...or once a rendering reaches this length.
const UNGOVERNED_RENDER_BYTES: usize = 1 << 20;

/// A name table shared between a function and the frames that close over it.
pub type Namespace = Rc<RefCell<HashMap<String, Value>>>;

pub fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(HashMap::new()))
}

/// Non-local exits from guest evaluation.
///
/// Only `Raise` is visible to guest `try`/`except`; the other variants always
/// unwind to the executor.
#[derive(Clone, Debug, PartialEq)]
pub enum Unwind {
    Raise(GuestException),
    Exit(i32),
    Denied(CapabilityDenied),
    Exceeded(ResourceViolation),
}

impl From<CapabilityDenied> for Unwind {
    fn from(denied: CapabilityDenied) -> Self {
        Unwind::Denied(denied)
    }
}

impl From<ResourceViolation> for Unwind {
    fn from(violation: ResourceViolation) -> Self {
        Unwind::Exceeded(violation)
    }
}

/// Shorthand for a guest-visible exception.
pub fn raise(kind: &str, message: impl Into<String>) -> Unwind {
    Unwind::Raise(GuestException::new(kind, message))
}

pub type EvalResult<T = Value> = Result<T, Unwind>;

pub type NativeFn = dyn Fn(&mut Interpreter, CallArgs) -> EvalResult;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Range(RangeValue),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    BoundMethod(Rc<BoundMethod>),
    /// A builtin type or exception class, identified by name.
    Class(Rc<str>),
    Module(Rc<Module>),
    Object(Rc<dyn GuestObject>),
    Exception(Rc<GuestException>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn native<F>(name: &str, func: F) -> Value
    where
        F: Fn(&mut Interpreter, CallArgs) -> EvalResult + 'static,
    {
        Value::Native(Rc::new(NativeFunction {
            name: name.to_string(),
            func: Rc::new(func),
        }))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Range(_) => "range".into(),
            Value::Function(_) => "function".into(),
            Value::Native(_) => "builtin_function_or_method".into(),
            Value::BoundMethod(_) => "method".into(),
            Value::Class(_) => "type".into(),
            Value::Module(_) => "module".into(),
            Value::Object(obj) => obj.type_name().to_string(),
            Value::Exception(exc) => exc.kind.clone(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(d) => d.borrow().len() > 0,
            Value::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// `str(value)`
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)` for diagnostics and host-side text, cut off with `...`
    /// past a fixed size.
    pub fn repr(&self) -> String {
        let mut limit = WalkLimit::default();
        let mut out = String::new();
        if self.write_repr(&mut out, &mut Walk::new(&mut limit)).is_err() {
            out.push_str("...");
        }
        out
    }

    /// `str(value)` charged to `governor`.
    pub fn to_text_in(&self, governor: &mut dyn Governor) -> EvalResult<String> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            Value::Exception(exc) => Ok(exc.message.clone()),
            other => other.repr_in(governor),
        }
    }

    /// `repr(value)` charged to `governor`: the walk polls it and reserves
    /// memory ahead of the growing text.
    pub fn repr_in(&self, governor: &mut dyn Governor) -> EvalResult<String> {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Walk::new(governor))?;
        Ok(out)
    }

    fn write_repr(&self, out: &mut String, walk: &mut Walk) -> EvalResult<()> {
        use fmt::Write;
        walk.visit()?;
        walk.grow(out.len())?;
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(items) => {
                if !walk.enter(address(items)) {
                    out.push_str("[...]");
                    return Ok(());
                }
                out.push('[');
                write_items(out, &items.borrow(), walk)?;
                out.push(']');
                walk.leave();
            }
            Value::Tuple(items) => {
                if !walk.enter(address(items)) {
                    out.push_str("(...)");
                    return Ok(());
                }
                out.push('(');
                write_items(out, items, walk)?;
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
                walk.leave();
            }
            Value::Dict(dict) => {
                if !walk.enter(address(dict)) {
                    out.push_str("{...}");
                    return Ok(());
                }
                out.push('{');
                for (i, (k, v)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.write_repr(out, walk)?;
                    out.push_str(": ");
                    v.write_repr(out, walk)?;
                }
                out.push('}');
                walk.leave();
            }
            Value::Range(r) => {
                if r.step == 1 {
                    let _ = write!(out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Value::Function(func) => {
                let _ = write!(out, "<function {}>", func.def.name);
            }
            Value::Native(native) => {
                let _ = write!(out, "<built-in function {}>", native.name);
            }
            Value::BoundMethod(method) => {
                let _ = write!(
                    out,
                    "<built-in method {} of {} object>",
                    method.name,
                    method.receiver.type_name()
                );
            }
            Value::Class(name) => {
                let _ = write!(out, "<class '{}'>", name);
            }
            Value::Module(module) => {
                let _ = write!(out, "<module '{}'>", module.name());
            }
            Value::Object(obj) => out.push_str(&obj.repr()),
            Value::Exception(exc) => {
                let _ = write!(out, "{}({})", exc.kind, quote_str(&exc.message));
            }
        }
        Ok(())
    }
}

fn write_items(out: &mut String, items: &[Value], walk: &mut Walk) -> EvalResult<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, walk)?;
    }
    Ok(())
}

fn address<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as *const () as usize
}

/// State of one walk over a value graph that may share or revisit
/// containers.
struct Walk<'g> {
    governor: &'g mut dyn Governor,
    visited: usize,
    reserved: usize,
    /// Containers between the root and the current value.
    active: Vec<usize>,
}

impl<'g> Walk<'g> {
    fn new(governor: &'g mut dyn Governor) -> Self {
        Self {
            governor,
            visited: 0,
            reserved: RENDER_RESERVE_CHUNK,
            active: Vec::new(),
        }
    }

    fn visit(&mut self) -> EvalResult<()> {
        self.visited += 1;
        if self.visited % WALK_POLL_INTERVAL == 0 {
            self.governor.check()?;
        }
        Ok(())
    }

    /// Keep the reservation ahead of a text that has reached `len` bytes,
    /// with room for the next reallocation.
    fn grow(&mut self, len: usize) -> EvalResult<()> {
        if len >= self.reserved {
            let ahead = len.max(RENDER_RESERVE_CHUNK);
            self.governor.reserve(ahead as u64)?;
            self.reserved = len + ahead;
        }
        Ok(())
    }

    /// False when the container is already being walked or the walk is too
    /// deep; the caller then writes a placeholder.
    fn enter(&mut self, container: usize) -> bool {
        if self.active.len() >= MAX_WALK_DEPTH || self.active.contains(&container) {
            return false;
        }
        self.active.push(container);
        true
    }

    fn leave(&mut self) {
        self.active.pop();
    }
}

/// Fixed allowance for walks made outside the interpreter.
struct WalkLimit {
    polls_left: usize,
}

impl Default for WalkLimit {
    fn default() -> Self {
        Self {
            polls_left: UNGOVERNED_WALK_VALUES / WALK_POLL_INTERVAL,
        }
    }
}

impl WalkLimit {
    fn exhausted() -> ResourceViolation {
        ResourceViolation::new(ResourceKind::Memory, "value too large to walk")
    }
}

impl Governor for WalkLimit {
    fn check(&mut self) -> Result<(), ResourceViolation> {
        match self.polls_left.checked_sub(1) {
            Some(left) => {
                self.polls_left = left;
                Ok(())
            }
            None => Err(Self::exhausted()),
        }
    }

    fn reserve(&mut self, bytes: u64) -> Result<(), ResourceViolation> {
        if bytes > UNGOVERNED_RENDER_BYTES as u64 {
            return Err(Self::exhausted());
        }
        Ok(())
    }

    fn sleep(&mut self, _duration: Duration) -> Result<(), ResourceViolation> {
        Ok(())
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{:e}", f);
        return match text.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(d) => ('-', d),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => text,
        };
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Structural equality (`==`) outside the interpreter, as used for dict
/// keys. A comparison too large to finish counts as unequal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    let mut limit = WalkLimit::default();
    equal_in(a, b, &mut limit).unwrap_or(false)
}

/// Structural equality (`==`) charged to `governor`.
///
/// Container pairs already found equal are not compared again, so shared
/// structure costs one walk per distinct pair. A pair met again while it is
/// still being compared is taken as equal.
pub fn equal_in(a: &Value, b: &Value, governor: &mut dyn Governor) -> EvalResult<bool> {
    Equality {
        walk: Walk::new(governor),
        settled: HashSet::new(),
        pending: Vec::new(),
    }
    .equal(a, b)
}

struct Equality<'g> {
    walk: Walk<'g>,
    settled: HashSet<(usize, usize)>,
    pending: Vec<(usize, usize)>,
}

impl Equality<'_> {
    fn equal(&mut self, a: &Value, b: &Value) -> EvalResult<bool> {
        self.walk.visit()?;
        match (a, b) {
            (Value::None, Value::None) => Ok(true),
            (Value::Str(x), Value::Str(y)) => Ok(x == y),
            (Value::Int(x), Value::Int(y)) => Ok(x == y),
            (Value::Bool(x), Value::Bool(y)) => Ok(x == y),
            (
                Value::Float(_) | Value::Int(_) | Value::Bool(_),
                Value::Float(_) | Value::Int(_) | Value::Bool(_),
            ) => Ok(match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            }),
            (Value::List(x), Value::List(y)) => {
                let pair = (address(x), address(y));
                if self.known(pair)? {
                    return Ok(true);
                }
                let equal = self.seq(&x.borrow(), &y.borrow());
                self.settle(pair, equal)
            }
            (Value::Tuple(x), Value::Tuple(y)) => {
                let pair = (address(x), address(y));
                if self.known(pair)? {
                    return Ok(true);
                }
                let equal = self.seq(x, y);
                self.settle(pair, equal)
            }
            (Value::Dict(x), Value::Dict(y)) => {
                let pair = (address(x), address(y));
                if self.known(pair)? {
                    return Ok(true);
                }
                let equal = self.dict(&x.borrow(), &y.borrow());
                self.settle(pair, equal)
            }
            (Value::Range(x), Value::Range(y)) => Ok(x == y),
            _ => Ok(identical(a, b)),
        }
    }

    /// True when the pair needs no walk; otherwise marks it pending.
    fn known(&mut self, pair: (usize, usize)) -> EvalResult<bool> {
        if pair.0 == pair.1 || self.settled.contains(&pair) || self.pending.contains(&pair) {
            return Ok(true);
        }
        if self.pending.len() >= MAX_WALK_DEPTH {
            return Err(raise(
                "RecursionError",
                "maximum recursion depth exceeded in comparison",
            ));
        }
        self.pending.push(pair);
        Ok(false)
    }

    fn settle(&mut self, pair: (usize, usize), equal: EvalResult<bool>) -> EvalResult<bool> {
        self.pending.pop();
        let equal = equal?;
        if equal {
            self.settled.insert(pair);
        }
        Ok(equal)
    }

    fn seq(&mut self, x: &[Value], y: &[Value]) -> EvalResult<bool> {
        if x.len() != y.len() {
            return Ok(false);
        }
        for (a, b) in x.iter().zip(y) {
            if !self.equal(a, b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn dict(&mut self, x: &Dict, y: &Dict) -> EvalResult<bool> {
        if x.len() != y.len() {
            return Ok(false);
        }
        for (k, v) in x.iter() {
            let equal = match y.get(k) {
                Some(other) => self.equal(v, other)?,
                None => false,
            };
            if !equal {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Identity (`is`).
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => x == y,
        // `type(1) is int`: constructors stand in for their class
        (Value::Class(class), Value::Native(ctor)) | (Value::Native(ctor), Value::Class(class)) => {
            **class == *ctor.name
        }
        (Value::Module(x), Value::Module(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => {
            std::ptr::eq(Rc::as_ptr(x) as *const u8, Rc::as_ptr(y) as *const u8)
        }
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Keys must be immutable to live in a dict.
pub fn ensure_hashable(key: &Value) -> EvalResult<()> {
    hashable_at(key, &mut HashSet::new())
}

fn hashable_at(key: &Value, checked: &mut HashSet<usize>) -> EvalResult<()> {
    match key {
        Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => Ok(()),
        Value::Tuple(items) => {
            if !checked.insert(address(items)) {
                return Ok(());
            }
            items.iter().try_for_each(|item| hashable_at(item, checked))
        }
        Value::Class(_) | Value::Function(_) | Value::Native(_) | Value::Module(_) => Ok(()),
        other => Err(raise(
            "TypeError",
            format!("unhashable type: '{}'", other.type_name()),
        )),
    }
}

/// Insertion-ordered mapping with structural key comparison.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| values_equal(k, key))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Lazy integer range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let span = if step > 0 {
            (stop - start + step - 1) / step
        } else {
            (start - stop - step - 1) / -step
        };
        span.max(0).min(usize::MAX as i128) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nth(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some(self.start + self.step * index as i64)
    }
}

/// A guest `def` or `lambda` bound to its defining environment.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Value>,
    pub globals: Namespace,
    pub closure: Option<Rc<Scope>>,
}

/// One function activation's locals, chained to the enclosing activation.
pub struct Scope {
    pub vars: RefCell<HashMap<String, Value>>,
    pub globals_declared: RefCell<Vec<String>>,
    pub parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            globals_declared: RefCell::new(Vec::new()),
            parent,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals_declared.borrow().iter().any(|n| n == name)
    }
}

pub struct NativeFunction {
    pub name: String,
    pub func: Rc<NativeFn>,
}

/// `receiver.name` for a builtin method on str, list or dict.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

/// A raw (unproxied) module object.
pub struct Module {
    name: String,
    doc: String,
    attrs: RefCell<BTreeMap<String, Value>>,
}

impl Module {
    pub fn new(name: &str, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: doc.to_string(),
            attrs: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.attrs.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.attrs.borrow_mut().remove(name)
    }

    pub fn add_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&mut Interpreter, CallArgs) -> EvalResult + 'static,
    {
        let qualified = format!("{}.{}", self.name, name);
        self.set(name, Value::native(&qualified, func));
    }

    pub fn names(&self) -> Vec<String> {
        self.attrs.borrow().keys().cloned().collect()
    }

    /// Reserved attributes every module answers. `__dict__` is the full,
    /// unfiltered attribute table.
    pub fn reserved_attr(&self, name: &str) -> Option<Value> {
        match name {
            "__name__" => Some(Value::from(self.name.as_str())),
            "__doc__" => Some(Value::from(self.doc.as_str())),
            "__class__" => Some(Value::Class(Rc::from("module"))),
            "__dict__" => {
                let mut dict = Dict::new();
                for (k, v) in self.attrs.borrow().iter() {
                    dict.insert(Value::from(k.as_str()), v.clone());
                }
                Some(Value::dict(dict))
            }
            _ => None,
        }
    }
}

/// Host object reachable from guest code through a narrow attribute/call
/// interface.
pub trait GuestObject {
    fn type_name(&self) -> &str;

    fn get_attr(&self, name: &str) -> EvalResult;

    fn set_attr(&self, name: &str, _value: Value) -> EvalResult<()> {
        Err(raise(
            "AttributeError",
            format!("'{}' object attribute '{}' is read-only", self.type_name(), name),
        ))
    }

    fn call(&self, _interp: &mut Interpreter, _args: CallArgs) -> EvalResult {
        Err(raise(
            "TypeError",
            format!("'{}' object is not callable", self.type_name()),
        ))
    }

    fn attr_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }
}

/// Arguments of a call, positional first.
#[derive(Clone, Debug, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Arity check for natives; rejects keywords not listed in `allowed`.
    pub fn check(&self, name: &str, min: usize, max: usize, allowed: &[&str]) -> EvalResult<()> {
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("exactly {}", min)
            } else if n < min {
                format!("at least {}", min)
            } else {
                format!("at most {}", max)
            };
            return Err(raise(
                "TypeError",
                format!(
                    "{}() takes {} argument{} ({} given)",
                    name,
                    expected,
                    if min == max && min == 1 { "" } else { "s" },
                    n
                ),
            ));
        }
        if let Some((kw, _)) = self.keywords.iter().find(|(k, _)| !allowed.contains(&k.as_str())) {
            return Err(raise(
                "TypeError",
                format!("{}() got an unexpected keyword argument '{}'", name, kw),
            ));
        }
        Ok(())
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn int(&self, index: usize, fname: &str) -> EvalResult<i64> {
        match self.positional.get(index) {
            Some(v) => v.as_int().ok_or_else(|| {
                raise(
                    "TypeError",
                    format!(
                        "{}() argument {} must be int, not {}",
                        fname,
                        index + 1,
                        v.type_name()
                    ),
                )
            }),
            None => Err(raise("TypeError", format!("{}() missing argument", fname))),
        }
    }

    pub fn float(&self, index: usize, fname: &str) -> EvalResult<f64> {
        match self.positional.get(index) {
            Some(v) => v.as_float().ok_or_else(|| {
                raise(
                    "TypeError",
                    format!("{}() argument must be a number, not {}", fname, v.type_name()),
                )
            }),
            None => Err(raise("TypeError", format!("{}() missing argument", fname))),
        }
    }

    pub fn text(&self, index: usize, fname: &str) -> EvalResult<Rc<str>> {
        match self.positional.get(index) {
            Some(Value::Str(s)) => Ok(s.clone()),
            Some(v) => Err(raise(
                "TypeError",
                format!("{}() argument must be str, not {}", fname, v.type_name()),
            )),
            None => Err(raise("TypeError", format!("{}() missing argument", fname))),
        }
    }
}

/// Copy containers recursively; immutable values are shared.
/// Copy of every reachable list, tuple and dict. Containers reached twice
/// are copied once, so sharing and cycles carry over to the copy.
pub fn deep_copy(value: &Value) -> Value {
    copy_at(value, &mut HashMap::new())
}

fn copy_at(value: &Value, copies: &mut HashMap<usize, Value>) -> Value {
    let key = match value {
        Value::List(items) => address(items),
        Value::Tuple(items) => address(items),
        Value::Dict(dict) => address(dict),
        other => return other.clone(),
    };
    if let Some(copy) = copies.get(&key) {
        return copy.clone();
    }
    match value {
        Value::List(items) => {
            let copy = Rc::new(RefCell::new(Vec::new()));
            copies.insert(key, Value::List(copy.clone()));
            let filled = items.borrow().iter().map(|v| copy_at(v, copies)).collect();
            *copy.borrow_mut() = filled;
            Value::List(copy)
        }
        Value::Dict(dict) => {
            let copy = Rc::new(RefCell::new(Dict::new()));
            copies.insert(key, Value::Dict(copy.clone()));
            let entries: Vec<(Value, Value)> = dict.borrow().iter().cloned().collect();
            for (k, v) in entries {
                let v = copy_at(&v, copies);
                copy.borrow_mut().insert(k, v);
            }
            Value::Dict(copy)
        }
        Value::Tuple(items) => {
            // a tuple only closes a cycle through a list or dict, which is
            // already registered
            let copy = Value::tuple(items.iter().map(|v| copy_at(v, copies)).collect());
            copies.insert(key, copy.clone());
            copy
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_repr_matches_guest_conventions() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_string_repr_quoting() {
        assert_eq!(quote_str("abc"), "'abc'");
        assert_eq!(quote_str("it's"), "\"it's\"");
        assert_eq!(quote_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_container_repr_and_equality() {
        let list = Value::list(vec![Value::Int(1), Value::from("x"), Value::None]);
        assert_eq!(list.repr(), "[1, 'x', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!values_equal(&Value::from("1"), &Value::Int(1)));
    }

    /// `x = [0]` doubled `times` times: `x = [x, x]`.
    fn doubled(times: usize) -> Value {
        let mut x = Value::list(vec![Value::Int(0)]);
        for _ in 0..times {
            x = Value::list(vec![x.clone(), x]);
        }
        x
    }

    fn self_referencing(count: usize) -> Value {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            for _ in 0..count {
                items.borrow_mut().push(list.clone());
            }
        }
        list
    }

    fn break_cycle(list: &Value) {
        if let Value::List(items) = list {
            items.borrow_mut().clear();
        }
    }

    /// Refuses any reservation past `limit` bytes.
    struct Capped {
        limit: u64,
        polls: usize,
    }

    impl Governor for Capped {
        fn check(&mut self) -> Result<(), ResourceViolation> {
            self.polls += 1;
            Ok(())
        }

        fn reserve(&mut self, bytes: u64) -> Result<(), ResourceViolation> {
            if bytes > self.limit {
                return Err(ResourceViolation::new(ResourceKind::Memory, "capped"));
            }
            Ok(())
        }

        fn sleep(&mut self, _duration: Duration) -> Result<(), ResourceViolation> {
            Ok(())
        }
    }

    #[test]
    fn test_self_referencing_list_repr_marks_the_cycle() {
        let list = self_referencing(2);
        assert_eq!(list.repr(), "[[...], [...]]");
        break_cycle(&list);
    }

    #[test]
    fn test_cyclic_dict_repr() {
        let dict = Value::dict(Dict::new());
        if let Value::Dict(d) = &dict {
            d.borrow_mut().insert(Value::from("me"), dict.clone());
        }
        assert_eq!(dict.repr(), "{'me': {...}}");
        if let Value::Dict(d) = &dict {
            d.borrow_mut().clear();
        }
    }

    #[test]
    fn test_shared_structure_repr_is_cut_off() {
        let text = doubled(40).repr();
        assert!(text.ends_with("..."));
        assert!(text.len() <= 2 * UNGOVERNED_RENDER_BYTES, "{}", text.len());
    }

    #[test]
    fn test_governed_repr_stops_at_the_reservation() {
        let mut governor = Capped {
            limit: 1 << 20,
            polls: 0,
        };
        match doubled(40).repr_in(&mut governor) {
            Err(Unwind::Exceeded(violation)) => assert_eq!(violation.kind, ResourceKind::Memory),
            other => panic!("expected a memory violation, got {:?}", other.map(|s| s.len())),
        }
        assert!(governor.polls > 0);
    }

    #[test]
    fn test_governed_repr_of_small_values_is_exact() {
        let mut governor = Capped { limit: 1 << 20, polls: 0 };
        assert_eq!(doubled(2).repr_in(&mut governor).unwrap(), "[[[0], [0]], [[0], [0]]]");
        assert_eq!(Value::from("s").to_text_in(&mut governor).unwrap(), "s");
    }

    #[test]
    fn test_independently_built_shared_structures_compare() {
        assert!(values_equal(&doubled(40), &doubled(40)));
        assert!(!values_equal(&doubled(40), &doubled(39)));

        let mut governor = Capped { limit: 0, polls: 0 };
        assert_eq!(equal_in(&doubled(40), &doubled(40), &mut governor), Ok(true));
    }

    #[test]
    fn test_long_comparison_polls_the_governor() {
        let long = || Value::list((0..100_000).map(Value::Int).collect());
        let mut governor = Capped { limit: 0, polls: 0 };
        assert_eq!(equal_in(&long(), &long(), &mut governor), Ok(true));
        assert!(governor.polls >= 100_000 / WALK_POLL_INTERVAL);
    }

    #[test]
    fn test_cyclic_lists_compare_without_recursing_forever() {
        let (a, b) = (self_referencing(1), self_referencing(1));
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &self_referencing(2)));
        break_cycle(&a);
        break_cycle(&b);
    }

    #[test]
    fn test_deep_nesting_refuses_to_compare() {
        let nest = |depth: usize| {
            let mut x = Value::Int(0);
            for _ in 0..depth {
                x = Value::list(vec![x]);
            }
            x
        };
        let mut governor = Capped { limit: 0, polls: 0 };
        match equal_in(&nest(200), &nest(200), &mut governor) {
            Err(Unwind::Raise(exc)) => assert_eq!(exc.kind, "RecursionError"),
            other => panic!("expected RecursionError, got {:?}", other),
        }
        assert!(!values_equal(&nest(200), &nest(200)));
    }

    #[test]
    fn test_deep_copy_keeps_sharing_and_cycles() {
        let shared = doubled(40);
        let copy = deep_copy(&shared);
        match (&shared, &copy) {
            (Value::List(x), Value::List(y)) => assert!(!Rc::ptr_eq(x, y)),
            _ => panic!("expected lists"),
        }
        if let Value::List(items) = &copy {
            let items = items.borrow();
            assert!(identical(&items[0], &items[1]));
        }

        let cyclic = self_referencing(1);
        let copy = deep_copy(&cyclic);
        assert_eq!(copy.repr(), "[[...]]");
        if let Value::List(items) = &copy {
            assert!(identical(&items.borrow()[0], &copy));
        }
        break_cycle(&cyclic);
        break_cycle(&copy);
    }

    #[test]
    fn test_shared_tuple_keys_are_hashable() {
        let mut key = Value::tuple(vec![Value::Int(0)]);
        for _ in 0..40 {
            key = Value::tuple(vec![key.clone(), key]);
        }
        assert!(ensure_hashable(&key).is_ok());
        let unhashable = Value::tuple(vec![key, Value::list(vec![])]);
        assert!(ensure_hashable(&unhashable).is_err());
    }

    #[test]
    fn test_dict_preserves_insertion_order() {
        let mut dict = Dict::new();
        dict.insert(Value::from("b"), Value::Int(1));
        dict.insert(Value::from("a"), Value::Int(2));
        dict.insert(Value::from("b"), Value::Int(3));
        assert_eq!(Value::dict(dict).repr(), "{'b': 3, 'a': 2}");
    }

    #[test]
    fn test_range_length() {
        let r = RangeValue { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.nth(3), Some(9));
        let r = RangeValue { start: 5, stop: 0, step: -2 };
        assert_eq!(r.len(), 3);
        let r = RangeValue { start: 5, stop: 0, step: 1 };
        assert!(r.is_empty());
    }

    #[test]
    fn test_module_dict_is_unfiltered() {
        let module = Module::new("demo", "");
        module.set("secret", Value::Int(1));
        match module.reserved_attr("__dict__") {
            Some(Value::Dict(d)) => assert_eq!(d.borrow().len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
