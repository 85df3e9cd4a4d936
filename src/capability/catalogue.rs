//! The full, unfiltered builtin catalogue.
//!
//! Nothing here consults policy. [`crate::capability::builtins`] decides which
//! entries a run sees and which get wrapped. Guest I/O (`print`, `input`,
//! `exit`) lives on [`crate::capability::builtins::GuestIo`] instead.

use crate::capability::importer::{raw_import, ModuleRegistry};
use crate::lang::ast::BinOp;
use crate::lang::interp::{exception_matches, EXCEPTION_CLASSES};
use crate::lang::methods::{method_names, sort_values};
use crate::lang::value::{ensure_hashable, raise, Dict, RangeValue};
use crate::lang::{CallArgs, EvalResult, GuestObject, Interpreter, Unwind, Value};
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::rc::Rc;

type Native = fn(&mut Interpreter, CallArgs) -> EvalResult;

/// Natives that take no captured state.
const PLAIN: &[(&str, Native)] = &[
    ("abs", abs),
    ("all", all),
    ("any", any),
    ("bin", bin),
    ("bool", bool_),
    ("callable", callable),
    ("chr", chr),
    ("dict", dict),
    ("dir", dir),
    ("divmod", divmod),
    ("enumerate", enumerate),
    ("filter", filter),
    ("float", float),
    ("hash", hash),
    ("hex", hex),
    ("int", int),
    ("isinstance", isinstance),
    ("len", len),
    ("list", list),
    ("map", map),
    ("max", max),
    ("min", min),
    ("ord", ord),
    ("pow", pow),
    ("range", range),
    ("repr", repr),
    ("reversed", reversed),
    ("round", round),
    ("sorted", sorted),
    ("str", str_),
    ("sum", sum),
    ("tuple", tuple),
    ("type", type_),
    ("zip", zip),
    ("getattr", getattr),
    ("setattr", setattr),
    ("hasattr", hasattr),
    ("globals", globals),
    ("vars", vars),
    ("id", id),
    ("open", open),
    ("exec", exec),
    ("eval", eval),
];

/// Every builtin the language knows, unwrapped.
pub fn catalogue(registry: &Rc<ModuleRegistry>) -> HashMap<String, Value> {
    let mut map: HashMap<String, Value> = PLAIN
        .iter()
        .map(|(name, func)| (name.to_string(), Value::native(name, *func)))
        .collect();
    for class in EXCEPTION_CLASSES {
        map.insert(class.to_string(), Value::Class(Rc::from(*class)));
    }
    map.insert("__import__".to_string(), raw_import(registry.clone()));
    map
}

fn one_iterable(interp: &mut Interpreter, args: &CallArgs, name: &str) -> EvalResult<Vec<Value>> {
    args.check(name, 1, 1, &[])?;
    interp.collect(&args.positional[0])
}

fn abs(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("abs", 1, 1, &[])?;
    match &args.positional[0] {
        Value::Float(f) => Ok(Value::Float(f.abs())),
        v => match v.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| raise("OverflowError", "integer overflow")),
            None => Err(raise(
                "TypeError",
                format!("bad operand type for abs(): '{}'", v.type_name()),
            )),
        },
    }
}

fn all(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    Ok(Value::Bool(one_iterable(interp, &args, "all")?.iter().all(Value::truthy)))
}

fn any(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    Ok(Value::Bool(one_iterable(interp, &args, "any")?.iter().any(Value::truthy)))
}

fn radix(args: &CallArgs, name: &str, prefix: &str, format: fn(u64) -> String) -> EvalResult {
    args.check(name, 1, 1, &[])?;
    let n = args.int(0, name)?;
    let sign = if n < 0 { "-" } else { "" };
    Ok(Value::from(format!("{}{}{}", sign, prefix, format(n.unsigned_abs()))))
}

fn bin(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    radix(&args, "bin", "0b", |n| format!("{:b}", n))
}

fn hex(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    radix(&args, "hex", "0x", |n| format!("{:x}", n))
}

fn bool_(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("bool", 0, 1, &[])?;
    Ok(Value::Bool(args.get(0).map_or(false, Value::truthy)))
}

fn callable(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("callable", 1, 1, &[])?;
    Ok(Value::Bool(matches!(
        args.positional[0],
        Value::Function(_) | Value::Native(_) | Value::BoundMethod(_) | Value::Class(_)
    )))
}

fn chr(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("chr", 1, 1, &[])?;
    let code = args.int(0, "chr")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Value::from(c.to_string()))
        .ok_or_else(|| raise("ValueError", "chr() arg not in range(0x110000)"))
}

fn ord(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("ord", 1, 1, &[])?;
    let text = args.text(0, "ord")?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => Err(raise(
            "TypeError",
            format!(
                "ord() expected a character, but string of length {} found",
                text.chars().count()
            ),
        )),
    }
}

fn pair(interp: &mut Interpreter, item: &Value) -> EvalResult<(Value, Value)> {
    let parts = interp.collect(item)?;
    match <[Value; 2]>::try_from(parts) {
        Ok([k, v]) => Ok((k, v)),
        Err(parts) => Err(raise(
            "ValueError",
            format!(
                "dictionary update sequence element has length {}; 2 is required",
                parts.len()
            ),
        )),
    }
}

fn dict(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("dict", 0, 1, &[])?;
    let mut out = Dict::new();
    match args.get(0) {
        Some(Value::Dict(source)) => {
            for (k, v) in source.borrow().iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        Some(source) => {
            for item in interp.collect(source)? {
                let (k, v) = pair(interp, &item)?;
                ensure_hashable(&k)?;
                out.insert(k, v);
            }
        }
        None => {}
    }
    for (k, v) in args.keywords {
        out.insert(Value::from(k), v);
    }
    Ok(Value::dict(out))
}

fn dir(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("dir", 0, 1, &[])?;
    let mut names: Vec<String> = match args.get(0) {
        None => interp.globals().borrow().keys().cloned().collect(),
        Some(Value::Module(module)) => module.names(),
        Some(Value::Object(obj)) => obj.attr_names(),
        Some(other) => method_names(other).iter().map(|s| s.to_string()).collect(),
    };
    names.sort();
    Ok(Value::list(names.into_iter().map(Value::from).collect()))
}

fn divmod(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("divmod", 2, 2, &[])?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let q = interp.binary_op(BinOp::FloorDiv, a, b)?;
    let r = interp.binary_op(BinOp::Mod, a, b)?;
    Ok(Value::tuple(vec![q, r]))
}

fn enumerate(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("enumerate", 1, 2, &["start"])?;
    let start = match args.get(1).or_else(|| args.keyword("start")) {
        Some(v) => v
            .as_int()
            .ok_or_else(|| raise("TypeError", "enumerate() start must be an integer"))?,
        None => 0,
    };
    let items = interp.collect(&args.positional[0])?;
    interp.reserve_values(items.len() * 3)?;
    Ok(Value::list(
        items
            .into_iter()
            .enumerate()
            .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
            .collect(),
    ))
}

fn filter(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("filter", 2, 2, &[])?;
    let predicate = args.positional[0].clone();
    let mut out = Vec::new();
    for item in interp.collect(&args.positional[1])? {
        let keep = match &predicate {
            Value::None => item.truthy(),
            f => interp.call(f, CallArgs::new(vec![item.clone()]))?.truthy(),
        };
        if keep {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn float(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("float", 0, 1, &[])?;
    match args.get(0) {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(s)) => {
            let trimmed = s.trim();
            let lowered = trimmed.to_ascii_lowercase();
            let special = match lowered.trim_start_matches(['+', '-']) {
                "inf" | "infinity" | "nan" => true,
                _ => false,
            };
            let parsed = if special || trimmed.chars().all(|c| c.is_ascii_digit() || "+-.eE_".contains(c)) {
                lowered.replace('_', "").parse::<f64>().ok()
            } else {
                None
            };
            parsed.map(Value::Float).ok_or_else(|| {
                raise(
                    "ValueError",
                    format!("could not convert string to float: {}", Value::Str(s.clone()).repr()),
                )
            })
        }
        Some(v) => v.as_float().map(Value::Float).ok_or_else(|| {
            raise(
                "TypeError",
                format!("float() argument must be a string or a number, not '{}'", v.type_name()),
            )
        }),
    }
}

fn hash(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("hash", 1, 1, &[])?;
    let value = &args.positional[0];
    ensure_hashable(value)?;
    if let Some(i) = value.as_int() {
        return Ok(Value::Int(i));
    }
    let mut hasher = DefaultHasher::new();
    value.repr().hash(&mut hasher);
    Ok(Value::Int(hasher.finish() as i64))
}

fn int(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("int", 0, 2, &["base"])?;
    let base = match args.get(1).or_else(|| args.keyword("base")) {
        Some(v) => Some(v.as_int().ok_or_else(|| raise("TypeError", "int() base must be an integer"))?),
        None => None,
    };
    match (args.get(0), base) {
        (None, _) => Ok(Value::Int(0)),
        (Some(Value::Str(s)), base) => {
            let base = base.unwrap_or(10);
            if !(2..=36).contains(&base) {
                return Err(raise("ValueError", "int() base must be >= 2 and <= 36"));
            }
            let digits = s.trim().replace('_', "");
            i64::from_str_radix(&digits, base as u32)
                .map(Value::Int)
                .map_err(|_| {
                    raise(
                        "ValueError",
                        format!(
                            "invalid literal for int() with base {}: {}",
                            base,
                            Value::Str(s.clone()).repr()
                        ),
                    )
                })
        }
        (Some(_), Some(_)) => Err(raise("TypeError", "int() can't convert non-string with explicit base")),
        (Some(Value::Float(f)), None) => {
            if !f.is_finite() {
                return Err(raise("OverflowError", "cannot convert float infinity or NaN to integer"));
            }
            let t = f.trunc();
            if t < i64::MIN as f64 || t >= i64::MAX as f64 {
                return Err(raise("OverflowError", "integer overflow"));
            }
            Ok(Value::Int(t as i64))
        }
        (Some(v), None) => v.as_int().map(Value::Int).ok_or_else(|| {
            raise(
                "TypeError",
                format!(
                    "int() argument must be a string or a number, not '{}'",
                    v.type_name()
                ),
            )
        }),
    }
}

fn class_name(class: &Value) -> EvalResult<Vec<String>> {
    match class {
        Value::Class(name) => Ok(vec![name.to_string()]),
        Value::Native(native) => Ok(vec![native.name.clone()]),
        Value::Tuple(items) => {
            let mut names = Vec::new();
            for item in items.iter() {
                names.extend(class_name(item)?);
            }
            Ok(names)
        }
        _ => Err(raise(
            "TypeError",
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

fn isinstance(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("isinstance", 2, 2, &[])?;
    let value = &args.positional[0];
    let actual = value.type_name();
    let matched = class_name(&args.positional[1])?.iter().any(|name| {
        name == "object"
            || *name == actual
            || (name == "int" && matches!(value, Value::Bool(_)))
            || matches!(value, Value::Exception(exc) if exception_matches(&exc.kind, name))
    });
    Ok(Value::Bool(matched))
}

fn len(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("len", 1, 1, &[])?;
    let n = match &args.positional[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(dict) => dict.borrow().len(),
        Value::Range(r) => r.len(),
        other => {
            return Err(raise(
                "TypeError",
                format!("object of type '{}' has no len()", other.type_name()),
            ))
        }
    };
    Ok(Value::Int(n as i64))
}

fn list(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("list", 0, 1, &[])?;
    match args.get(0) {
        Some(v) => Ok(Value::list(interp.collect(v)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

fn tuple(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("tuple", 0, 1, &[])?;
    match args.get(0) {
        Some(Value::Tuple(items)) => Ok(Value::Tuple(items.clone())),
        Some(v) => Ok(Value::tuple(interp.collect(v)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}

fn map(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("map", 2, usize::MAX, &[])?;
    let func = args.positional[0].clone();
    let mut columns = Vec::new();
    for source in &args.positional[1..] {
        columns.push(interp.collect(source)?);
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let call = CallArgs::new(columns.iter().map(|c| c[i].clone()).collect());
        out.push(interp.call(&func, call)?);
    }
    Ok(Value::list(out))
}

fn extreme(interp: &mut Interpreter, args: CallArgs, name: &str, want: std::cmp::Ordering) -> EvalResult {
    args.check(name, 1, usize::MAX, &["key", "default"])?;
    let items = if args.len() == 1 {
        interp.collect(&args.positional[0])?
    } else {
        args.positional.clone()
    };
    let key = args.keyword("key").filter(|k| !matches!(k, Value::None)).cloned();
    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call(f, CallArgs::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) => {
                crate::lang::interp::compare_values(interp, &k, best_key)? == want
            }
        };
        if replace {
            best = Some((k, item));
        }
    }
    match (best, args.keyword("default")) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(raise("ValueError", format!("{}() arg is an empty sequence", name))),
    }
}

fn max(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    extreme(interp, args, "max", std::cmp::Ordering::Greater)
}

fn min(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    extreme(interp, args, "min", std::cmp::Ordering::Less)
}

fn pow(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("pow", 2, 3, &[])?;
    let (base, exp) = (&args.positional[0], &args.positional[1]);
    let Some(modulus) = args.get(2) else {
        return interp.binary_op(BinOp::Pow, base, exp);
    };
    let (Some(b), Some(e), Some(m)) = (base.as_int(), exp.as_int(), modulus.as_int()) else {
        return Err(raise("TypeError", "pow() 3rd argument not allowed unless all arguments are integers"));
    };
    if m == 0 {
        return Err(raise("ValueError", "pow() 3rd argument cannot be 0"));
    }
    if e < 0 {
        return Err(raise("ValueError", "pow() 2nd argument cannot be negative when 3rd argument specified"));
    }
    let m = m as i128;
    let (mut result, mut b, mut e) = (1i128, (b as i128).rem_euclid(m), e);
    while e > 0 {
        interp.check_budget()?;
        if e & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        e >>= 1;
    }
    Ok(Value::Int(result.rem_euclid(m) as i64))
}

fn range(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("range", 1, 3, &[])?;
    let (start, stop) = match args.len() {
        1 => (0, args.int(0, "range")?),
        _ => (args.int(0, "range")?, args.int(1, "range")?),
    };
    let step = if args.len() == 3 { args.int(2, "range")? } else { 1 };
    if step == 0 {
        return Err(raise("ValueError", "range() arg 3 must not be zero"));
    }
    Ok(Value::Range(RangeValue { start, stop, step }))
}

fn repr(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("repr", 1, 1, &[])?;
    Ok(Value::from(interp.repr(&args.positional[0])?))
}

fn str_(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("str", 0, 1, &[])?;
    match args.get(0) {
        Some(value) => Ok(Value::from(interp.text(value)?)),
        None => Ok(Value::from("")),
    }
}

fn reversed(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    let mut items = one_iterable(interp, &args, "reversed")?;
    items.reverse();
    Ok(Value::list(items))
}

/// Round half to even.
fn round_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

fn round(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("round", 1, 2, &["ndigits"])?;
    let ndigits = match args.get(1).or_else(|| args.keyword("ndigits")) {
        None | Some(Value::None) => None,
        Some(v) => Some(v.as_int().ok_or_else(|| raise("TypeError", "ndigits must be an integer"))?),
    };
    let value = &args.positional[0];
    if let (Some(i), false) = (value.as_int(), matches!(value, Value::Float(_))) {
        return Ok(Value::Int(i));
    }
    let x = value.as_float().ok_or_else(|| {
        raise(
            "TypeError",
            format!("type {} doesn't define __round__ method", value.type_name()),
        )
    })?;
    match ndigits {
        None => {
            if !x.is_finite() {
                return Err(raise("OverflowError", "cannot convert float infinity or NaN to integer"));
            }
            Ok(Value::Int(round_even(x) as i64))
        }
        Some(n) => {
            let scale = 10f64.powi(n.clamp(-308, 308) as i32);
            Ok(Value::Float(round_even(x * scale) / scale))
        }
    }
}

fn sorted(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("sorted", 1, 1, &["key", "reverse"])?;
    let items = interp.collect(&args.positional[0])?;
    let key = args.keyword("key").cloned();
    let reverse = args.keyword("reverse").map_or(false, Value::truthy);
    Ok(Value::list(sort_values(interp, items, key, reverse)?))
}

fn sum(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("sum", 1, 2, &["start"])?;
    let mut total = args
        .get(1)
        .or_else(|| args.keyword("start"))
        .cloned()
        .unwrap_or(Value::Int(0));
    if let Value::Str(_) = total {
        return Err(raise("TypeError", "sum() can't sum strings [use ''.join(seq) instead]"));
    }
    for item in interp.collect(&args.positional[0])? {
        interp.check_budget()?;
        total = interp.binary_op(BinOp::Add, &total, &item)?;
    }
    Ok(total)
}

fn type_(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("type", 1, 1, &[])?;
    Ok(Value::Class(Rc::from(args.positional[0].type_name().as_str())))
}

fn zip(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("zip", 0, usize::MAX, &[])?;
    let mut columns = Vec::new();
    for source in &args.positional {
        columns.push(interp.collect(source)?);
    }
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    interp.reserve_values(rows * (columns.len() + 1))?;
    Ok(Value::list(
        (0..rows)
            .map(|i| Value::tuple(columns.iter().map(|c| c[i].clone()).collect()))
            .collect(),
    ))
}

fn is_attribute_error(err: &Unwind) -> bool {
    matches!(err, Unwind::Raise(exc) if exc.kind == "AttributeError")
}

fn getattr(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("getattr", 2, 3, &[])?;
    let name = args.text(1, "getattr")?;
    match (interp.get_attr(&args.positional[0], &name), args.get(2)) {
        (Err(err), Some(default)) if is_attribute_error(&err) => Ok(default.clone()),
        (result, _) => result,
    }
}

fn setattr(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("setattr", 3, 3, &[])?;
    let name = args.text(1, "setattr")?;
    interp.set_attr(&args.positional[0], &name, args.positional[2].clone())?;
    Ok(Value::None)
}

fn hasattr(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("hasattr", 2, 2, &[])?;
    let name = args.text(1, "hasattr")?;
    match interp.get_attr(&args.positional[0], &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(err) if is_attribute_error(&err) => Ok(Value::Bool(false)),
        Err(err) => Err(err),
    }
}

fn namespace_dict(interp: &Interpreter) -> Value {
    let mut dict = Dict::new();
    let globals = interp.globals().borrow();
    let mut names: Vec<&String> = globals.keys().collect();
    names.sort();
    for name in names {
        dict.insert(Value::from(name.as_str()), globals[name].clone());
    }
    Value::dict(dict)
}

fn globals(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("globals", 0, 0, &[])?;
    Ok(namespace_dict(interp))
}

fn vars(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("vars", 0, 1, &[])?;
    match args.get(0) {
        None => Ok(namespace_dict(interp)),
        Some(obj) => interp.get_attr(obj, "__dict__").map_err(|err| {
            if is_attribute_error(&err) {
                raise("TypeError", "vars() argument must have __dict__ attribute")
            } else {
                err
            }
        }),
    }
}

fn id(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("id", 1, 1, &[])?;
    let address = match &args.positional[0] {
        Value::Str(s) => Rc::as_ptr(s) as *const u8 as usize,
        Value::List(v) => Rc::as_ptr(v) as usize,
        Value::Tuple(v) => Rc::as_ptr(v) as usize,
        Value::Dict(v) => Rc::as_ptr(v) as usize,
        Value::Function(v) => Rc::as_ptr(v) as usize,
        Value::Native(v) => Rc::as_ptr(v) as usize,
        Value::Module(v) => Rc::as_ptr(v) as usize,
        Value::Object(v) => Rc::as_ptr(v) as *const u8 as usize,
        Value::Exception(v) => Rc::as_ptr(v) as usize,
        other => {
            let mut hasher = DefaultHasher::new();
            other.repr().hash(&mut hasher);
            hasher.finish() as usize
        }
    };
    Ok(Value::Int(address as i64))
}

fn exec(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("exec", 1, 1, &[])?;
    let source = args.text(0, "exec")?;
    interp.exec_source(&source)?;
    Ok(Value::None)
}

fn eval(interp: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("eval", 1, 1, &[])?;
    let source = args.text(0, "eval")?;
    interp.eval_source(source.trim())
}

fn open(_: &mut Interpreter, args: CallArgs) -> EvalResult {
    args.check("open", 1, 2, &["mode"])?;
    let path = args.text(0, "open")?.to_string();
    let mode = match args.get(1).or_else(|| args.keyword("mode")) {
        Some(Value::Str(m)) => m.to_string(),
        Some(other) => {
            return Err(raise(
                "TypeError",
                format!("open() argument 'mode' must be str, not {}", other.type_name()),
            ))
        }
        None => "r".to_string(),
    };
    let os_error = |err: std::io::Error| raise("OSError", format!("{}: '{}'", err, path));
    let state = match mode.as_str() {
        "r" => FileState::Reading {
            text: std::fs::read_to_string(&path).map_err(os_error)?,
            pos: 0,
        },
        "w" | "a" => FileState::Writing(
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(mode == "w")
                .append(mode == "a")
                .open(&path)
                .map_err(os_error)?,
        ),
        other => return Err(raise("ValueError", format!("invalid mode: '{}'", other))),
    };
    Ok(Value::Object(Rc::new(GuestFile {
        path,
        mode,
        state: Rc::new(RefCell::new(state)),
    })))
}

enum FileState {
    Reading { text: String, pos: usize },
    Writing(std::fs::File),
    Closed,
}

/// Host file handle returned by `open`.
struct GuestFile {
    path: String,
    mode: String,
    state: Rc<RefCell<FileState>>,
}

const FILE_METHODS: &[&str] = &["close", "read", "readline", "readlines", "write"];

fn closed_file() -> Unwind {
    raise("ValueError", "I/O operation on closed file.")
}

fn file_method(state: &RefCell<FileState>, name: &str, args: &CallArgs) -> EvalResult {
    let mut state = state.borrow_mut();
    if name == "close" {
        args.check("close", 0, 0, &[])?;
        *state = FileState::Closed;
        return Ok(Value::None);
    }
    match (name, &mut *state) {
        (_, FileState::Closed) => Err(closed_file()),
        ("read", FileState::Reading { text, pos }) => {
            args.check("read", 0, 0, &[])?;
            let rest = text[*pos..].to_string();
            *pos = text.len();
            Ok(Value::from(rest))
        }
        ("readline", FileState::Reading { text, pos }) => {
            args.check("readline", 0, 0, &[])?;
            let rest = &text[*pos..];
            let end = rest.find('\n').map_or(rest.len(), |i| i + 1);
            let line = rest[..end].to_string();
            *pos += end;
            Ok(Value::from(line))
        }
        ("readlines", FileState::Reading { text, pos }) => {
            args.check("readlines", 0, 0, &[])?;
            let lines = text[*pos..].split_inclusive('\n').map(Value::from).collect();
            *pos = text.len();
            Ok(Value::list(lines))
        }
        ("write", FileState::Writing(file)) => {
            args.check("write", 1, 1, &[])?;
            let data = args.text(0, "write")?;
            file.write_all(data.as_bytes())
                .map_err(|e| raise("OSError", e.to_string()))?;
            Ok(Value::Int(data.chars().count() as i64))
        }
        (method, _) => Err(raise(
            "OSError",
            format!("file not open for {}", if method == "write" { "writing" } else { "reading" }),
        )),
    }
}

impl GuestObject for GuestFile {
    fn type_name(&self) -> &str {
        "file"
    }

    fn get_attr(&self, name: &str) -> EvalResult {
        match name {
            "name" => Ok(Value::from(self.path.as_str())),
            "mode" => Ok(Value::from(self.mode.as_str())),
            "closed" => Ok(Value::Bool(matches!(*self.state.borrow(), FileState::Closed))),
            method if FILE_METHODS.contains(&method) => {
                let state = self.state.clone();
                let method = method.to_string();
                Ok(Value::native(&format!("file.{}", method), move |_, args| {
                    file_method(&state, &method, &args)
                }))
            }
            _ => Err(raise(
                "AttributeError",
                format!("'file' object has no attribute '{}'", name),
            )),
        }
    }

    fn attr_names(&self) -> Vec<String> {
        ["closed", "mode", "name"]
            .iter()
            .chain(FILE_METHODS)
            .map(|s| s.to_string())
            .collect()
    }

    fn repr(&self) -> String {
        format!("<file name='{}' mode='{}'>", self.path, self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::interp::tests::Unmetered;

    fn run(source: &str) -> Value {
        let registry = ModuleRegistry::new(false);
        let mut interp = Interpreter::new(catalogue(&registry), Box::new(Unmetered));
        interp.eval_source(source).unwrap()
    }

    #[test]
    fn test_conversions() {
        assert_eq!(run("int('  42 ')").repr(), "42");
        assert_eq!(run("int('ff', 16)").repr(), "255");
        assert_eq!(run("int(-3.9)").repr(), "-3");
        assert_eq!(run("float('1e3')").repr(), "1000.0");
        assert_eq!(run("str(12) + repr(3)").repr(), "'123'");
        assert_eq!(run("bin(5)").repr(), "'0b101'");
        assert_eq!(run("hex(-255)").repr(), "'-0xff'");
    }

    #[test]
    fn test_rounding_is_half_even() {
        assert_eq!(run("round(2.5)").repr(), "2");
        assert_eq!(run("round(3.5)").repr(), "4");
        assert_eq!(run("round(1.25, 1)").repr(), "1.2");
        assert_eq!(run("round(7)").repr(), "7");
    }

    #[test]
    fn test_iterables() {
        assert_eq!(run("sorted([3, 1, 2], reverse=True)").repr(), "[3, 2, 1]");
        assert_eq!(run("list(zip([1, 2, 3], 'ab'))").repr(), "[(1, 'a'), (2, 'b')]");
        assert_eq!(run("max([4, 9, 2])").repr(), "9");
        assert_eq!(run("min('cab')").repr(), "'a'");
        assert_eq!(run("sum(range(5))").repr(), "10");
        assert_eq!(run("dict([('a', 1)], b=2)").repr(), "{'a': 1, 'b': 2}");
        assert_eq!(run("list(enumerate('xy', 1))").repr(), "[(1, 'x'), (2, 'y')]");
        assert_eq!(run("pow(3, 4, 5)").repr(), "1");
    }

    #[test]
    fn test_type_checks() {
        assert_eq!(run("isinstance(True, int)").repr(), "True");
        assert_eq!(run("isinstance('a', (int, str))").repr(), "True");
        assert_eq!(run("isinstance(ValueError('x'), Exception)").repr(), "True");
        assert_eq!(run("type(1.5) == float").repr(), "True");
        assert_eq!(run("type([]) is list").repr(), "True");
        assert_eq!(run("type(1.5) == type(2.5)").repr(), "True");
    }

    #[test]
    fn test_getattr_default_only_covers_missing() {
        assert_eq!(run("getattr('abc', 'nope', 5)").repr(), "5");
        assert_eq!(run("hasattr([], 'append')").repr(), "True");
    }

    #[test]
    fn test_open_reads_host_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "one\ntwo\n").unwrap();
        let out = run(&format!("open('{}').readlines()", path.display()));
        assert_eq!(out.repr(), "['one\\n', 'two\\n']");
    }
}
