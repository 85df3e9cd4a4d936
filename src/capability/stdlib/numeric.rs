//! Small numeric-array toolkit. Arrays are plain guest lists.
//!
//! `save`/`load` and `tofile`/`fromfile` touch the host filesystem; the
//! import registry strips them in hardened mode.

use crate::lang::value::{format_float, raise};
use crate::lang::{CallArgs, EvalResult, Interpreter, Module, Unwind, Value};
use serde_json::Value as Json;

/// Attributes that read or write files.
pub const FILE_FUNCTIONS: &[&str] = &["save", "load", "tofile", "fromfile"];

fn os_error(err: impl std::fmt::Display, path: &str) -> Unwind {
    raise("OSError", format!("{}: '{}'", err, path))
}

fn numbers(interp: &mut Interpreter, value: &Value, fname: &str) -> EvalResult<Vec<f64>> {
    let items = interp.collect(value)?;
    items
        .iter()
        .map(|v| {
            v.as_float().ok_or_else(|| {
                raise(
                    "TypeError",
                    format!("{}() expects numbers, got {}", fname, v.type_name()),
                )
            })
        })
        .collect()
}

fn filled(interp: &mut Interpreter, args: &CallArgs, fname: &str, fill: f64) -> EvalResult {
    args.check(fname, 1, 1, &[])?;
    let n = args.int(0, fname)?;
    if n < 0 {
        return Err(raise("ValueError", "negative dimensions are not allowed"));
    }
    interp.reserve_values(n as usize)?;
    Ok(Value::list(vec![Value::Float(fill); n as usize]))
}

fn number_value(f: f64) -> Value {
    Value::Float(f)
}

pub fn module() -> Module {
    let m = Module::new("numeric", "Numeric helpers over lists of numbers.");

    m.add_function("zeros", |interp, args| filled(interp, &args, "zeros", 0.0));
    m.add_function("ones", |interp, args| filled(interp, &args, "ones", 1.0));
    m.add_function("array", |interp, args| {
        args.check("array", 1, 1, &[])?;
        let items = numbers(interp, &args.positional[0], "array")?;
        interp.reserve_values(items.len())?;
        Ok(Value::list(items.into_iter().map(number_value).collect()))
    });
    m.add_function("arange", |interp, args| {
        args.check("arange", 1, 3, &[])?;
        let all_ints = args.positional.iter().all(|v| matches!(v, Value::Int(_)));
        let (start, stop) = match args.len() {
            1 => (0.0, args.float(0, "arange")?),
            _ => (args.float(0, "arange")?, args.float(1, "arange")?),
        };
        let step = if args.len() == 3 { args.float(2, "arange")? } else { 1.0 };
        if step == 0.0 || !step.is_finite() {
            return Err(raise("ValueError", "arange() step must be a non-zero number"));
        }
        let count = ((stop - start) / step).ceil().max(0.0);
        if !count.is_finite() {
            return Err(raise("ValueError", "arange() range is unbounded"));
        }
        let count = count as usize;
        interp.reserve_values(count)?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            interp.check_budget()?;
            let x = start + step * i as f64;
            out.push(if all_ints { Value::Int(x as i64) } else { Value::Float(x) });
        }
        Ok(Value::list(out))
    });
    m.add_function("sum", |interp, args| {
        args.check("sum", 1, 1, &[])?;
        Ok(Value::Float(numbers(interp, &args.positional[0], "sum")?.iter().sum()))
    });
    m.add_function("mean", |interp, args| {
        args.check("mean", 1, 1, &[])?;
        let xs = numbers(interp, &args.positional[0], "mean")?;
        if xs.is_empty() {
            return Err(raise("ValueError", "mean of empty array"));
        }
        Ok(Value::Float(xs.iter().sum::<f64>() / xs.len() as f64))
    });
    m.add_function("dot", |interp, args| {
        args.check("dot", 2, 2, &[])?;
        let a = numbers(interp, &args.positional[0], "dot")?;
        let b = numbers(interp, &args.positional[1], "dot")?;
        if a.len() != b.len() {
            return Err(raise(
                "ValueError",
                format!("shapes ({},) and ({},) not aligned", a.len(), b.len()),
            ));
        }
        Ok(Value::Float(a.iter().zip(&b).map(|(x, y)| x * y).sum()))
    });

    m.add_function("save", |interp, args| {
        args.check("save", 2, 2, &[])?;
        let path = args.text(0, "save")?;
        let xs = numbers(interp, &args.positional[1], "save")?;
        let doc = serde_json::to_string(&xs).map_err(|e| os_error(e, &path))?;
        std::fs::write(&*path, doc).map_err(|e| os_error(e, &path))?;
        Ok(Value::None)
    });
    m.add_function("load", |interp, args| {
        args.check("load", 1, 1, &[])?;
        let path = args.text(0, "load")?;
        let text = std::fs::read_to_string(&*path).map_err(|e| os_error(e, &path))?;
        let doc: Json = serde_json::from_str(&text).map_err(|e| os_error(e, &path))?;
        let items = doc
            .as_array()
            .ok_or_else(|| raise("ValueError", "saved array is not a list"))?;
        interp.reserve_values(items.len())?;
        Ok(Value::list(
            items
                .iter()
                .map(|x| number_value(x.as_f64().unwrap_or(f64::NAN)))
                .collect(),
        ))
    });
    m.add_function("tofile", |interp, args| {
        args.check("tofile", 2, 2, &[])?;
        let xs = numbers(interp, &args.positional[0], "tofile")?;
        let path = args.text(1, "tofile")?;
        let text: Vec<String> = xs.into_iter().map(format_float).collect();
        std::fs::write(&*path, text.join(" ")).map_err(|e| os_error(e, &path))?;
        Ok(Value::None)
    });
    m.add_function("fromfile", |interp, args| {
        args.check("fromfile", 1, 1, &[])?;
        let path = args.text(0, "fromfile")?;
        let text = std::fs::read_to_string(&*path).map_err(|e| os_error(e, &path))?;
        let mut out = Vec::new();
        for word in text.split_whitespace() {
            let x = word
                .parse::<f64>()
                .map_err(|_| raise("ValueError", format!("could not convert '{}' to float", word)))?;
            out.push(number_value(x));
        }
        interp.reserve_values(out.len())?;
        Ok(Value::list(out))
    });
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::interp::tests::Unmetered;
    use std::collections::HashMap;

    fn call(m: &Module, name: &str, args: Vec<Value>) -> EvalResult {
        let mut interp = Interpreter::new(HashMap::new(), Box::new(Unmetered));
        let f = m.get(name).unwrap();
        interp.call(&f, CallArgs::new(args))
    }

    #[test]
    fn test_arange_keeps_integers() {
        let m = module();
        let out = call(&m, "arange", vec![Value::Int(1), Value::Int(7), Value::Int(2)]).unwrap();
        assert_eq!(out.repr(), "[1, 3, 5]");
        let out = call(&m, "arange", vec![Value::Float(0.5), Value::Int(2)]).unwrap();
        assert_eq!(out.repr(), "[0.5, 1.5]");
    }

    #[test]
    fn test_dot_and_mean() {
        let m = module();
        let a = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = Value::list(vec![Value::Int(4), Value::Int(5), Value::Int(6)]);
        assert_eq!(call(&m, "dot", vec![a.clone(), b]).unwrap().repr(), "32.0");
        assert_eq!(call(&m, "mean", vec![a]).unwrap().repr(), "2.0");
        assert!(call(&m, "mean", vec![Value::list(vec![])]).is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt").display().to_string();
        let m = module();
        let xs = Value::list(vec![Value::Float(1.5), Value::Int(2)]);
        call(&m, "tofile", vec![xs, Value::from(path.as_str())]).unwrap();
        let back = call(&m, "fromfile", vec![Value::from(path.as_str())]).unwrap();
        assert_eq!(back.repr(), "[1.5, 2.0]");
    }
}
