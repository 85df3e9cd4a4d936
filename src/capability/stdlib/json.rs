use crate::lang::value::{format_float, raise, Dict};
use crate::lang::{EvalResult, Interpreter, Module, Value};
use serde_json::Value as Json;
use std::fmt::Write;

/// Nesting beyond this is treated as a reference cycle.
const MAX_DEPTH: usize = 100;

/// Free space below which `dumps` reserves memory for the next growth.
const RESERVE_HEADROOM: usize = 1024;

pub fn module() -> Module {
    let m = Module::new("json", "JSON encoding and decoding.");
    m.add_function("dumps", |interp, args| {
        args.check("dumps", 1, 1, &["indent", "sort_keys"])?;
        let indent = match args.keyword("indent") {
            None | Some(Value::None) => None,
            Some(v) => Some(v.as_int().filter(|n| *n >= 0).ok_or_else(|| {
                raise("TypeError", "indent must be a non-negative integer or None")
            })? as usize),
        };
        let sort_keys = args.keyword("sort_keys").map_or(false, Value::truthy);
        let mut out = String::new();
        let encoder = Encoder { indent, sort_keys };
        encoder.write(interp, &args.positional[0], &mut out, 0)?;
        Ok(Value::from(out))
    });
    m.add_function("loads", |interp, args| {
        args.check("loads", 1, 1, &[])?;
        let text = args.text(0, "loads")?;
        let parsed: Json = serde_json::from_str(&text)
            .map_err(|e| raise("ValueError", format!("Expecting value: {}", e)))?;
        from_json(interp, &parsed)
    });
    m
}

struct Encoder {
    indent: Option<usize>,
    sort_keys: bool,
}

impl Encoder {
    fn newline(&self, out: &mut String, level: usize) {
        if let Some(width) = self.indent {
            out.push('\n');
            out.extend(std::iter::repeat(' ').take(width * level));
        }
    }

    fn item_separator(&self) -> &'static str {
        if self.indent.is_some() {
            ","
        } else {
            ", "
        }
    }

    fn write_seq(&self, interp: &mut Interpreter, items: &[Value], out: &mut String, level: usize) -> EvalResult<()> {
        if items.is_empty() {
            out.push_str("[]");
            return Ok(());
        }
        out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(self.item_separator());
            }
            self.newline(out, level + 1);
            self.write(interp, item, out, level + 1)?;
        }
        self.newline(out, level);
        out.push(']');
        Ok(())
    }

    fn write(&self, interp: &mut Interpreter, value: &Value, out: &mut String, level: usize) -> EvalResult<()> {
        if level > MAX_DEPTH {
            return Err(raise("ValueError", "Circular reference detected"));
        }
        interp.check_budget()?;
        if out.capacity() - out.len() < RESERVE_HEADROOM {
            // the next push may reallocate to twice the capacity
            interp.reserve(out.capacity() as u64 * 2)?;
        }
        match value {
            Value::None => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => {
                let _ = write!(out, "{}", i);
            }
            Value::Float(f) if f.is_nan() => out.push_str("NaN"),
            Value::Float(f) if f.is_infinite() => {
                out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote(s)),
            Value::List(items) => {
                let items = items.borrow().clone();
                self.write_seq(interp, &items, out, level)?;
            }
            Value::Tuple(items) => self.write_seq(interp, items, out, level)?,
            Value::Dict(dict) => {
                let mut entries = Vec::with_capacity(dict.borrow().len());
                for (k, v) in dict.borrow().iter() {
                    entries.push((key_text(k)?, v.clone()));
                }
                if self.sort_keys {
                    entries.sort_by(|a, b| a.0.cmp(&b.0));
                }
                if entries.is_empty() {
                    out.push_str("{}");
                    return Ok(());
                }
                out.push('{');
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push_str(self.item_separator());
                    }
                    self.newline(out, level + 1);
                    out.push_str(&quote(k));
                    out.push_str(": ");
                    self.write(interp, v, out, level + 1)?;
                }
                self.newline(out, level);
                out.push('}');
            }
            other => {
                return Err(raise(
                    "TypeError",
                    format!("Object of type {} is not JSON serializable", other.type_name()),
                ))
            }
        }
        Ok(())
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn key_text(key: &Value) -> EvalResult<String> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(format_float(*f)),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::None => Ok("null".to_string()),
        other => Err(raise(
            "TypeError",
            format!(
                "keys must be str, int, float, bool or None, not {}",
                other.type_name()
            ),
        )),
    }
}

fn from_json(interp: &mut Interpreter, json: &Json) -> EvalResult {
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => {
            interp.reserve_values(items.len())?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(from_json(interp, item)?);
            }
            Value::list(out)
        }
        Json::Object(map) => {
            interp.reserve_values(map.len() * 2)?;
            let mut dict = Dict::new();
            for (k, v) in map {
                dict.insert(Value::from(k.as_str()), from_json(interp, v)?);
            }
            Value::dict(dict)
        }
    })
}
