//! Object serialization.
//!
//! The native form writes a tagged JSON document and can name modules and
//! module functions, which `loads` resolves straight through the registry.
//! That bypasses import policy entirely, so restricted runs get
//! [`token_module`] instead: `dumps` keeps a private copy and hands back an
//! opaque token, and `loads` accepts only tokens minted by the same run.

use crate::capability::importer::ModuleRegistry;
use crate::lang::value::{deep_copy, format_float, raise, Dict};
use crate::lang::{EvalResult, Interpreter, Module, Value};
use rand::Rng;
use serde_json::{json, Value as Json};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

const MAX_DEPTH: usize = 100;

pub fn module(registry: Weak<ModuleRegistry>) -> Module {
    let m = Module::new("pickle", "Serialize and rebuild guest objects.");
    m.add_function("dumps", |interp, args| {
        args.check("dumps", 1, 1, &[])?;
        let doc = encode(interp, &args.positional[0], 0)?;
        Ok(Value::from(doc.to_string()))
    });
    m.add_function("loads", move |interp, args| {
        args.check("loads", 1, 1, &[])?;
        let text = args.text(0, "loads")?;
        let doc: Json = serde_json::from_str(&text).map_err(|_| invalid())?;
        let registry = registry
            .upgrade()
            .ok_or_else(|| raise("RuntimeError", "module registry is gone"))?;
        decode(interp, &registry, &doc, 0)
    });
    m
}

fn invalid() -> crate::lang::Unwind {
    raise("ValueError", "invalid pickle data")
}

fn encode(interp: &mut Interpreter, value: &Value, depth: usize) -> EvalResult<Json> {
    if depth > MAX_DEPTH {
        return Err(raise("ValueError", "object nested too deeply to pickle"));
    }
    interp.check_budget()?;
    let seq = |interp: &mut Interpreter, items: &[Value]| -> EvalResult<Vec<Json>> {
        items.iter().map(|v| encode(interp, v, depth + 1)).collect()
    };
    Ok(match value {
        Value::None => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => json!({ "float": format_float(*f) }),
        Value::Str(s) => Json::from(s.as_ref()),
        Value::List(items) => {
            let items = items.borrow().clone();
            json!({ "list": seq(interp, &items)? })
        }
        Value::Tuple(items) => json!({ "tuple": seq(interp, items)? }),
        Value::Dict(dict) => {
            let pairs: Vec<(Value, Value)> = dict.borrow().iter().cloned().collect();
            let mut out = Vec::with_capacity(pairs.len());
            for (k, v) in &pairs {
                out.push(json!([encode(interp, k, depth + 1)?, encode(interp, v, depth + 1)?]));
            }
            json!({ "dict": out })
        }
        Value::Module(module) => json!({ "module": module.name() }),
        Value::Native(native) if native.name.contains('.') => json!({ "global": native.name }),
        other => {
            return Err(raise(
                "TypeError",
                format!("cannot pickle '{}' object", other.type_name()),
            ))
        }
    })
}

fn decode(interp: &mut Interpreter, registry: &ModuleRegistry, doc: &Json, depth: usize) -> EvalResult {
    if depth > MAX_DEPTH {
        return Err(invalid());
    }
    let seq = |interp: &mut Interpreter, items: &Json| -> EvalResult<Vec<Value>> {
        let items = items.as_array().ok_or_else(invalid)?;
        interp.reserve_values(items.len())?;
        items.iter().map(|v| decode(interp, registry, v, depth + 1)).collect()
    };
    Ok(match doc {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Int(n.as_i64().ok_or_else(invalid)?),
        Json::String(s) => Value::from(s.as_str()),
        Json::Object(map) if map.len() == 1 => {
            let (tag, body) = map.iter().next().ok_or_else(invalid)?;
            match tag.as_str() {
                "float" => Value::Float(
                    body.as_str()
                        .and_then(|s| s.parse::<f64>().ok())
                        .ok_or_else(invalid)?,
                ),
                "list" => Value::list(seq(interp, body)?),
                "tuple" => Value::tuple(seq(interp, body)?),
                "dict" => {
                    let mut dict = Dict::new();
                    for pair in seq(interp, body)? {
                        match pair {
                            Value::List(kv) if kv.borrow().len() == 2 => {
                                let kv = kv.borrow();
                                dict.insert(kv[0].clone(), kv[1].clone());
                            }
                            _ => return Err(invalid()),
                        }
                    }
                    Value::dict(dict)
                }
                "module" => {
                    let name = body.as_str().ok_or_else(invalid)?;
                    Value::Module(registry.load(name)?)
                }
                "global" => {
                    let qualified = body.as_str().ok_or_else(invalid)?;
                    let (module, attr) = qualified.rsplit_once('.').ok_or_else(invalid)?;
                    registry.load(module)?.get(attr).ok_or_else(|| {
                        raise(
                            "AttributeError",
                            format!("module '{}' has no attribute '{}'", module, attr),
                        )
                    })?
                }
                _ => return Err(invalid()),
            }
        }
        _ => return Err(invalid()),
    })
}

/// Same-process replacement: values never leave the run, and nothing can be
/// conjured from a crafted payload.
pub fn token_module() -> Module {
    let m = Module::new("pickle", "Serialize guest objects to run-local tokens.");
    let table = Rc::new(TokenTable::new());

    let tokens = table.clone();
    m.add_function("dumps", move |_, args| {
        args.check("dumps", 1, 1, &[])?;
        Ok(Value::from(tokens.mint(&args.positional[0])))
    });
    let tokens = table;
    m.add_function("loads", move |_, args| {
        args.check("loads", 1, 1, &[])?;
        let token = args.text(0, "loads")?;
        tokens
            .redeem(&token)
            .ok_or_else(|| raise("ValueError", "unknown pickle token"))
    });
    m
}

struct TokenTable {
    nonce: String,
    next: Cell<u64>,
    entries: RefCell<HashMap<String, Value>>,
}

impl TokenTable {
    fn new() -> Self {
        Self {
            nonce: format!("{:016x}", rand::thread_rng().gen::<u64>()),
            next: Cell::new(0),
            entries: RefCell::new(HashMap::new()),
        }
    }

    fn mint(&self, value: &Value) -> String {
        let n = self.next.get();
        self.next.set(n + 1);
        let token = format!("tok-{}-{}", self.nonce, n);
        self.entries
            .borrow_mut()
            .insert(token.clone(), deep_copy(value));
        token
    }

    fn redeem(&self, token: &str) -> Option<Value> {
        self.entries.borrow().get(token).map(deep_copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_run_local_copies() {
        let first = TokenTable::new();
        let list = Value::list(vec![Value::Int(1)]);
        let token = first.mint(&list);
        assert!(token.starts_with("tok-"));

        let copy = first.redeem(&token).unwrap();
        if let Value::List(items) = &list {
            items.borrow_mut().push(Value::Int(2));
        }
        assert_eq!(copy.repr(), "[1]");

        let second = TokenTable::new();
        assert!(second.redeem(&token).is_none());
        assert!(first.redeem("tok-forged-0").is_none());
    }
}
