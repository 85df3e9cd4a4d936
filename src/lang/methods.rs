//! Builtin methods of `str`, `list` and `dict`, plus string formatting.
use super::interp::{compare_values, Interpreter};
use super::value::*;
use std::cmp::Ordering;

const STR_METHODS: &[&str] = &[
    "capitalize", "count", "endswith", "find", "format", "isalpha", "isdigit", "isspace",
    "join", "lower", "lstrip", "replace", "rstrip", "split", "splitlines", "startswith", "strip",
    "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "setdefault", "update", "values",
];

pub fn method_names(receiver: &Value) -> &'static [&'static str] {
    match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => &[],
    }
}

pub fn has_method(receiver: &Value, name: &str) -> bool {
    method_names(receiver).contains(&name)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: CallArgs,
) -> EvalResult {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(items) => list_method(interp, items, name, args),
        Value::Dict(dict) => dict_method(interp, dict, name, args),
        other => Err(raise(
            "AttributeError",
            format!("'{}' object has no attribute '{}'", other.type_name(), name),
        )),
    }
}

fn str_method(interp: &mut Interpreter, s: &str, name: &str, args: CallArgs) -> EvalResult {
    let qualified = format!("str.{}", name);
    let q = qualified.as_str();
    match name {
        "upper" | "lower" | "title" | "capitalize" | "isdigit" | "isalpha" | "isspace"
        | "splitlines" => {
            args.check(q, 0, 0, &[])?;
            Ok(match name {
                "upper" => Value::from(s.to_uppercase()),
                "lower" => Value::from(s.to_lowercase()),
                "title" => Value::from(title_case(s)),
                "capitalize" => {
                    let mut chars = s.chars();
                    Value::from(match chars.next() {
                        Some(first) => {
                            first.to_uppercase().collect::<String>()
                                + &chars.as_str().to_lowercase()
                        }
                        None => String::new(),
                    })
                }
                "isdigit" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit())),
                "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
                "isspace" => Value::Bool(!s.is_empty() && s.chars().all(char::is_whitespace)),
                _ => Value::list(s.lines().map(Value::from).collect()),
            })
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(q, 0, 1, &[])?;
            let chars: Option<Vec<char>> = match args.get(0) {
                Some(Value::Str(set)) => Some(set.chars().collect()),
                _ => None,
            };
            let pred = |c: char| match &chars {
                Some(set) => set.contains(&c),
                None => c.is_whitespace(),
            };
            Ok(Value::from(match name {
                "strip" => s.trim_matches(pred),
                "lstrip" => s.trim_start_matches(pred),
                _ => s.trim_end_matches(pred),
            }))
        }
        "split" => {
            args.check(q, 0, 2, &[])?;
            let limit = match args.get(1) {
                Some(v) => v.as_int().unwrap_or(-1),
                None => -1,
            };
            let parts: Vec<Value> = match args.get(0) {
                Some(Value::Str(sep)) => {
                    if sep.is_empty() {
                        return Err(raise("ValueError", "empty separator"));
                    }
                    if limit >= 0 {
                        s.splitn(limit as usize + 1, &**sep).map(Value::from).collect()
                    } else {
                        s.split(&**sep).map(Value::from).collect()
                    }
                }
                _ => split_whitespace(s, limit),
            };
            Ok(Value::list(parts))
        }
        "join" => {
            args.check(q, 1, 1, &[])?;
            let items = interp.collect(&args.positional[0])?;
            let mut parts = Vec::with_capacity(items.len());
            for item in &items {
                match item {
                    Value::Str(p) => parts.push(p.to_string()),
                    other => {
                        return Err(raise(
                            "TypeError",
                            format!("sequence item: expected str instance, {} found", other.type_name()),
                        ))
                    }
                }
            }
            let total: usize = parts.iter().map(String::len).sum::<usize>()
                + s.len() * parts.len().saturating_sub(1);
            interp.reserve(total as u64)?;
            Ok(Value::from(parts.join(s)))
        }
        "replace" => {
            args.check(q, 2, 2, &[])?;
            let old = args.text(0, q)?;
            let new = args.text(1, q)?;
            if !old.is_empty() {
                let hits = s.matches(&*old).count() as u64;
                interp.reserve((s.len() as u64).saturating_add(hits.saturating_mul(new.len() as u64)))?;
            }
            Ok(Value::from(s.replace(&*old, &new)))
        }
        "startswith" | "endswith" => {
            args.check(q, 1, 1, &[])?;
            let affix = args.text(0, q)?;
            Ok(Value::Bool(if name == "startswith" {
                s.starts_with(&*affix)
            } else {
                s.ends_with(&*affix)
            }))
        }
        "find" => {
            args.check(q, 1, 1, &[])?;
            let needle = args.text(0, q)?;
            Ok(Value::Int(match s.find(&*needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            }))
        }
        "count" => {
            args.check(q, 1, 1, &[])?;
            let needle = args.text(0, q)?;
            if needle.is_empty() {
                return Ok(Value::Int(s.chars().count() as i64 + 1));
            }
            Ok(Value::Int(s.matches(&*needle).count() as i64))
        }
        "zfill" => {
            args.check(q, 1, 1, &[])?;
            let width = args.int(0, q)?.max(0) as usize;
            let len = s.chars().count();
            if len >= width {
                return Ok(Value::from(s));
            }
            interp.reserve(width as u64)?;
            let (sign, digits) = match s.strip_prefix(['-', '+']) {
                Some(rest) => (&s[..1], rest),
                None => ("", s),
            };
            Ok(Value::from(format!("{}{}{}", sign, "0".repeat(width - len), digits)))
        }
        "format" => format_method(s, &args),
        _ => Err(raise(
            "AttributeError",
            format!("'str' object has no attribute '{}'", name),
        )),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

/// `str.split()` without a separator: runs of whitespace separate, and
/// after `limit` splits the remainder is kept whole.
fn split_whitespace(s: &str, limit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if limit >= 0 && parts.len() as i64 >= limit {
            parts.push(Value::from(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(Value::from(rest));
                break;
            }
        }
    }
    parts
}

fn list_method(
    interp: &mut Interpreter,
    items: &std::rc::Rc<std::cell::RefCell<Vec<Value>>>,
    name: &str,
    args: CallArgs,
) -> EvalResult {
    let qualified = format!("list.{}", name);
    let q = qualified.as_str();
    match name {
        "append" => {
            args.check(q, 1, 1, &[])?;
            let len = items.borrow().len();
            if len % 4096 == 0 {
                interp.reserve_values(len + 4096)?;
            }
            items.borrow_mut().push(args.positional[0].clone());
            Ok(Value::None)
        }
        "extend" => {
            args.check(q, 1, 1, &[])?;
            let extra = interp.collect(&args.positional[0])?;
            interp.reserve_values(items.borrow().len() + extra.len())?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }
        "insert" => {
            args.check(q, 2, 2, &[])?;
            let mut items = items.borrow_mut();
            let len = items.len() as i64;
            let mut index = args.int(0, q)?;
            if index < 0 {
                index += len;
            }
            let index = index.clamp(0, len) as usize;
            items.insert(index, args.positional[1].clone());
            Ok(Value::None)
        }
        "pop" => {
            args.check(q, 0, 1, &[])?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(raise("IndexError", "pop from empty list"));
            }
            let len = items.len() as i64;
            let mut index = match args.get(0) {
                Some(_) => args.int(0, q)?,
                None => len - 1,
            };
            if index < 0 {
                index += len;
            }
            if index < 0 || index >= len {
                return Err(raise("IndexError", "pop index out of range"));
            }
            Ok(items.remove(index as usize))
        }
        "remove" | "index" | "count" => {
            args.check(q, 1, 1, &[])?;
            let target = &args.positional[0];
            let mut matches = Vec::new();
            for (i, v) in items.borrow().iter().enumerate() {
                if interp.equal(v, target)? {
                    matches.push(i);
                    if name != "count" {
                        break;
                    }
                }
            }
            let position = matches.first().copied();
            match name {
                "count" => Ok(Value::Int(matches.len() as i64)),
                "index" => match position {
                    Some(i) => Ok(Value::Int(i as i64)),
                    None => {
                        let shown = interp.repr(target)?;
                        Err(raise("ValueError", format!("{} is not in list", shown)))
                    }
                },
                _ => match position {
                    Some(i) => {
                        items.borrow_mut().remove(i);
                        Ok(Value::None)
                    }
                    None => Err(raise("ValueError", "list.remove(x): x not in list")),
                },
            }
        }
        "reverse" => {
            args.check(q, 0, 0, &[])?;
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "clear" => {
            args.check(q, 0, 0, &[])?;
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.check(q, 0, 0, &[])?;
            Ok(Value::list(items.borrow().clone()))
        }
        "sort" => {
            args.check(q, 0, 0, &["key", "reverse"])?;
            let snapshot = items.borrow().clone();
            let sorted = sort_values(
                interp,
                snapshot,
                args.keyword("key").cloned(),
                args.keyword("reverse").map(Value::truthy).unwrap_or(false),
            )?;
            *items.borrow_mut() = sorted;
            Ok(Value::None)
        }
        _ => Err(raise(
            "AttributeError",
            format!("'list' object has no attribute '{}'", name),
        )),
    }
}

/// Stable sort with an optional key function; shared by `sorted()`.
pub fn sort_values(
    interp: &mut Interpreter,
    values: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> EvalResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(values.len());
    for value in values {
        let k = match &key {
            Some(Value::None) | None => value.clone(),
            Some(func) => interp.call(func, CallArgs::new(vec![value.clone()]))?,
        };
        keyed.push((k, value));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        if failure.is_some() {
            return Ordering::Equal;
        }
        match compare_values(interp, a, b) {
            Ok(order) => order,
            Err(err) => {
                failure = Some(err);
                Ordering::Equal
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if reverse {
        keyed.reverse();
    }
    Ok(keyed.into_iter().map(|(_, v)| v).collect())
}

fn dict_method(
    interp: &mut Interpreter,
    dict: &std::rc::Rc<std::cell::RefCell<Dict>>,
    name: &str,
    args: CallArgs,
) -> EvalResult {
    let qualified = format!("dict.{}", name);
    let q = qualified.as_str();
    match name {
        "keys" | "values" | "items" | "copy" | "clear" => {
            args.check(q, 0, 0, &[])?;
            let d = dict.borrow();
            Ok(match name {
                "keys" => Value::list(d.keys()),
                "values" => Value::list(d.values()),
                "items" => Value::list(
                    d.iter()
                        .map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()]))
                        .collect(),
                ),
                "copy" => Value::dict(d.clone()),
                _ => {
                    drop(d);
                    dict.borrow_mut().clear();
                    Value::None
                }
            })
        }
        "get" => {
            args.check(q, 1, 2, &[])?;
            let key = &args.positional[0];
            ensure_hashable(key)?;
            Ok(dict
                .borrow()
                .get(key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
        }
        "pop" => {
            args.check(q, 1, 2, &[])?;
            let key = &args.positional[0];
            ensure_hashable(key)?;
            let removed = dict.borrow_mut().remove(key);
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(raise("KeyError", key.repr())),
            }
        }
        "setdefault" => {
            args.check(q, 1, 2, &[])?;
            let key = args.positional[0].clone();
            ensure_hashable(&key)?;
            if let Some(existing) = dict.borrow().get(&key) {
                return Ok(existing.clone());
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut().insert(key, default.clone());
            Ok(default)
        }
        "update" => {
            args.check(q, 0, 1, &[])?;
            if let Some(other) = args.get(0) {
                let pairs: Vec<(Value, Value)> = match other {
                    Value::Dict(o) => o.borrow().iter().cloned().collect(),
                    other => {
                        let mut pairs = Vec::new();
                        for item in interp.collect(other)? {
                            let kv = interp.collect(&item)?;
                            if kv.len() != 2 {
                                return Err(raise(
                                    "ValueError",
                                    "dictionary update sequence element has wrong length",
                                ));
                            }
                            pairs.push((kv[0].clone(), kv[1].clone()));
                        }
                        pairs
                    }
                };
                let mut d = dict.borrow_mut();
                for (k, v) in pairs {
                    ensure_hashable(&k)?;
                    d.insert(k, v);
                }
            }
            let mut d = dict.borrow_mut();
            for (k, v) in &args.keywords {
                d.insert(Value::from(k.as_str()), v.clone());
            }
            Ok(Value::None)
        }
        _ => Err(raise(
            "AttributeError",
            format!("'dict' object has no attribute '{}'", name),
        )),
    }
}

/// `"{} {name:>5}".format(...)`
fn format_method(template: &str, args: &CallArgs) -> EvalResult {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return Err(raise("ValueError", "unmatched '{' in format string")),
                    }
                }
                let (name, spec) = match field.split_once(':') {
                    Some((n, s)) => (n, s),
                    None => (field.as_str(), ""),
                };
                let value = if name.is_empty() {
                    let v = args.get(auto_index).cloned();
                    auto_index += 1;
                    v
                } else if let Ok(i) = name.parse::<usize>() {
                    args.get(i).cloned()
                } else {
                    args.keyword(name).cloned()
                };
                let value = value.ok_or_else(|| {
                    raise("IndexError", format!("replacement field '{}' out of range", name))
                })?;
                out.push_str(&apply_spec(&value, spec)?);
            }
            '}' => return Err(raise("ValueError", "single '}' encountered in format string")),
            other => out.push(other),
        }
    }
    Ok(Value::from(out))
}

/// A subset of the format-spec mini language: `[[fill]align][width][.precision][type]`.
fn apply_spec(value: &Value, spec: &str) -> EvalResult<String> {
    if spec.is_empty() {
        return Ok(value.to_text());
    }
    let mut chars: Vec<char> = spec.chars().collect();
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        chars.drain(..2);
    } else if !chars.is_empty() && matches!(chars[0], '<' | '>' | '^') {
        align = Some(chars[0]);
        chars.remove(0);
    }
    let rest: String = chars.into_iter().collect();
    let (width_part, precision, kind) = split_spec(&rest);
    let width: usize = if width_part.is_empty() {
        0
    } else {
        width_part
            .parse()
            .map_err(|_| raise("ValueError", format!("invalid format spec '{}'", spec)))?
    };
    if width > 4096 {
        return Err(raise("ValueError", "format width too large"));
    }
    let body = match kind {
        Some('f') => {
            let f = value
                .as_float()
                .ok_or_else(|| raise("ValueError", "'f' format needs a number"))?;
            format!("{:.*}", precision.unwrap_or(6), f)
        }
        Some('d') => {
            let i = value
                .as_int()
                .ok_or_else(|| raise("ValueError", "'d' format needs an integer"))?;
            i.to_string()
        }
        Some('s') | None => match (precision, value) {
            (Some(p), Value::Float(f)) => format!("{:.*}", p, f),
            (Some(p), v) => v.to_text().chars().take(p).collect(),
            (None, v) => v.to_text(),
        },
        Some(other) => {
            return Err(raise(
                "ValueError",
                format!("unknown format code '{}'", other),
            ))
        }
    };
    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_));
    let fill_str = |n: usize| fill.to_string().repeat(n);
    Ok(match align.unwrap_or(if numeric { '>' } else { '<' }) {
        '>' => format!("{}{}", fill_str(pad), body),
        '^' => format!("{}{}{}", fill_str(pad / 2), body, fill_str(pad - pad / 2)),
        _ => format!("{}{}", body, fill_str(pad)),
    })
}

fn split_spec(rest: &str) -> (&str, Option<usize>, Option<char>) {
    let (rest, kind) = match rest.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&rest[..rest.len() - 1], Some(c)),
        _ => (rest, None),
    };
    match rest.split_once('.') {
        Some((width, precision)) => (width, precision.parse().ok(), kind),
        None => (rest, None, kind),
    }
}

/// `"%s and %d" % args`
pub fn percent_format(template: &str, args: &Value) -> EvalResult {
    let values: Vec<Value> = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut next = values.into_iter();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = String::new();
        let conversion = loop {
            match chars.next() {
                Some(ch) if ch.is_ascii_digit() || ch == '.' || ch == '-' => spec.push(ch),
                Some(ch) => break ch,
                None => return Err(raise("ValueError", "incomplete format")),
            }
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = next
            .next()
            .ok_or_else(|| raise("TypeError", "not enough arguments for format string"))?;
        let left = spec.starts_with('-');
        let spec = spec.trim_start_matches('-');
        let format_spec = match conversion {
            's' => spec.to_string(),
            'r' => {
                out.push_str(&value.repr());
                continue;
            }
            'd' | 'i' => format!("{}d", spec),
            'f' => format!("{}f", spec),
            other => {
                return Err(raise(
                    "ValueError",
                    format!("unsupported format character '{}'", other),
                ))
            }
        };
        let aligned = if left {
            format!("<{}", format_spec)
        } else if format_spec.is_empty() {
            format_spec
        } else {
            format!(">{}", format_spec)
        };
        let value = if conversion == 'd' || conversion == 'i' {
            value
                .as_float()
                .map(|f| Value::Int(f.trunc() as i64))
                .ok_or_else(|| raise("TypeError", "%d format: a number is required"))?
        } else {
            value
        };
        out.push_str(&apply_spec(&value, &aligned)?);
    }
    if next.next().is_some() {
        return Err(raise(
            "TypeError",
            "not all arguments converted during string formatting",
        ));
    }
    Ok(Value::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::interp::tests::Unmetered;
    use std::collections::HashMap;

    fn interp() -> Interpreter {
        Interpreter::new(HashMap::new(), Box::new(Unmetered))
    }

    fn call(receiver: &Value, name: &str, args: Vec<Value>) -> EvalResult {
        call_method(&mut interp(), receiver, name, CallArgs::new(args))
    }

    #[test]
    fn test_string_methods() {
        let s = Value::from("  Hello World  ");
        assert_eq!(call(&s, "strip", vec![]).unwrap().repr(), "'Hello World'");
        assert_eq!(
            call(&Value::from("a,b,,c"), "split", vec![Value::from(",")])
                .unwrap()
                .repr(),
            "['a', 'b', '', 'c']"
        );
        assert_eq!(
            call(
                &Value::from("-"),
                "join",
                vec![Value::list(vec![Value::from("x"), Value::from("y")])]
            )
            .unwrap()
            .repr(),
            "'x-y'"
        );
        assert_eq!(call(&Value::from("42"), "zfill", vec![Value::Int(5)]).unwrap().repr(), "'00042'");
    }

    #[test]
    fn test_list_methods_mutate_in_place() {
        let list = Value::list(vec![Value::Int(3), Value::Int(1)]);
        call(&list, "append", vec![Value::Int(2)]).unwrap();
        call(&list, "sort", vec![]).unwrap();
        assert_eq!(list.repr(), "[1, 2, 3]");
        assert_eq!(call(&list, "pop", vec![]).unwrap().repr(), "3");
        assert!(call(&Value::list(vec![]), "pop", vec![]).is_err());
    }

    #[test]
    fn test_dict_methods() {
        let dict = Value::dict(Dict::new());
        call(&dict, "setdefault", vec![Value::from("a"), Value::Int(1)]).unwrap();
        assert_eq!(call(&dict, "get", vec![Value::from("a")]).unwrap().repr(), "1");
        assert_eq!(
            call(&dict, "get", vec![Value::from("z"), Value::Int(0)]).unwrap().repr(),
            "0"
        );
        assert_eq!(call(&dict, "items", vec![]).unwrap().repr(), "[('a', 1)]");
    }

    #[test]
    fn test_format_and_percent() {
        let args = CallArgs {
            positional: vec![Value::Int(7), Value::Float(3.14159)],
            keywords: vec![("who".to_string(), Value::from("bob"))],
        };
        assert_eq!(
            format_method("{} {:.2f} {who:>5}|", &args).unwrap().repr(),
            "'7 3.14   bob|'"
        );
        let formatted = percent_format(
            "%s has %d items (%.1f%%)",
            &Value::tuple(vec![Value::from("cart"), Value::Int(3), Value::Float(42.26)]),
        )
        .unwrap();
        assert_eq!(formatted.to_text(), "cart has 3 items (42.3%)");
        assert!(percent_format("%d %d", &Value::Int(1)).is_err());
    }

    #[test]
    fn test_whitespace_split_honours_maxsplit() {
        let split = |s: &str, args: Vec<Value>| call(&Value::from(s), "split", args).unwrap().repr();
        assert_eq!(split("a b c", vec![Value::None, Value::Int(1)]), "['a', 'b c']");
        assert_eq!(
            split("  a  b  c ", vec![Value::None, Value::Int(1)]),
            "['a', 'b  c ']"
        );
        assert_eq!(split("  a b", vec![Value::None, Value::Int(0)]), "['a b']");
        assert_eq!(split(" a\tb\n c ", vec![]), "['a', 'b', 'c']");
        assert_eq!(split("   ", vec![Value::None, Value::Int(1)]), "[]");
    }

    #[test]
    fn test_list_search_is_structural() {
        let nested = Value::list(vec![Value::Int(1), Value::list(vec![Value::Int(2)])]);
        let target = || Value::list(vec![Value::Int(2)]);
        assert_eq!(call(&nested, "index", vec![target()]).unwrap().repr(), "1");
        assert_eq!(call(&nested, "count", vec![Value::Float(1.0)]).unwrap().repr(), "1");
        match call(&nested, "index", vec![Value::list(vec![Value::Int(9)])]) {
            Err(Unwind::Raise(exc)) => assert_eq!(exc.message, "[9] is not in list"),
            other => panic!("expected ValueError, got {:?}", other),
        }
        call(&nested, "remove", vec![target()]).unwrap();
        assert_eq!(nested.repr(), "[1]");
    }

    /// A governor whose wall clock has already run out.
    struct Expired;

    impl crate::lang::interp::Governor for Expired {
        fn check(&mut self) -> Result<(), crate::config::types::ResourceViolation> {
            Err(crate::config::types::ResourceViolation::new(
                crate::config::types::ResourceKind::WallClock,
                "wall clock limit of 1s exceeded",
            ))
        }

        fn reserve(&mut self, _bytes: u64) -> Result<(), crate::config::types::ResourceViolation> {
            Ok(())
        }

        fn sleep(
            &mut self,
            _duration: std::time::Duration,
        ) -> Result<(), crate::config::types::ResourceViolation> {
            Ok(())
        }
    }

    #[test]
    fn test_sorting_nested_values_polls_the_governor() {
        let long = |last: i64| {
            let mut items: Vec<Value> = (0..5000).map(Value::Int).collect();
            items.push(Value::Int(last));
            Value::list(items)
        };
        let list = Value::list(vec![long(2), long(1)]);
        let mut interp = Interpreter::new(HashMap::new(), Box::new(Expired));
        match call_method(&mut interp, &list, "sort", CallArgs::new(vec![])) {
            Err(Unwind::Exceeded(violation)) => assert_eq!(violation.kind_name(), "TimeoutError"),
            other => panic!("expected a timeout, got {:?}", other),
        }
        // a failed sort leaves the list as it was
        if let Value::List(items) = &list {
            assert!(values_equal(&items.borrow()[0], &long(2)));
        }
    }
}
