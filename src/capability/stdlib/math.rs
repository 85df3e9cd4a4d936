use crate::lang::value::raise;
use crate::lang::{EvalResult, Module, Value};

fn domain_error() -> crate::lang::Unwind {
    raise("ValueError", "math domain error")
}

fn to_int(f: f64, name: &str) -> EvalResult {
    if !f.is_finite() {
        return Err(raise(
            if f.is_nan() { "ValueError" } else { "OverflowError" },
            format!("cannot convert float {} to integer in {}()", f, name),
        ));
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(raise("OverflowError", "integer overflow"));
    }
    Ok(Value::Int(f as i64))
}

/// Register a one-argument float function.
fn unary(module: &Module, name: &'static str, f: fn(f64) -> Option<f64>) {
    module.add_function(name, move |_, args| {
        args.check(name, 1, 1, &[])?;
        let x = args.float(0, name)?;
        f(x).map(Value::Float).ok_or_else(domain_error)
    });
}

pub fn module() -> Module {
    let m = Module::new("math", "Mathematical functions over floats and integers.");
    m.set("pi", Value::Float(std::f64::consts::PI));
    m.set("e", Value::Float(std::f64::consts::E));
    m.set("tau", Value::Float(std::f64::consts::TAU));
    m.set("inf", Value::Float(f64::INFINITY));
    m.set("nan", Value::Float(f64::NAN));

    unary(&m, "sqrt", |x| (x >= 0.0).then(|| x.sqrt()));
    unary(&m, "exp", |x| Some(x.exp()));
    unary(&m, "log2", |x| (x > 0.0).then(|| x.log2()));
    unary(&m, "log10", |x| (x > 0.0).then(|| x.log10()));
    unary(&m, "sin", |x| Some(x.sin()));
    unary(&m, "cos", |x| Some(x.cos()));
    unary(&m, "tan", |x| Some(x.tan()));
    unary(&m, "asin", |x| (-1.0..=1.0).contains(&x).then(|| x.asin()));
    unary(&m, "acos", |x| (-1.0..=1.0).contains(&x).then(|| x.acos()));
    unary(&m, "atan", |x| Some(x.atan()));
    unary(&m, "fabs", |x| Some(x.abs()));
    unary(&m, "degrees", |x| Some(x.to_degrees()));
    unary(&m, "radians", |x| Some(x.to_radians()));

    m.add_function("log", |_, args| {
        args.check("log", 1, 2, &[])?;
        let x = args.float(0, "log")?;
        if x <= 0.0 {
            return Err(domain_error());
        }
        match args.get(1) {
            None => Ok(Value::Float(x.ln())),
            Some(_) => {
                let base = args.float(1, "log")?;
                if base <= 0.0 || base == 1.0 {
                    return Err(domain_error());
                }
                Ok(Value::Float(x.ln() / base.ln()))
            }
        }
    });
    m.add_function("pow", |_, args| {
        args.check("pow", 2, 2, &[])?;
        Ok(Value::Float(args.float(0, "pow")?.powf(args.float(1, "pow")?)))
    });
    m.add_function("atan2", |_, args| {
        args.check("atan2", 2, 2, &[])?;
        Ok(Value::Float(args.float(0, "atan2")?.atan2(args.float(1, "atan2")?)))
    });
    m.add_function("hypot", |_, args| {
        args.check("hypot", 2, 2, &[])?;
        Ok(Value::Float(args.float(0, "hypot")?.hypot(args.float(1, "hypot")?)))
    });

    for (name, round) in [
        ("floor", f64::floor as fn(f64) -> f64),
        ("ceil", f64::ceil),
        ("trunc", f64::trunc),
    ] {
        m.add_function(name, move |_, args| {
            args.check(name, 1, 1, &[])?;
            match &args.positional[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                _ => to_int(round(args.float(0, name)?), name),
            }
        });
    }

    for (name, test) in [
        ("isnan", f64::is_nan as fn(f64) -> bool),
        ("isinf", f64::is_infinite),
        ("isfinite", f64::is_finite),
    ] {
        m.add_function(name, move |_, args| {
            args.check(name, 1, 1, &[])?;
            Ok(Value::Bool(test(args.float(0, name)?)))
        });
    }

    m.add_function("factorial", |interp, args| {
        args.check("factorial", 1, 1, &[])?;
        let n = args.int(0, "factorial")?;
        if n < 0 {
            return Err(raise("ValueError", "factorial() not defined for negative values"));
        }
        let mut acc: i64 = 1;
        for k in 2..=n {
            interp.check_budget()?;
            acc = acc
                .checked_mul(k)
                .ok_or_else(|| raise("OverflowError", "integer overflow"))?;
        }
        Ok(Value::Int(acc))
    });
    m.add_function("gcd", |_, args| {
        args.check("gcd", 2, 2, &[])?;
        let (mut a, mut b) = (
            args.int(0, "gcd")?.unsigned_abs(),
            args.int(1, "gcd")?.unsigned_abs(),
        );
        while b != 0 {
            (a, b) = (b, a % b);
        }
        i64::try_from(a)
            .map(Value::Int)
            .map_err(|_| raise("OverflowError", "integer overflow"))
    });
    m.add_function("isqrt", |_, args| {
        args.check("isqrt", 1, 1, &[])?;
        let n = args.int(0, "isqrt")?;
        if n < 0 {
            return Err(raise("ValueError", "isqrt() argument must be nonnegative"));
        }
        let mut r = (n as f64).sqrt() as i64;
        while r.checked_mul(r).map_or(true, |sq| sq > n) {
            r -= 1;
        }
        while (r + 1).checked_mul(r + 1).map_or(false, |sq| sq <= n) {
            r += 1;
        }
        Ok(Value::Int(r))
    });
    m
}
