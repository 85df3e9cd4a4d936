use crate::lang::value::raise;
use crate::lang::{Module, Value};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

pub fn module() -> Module {
    let m = Module::new("random", "Pseudo-random numbers; reseedable per run.");
    let rng = Rc::new(RefCell::new(StdRng::from_entropy()));

    let state = rng.clone();
    m.add_function("seed", move |_, args| {
        args.check("seed", 0, 1, &[])?;
        let fresh = match args.get(0) {
            None | Some(Value::None) => StdRng::from_entropy(),
            Some(Value::Str(s)) => {
                let folded = s.bytes().fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(b as u64));
                StdRng::seed_from_u64(folded)
            }
            Some(_) => StdRng::seed_from_u64(args.int(0, "seed")? as u64),
        };
        *state.borrow_mut() = fresh;
        Ok(Value::None)
    });

    let state = rng.clone();
    m.add_function("random", move |_, args| {
        args.check("random", 0, 0, &[])?;
        Ok(Value::Float(state.borrow_mut().gen::<f64>()))
    });

    let state = rng.clone();
    m.add_function("uniform", move |_, args| {
        args.check("uniform", 2, 2, &[])?;
        let (a, b) = (args.float(0, "uniform")?, args.float(1, "uniform")?);
        Ok(Value::Float(a + (b - a) * state.borrow_mut().gen::<f64>()))
    });

    let state = rng.clone();
    m.add_function("randint", move |_, args| {
        args.check("randint", 2, 2, &[])?;
        let (a, b) = (args.int(0, "randint")?, args.int(1, "randint")?);
        if a > b {
            return Err(raise(
                "ValueError",
                format!("empty range for randint() ({}, {})", a, b),
            ));
        }
        Ok(Value::Int(state.borrow_mut().gen_range(a..=b)))
    });

    let state = rng.clone();
    m.add_function("randrange", move |_, args| {
        args.check("randrange", 1, 2, &[])?;
        let (start, stop) = match args.len() {
            1 => (0, args.int(0, "randrange")?),
            _ => (args.int(0, "randrange")?, args.int(1, "randrange")?),
        };
        if start >= stop {
            return Err(raise("ValueError", "empty range for randrange()"));
        }
        Ok(Value::Int(state.borrow_mut().gen_range(start..stop)))
    });

    let state = rng.clone();
    m.add_function("choice", move |interp, args| {
        args.check("choice", 1, 1, &[])?;
        let items = interp.collect(&args.positional[0])?;
        items
            .choose(&mut *state.borrow_mut())
            .cloned()
            .ok_or_else(|| raise("IndexError", "Cannot choose from an empty sequence"))
    });

    let state = rng;
    m.add_function("shuffle", move |_, args| {
        args.check("shuffle", 1, 1, &[])?;
        match &args.positional[0] {
            Value::List(items) => {
                items.borrow_mut().shuffle(&mut *state.borrow_mut());
                Ok(Value::None)
            }
            other => Err(raise(
                "TypeError",
                format!("shuffle() argument must be a list, not {}", other.type_name()),
            )),
        }
    });
    m
}
