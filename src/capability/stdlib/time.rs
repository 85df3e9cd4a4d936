use crate::lang::value::raise;
use crate::lang::{Module, Value};
use once_cell::sync::Lazy;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

pub fn module() -> Module {
    let m = Module::new("time", "Clocks and an interruptible sleep.");
    Lazy::force(&EPOCH);

    m.add_function("time", |_, args| {
        args.check("time", 0, 0, &[])?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Value::Float(now.as_secs_f64()))
    });
    for name in ["monotonic", "perf_counter"] {
        m.add_function(name, move |_, args| {
            args.check(name, 0, 0, &[])?;
            Ok(Value::Float(EPOCH.elapsed().as_secs_f64()))
        });
    }
    // routed through the governor so the wall budget can cut it short
    m.add_function("sleep", |interp, args| {
        args.check("sleep", 1, 1, &[])?;
        let seconds = args.float(0, "sleep")?;
        if !(seconds >= 0.0) {
            return Err(raise("ValueError", "sleep length must be non-negative"));
        }
        let duration = Duration::try_from_secs_f64(seconds)
            .map_err(|_| raise("OverflowError", "sleep length is too large"))?;
        interp.sleep(duration)?;
        Ok(Value::None)
    });
    m
}
