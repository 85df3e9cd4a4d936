//! Host operating-system access. Deliberately real: this is what the
//! module allow-list exists to keep away from restricted guests.

use crate::lang::value::raise;
use crate::lang::{CallArgs, EvalResult, Module, Unwind, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;

fn os_error(err: std::io::Error, path: &str) -> Unwind {
    raise("OSError", format!("{}: '{}'", err, path))
}

pub fn module() -> Module {
    let m = Module::new("os", "Miscellaneous operating system interfaces.");
    m.set("name", Value::from("posix"));
    m.set("sep", Value::from("/"));
    m.set("linesep", Value::from("\n"));

    m.add_function("getcwd", |_, args| {
        args.check("getcwd", 0, 0, &[])?;
        let cwd = std::env::current_dir().map_err(|e| os_error(e, "."))?;
        Ok(Value::from(cwd.display().to_string()))
    });
    m.add_function("getpid", |_, args| {
        args.check("getpid", 0, 0, &[])?;
        Ok(Value::Int(std::process::id() as i64))
    });
    m.add_function("getenv", |_, args| {
        args.check("getenv", 1, 2, &[])?;
        let key = args.text(0, "getenv")?;
        Ok(match std::env::var(&*key) {
            Ok(value) => Value::from(value),
            Err(_) => args.get(1).cloned().unwrap_or(Value::None),
        })
    });
    m.add_function("listdir", |interp, args| {
        args.check("listdir", 0, 1, &[])?;
        let dir = match args.get(0) {
            Some(_) => args.text(0, "listdir")?.to_string(),
            None => ".".to_string(),
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| os_error(e, &dir))? {
            interp.check_budget()?;
            let entry = entry.map_err(|e| os_error(e, &dir))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        interp.reserve_values(names.len())?;
        Ok(Value::list(names.into_iter().map(Value::from).collect()))
    });
    m.add_function("remove", |_, args| {
        args.check("remove", 1, 1, &[])?;
        let path = args.text(0, "remove")?;
        std::fs::remove_file(&*path).map_err(|e| os_error(e, &path))?;
        Ok(Value::None)
    });
    m.add_function("system", |interp, args| {
        args.check("system", 1, 1, &[])?;
        let command = args.text(0, "system")?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(&*command)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|e| os_error(e, "sh"))?;
        // the child's stdout belongs to the guest, not to the wire protocol
        if !output.stdout.is_empty() {
            if let Some(print) = interp.builtins().get("print").cloned() {
                let mut call = CallArgs::new(vec![Value::from(
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                )]);
                call.keywords.push(("end".to_string(), Value::from("")));
                interp.call(&print, call)?;
            }
        }
        Ok(Value::Int(output.status.code().unwrap_or(-1) as i64))
    });

    m.set("path", Value::Module(Rc::new(path_module())));
    m
}

fn path_arg(args: &CallArgs, index: usize, name: &str) -> EvalResult<PathBuf> {
    Ok(PathBuf::from(&*args.text(index, name)?))
}

fn path_module() -> Module {
    let m = Module::new("os.path", "Common pathname manipulations.");
    m.add_function("join", |_, args| {
        args.check("join", 1, usize::MAX, &[])?;
        let mut joined = PathBuf::new();
        for i in 0..args.len() {
            joined.push(&*args.text(i, "join")?);
        }
        Ok(Value::from(joined.display().to_string()))
    });
    for (name, test) in [
        ("exists", Path::exists as fn(&Path) -> bool),
        ("isfile", Path::is_file),
        ("isdir", Path::is_dir),
    ] {
        m.add_function(name, move |_, args| {
            args.check(name, 1, 1, &[])?;
            Ok(Value::Bool(test(&path_arg(&args, 0, name)?)))
        });
    }
    m.add_function("basename", |_, args| {
        args.check("basename", 1, 1, &[])?;
        let text = args.text(0, "basename")?;
        Ok(Value::from(text.rsplit('/').next().unwrap_or_default()))
    });
    m.add_function("dirname", |_, args| {
        args.check("dirname", 1, 1, &[])?;
        let text = args.text(0, "dirname")?;
        Ok(Value::from(match text.rfind('/') {
            Some(0) => "/",
            Some(i) => &text[..i],
            None => "",
        }))
    });
    m
}
