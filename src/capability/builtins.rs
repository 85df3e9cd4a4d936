//! The guest's builtin namespace.
//!
//! [`BuiltinsProxy`] filters the catalogue down to what policy enables and
//! swaps in wrappers for the entries named in the builtins document. Output,
//! stdin and exit are always served by [`GuestIo`], in both modes.

use crate::capability::catalogue::catalogue;
use crate::capability::importer::{policy_import, ModuleRegistry};
use crate::config::policy::{Capability, PolicyConfig, Wrapper};
use crate::config::types::{CapabilityDenied, ExecutionMode};
use crate::lang::interp::syntax_error;
use crate::lang::value::raise;
use crate::lang::{is_reserved_name, CallArgs, EvalResult, Interpreter, Unwind, Value};
use crate::scanner::scan_mode;
use crate::utils::output::{OutputBuffer, OutputIntegrity};
use log::warn;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

/// Captured stdout and simulated stdin of one run.
pub struct GuestIo {
    output: RefCell<OutputBuffer>,
    input: RefCell<VecDeque<String>>,
}

impl GuestIo {
    pub fn new(input: &str, output_limit: usize) -> Rc<Self> {
        Rc::new(Self {
            output: RefCell::new(OutputBuffer::new(output_limit)),
            input: RefCell::new(input.lines().map(str::to_string).collect()),
        })
    }

    /// Append to the bounded output; false once it is full.
    pub fn write(&self, text: &str) -> bool {
        self.output.borrow_mut().push(text)
    }

    pub fn integrity(&self) -> OutputIntegrity {
        self.output.borrow().integrity()
    }

    /// Take everything written so far, leaving an empty buffer of the same
    /// size.
    pub fn take_output(&self, limit: usize) -> String {
        self.output.replace(OutputBuffer::new(limit)).finish()
    }

    fn read_line(&self) -> Option<String> {
        self.input.borrow_mut().pop_front()
    }

    pub fn print(self: &Rc<Self>) -> Value {
        let io = self.clone();
        Value::native("print", move |interp, args| {
            args.check("print", 0, usize::MAX, &["sep", "end"])?;
            let separator = |name: &str, default: &str| -> EvalResult<String> {
                match args.keyword(name) {
                    None | Some(Value::None) => Ok(default.to_string()),
                    Some(Value::Str(s)) => Ok(s.to_string()),
                    Some(other) => Err(raise(
                        "TypeError",
                        format!("{} must be None or a string, not {}", name, other.type_name()),
                    )),
                }
            };
            let sep = separator("sep", " ")?;
            let end = separator("end", "\n")?;
            let parts = args
                .positional
                .iter()
                .map(|value| interp.text(value))
                .collect::<EvalResult<Vec<String>>>()?;
            io.write(&parts.join(&sep));
            io.write(&end);
            Ok(Value::None)
        })
    }

    pub fn input(self: &Rc<Self>) -> Value {
        let io = self.clone();
        Value::native("input", move |_, args| {
            args.check("input", 0, 1, &[])?;
            if let Some(prompt) = args.get(0) {
                io.write(&prompt.to_text());
            }
            io.read_line()
                .map(Value::from)
                .ok_or_else(|| raise("EOFError", "EOF when reading a line"))
        })
    }

    /// `exit()`/`quit()`: a code ends the run with that status; any other
    /// argument is written out and ends it with status 1.
    pub fn exit(self: &Rc<Self>, name: &str) -> Value {
        let io = self.clone();
        let fname = name.to_string();
        Value::native(name, move |_, args| {
            args.check(&fname, 0, 1, &[])?;
            let code = match args.get(0) {
                None | Some(Value::None) => 0,
                Some(Value::Int(code)) => i32::try_from(*code).unwrap_or(1),
                Some(Value::Bool(flag)) => *flag as i32,
                Some(other) => {
                    io.write(&other.to_text());
                    io.write("\n");
                    1
                }
            };
            Err(Unwind::Exit(code))
        })
    }

    fn wrapper(self: &Rc<Self>, name: &str, wrapper: Wrapper) -> Option<Value> {
        match wrapper {
            Wrapper::Output => Some(self.print()),
            Wrapper::Stdin => Some(self.input()),
            Wrapper::Exit => Some(self.exit(name)),
            _ => None,
        }
    }
}

/// Builds the builtin mapping a run executes against.
pub struct BuiltinsProxy {
    policy: Option<Arc<PolicyConfig>>,
    registry: Rc<ModuleRegistry>,
    io: Rc<GuestIo>,
}

impl BuiltinsProxy {
    /// Policy-filtered builtins with wrappers applied.
    pub fn restricted(policy: Arc<PolicyConfig>, registry: Rc<ModuleRegistry>, io: Rc<GuestIo>) -> Self {
        Self {
            policy: Some(policy),
            registry,
            io,
        }
    }

    /// The whole catalogue, with only the I/O entries replaced.
    pub fn unrestricted(registry: Rc<ModuleRegistry>, io: Rc<GuestIo>) -> Self {
        Self {
            policy: None,
            registry,
            io,
        }
    }

    pub fn build(&self) -> HashMap<String, Value> {
        let mut raw = catalogue(&self.registry);
        let Some(policy) = &self.policy else {
            raw.insert("print".to_string(), self.io.print());
            raw.insert("input".to_string(), self.io.input());
            raw.insert("exit".to_string(), self.io.exit("exit"));
            raw.insert("quit".to_string(), self.io.exit("quit"));
            return raw;
        };

        let mut builtins = HashMap::new();
        for (name, wrapper) in policy.builtins() {
            let value = match wrapper {
                None => raw.remove(name),
                Some(Wrapper::Import) => Some(policy_import(self.registry.clone(), policy.clone())),
                Some(Wrapper::Attribute) => raw
                    .remove(name)
                    .map(|inner| attribute_guard(name, inner, policy.clone())),
                Some(Wrapper::Scan) => raw
                    .remove(name)
                    .map(|inner| scan_guard(name, inner, policy.clone())),
                Some(stream) => self.io.wrapper(name, stream),
            };
            match value {
                Some(value) => {
                    builtins.insert(name.to_string(), value);
                }
                None => warn!("enabled builtin '{}' has no implementation; skipped", name),
            }
        }
        builtins
    }
}

/// getattr/setattr/hasattr: a reserved name in the attribute slot must be
/// enabled as a special attribute.
fn attribute_guard(name: &str, inner: Value, policy: Arc<PolicyConfig>) -> Value {
    Value::native(name, move |interp: &mut Interpreter, args: CallArgs| {
        if let Some(Value::Str(attr)) = args.get(1) {
            if is_reserved_name(attr) && !policy.permits(&Capability::SpecialAttribute(&attr[..])) {
                return Err(CapabilityDenied::reserved(&[attr.to_string()]).into());
            }
        }
        interp.call(&inner, args)
    })
}

/// exec/eval: code built at runtime gets the same static check as the
/// submitted source.
fn scan_guard(name: &str, inner: Value, policy: Arc<PolicyConfig>) -> Value {
    let mode = if name == "eval" {
        ExecutionMode::SingleExpression
    } else {
        ExecutionMode::StatementBlock
    };
    Value::native(name, move |interp: &mut Interpreter, args: CallArgs| {
        if let Some(Value::Str(code)) = args.get(0) {
            let source = match mode {
                ExecutionMode::SingleExpression => code.trim(),
                ExecutionMode::StatementBlock => &code[..],
            };
            scan_mode(source, mode)
                .map_err(syntax_error)?
                .check(&policy)?;
        }
        interp.call(&inner, args)
    })
}
