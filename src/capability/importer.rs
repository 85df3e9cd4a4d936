//! Module resolution for guest `import` statements.
//!
//! [`ModuleRegistry`] owns the native modules of one run, built on first
//! import and cached. The two `__import__` natives sit on top of it: the raw
//! one hands out modules as they are, the policy one checks the root name and
//! returns a [`ModuleProxy`].

use crate::capability::module_proxy::ModuleProxy;
use crate::capability::stdlib;
use crate::config::policy::{Capability, PolicyConfig};
use crate::config::types::CapabilityDenied;
use crate::lang::value::raise;
use crate::lang::{CallArgs, EvalResult, Module, Value};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

pub struct ModuleRegistry {
    hardened: bool,
    loaded: RefCell<HashMap<String, Rc<Module>>>,
    this: Weak<ModuleRegistry>,
}

impl ModuleRegistry {
    /// `hardened` registries strip numeric file I/O and serve the token pickle.
    pub fn new(hardened: bool) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            hardened,
            loaded: RefCell::new(HashMap::new()),
            this: this.clone(),
        })
    }

    fn not_found(name: &str) -> crate::lang::Unwind {
        raise("ImportError", format!("No module named '{}'", name))
    }

    fn root(&self, name: &str) -> EvalResult<Rc<Module>> {
        if let Some(module) = self.loaded.borrow().get(name) {
            return Ok(module.clone());
        }
        let module = stdlib::build(name, self.this.clone(), self.hardened)
            .map(Rc::new)
            .ok_or_else(|| Self::not_found(name))?;
        debug!("loaded native module {}", name);
        self.loaded
            .borrow_mut()
            .insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// Resolve a dotted name to its leaf module.
    pub fn load(&self, dotted: &str) -> EvalResult<Rc<Module>> {
        let mut parts = dotted.split('.');
        let first = parts.next().unwrap_or(dotted);
        let mut module = self.root(first)?;
        for part in parts {
            module = match module.get(part) {
                Some(Value::Module(inner)) => inner,
                _ => return Err(Self::not_found(dotted)),
            };
        }
        Ok(module)
    }

    /// Build the named root modules ahead of time. Unknown names are left
    /// for the import statement to report.
    pub fn preload<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> usize {
        names
            .into_iter()
            .filter(|name| self.root(name).is_ok())
            .count()
    }
}

/// `fromlist` as passed positionally (second or fourth slot) or by keyword.
fn wants_leaf(args: &CallArgs) -> bool {
    let fromlist = args
        .keyword("fromlist")
        .or_else(|| args.get(3))
        .or_else(|| match args.get(1) {
            Some(v @ (Value::List(_) | Value::Tuple(_))) => Some(v),
            _ => None,
        });
    fromlist.map_or(false, Value::truthy)
}

fn resolve(registry: &ModuleRegistry, args: &CallArgs) -> EvalResult<(String, Rc<Module>)> {
    args.check("__import__", 1, 5, &["globals", "locals", "fromlist", "level"])?;
    let name = args.text(0, "__import__")?;
    if name.is_empty() {
        return Err(raise("ValueError", "Empty module name"));
    }
    let leaf = registry.load(&name)?;
    let root = name.split('.').next().unwrap_or(&name).to_string();
    if wants_leaf(args) {
        Ok((root, leaf))
    } else {
        Ok((root.clone(), registry.load(&root)?))
    }
}

/// Unchecked `__import__`.
pub fn raw_import(registry: Rc<ModuleRegistry>) -> Value {
    Value::native("__import__", move |_, args| {
        let (_, module) = resolve(&registry, &args)?;
        Ok(Value::Module(module))
    })
}

/// `__import__` gated on the enabled-modules document.
pub fn policy_import(registry: Rc<ModuleRegistry>, policy: Arc<PolicyConfig>) -> Value {
    Value::native("__import__", move |_, args| {
        let name = args.text(0, "__import__")?;
        let root = name.split('.').next().unwrap_or(&name);
        if !policy.permits(&Capability::Module(root)) {
            return Err(CapabilityDenied::module(root).into());
        }
        let (_, module) = resolve(&registry, &args)?;
        Ok(ModuleProxy::wrap(module, &policy))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::interp::tests::Unmetered;
    use crate::lang::{Interpreter, Unwind};

    fn interp() -> Interpreter {
        Interpreter::new(HashMap::new(), Box::new(Unmetered))
    }

    #[test]
    fn test_registry_caches_and_traverses() {
        let registry = ModuleRegistry::new(false);
        let a = registry.load("os").unwrap();
        let b = registry.load("os").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(registry.load("os.path").unwrap().name(), "os.path");
        assert!(registry.load("os.nothing").is_err());
        assert!(registry.load("sockets").is_err());
    }

    #[test]
    fn test_hardened_registry_strips_file_io() {
        let registry = ModuleRegistry::new(true);
        let numeric = registry.load("numeric").unwrap();
        assert!(numeric.get("zeros").is_some());
        assert!(numeric.get("save").is_none());
        assert!(numeric.get("fromfile").is_none());

        let plain = ModuleRegistry::new(false);
        assert!(plain.load("numeric").unwrap().get("save").is_some());
    }

    #[test]
    fn test_preload_skips_unknown_names() {
        let registry = ModuleRegistry::new(true);
        assert_eq!(registry.preload(["math", "nope", "json"]), 2);
    }

    #[test]
    fn test_policy_import_denies_by_root() {
        let policy = Arc::new(PolicyConfig::embedded().unwrap());
        let import = policy_import(ModuleRegistry::new(true), policy);
        let mut interp = interp();

        let err = interp
            .call(&import, CallArgs::new(vec![Value::from("os.path")]))
            .unwrap_err();
        match err {
            Unwind::Denied(denied) => assert_eq!(denied.target, "os"),
            other => panic!("expected denial, got {:?}", other),
        }

        let math = interp
            .call(&import, CallArgs::new(vec![Value::from("math")]))
            .unwrap();
        assert_eq!(math.type_name(), "module");
        assert!(matches!(math, Value::Object(_)));
    }

    #[test]
    fn test_fromlist_returns_leaf() {
        let import = raw_import(ModuleRegistry::new(false));
        let mut interp = interp();
        let root = interp
            .call(&import, CallArgs::new(vec![Value::from("os.path")]))
            .unwrap();
        assert_eq!(root.repr(), "<module 'os'>");
        let leaf = interp
            .call(
                &import,
                CallArgs::new(vec![
                    Value::from("os.path"),
                    Value::list(vec![Value::from("join")]),
                ]),
            )
            .unwrap();
        assert_eq!(leaf.repr(), "<module 'os.path'>");
    }
}
