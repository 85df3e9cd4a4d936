//! Policy-checked view of an imported module.

use crate::config::policy::{Capability, PolicyConfig};
use crate::config::types::CapabilityDenied;
use crate::lang::value::raise;
use crate::lang::{is_reserved_name, EvalResult, GuestObject, Module, Value};
use std::rc::Rc;
use std::sync::Arc;

/// Slots of the proxy itself. Never delegated, never reachable.
pub const PRIVATE_SLOTS: &[&str] = &["__wrapped__", "__policy__"];

/// Every read or write goes through [`PolicyConfig::permits`]. Reserved
/// names are passed to the wrapped module unchecked so normal object protocol
/// keeps working; this is also why the static scan and the attribute
/// builtins must gate them.
pub struct ModuleProxy {
    module: Rc<Module>,
    policy: Arc<PolicyConfig>,
}

impl ModuleProxy {
    pub fn new(module: Rc<Module>, policy: Arc<PolicyConfig>) -> Self {
        Self { module, policy }
    }

    pub fn wrap(module: Rc<Module>, policy: &Arc<PolicyConfig>) -> Value {
        Value::Object(Rc::new(Self::new(module, policy.clone())))
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.module.name(), name)
    }

    fn permits(&self, name: &str) -> bool {
        self.policy.permits(&Capability::ModuleAttribute {
            module: self.module.name(),
            attr: name,
        })
    }

    fn guard(&self, name: &str) -> EvalResult<()> {
        if PRIVATE_SLOTS.contains(&name) {
            return Err(CapabilityDenied::attribute(&self.qualified(name)).into());
        }
        if is_reserved_name(name) || self.permits(name) {
            Ok(())
        } else {
            Err(CapabilityDenied::attribute(&self.qualified(name)).into())
        }
    }

    fn missing(&self, name: &str) -> crate::lang::Unwind {
        raise(
            "AttributeError",
            format!("module '{}' has no attribute '{}'", self.module.name(), name),
        )
    }
}

impl GuestObject for ModuleProxy {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_attr(&self, name: &str) -> EvalResult {
        self.guard(name)?;
        let found = if is_reserved_name(name) {
            self.module.reserved_attr(name)
        } else {
            self.module.get(name)
        };
        match found {
            // submodule traversal stays governed
            Some(Value::Module(inner)) => Ok(Self::wrap(inner, &self.policy)),
            Some(value) => Ok(value),
            None => Err(self.missing(name)),
        }
    }

    fn set_attr(&self, name: &str, value: Value) -> EvalResult<()> {
        self.guard(name)?;
        self.module.set(name, value);
        Ok(())
    }

    fn attr_names(&self) -> Vec<String> {
        self.module
            .names()
            .into_iter()
            .filter(|name| self.permits(name))
            .collect()
    }

    fn repr(&self) -> String {
        format!("<module '{}'>", self.module.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Unwind;
    use serde_json::json;

    fn fixture() -> Value {
        let policy = Arc::new(
            PolicyConfig::from_documents(
                &json!({}),
                &json!({"pkg": ["visible", "sub"], "pkg.sub": ["leaf"]}),
                &json!([]),
            )
            .unwrap(),
        );
        let sub = Rc::new(Module::new("pkg.sub", ""));
        sub.set("leaf", Value::Int(1));
        sub.set("hidden", Value::Int(2));
        let pkg = Rc::new(Module::new("pkg", "demo package"));
        pkg.set("visible", Value::Int(3));
        pkg.set("secret", Value::Int(4));
        pkg.set("sub", Value::Module(sub));
        ModuleProxy::wrap(pkg, &policy)
    }

    fn get(proxy: &Value, name: &str) -> EvalResult {
        match proxy {
            Value::Object(o) => o.get_attr(name),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_allow_list_is_enforced() {
        let proxy = fixture();
        assert!(matches!(get(&proxy, "visible"), Ok(Value::Int(3))));
        match get(&proxy, "secret") {
            Err(Unwind::Denied(denied)) => assert_eq!(denied.target, "pkg.secret"),
            other => panic!("expected denial, got {:?}", other.map(|v| v.repr())),
        }
    }

    #[test]
    fn test_submodules_are_wrapped_recursively() {
        let proxy = fixture();
        let sub = get(&proxy, "sub").unwrap();
        assert!(matches!(sub, Value::Object(_)));
        assert!(matches!(get(&sub, "leaf"), Ok(Value::Int(1))));
        assert!(matches!(get(&sub, "hidden"), Err(Unwind::Denied(_))));
    }

    #[test]
    fn test_reserved_names_delegate_but_private_slots_do_not() {
        let proxy = fixture();
        assert_eq!(get(&proxy, "__name__").unwrap().to_text(), "pkg");
        assert_eq!(get(&proxy, "__doc__").unwrap().to_text(), "demo package");
        assert!(matches!(get(&proxy, "__wrapped__"), Err(Unwind::Denied(_))));
        assert!(matches!(get(&proxy, "__policy__"), Err(Unwind::Denied(_))));
    }

    #[test]
    fn test_writes_are_checked_and_listing_is_filtered() {
        let proxy = fixture();
        let Value::Object(obj) = &proxy else { unreachable!() };
        assert!(obj.set_attr("visible", Value::Int(9)).is_ok());
        assert!(matches!(obj.set_attr("secret", Value::Int(9)), Err(Unwind::Denied(_))));
        assert_eq!(obj.attr_names(), vec!["sub".to_string(), "visible".to_string()]);
    }
}
