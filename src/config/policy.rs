//! Capability policy: named JSON documents and the typed snapshot built from them.
//!
//! [`PolicyStore`] owns the raw documents, each parsed lazily on first access
//! and cached for the store's lifetime. [`PolicyConfig`] is the immutable,
//! validated view the scanner and proxies consult through a single
//! [`PolicyConfig::permits`] predicate.

use crate::config::types::{Result, SandboxError};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const ENABLED_BUILTINS: &str = "enabled_builtins";
pub const ENABLED_MODULES: &str = "enabled_modules";
pub const ENABLED_SPECIAL_ATTRIBUTES: &str = "enabled_special_attributes";

/// Every document a store knows about.
pub const DOCUMENT_NAMES: &[&str] = &[ENABLED_BUILTINS, ENABLED_MODULES, ENABLED_SPECIAL_ATTRIBUTES];

/// Value of a module entry granting every attribute.
pub const WILDCARD: &str = "*";

const EMBEDDED_BUILTINS: &str = include_str!("../../policy/enabled_builtins.json");
const EMBEDDED_MODULES: &str = include_str!("../../policy/enabled_modules.json");
const EMBEDDED_SPECIAL_ATTRIBUTES: &str =
    include_str!("../../policy/enabled_special_attributes.json");

#[derive(Clone, Debug, PartialEq, Eq)]
enum PolicySource {
    Embedded,
    Directory(PathBuf),
}

/// Named policy documents, loaded lazily and cached per store.
#[derive(Debug)]
pub struct PolicyStore {
    source: PolicySource,
    documents: HashMap<&'static str, OnceCell<serde_json::Value>>,
}

impl PolicyStore {
    /// Documents compiled into the binary.
    pub fn embedded() -> Self {
        Self::with_source(PolicySource::Embedded)
    }

    /// `<dir>/<name>.json` for each document.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::with_source(PolicySource::Directory(dir.as_ref().to_path_buf()))
    }

    /// Directory store when a path is configured, embedded otherwise.
    pub fn from_optional_dir(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::embedded(),
        }
    }

    fn with_source(source: PolicySource) -> Self {
        let documents = DOCUMENT_NAMES
            .iter()
            .map(|name| (*name, OnceCell::new()))
            .collect();
        Self { source, documents }
    }

    pub fn describe(&self) -> String {
        match &self.source {
            PolicySource::Embedded => "embedded".to_string(),
            PolicySource::Directory(dir) => dir.display().to_string(),
        }
    }

    /// Fetch a document, loading it on first access.
    pub fn get(&self, name: &str) -> Result<&serde_json::Value> {
        let cell = self
            .documents
            .get(name)
            .ok_or_else(|| SandboxError::ConfigNotFound(name.to_string()))?;
        cell.get_or_try_init(|| self.load(name))
    }

    /// Drop the cached copy of one document; the next `get` reads it again.
    pub fn reload(&mut self, name: &str) -> Result<()> {
        let cell = self
            .documents
            .get_mut(name)
            .ok_or_else(|| SandboxError::ConfigNotFound(name.to_string()))?;
        cell.take();
        crate::observability::audit::events::policy_reload(name);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<serde_json::Value> {
        let text = match &self.source {
            PolicySource::Embedded => match name {
                ENABLED_BUILTINS => EMBEDDED_BUILTINS.to_string(),
                ENABLED_MODULES => EMBEDDED_MODULES.to_string(),
                ENABLED_SPECIAL_ATTRIBUTES => EMBEDDED_SPECIAL_ATTRIBUTES.to_string(),
                other => return Err(SandboxError::ConfigNotFound(other.to_string())),
            },
            PolicySource::Directory(dir) => {
                let path = dir.join(format!("{}.json", name));
                if !path.is_file() {
                    return Err(SandboxError::ConfigNotFound(path.display().to_string()));
                }
                std::fs::read_to_string(&path).map_err(|e| {
                    SandboxError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?
            }
        };
        let value = serde_json::from_str(&text).map_err(|e| {
            SandboxError::Config(format!("Failed to parse policy document '{}': {}", name, e))
        })?;
        log::debug!("loaded policy document '{}' from {}", name, self.describe());
        Ok(value)
    }
}

/// Policy-aware replacement installed in place of a raw builtin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wrapper {
    /// Printing into the bounded output buffer
    Output,
    /// Reading from the simulated stdin
    Stdin,
    /// Guest termination surfaced as data
    Exit,
    /// Reserved-name check for getattr/setattr/hasattr
    Attribute,
    /// Import allow-list plus module proxying
    Import,
    /// Static scan of code handed to exec/eval
    Scan,
}

impl Wrapper {
    pub fn name(self) -> &'static str {
        match self {
            Wrapper::Output => "output",
            Wrapper::Stdin => "stdin",
            Wrapper::Exit => "exit",
            Wrapper::Attribute => "attribute",
            Wrapper::Import => "import",
            Wrapper::Scan => "scan",
        }
    }
}

impl fmt::Display for Wrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Wrapper {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "output" => Ok(Wrapper::Output),
            "stdin" => Ok(Wrapper::Stdin),
            "exit" => Ok(Wrapper::Exit),
            "attribute" => Ok(Wrapper::Attribute),
            "import" => Ok(Wrapper::Import),
            "scan" => Ok(Wrapper::Scan),
            other => Err(SandboxError::Config(format!(
                "unknown builtin wrapper '{}'",
                other
            ))),
        }
    }
}

/// Which attributes of one module are reachable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleAllowance {
    All,
    Attributes(BTreeSet<String>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModuleEntry {
    Wildcard(String),
    Attributes(Vec<String>),
}

/// A single permission the guest may ask for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability<'a> {
    Builtin(&'a str),
    /// Root module name
    Module(&'a str),
    /// Attribute of a module, by qualified module name (`os.path`)
    ModuleAttribute { module: &'a str, attr: &'a str },
    SpecialAttribute(&'a str),
}

/// Immutable snapshot of the three policy documents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    builtins: BTreeMap<String, Option<Wrapper>>,
    modules: BTreeMap<String, ModuleAllowance>,
    special_attributes: BTreeSet<String>,
}

impl PolicyConfig {
    pub fn load(store: &PolicyStore) -> Result<Self> {
        Self::from_documents(
            store.get(ENABLED_BUILTINS)?,
            store.get(ENABLED_MODULES)?,
            store.get(ENABLED_SPECIAL_ATTRIBUTES)?,
        )
    }

    /// Load from the embedded documents.
    pub fn embedded() -> Result<Self> {
        Self::load(&PolicyStore::embedded())
    }

    pub fn from_documents(
        builtins: &serde_json::Value,
        modules: &serde_json::Value,
        special_attributes: &serde_json::Value,
    ) -> Result<Self> {
        let raw_builtins: BTreeMap<String, Option<String>> =
            serde_json::from_value(builtins.clone()).map_err(|e| {
                SandboxError::Config(format!("{}: expected {{name: wrapper|null}}: {}", ENABLED_BUILTINS, e))
            })?;
        let mut typed_builtins = BTreeMap::new();
        for (name, wrapper) in raw_builtins {
            let wrapper = wrapper.as_deref().map(Wrapper::from_str).transpose()?;
            typed_builtins.insert(name, wrapper);
        }

        let raw_modules: BTreeMap<String, ModuleEntry> = serde_json::from_value(modules.clone())
            .map_err(|e| {
                SandboxError::Config(format!(
                    "{}: expected {{module: [attr, ...] | \"*\"}}: {}",
                    ENABLED_MODULES, e
                ))
            })?;
        let mut typed_modules = BTreeMap::new();
        for (name, entry) in raw_modules {
            let allowance = match entry {
                ModuleEntry::Wildcard(w) if w == WILDCARD => ModuleAllowance::All,
                ModuleEntry::Wildcard(other) => {
                    return Err(SandboxError::Config(format!(
                        "{}: module '{}' has attribute set '{}', expected a list or \"*\"",
                        ENABLED_MODULES, name, other
                    )))
                }
                ModuleEntry::Attributes(attrs) => {
                    ModuleAllowance::Attributes(attrs.into_iter().collect())
                }
            };
            typed_modules.insert(name, allowance);
        }

        let special: BTreeSet<String> = serde_json::from_value(special_attributes.clone())
            .map_err(|e| {
                SandboxError::Config(format!(
                    "{}: expected [name, ...]: {}",
                    ENABLED_SPECIAL_ATTRIBUTES, e
                ))
            })?;

        Ok(Self {
            builtins: typed_builtins,
            modules: typed_modules,
            special_attributes: special,
        })
    }

    /// The one allow-list predicate.
    pub fn permits(&self, capability: &Capability) -> bool {
        match *capability {
            Capability::Builtin(name) => self.builtins.contains_key(name),
            Capability::Module(name) => {
                let root = name.split('.').next().unwrap_or(name);
                self.modules.contains_key(root)
            }
            Capability::ModuleAttribute { module, attr } => {
                match self.modules.get(module) {
                    Some(ModuleAllowance::All) => true,
                    Some(ModuleAllowance::Attributes(attrs)) => attrs.contains(attr),
                    // submodules inherit a wildcard grant on their root
                    None => {
                        let root = module.split('.').next().unwrap_or(module);
                        root != module
                            && matches!(self.modules.get(root), Some(ModuleAllowance::All))
                    }
                }
            }
            Capability::SpecialAttribute(name) => self.special_attributes.contains(name),
        }
    }

    /// Enabled builtins with their wrapper, in name order.
    pub fn builtins(&self) -> impl Iterator<Item = (&str, Option<Wrapper>)> {
        self.builtins.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn special_attributes(&self) -> &BTreeSet<String> {
        &self.special_attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> PolicyConfig {
        PolicyConfig::from_documents(
            &json!({"print": "output", "len": null, "getattr": "attribute"}),
            &json!({"math": "*", "os": ["getcwd"], "os.path": ["join"]}),
            &json!(["__name__"]),
        )
        .unwrap()
    }

    #[test]
    fn test_permits_single_predicate() {
        let p = policy();
        assert!(p.permits(&Capability::Builtin("len")));
        assert!(!p.permits(&Capability::Builtin("open")));
        assert!(p.permits(&Capability::Module("os")));
        assert!(p.permits(&Capability::Module("os.path")));
        assert!(!p.permits(&Capability::Module("subprocess")));
        assert!(p.permits(&Capability::ModuleAttribute { module: "math", attr: "sqrt" }));
        assert!(p.permits(&Capability::ModuleAttribute { module: "os", attr: "getcwd" }));
        assert!(!p.permits(&Capability::ModuleAttribute { module: "os", attr: "system" }));
        assert!(p.permits(&Capability::ModuleAttribute { module: "os.path", attr: "join" }));
        assert!(!p.permits(&Capability::ModuleAttribute { module: "os.path", attr: "exists" }));
        assert!(p.permits(&Capability::SpecialAttribute("__name__")));
        assert!(!p.permits(&Capability::SpecialAttribute("__dict__")));
    }

    #[test]
    fn test_wildcard_extends_to_submodules() {
        let p = PolicyConfig::from_documents(&json!({}), &json!({"pkg": "*"}), &json!([])).unwrap();
        assert!(p.permits(&Capability::ModuleAttribute { module: "pkg.sub", attr: "anything" }));
    }

    #[test]
    fn test_unknown_wrapper_is_rejected() {
        let err = PolicyConfig::from_documents(&json!({"print": "teleport"}), &json!({}), &json!([]))
            .unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_bad_wildcard_is_rejected() {
        assert!(PolicyConfig::from_documents(&json!({}), &json!({"math": "all"}), &json!([])).is_err());
    }

    #[test]
    fn test_embedded_documents_parse() {
        let p = PolicyConfig::embedded().unwrap();
        assert_eq!(
            p.builtins().find(|(n, _)| *n == "print").map(|(_, w)| w),
            Some(Some(Wrapper::Output))
        );
        assert!(p.permits(&Capability::Module("math")));
        assert!(!p.permits(&Capability::Module("os")));
        assert!(!p.permits(&Capability::Builtin("open")));
    }

    #[test]
    fn test_unknown_document_is_not_found() {
        let store = PolicyStore::embedded();
        assert!(matches!(store.get("enabled_teleports"), Err(SandboxError::ConfigNotFound(_))));
        assert!(store.get(ENABLED_MODULES).is_ok());
    }
}
