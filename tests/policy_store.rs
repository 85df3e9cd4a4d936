//! Policy documents loaded from a directory.

use scriptbox::config::policy::{Capability, ENABLED_MODULES};
use scriptbox::{PolicyConfig, PolicyStore, SandboxError};
use std::fs;
use std::path::Path;

fn write_policy(dir: &Path, modules: &str) {
    fs::write(
        dir.join("enabled_builtins.json"),
        r#"{"print": "output", "__import__": "import", "len": null}"#,
    )
    .unwrap();
    fs::write(dir.join("enabled_modules.json"), modules).unwrap();
    fs::write(dir.join("enabled_special_attributes.json"), r#"["__name__"]"#).unwrap();
}

#[test]
fn test_directory_policy_is_used() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), r#"{"math": ["sqrt"]}"#);

    let policy = PolicyConfig::load(&PolicyStore::from_dir(dir.path())).unwrap();
    assert!(policy.permits(&Capability::Builtin("len")));
    assert!(!policy.permits(&Capability::Builtin("open")));
    assert!(policy.permits(&Capability::Module("math")));
    assert!(policy.permits(&Capability::ModuleAttribute {
        module: "math",
        attr: "sqrt"
    }));
    assert!(!policy.permits(&Capability::ModuleAttribute {
        module: "math",
        attr: "pi"
    }));
    assert!(!policy.permits(&Capability::Module("json")));
}

#[test]
fn test_missing_document_is_config_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = PolicyStore::from_dir(dir.path());
    assert!(matches!(
        store.get(ENABLED_MODULES),
        Err(SandboxError::ConfigNotFound(_))
    ));
    assert!(matches!(
        store.get("enabled_everything"),
        Err(SandboxError::ConfigNotFound(_))
    ));
}

#[test]
fn test_reload_picks_up_edits() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), r#"{"math": "*"}"#);

    let mut store = PolicyStore::from_dir(dir.path());
    assert!(store.get(ENABLED_MODULES).unwrap().get("json").is_none());

    fs::write(dir.path().join("enabled_modules.json"), r#"{"json": "*"}"#).unwrap();
    // cached until reloaded
    assert!(store.get(ENABLED_MODULES).unwrap().get("json").is_none());

    store.reload(ENABLED_MODULES).unwrap();
    assert!(store.get(ENABLED_MODULES).unwrap().get("json").is_some());
    let policy = PolicyConfig::load(&store).unwrap();
    assert!(policy.permits(&Capability::Module("json")));
    assert!(!policy.permits(&Capability::Module("math")));
}

#[test]
fn test_unknown_wrapper_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), "{}");
    fs::write(dir.path().join("enabled_builtins.json"), r#"{"print": "teleport"}"#).unwrap();
    let err = PolicyConfig::load(&PolicyStore::from_dir(dir.path())).unwrap_err();
    assert!(matches!(err, SandboxError::Config(_)), "{:?}", err);
}

#[test]
fn test_malformed_document_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    write_policy(dir.path(), "{not json");
    let err = PolicyConfig::load(&PolicyStore::from_dir(dir.path())).unwrap_err();
    assert!(matches!(err, SandboxError::Config(_)));
}
