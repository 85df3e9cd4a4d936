//! Capability proxies: the attenuated builtins, module and import surface a
//! guest executes against.
//!
//! These are a best-effort in-process filter. The worker process boundary
//! and the resource limits are what actually contain a guest.

pub mod builtins;
pub mod catalogue;
pub mod importer;
pub mod module_proxy;
pub mod stdlib;

pub use builtins::{BuiltinsProxy, GuestIo};
pub use importer::ModuleRegistry;
pub use module_proxy::ModuleProxy;
