//! Configuration and policy
//!
//! Shared types, the capability policy, controller settings and their validation.

pub mod loader;
pub mod policy;
pub mod types;
pub mod validator;

pub use loader::SandboxConfig;
pub use policy::{Capability, PolicyConfig, PolicyStore, Wrapper};
pub use types::*;
