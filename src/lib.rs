//! scriptbox: an execution sandbox for untrusted guest scripts
//! Each submission runs in its own worker process, behind a static policy scan,
//! capability proxies and scoped resource limits.
//!
//! # Architecture
//!
//! ## Guest Language ([`lang`])
//! - [`lang::parser`]: indentation-structured source to AST
//! - [`lang::compile`]: structural checks before execution
//! - [`lang::interp`]: tree-walking evaluator polled by a resource governor
//!
//! ## Policy ([`config`], [`scanner`])
//! - [`config::policy`]: capability allow-lists loaded from JSON documents
//! - [`scanner`]: imports and reserved attributes found before anything runs
//!
//! ## Capability Proxies ([`capability`])
//! - [`capability::builtins`]: the filtered builtin namespace and I/O wrappers
//! - [`capability::module_proxy`]: attribute-checked module views
//! - [`capability::importer`]: policy-gated `__import__` and native modules
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::rlimit`]: scoped CPU/address-space limits and the wall timer
//! - [`kernel::signal`]: async-signal-safe limit flags
//! - [`kernel::watchdog`]: in-process deadline, CPU and memory polling
//!
//! ## Execution ([`exec`], [`core`])
//! - [`exec::executor`]: parse, scan, compile, run under limits
//! - [`exec::worker`]: the worker process role
//! - [`core::protocol`]: base64 line framing
//! - [`core::channel`]: per-request worker processes with forced-kill fallback
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: structured security events
//!
//! # Design Principles
//!
//! 1. **Process boundary first** - in-process proxies are defense in depth
//! 2. **Deny before running** - policy violations found statically never execute
//! 3. **Scoped limits** - every armed limit is restored when the run ends
//! 4. **Failures are data** - only a broken worker crosses the channel as an error

// Guest language
pub mod lang;

// Static policy scan
pub mod scanner;

// Capability proxies
pub mod capability;

// Kernel Primitives
pub mod kernel;

// Execution inside the worker
pub mod exec;

// Controller side: protocol and worker processes
pub mod core;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the scriptbox binary
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use config::{PolicyConfig, PolicyStore, SandboxConfig};
pub use crate::core::IsolationChannel;
pub use exec::Executor;
pub use kernel::Enforcement;
