//! Thin wrappers around Linux kernel primitives used to bound one execution.
//!
//! All `unsafe` code is concentrated here with explicit SAFETY comments.
//! Dependency direction: memory/signal -> watchdog -> rlimit

pub mod memory;
pub mod rlimit;
pub mod signal;
pub mod watchdog;

pub use rlimit::{ArmedLimits, Enforcement, ResourceLimiter};
pub use watchdog::Watchdog;
