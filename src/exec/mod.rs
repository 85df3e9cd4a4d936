//! Execution inside the worker process
//!
//! The executor turns one request into one result; the worker frames it on
//! stdin/stdout.

pub mod executor;
pub mod worker;

pub use executor::Executor;
pub use worker::serve;
