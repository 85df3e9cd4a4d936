//! Utilities
//!
//! Bounded output capture shared by the worker and the controller.

pub mod output;
