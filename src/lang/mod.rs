//! The guest scripting dialect: an indentation-structured, dynamically typed
//! language in the Python family.
//!
//! - [`lexer`] / [`parser`]: source text to [`ast`]
//! - [`compile`]: structural checks run before anything executes
//! - [`interp`]: tree-walking evaluator polled by a [`interp::Governor`]
//! - [`value`] / [`methods`]: runtime values and their builtin methods

pub mod ast;
pub mod compile;
pub mod interp;
pub mod lexer;
pub mod methods;
pub mod parser;
pub mod value;

pub use compile::{compile, compile_expression};
pub use interp::{is_reserved_name, Governor, Interpreter};
pub use parser::{parse_expression, parse_program};
pub use value::{CallArgs, EvalResult, GuestObject, Module, Unwind, Value};
