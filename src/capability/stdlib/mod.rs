//! Native modules the importer can resolve.

use crate::capability::importer::ModuleRegistry;
use crate::lang::Module;
use std::rc::Weak;

pub mod json;
pub mod math;
pub mod numeric;
pub mod os;
pub mod pickle;
pub mod random;
pub mod string;
pub mod time;

/// Root names of every native module.
pub const CATALOGUE: &[&str] = &[
    "json", "math", "numeric", "os", "pickle", "random", "string", "time",
];

/// Build a fresh instance of a root module.
///
/// `hardened` strips numeric file I/O and swaps pickle for the token table.
pub fn build(name: &str, registry: Weak<ModuleRegistry>, hardened: bool) -> Option<Module> {
    let module = match name {
        "json" => json::module(),
        "math" => math::module(),
        "os" => os::module(),
        "random" => random::module(),
        "string" => string::module(),
        "time" => time::module(),
        "numeric" => {
            let module = numeric::module();
            if hardened {
                for attr in numeric::FILE_FUNCTIONS {
                    module.remove(attr);
                }
            }
            module
        }
        "pickle" if hardened => pickle::token_module(),
        "pickle" => pickle::module(registry),
        _ => return None,
    };
    Some(module)
}
