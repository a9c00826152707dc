//! Bundled map/reduce applications.

use crate::{MapFn, ReduceFn};

pub mod crash;
pub mod wc;

/// Resolves an application by name.
pub fn lookup(name: &str) -> Option<(MapFn, ReduceFn)> {
    match name {
        "wc" => Some((wc::map, wc::reduce)),
        "crash" => Some((crash::map, crash::reduce)),
        _ => None,
    }
}
