//! Specializer
//!
//! Expands definitions whose `stage`, `mode` or `archs` hold comma-separated
//! lists into the Cartesian product of single-valued definitions. Runs before
//! any matching so downstream code only ever sees one value per dimension.
//!
//! | Input                                 | Output entries |
//! |---------------------------------------|----------------|
//! | `stage="s", mode="a,b", archs="x,y"`  | 4              |
//! | `stage="", mode="", archs=""`         | 1 (wildcards)  |

use crate::types::Dimensional;

/// Split a dimension value into its items. Empty input yields the single
/// wildcard `""`.
pub fn split_values(value: &str) -> Vec<String> {
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();

    if items.is_empty() {
        vec![String::new()]
    } else {
        items
    }
}

/// Expand every definition into single-valued copies.
///
/// Order is stable: definitions keep their input order, and each one expands
/// stage-major, then mode, then architecture.
pub fn specialize<T: Dimensional>(defs: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(defs.len());

    for def in defs {
        let stages = split_values(def.stage());
        let modes = split_values(def.mode());
        let archs = split_values(def.archs());

        for stage in &stages {
            for mode in &modes {
                for arch in &archs {
                    let mut single = def.clone();
                    single.set_dimensions(stage, mode, arch);
                    out.push(single);
                }
            }
        }
    }

    out
}

/// Returns true if no dimension holds more than one value.
pub fn is_single_valued<T: Dimensional>(def: &T) -> bool {
    [def.stage(), def.mode(), def.archs()]
        .iter()
        .all(|value| !value.contains(','))
}
