//! Engine modules: the pure merge logic.
//!
//! The engine layer sits between control files (what add-ons want changed) and
//! the merge session (which replays them). Nothing here performs I/O.

pub mod directives;
pub mod matcher;
pub mod specialize;
