//! Matcher
//!
//! Finds the workflow or proposal a directive set should be merged into.
//! Stage and mode must always match. Architecture matches exactly, or the
//! candidate accepts any architecture (`""` / `"all"`), in which case it is
//! remembered as a fallback while scanning continues for an exact match.

use strum::Display;

use crate::types::{is_any_arch, Dimensional};

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum MatchKind {
    Exact,
    ArchAllFallback,
    None,
}

/// Find the entry for `(stage, mode, arch)`.
pub fn find<T: Dimensional>(
    store: &[T],
    stage: &str,
    mode: &str,
    arch: &str,
) -> (Option<usize>, MatchKind) {
    find_with(store, stage, mode, arch, |_| true)
}

/// Like [`find`], with an extra slot predicate (proposals also match on name).
pub fn find_with<T, F>(
    store: &[T],
    stage: &str,
    mode: &str,
    arch: &str,
    same_slot: F,
) -> (Option<usize>, MatchKind)
where
    T: Dimensional,
    F: Fn(&T) -> bool,
{
    let mut fallback = None;

    for (index, candidate) in store.iter().enumerate() {
        if candidate.stage() != stage || candidate.mode() != mode || !same_slot(candidate) {
            continue;
        }

        let candidate_arch = candidate.archs();
        if candidate_arch == arch || (is_any_arch(arch) && is_any_arch(candidate_arch)) {
            return (Some(index), MatchKind::Exact);
        }
        if is_any_arch(candidate_arch) && fallback.is_none() {
            fallback = Some(index);
        }
    }

    match fallback {
        Some(index) => (Some(index), MatchKind::ArchAllFallback),
        None => (None, MatchKind::None),
    }
}

/// Clone an any-architecture entry into a new entry for `arch`, appended to
/// the store. The original entry is left untouched. Returns the new index.
pub fn materialize<T: Dimensional>(store: &mut Vec<T>, fallback: usize, arch: &str) -> usize {
    let mut concrete = store[fallback].clone();
    let (stage, mode) = (concrete.stage().to_string(), concrete.mode().to_string());
    concrete.set_dimensions(&stage, &mode, arch);
    store.push(concrete);
    store.len() - 1
}
