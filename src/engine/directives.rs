//! Directive Applier
//!
//! Applies one control file's directives to one matched definition. Directive
//! kinds run in a fixed order regardless of their order in the source:
//!
//! | Target    | Order                                |
//! |-----------|--------------------------------------|
//! | Workflow  | remove → replace → insert → append   |
//! | Proposal  | replace → remove → append            |
//!
//! A directive naming a step that does not exist is a no-op and produces a
//! [`DirectiveWarning`]; it never fails the merge.

use serde::Serialize;
use strum::Display;
use tracing::warn;

use crate::control_file::{ProposalUpdate, WorkflowUpdate};
use crate::error::WizflowError;
use crate::types::{Dimensional, ModuleRef, ProposalDef, ProposalTab, WorkflowDef};

/// Directive kinds that reference an existing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    Remove,
    Replace,
    Insert,
}

/// A directive whose target step was not found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveWarning {
    pub kind: DirectiveKind,
    pub target: String,
    /// `stage/mode/arch` (plus proposal name) of the patched definition
    pub scope: String,
}

/// Identity of the control file contributing directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct Contributor<'a> {
    pub textdomain: &'a str,
    pub display_name: &'a str,
}

impl Contributor<'_> {
    fn tag(&self, refs: &[ModuleRef]) -> Vec<ModuleRef> {
        refs.iter()
            .cloned()
            .map(|m| m.with_textdomain(self.textdomain))
            .collect()
    }
}

/// Delete every module named `name`. Returns true if any was removed.
pub fn remove_modules(modules: &mut Vec<ModuleRef>, name: &str) -> bool {
    let before = modules.len();
    modules.retain(|m| m.name() != name);
    modules.len() != before
}

/// Splice `new_refs` in place of the first module named `name`.
///
/// With `inherit`, extra fields of a detailed anchor are carried onto each
/// new reference.
pub fn replace_module(
    modules: &mut Vec<ModuleRef>,
    name: &str,
    new_refs: &[ModuleRef],
    inherit: bool,
) -> bool {
    let Some(pos) = modules.iter().position(|m| m.name() == name) else {
        return false;
    };

    let anchor = modules.remove(pos);
    let replacement: Vec<ModuleRef> = match anchor.extra() {
        Some(extra) if inherit => new_refs
            .iter()
            .cloned()
            .map(|m| m.inherit_fields(extra))
            .collect(),
        _ => new_refs.to_vec(),
    };
    modules.splice(pos..pos, replacement);
    true
}

/// Splice `new_refs` immediately before the module named `before`, keeping it.
pub fn insert_modules(modules: &mut Vec<ModuleRef>, before: &str, new_refs: &[ModuleRef]) -> bool {
    let Some(pos) = modules.iter().position(|m| m.name() == before) else {
        return false;
    };
    modules.splice(pos..pos, new_refs.iter().cloned());
    true
}

fn note(
    warnings: &mut Vec<DirectiveWarning>,
    kind: DirectiveKind,
    target: &str,
    scope: &str,
) {
    let err = WizflowError::UnknownDirectiveTarget(format!("{} '{}' in {}", kind, target, scope));
    warn!("{}, skipping", err);
    warnings.push(DirectiveWarning {
        kind,
        target: target.to_string(),
        scope: scope.to_string(),
    });
}

/// Apply a workflow update to `def`.
pub fn apply_workflow_update(
    def: &mut WorkflowDef,
    update: &WorkflowUpdate,
    contributor: Contributor<'_>,
) -> Vec<DirectiveWarning> {
    let scope = format!("workflow {}/{}/{}", def.stage, def.mode, def.archs());
    let mut warnings = Vec::new();

    for name in &update.remove_modules {
        if !remove_modules(&mut def.modules, name) {
            note(&mut warnings, DirectiveKind::Remove, name, &scope);
        }
    }

    for directive in &update.replace_modules {
        let new_refs = contributor.tag(&directive.modules);
        if !replace_module(&mut def.modules, &directive.replace, &new_refs, false) {
            note(&mut warnings, DirectiveKind::Replace, &directive.replace, &scope);
        }
    }

    for directive in &update.insert_modules {
        let new_refs = contributor.tag(&directive.modules);
        if !insert_modules(&mut def.modules, &directive.before, &new_refs) {
            note(&mut warnings, DirectiveKind::Insert, &directive.before, &scope);
        }
    }

    def.modules.extend(contributor.tag(&update.append_modules));

    warnings
}

/// Apply a proposal update to `def`. Tabs are patched alongside the flat
/// module list.
pub fn apply_proposal_update(
    def: &mut ProposalDef,
    update: &ProposalUpdate,
    contributor: Contributor<'_>,
) -> Vec<DirectiveWarning> {
    let scope = format!(
        "proposal '{}' {}/{}/{}",
        def.name, def.stage, def.mode, def.archs
    );
    let mut warnings = Vec::new();

    for directive in &update.replace_modules {
        let new_refs = contributor.tag(&directive.modules);
        let mut found =
            replace_module(&mut def.proposal_modules, &directive.replace, &new_refs, true);
        for tab in &mut def.proposal_tabs {
            found |= replace_module(&mut tab.proposal_modules, &directive.replace, &new_refs, true);
        }
        if !found {
            note(&mut warnings, DirectiveKind::Replace, &directive.replace, &scope);
        }
    }

    for name in &update.remove_modules {
        let mut found = remove_modules(&mut def.proposal_modules, name);
        for tab in &mut def.proposal_tabs {
            found |= remove_modules(&mut tab.proposal_modules, name);
        }
        if !found {
            note(&mut warnings, DirectiveKind::Remove, name, &scope);
        }
    }

    if !update.append_modules.is_empty() {
        let new_refs = contributor.tag(&update.append_modules);
        if !def.proposal_tabs.is_empty() {
            def.proposal_tabs.push(ProposalTab {
                label: contributor.display_name.to_string(),
                proposal_modules: new_refs.clone(),
                textdomain: contributor.textdomain.to_string(),
            });
        }
        def.proposal_modules.extend(new_refs);
    }

    if let Some(enable_skip) = update.enable_skip {
        def.enable_skip = enable_skip;
    }

    warnings
}
