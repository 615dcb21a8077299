//! Merge Session
//!
//! Rebuilds the derived workflow state from scratch: restore the pristine base
//! snapshot, replay every registered control file in registration order, then
//! publish the result. There is no incremental merge.
//!
//! # Session Flow
//!
//! ```text
//! Idle
//!   ↓
//! Resetting   (restore base snapshot, clear duplicate tracking)
//!   ↓
//! Replaying   (per file: fingerprint → parse → specialize → match → apply)
//!   ↓
//! Committed   (publish derived state, clear dirty flag, bump generation)
//!   ↓
//! Idle
//! ```
//!
//! A file that fails to replay contributes nothing: it is applied to a scratch
//! copy which is only kept on success. The session always commits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, TryLockError};
use strum::Display;
use tracing::{debug, info, info_span, warn};

use crate::collaborators::{JsonTreeLoader, TreeLoader, WizardUi};
use crate::control_file::{ControlFile, ControlFileRecord};
use crate::engine::directives::{
    apply_proposal_update, apply_workflow_update, Contributor, DirectiveWarning,
};
use crate::engine::matcher::{find, find_with, materialize, MatchKind};
use crate::engine::specialize::specialize;
use crate::error::{FailureKind, Result, WizflowError};
use crate::store::WorkflowStore;
use crate::types::{
    append_unique, Dimensional, FinishPhase, FinishSteps, ProductFeatures, ProposalDef,
    WorkflowDef, INITIAL_STAGE,
};

/// Workflows, proposals and product-wide settings.
///
/// Used both for the pristine base snapshot and for the derived state a
/// session publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSet {
    #[serde(default)]
    pub workflows: Vec<WorkflowDef>,

    #[serde(default)]
    pub proposals: Vec<ProposalDef>,

    #[serde(default)]
    pub finish_steps: FinishSteps,

    #[serde(default)]
    pub clone_modules: Vec<String>,

    #[serde(default)]
    pub system_roles: Vec<Value>,

    #[serde(default)]
    pub product_features: ProductFeatures,
}

/// Captured at product activation, restored at every session start.
pub type BaseSnapshot = WorkflowSet;

/// Published by a committed session.
pub type DerivedState = WorkflowSet;

impl WorkflowSet {
    /// Specialize all workflow and proposal definitions in place.
    pub fn specialized(mut self) -> Self {
        self.workflows = specialize(&self.workflows);
        self.proposals = specialize(&self.proposals);
        self
    }

    /// Workflow for a stage/mode/arch, falling back to an `all` entry.
    pub fn workflow(&self, stage: &str, mode: &str, arch: &str) -> Option<&WorkflowDef> {
        let (index, _) = find(&self.workflows, stage, mode, arch);
        index.map(|i| &self.workflows[i])
    }

    /// Proposal for a stage/mode/name/arch, falling back to an `all` entry.
    pub fn proposal(&self, stage: &str, mode: &str, name: &str, arch: &str) -> Option<&ProposalDef> {
        let (index, _) = find_with(&self.proposals, stage, mode, arch, |p| p.name == name);
        index.map(|i| &self.proposals[i])
    }

    /// Additional finish steps for a phase
    pub fn finish_steps(&self, phase: FinishPhase) -> &[String] {
        self.finish_steps.phase(phase)
    }
}

/// Phases of one merge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionPhase {
    Idle,
    Resetting,
    Replaying,
    Committed,
}

/// Why a control file was not replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Same content was already applied this session under another path
    DuplicateContent { first_path: PathBuf },
}

/// Outcome of replaying one control file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplayStatus {
    Applied,
    Skipped(SkipReason),
    Failed { kind: FailureKind, message: String },
}

/// Per-file report line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayEntry {
    pub path: PathBuf,
    pub source_id: u32,
    pub fingerprint: String,
    pub status: ReplayStatus,
    pub warnings: Vec<DirectiveWarning>,
    /// Definitions refused by a replacement (initial-stage workflows)
    pub rejected: Vec<String>,
}

/// Aggregated result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub generation: u64,
    pub entries: Vec<ReplayEntry>,
}

impl MergeReport {
    pub fn applied(&self) -> impl Iterator<Item = &ReplayEntry> {
        self.entries.iter().filter(|e| e.status == ReplayStatus::Applied)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ReplayEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, ReplayStatus::Failed { .. }))
    }

    /// Returns true if every file applied without warnings or rejections
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| {
            !matches!(e.status, ReplayStatus::Failed { .. })
                && e.warnings.is_empty()
                && e.rejected.is_empty()
        })
    }
}

/// Result of replacing workflow or proposal definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub replaced: usize,
    pub added: usize,
    pub rejected: Vec<String>,
}

/// Replace workflows slot by slot. Initial-stage workflows are refused.
pub fn replace_workflows(workflows: &mut Vec<WorkflowDef>, new: &[WorkflowDef]) -> ReplaceOutcome {
    let mut outcome = ReplaceOutcome::default();

    for def in specialize(new) {
        let scope = format!("workflow {}/{}/{}", def.stage, def.mode, def.archs());
        if def.stage == INITIAL_STAGE {
            warn!("Refusing to replace first-stage {}", scope);
            outcome.rejected.push(scope);
            continue;
        }

        match find(workflows, &def.stage, &def.mode, def.archs()) {
            (Some(index), MatchKind::Exact) => {
                debug!("Replacing {}", scope);
                workflows[index] = def;
                outcome.replaced += 1;
            }
            _ => {
                debug!("Adding {}", scope);
                workflows.push(def);
                outcome.added += 1;
            }
        }
    }

    outcome
}

/// Replace proposals slot by slot (stage, mode, name, arch).
pub fn replace_proposals(proposals: &mut Vec<ProposalDef>, new: &[ProposalDef]) -> ReplaceOutcome {
    let mut outcome = ReplaceOutcome::default();

    for def in specialize(new) {
        let found = find_with(proposals, &def.stage, &def.mode, &def.archs, |p| p.name == def.name);
        match found {
            (Some(index), MatchKind::Exact) => {
                proposals[index] = def;
                outcome.replaced += 1;
            }
            _ => {
                proposals.push(def);
                outcome.added += 1;
            }
        }
    }

    outcome
}

/// What one control file changed, besides the set itself.
#[derive(Debug, Default)]
struct Contribution {
    warnings: Vec<DirectiveWarning>,
    rejected: Vec<String>,
}

/// Apply one decoded control file to `set`.
fn apply_control_file(set: &mut WorkflowSet, control: &ControlFile) -> Contribution {
    let mut contribution = Contribution::default();
    let contributor = Contributor {
        textdomain: &control.textdomain,
        display_name: &control.display_name,
    };

    for (section, values) in &control.features {
        set.product_features
            .entry(section.clone())
            .or_default()
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    append_unique(&mut set.clone_modules, &control.clone_modules);

    for insertion in &control.system_roles.insert_system_roles {
        match insertion.position {
            Some(pos) if pos >= 0 && (pos as usize) <= set.system_roles.len() => {
                let pos = pos as usize;
                set.system_roles
                    .splice(pos..pos, insertion.system_roles.iter().cloned());
            }
            _ => set.system_roles.extend(insertion.system_roles.iter().cloned()),
        }
    }

    set.finish_steps.extend_from(&control.update.inst_finish);

    for update in specialize(&control.update.proposals) {
        let (stage, mode, arch) = (update.stage.as_str(), update.mode.as_str(), update.archs.as_str());
        let found = find_with(&set.proposals, stage, mode, arch, |p| p.name == update.name);
        let index = match found {
            (Some(index), _) => index,
            (None, _) => {
                let mut fresh = ProposalDef::new(&update.name, stage, mode, arch);
                fresh.label = update.label.clone();
                set.proposals.push(fresh);
                set.proposals.len() - 1
            }
        };
        contribution.warnings.extend(apply_proposal_update(
            &mut set.proposals[index],
            &update,
            contributor,
        ));
    }

    for update in specialize(&control.update.workflows) {
        let (stage, mode, arch) = (update.stage.as_str(), update.mode.as_str(), update.archs());
        let index = match find(&set.workflows, stage, mode, arch) {
            (Some(index), MatchKind::Exact) => index,
            (Some(fallback), MatchKind::ArchAllFallback) => {
                debug!("Materializing {}/{} for arch {}", stage, mode, arch);
                materialize(&mut set.workflows, fallback, arch)
            }
            _ => {
                let mut fresh = WorkflowDef::new(stage, mode, arch);
                fresh.textdomain = control.textdomain.clone();
                set.workflows.push(fresh);
                set.workflows.len() - 1
            }
        };
        contribution.warnings.extend(apply_workflow_update(
            &mut set.workflows[index],
            &update,
            contributor,
        ));
    }

    replace_proposals(&mut set.proposals, &control.proposals);
    let outcome = replace_workflows(&mut set.workflows, &control.workflows);
    contribution.rejected = outcome.rejected;

    contribution
}

/// Owns the base snapshot, the store and the published derived state.
pub struct MergeEngine {
    base: BaseSnapshot,
    derived: DerivedState,
    store: WorkflowStore,
    loader: Box<dyn TreeLoader + Send>,
}

impl MergeEngine {
    /// Create an engine over `base`. Definitions are specialized immediately.
    pub fn new(base: BaseSnapshot, store: WorkflowStore) -> Self {
        let base = base.specialized();
        Self {
            derived: base.clone(),
            base,
            store,
            loader: Box::new(JsonTreeLoader),
        }
    }

    /// Use a different tree loader for control files
    pub fn with_loader(mut self, loader: Box<dyn TreeLoader + Send>) -> Self {
        self.loader = loader;
        self
    }

    /// Replace the base snapshot (product activation). Requires a new merge.
    pub fn set_base_workflow(&mut self, base: BaseSnapshot) {
        info!("Setting new base workflow ({} workflows, {} proposals)", base.workflows.len(), base.proposals.len());
        self.base = base.specialized();
        self.store.mark_dirty();
    }

    pub fn base(&self) -> &BaseSnapshot {
        &self.base
    }

    /// State published by the last committed session
    pub fn derived(&self) -> &DerivedState {
        &self.derived
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn register(&mut self, record: ControlFileRecord) {
        self.store.register(record);
    }

    pub fn deregister(&mut self, path: &Path) -> Option<ControlFileRecord> {
        self.store.deregister(path)
    }

    /// Overwrite all registrations. See [`WorkflowStore::replace_all`].
    pub fn replace_all(&mut self, records: Vec<ControlFileRecord>) {
        self.store.replace_all(records);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.store.is_dirty()
    }

    /// Run a full merge session and publish its result.
    pub fn merge(&mut self) -> MergeReport {
        let generation = self.store.merge_generation() + 1;
        let span = info_span!("merge_session", generation);
        let _guard = span.enter();

        debug!("{}", SessionPhase::Resetting);
        let mut working = self.base.clone();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        debug!("{} {} control files", SessionPhase::Replaying, self.store.registered().len());
        let mut entries = Vec::with_capacity(self.store.registered().len());
        for record in self.store.registered() {
            let fingerprint = record.fingerprint();
            let mut entry = ReplayEntry {
                path: record.path.clone(),
                source_id: record.source_id,
                fingerprint: fingerprint.clone(),
                status: ReplayStatus::Applied,
                warnings: Vec::new(),
                rejected: Vec::new(),
            };

            if let Some(first_path) = seen.get(&fingerprint) {
                info!(
                    "Skipping {}: same content already applied from {}",
                    record.path.display(),
                    first_path.display()
                );
                entry.status = ReplayStatus::Skipped(SkipReason::DuplicateContent {
                    first_path: first_path.clone(),
                });
                entries.push(entry);
                continue;
            }

            match self.replay(&working, record) {
                Ok((next, contribution)) => {
                    seen.insert(fingerprint, record.path.clone());
                    working = next;
                    entry.warnings = contribution.warnings;
                    entry.rejected = contribution.rejected;
                }
                Err(e) => {
                    warn!("Skipping contribution of {}: {}", record.path.display(), e);
                    entry.status = ReplayStatus::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    };
                }
            }
            entries.push(entry);
        }

        self.derived = working;
        let generation = self.store.mark_merged();
        debug!("{}", SessionPhase::Committed);

        let report = MergeReport { generation, entries };
        info!(
            "Merge session {} committed: {} applied, {} failed",
            generation,
            report.applied().count(),
            report.failed().count()
        );
        debug!("{}", SessionPhase::Idle);
        report
    }

    /// Merge only if registrations changed since the last session.
    pub fn merge_if_dirty(&mut self) -> Option<MergeReport> {
        if self.is_dirty() {
            Some(self.merge())
        } else {
            debug!("Workflow store is clean, no merge needed");
            None
        }
    }

    /// Merge pending changes and redraw the wizard.
    pub fn update_installation(&mut self, ui: &dyn WizardUi) -> Option<MergeReport> {
        let report = self.merge_if_dirty();
        ui.retranslate_steps();
        ui.set_focus();
        report
    }

    /// Replay one file over a scratch copy of `working`.
    fn replay(
        &self,
        working: &WorkflowSet,
        record: &ControlFileRecord,
    ) -> Result<(WorkflowSet, Contribution)> {
        let tree = self
            .loader
            .parse(&record.content)
            .ok_or_else(|| WizflowError::malformed(&record.path, "unreadable control file"))?;
        let control = ControlFile::from_tree(&record.path, &tree)?;

        let mut scratch = working.clone();
        let contribution = apply_control_file(&mut scratch, &control);
        Ok((scratch, contribution))
    }
}

/// Shares an engine between callers. Sessions never interleave: `try_merge`
/// fails fast while another caller holds the engine.
pub struct EngineHandle {
    inner: Mutex<MergeEngine>,
}

impl EngineHandle {
    pub fn new(engine: MergeEngine) -> Self {
        Self {
            inner: Mutex::new(engine),
        }
    }

    /// Run a merge session, or fail with `SessionBusy`.
    pub fn try_merge(&self) -> Result<MergeReport> {
        match self.inner.try_lock() {
            Ok(mut engine) => Ok(engine.merge()),
            Err(TryLockError::WouldBlock) => Err(WizflowError::SessionBusy),
            // A full rebuild discards whatever the panicking caller left behind
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner().merge()),
        }
    }

    /// Run `f` with exclusive access, blocking until available.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut MergeEngine) -> R) -> R {
        let mut engine = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut engine)
    }

    /// Snapshot of the published derived state
    pub fn derived(&self) -> DerivedState {
        self.with_engine(|engine| engine.derived().clone())
    }
}
