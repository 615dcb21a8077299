//! wizflow Library
//!
//! Merge engine for installer workflows: a base product's workflows and
//! proposals, patched by any number of add-on control files, rebuilt
//! deterministically on every merge session.

pub mod addon;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod control_file;
pub mod engine;
pub mod error;
pub mod services;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use addon::AddonActivator;
pub use config::EngineConfig;
pub use control_file::{fingerprint, ControlFile, ControlFileRecord};
pub use engine::directives::{DirectiveKind, DirectiveWarning};
pub use engine::matcher::MatchKind;
pub use error::{FailureKind, WizflowError};
pub use session::{
    BaseSnapshot, DerivedState, EngineHandle, MergeEngine, MergeReport, ReplayStatus, SkipReason,
    WorkflowSet,
};
pub use store::WorkflowStore;
pub use types::{Arch, FinishPhase, ModuleRef, ProposalDef, ProposalTab, WorkflowDef};
