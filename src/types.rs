//! Core data model: workflows, proposals, module references and the
//! product-wide sections a control file can patch.
//!
//! Definitions keep every field they do not interpret in an `extra` map so a
//! merge never drops data it does not understand.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString};

/// Architecture value that accepts any target architecture.
pub const ARCH_ALL: &str = "all";

/// Stage whose workflows are protected from replacement.
pub const INITIAL_STAGE: &str = "initial";

/// Open key map carried alongside known fields.
pub type ExtraFields = BTreeMap<String, Value>;

/// Product feature sections (`globals`, `software`, ...) keyed by section name.
pub type ProductFeatures = BTreeMap<String, BTreeMap<String, Value>>;

/// Installer architecture names as used in control files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum Arch {
    #[strum(serialize = "x86_64")]
    X86_64,
    #[strum(serialize = "i386")]
    I386,
    #[strum(serialize = "aarch64")]
    Aarch64,
    #[strum(serialize = "ppc64")]
    Ppc64,
    #[strum(serialize = "ppc64le")]
    Ppc64le,
    #[strum(serialize = "s390_64")]
    S390_64,
}

impl Arch {
    /// Map the architecture this binary was built for to its installer name.
    pub fn detect() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Self::X86_64),
            "x86" => Some(Self::I386),
            "aarch64" => Some(Self::Aarch64),
            "powerpc64" if cfg!(target_endian = "little") => Some(Self::Ppc64le),
            "powerpc64" => Some(Self::Ppc64),
            "s390x" => Some(Self::S390_64),
            _ => None,
        }
    }
}

/// Returns true if an architecture value accepts any architecture.
pub fn is_any_arch(arch: &str) -> bool {
    arch.is_empty() || arch == ARCH_ALL
}

/// Read a dimension value, mapping an explicit `null` to the wildcard `""`.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single step or proposal module reference.
///
/// Control files list modules either as bare names or as maps carrying at
/// least `name`, e.g. `{ "name": "bootloader", "presentation_order": "20" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleRef {
    Name(String),
    Detailed {
        name: String,
        #[serde(flatten)]
        extra: ExtraFields,
    },
}

impl ModuleRef {
    /// Create a bare module reference
    pub fn named(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    /// The module name, regardless of representation
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    /// Extra fields of a detailed reference
    pub fn extra(&self) -> Option<&ExtraFields> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { extra, .. } => Some(extra),
        }
    }

    /// Tag this reference with a text domain.
    ///
    /// An empty domain leaves the reference unchanged.
    pub fn with_textdomain(self, domain: &str) -> Self {
        if domain.is_empty() {
            return self;
        }
        let (name, mut extra) = self.into_parts();
        extra.insert("textdomain".to_string(), Value::String(domain.to_string()));
        Self::Detailed { name, extra }
    }

    /// Merge fields inherited from a replaced anchor. Fields already present
    /// on this reference win.
    pub fn inherit_fields(self, inherited: &ExtraFields) -> Self {
        if inherited.is_empty() {
            return self;
        }
        let (name, mut extra) = self.into_parts();
        for (key, value) in inherited {
            if key != "name" {
                extra.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Self::Detailed { name, extra }
    }

    fn into_parts(self) -> (String, ExtraFields) {
        match self {
            Self::Name(name) => (name, ExtraFields::new()),
            Self::Detailed { name, extra } => (name, extra),
        }
    }
}

/// Collect module names, mostly for assertions and log lines.
pub fn module_names(modules: &[ModuleRef]) -> Vec<&str> {
    modules.iter().map(ModuleRef::name).collect()
}

/// A definition scoped by stage, mode and architecture.
///
/// Any of the three may hold a comma-separated list until the specializer
/// has expanded it.
pub trait Dimensional: Clone {
    fn stage(&self) -> &str;
    fn mode(&self) -> &str;
    fn archs(&self) -> &str;

    /// Overwrite all three dimensions with single values.
    fn set_dimensions(&mut self, stage: &str, mode: &str, arch: &str);
}

/// Workflow `defaults` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefaults {
    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub archs: String,

    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Ordered installer steps for one stage/mode/architecture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub stage: String,

    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub mode: String,

    /// Top-level architecture list; moved into `defaults.archs` by the specializer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archs: Option<String>,

    #[serde(default)]
    pub defaults: WorkflowDefaults,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,

    #[serde(default)]
    pub modules: Vec<ModuleRef>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub textdomain: String,

    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl WorkflowDef {
    /// Create an empty workflow for a single stage/mode/arch slot
    pub fn new(stage: impl Into<String>, mode: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            mode: mode.into(),
            defaults: WorkflowDefaults {
                archs: arch.into(),
                extra: ExtraFields::new(),
            },
            ..Self::default()
        }
    }

    /// Builder helper: set the step list
    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = modules.into_iter().map(ModuleRef::named).collect();
        self
    }
}

impl Dimensional for WorkflowDef {
    fn stage(&self) -> &str {
        &self.stage
    }

    fn mode(&self) -> &str {
        &self.mode
    }

    fn archs(&self) -> &str {
        self.archs.as_deref().unwrap_or(&self.defaults.archs)
    }

    fn set_dimensions(&mut self, stage: &str, mode: &str, arch: &str) {
        self.stage = stage.to_string();
        self.mode = mode.to_string();
        self.archs = None;
        self.defaults.archs = arch.to_string();
    }
}

/// One tab of a tabbed proposal screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalTab {
    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub proposal_modules: Vec<ModuleRef>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub textdomain: String,
}

/// Ordered configuration-summary modules for one proposal screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalDef {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub label: String,

    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub stage: String,

    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub mode: String,

    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub archs: String,

    #[serde(default)]
    pub proposal_modules: Vec<ModuleRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proposal_tabs: Vec<ProposalTab>,

    #[serde(default)]
    pub enable_skip: bool,

    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl ProposalDef {
    /// Create an empty proposal for a single slot
    pub fn new(
        name: impl Into<String>,
        stage: impl Into<String>,
        mode: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            mode: mode.into(),
            archs: arch.into(),
            ..Self::default()
        }
    }
}

impl Dimensional for ProposalDef {
    fn stage(&self) -> &str {
        &self.stage
    }

    fn mode(&self) -> &str {
        &self.mode
    }

    fn archs(&self) -> &str {
        &self.archs
    }

    fn set_dimensions(&mut self, stage: &str, mode: &str, arch: &str) {
        self.stage = stage.to_string();
        self.mode = mode.to_string();
        self.archs = arch.to_string();
    }
}

/// Phases at which extra finish steps may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum FinishPhase {
    BeforeChroot,
    AfterChroot,
    BeforeUmount,
}

/// Additional post-install steps registered by add-ons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinishSteps {
    #[serde(default)]
    pub before_chroot: Vec<String>,

    #[serde(default)]
    pub after_chroot: Vec<String>,

    #[serde(default)]
    pub before_umount: Vec<String>,
}

impl FinishSteps {
    /// Steps registered for one phase
    pub fn phase(&self, phase: FinishPhase) -> &[String] {
        match phase {
            FinishPhase::BeforeChroot => &self.before_chroot,
            FinishPhase::AfterChroot => &self.after_chroot,
            FinishPhase::BeforeUmount => &self.before_umount,
        }
    }

    /// Append another set, skipping steps already present in a phase
    pub fn extend_from(&mut self, other: &FinishSteps) {
        append_unique(&mut self.before_chroot, &other.before_chroot);
        append_unique(&mut self.after_chroot, &other.after_chroot);
        append_unique(&mut self.before_umount, &other.before_umount);
    }

    pub fn is_empty(&self) -> bool {
        self.before_chroot.is_empty() && self.after_chroot.is_empty() && self.before_umount.is_empty()
    }
}

/// Append items not yet present, keeping first-seen order.
pub(crate) fn append_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_ref_accepts_both_shapes() {
        let modules: Vec<ModuleRef> = serde_json::from_value(json!([
            "welcome",
            { "name": "bootloader", "presentation_order": "20" }
        ]))
        .expect("Should parse");

        assert_eq!(modules[0], ModuleRef::named("welcome"));
        assert_eq!(modules[1].name(), "bootloader");
        assert_eq!(
            modules[1].extra().and_then(|e| e.get("presentation_order")),
            Some(&json!("20"))
        );
    }

    #[test]
    fn test_module_ref_serializes_back_to_same_shape() {
        let value = json!(["welcome", { "name": "x", "label": "X" }]);
        let modules: Vec<ModuleRef> = serde_json::from_value(value.clone()).expect("parse");
        assert_eq!(serde_json::to_value(&modules).expect("serialize"), value);
    }

    #[test]
    fn test_with_textdomain_tags_reference() {
        let tagged = ModuleRef::named("addon").with_textdomain("addon-control");
        assert_eq!(
            tagged.extra().and_then(|e| e.get("textdomain")),
            Some(&json!("addon-control"))
        );

        let untouched = ModuleRef::named("addon").with_textdomain("");
        assert_eq!(untouched, ModuleRef::named("addon"));
    }

    #[test]
    fn test_inherit_fields_keeps_own_values() {
        let mut inherited = ExtraFields::new();
        inherited.insert("presentation_order".into(), json!("20"));
        inherited.insert("label".into(), json!("old"));
        inherited.insert("name".into(), json!("ignored"));

        let mut own = ExtraFields::new();
        own.insert("label".into(), json!("new"));
        let merged = ModuleRef::Detailed { name: "m1".into(), extra: own }.inherit_fields(&inherited);

        assert_eq!(merged.name(), "m1");
        let extra = merged.extra().expect("detailed");
        assert_eq!(extra.get("label"), Some(&json!("new")));
        assert_eq!(extra.get("presentation_order"), Some(&json!("20")));
        assert!(!extra.contains_key("name"));
    }

    #[test]
    fn test_null_dimensions_are_wildcards() {
        let wf: WorkflowDef = serde_json::from_value(json!({
            "stage": "continue",
            "mode": null,
            "archs": null,
            "defaults": { "archs": null }
        }))
        .expect("null dimensions accepted");
        assert_eq!(wf.mode, "");
        assert_eq!(wf.archs(), "");

        let proposal: ProposalDef =
            serde_json::from_value(json!({ "name": "initial", "stage": null, "archs": null }))
                .expect("null dimensions accepted");
        assert_eq!((proposal.stage.as_str(), proposal.archs.as_str()), ("", ""));
    }

    #[test]
    fn test_workflow_archs_prefers_top_level() {
        let mut wf: WorkflowDef = serde_json::from_value(json!({
            "stage": "initial",
            "mode": "installation",
            "archs": "x86_64",
            "defaults": { "archs": "all", "enable_back": "yes" }
        }))
        .expect("parse");
        assert_eq!(wf.archs(), "x86_64");

        wf.set_dimensions("initial", "installation", "aarch64");
        assert_eq!(wf.archs, None);
        assert_eq!(wf.defaults.archs, "aarch64");
        assert_eq!(wf.defaults.extra.get("enable_back"), Some(&json!("yes")));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let value = json!({
            "name": "initial",
            "label": "Installation Settings",
            "stage": "initial",
            "mode": "installation",
            "archs": "",
            "proposal_modules": ["bootloader"],
            "enable_skip": false,
            "unique_id": "inst_initial"
        });
        let proposal: ProposalDef = serde_json::from_value(value.clone()).expect("parse");
        assert_eq!(proposal.extra.get("unique_id"), Some(&json!("inst_initial")));
        assert_eq!(serde_json::to_value(&proposal).expect("serialize"), value);
    }

    #[test]
    fn test_finish_steps_extend_skips_duplicates() {
        let mut steps = FinishSteps {
            before_chroot: vec!["copy_files".into()],
            ..FinishSteps::default()
        };
        steps.extend_from(&FinishSteps {
            before_chroot: vec!["copy_files".into(), "addon_finish".into()],
            before_umount: vec!["snapshot".into()],
            ..FinishSteps::default()
        });

        assert_eq!(steps.phase(FinishPhase::BeforeChroot), ["copy_files", "addon_finish"]);
        assert_eq!(steps.phase(FinishPhase::BeforeUmount), ["snapshot"]);
        assert!(steps.phase(FinishPhase::AfterChroot).is_empty());
    }

    #[test]
    fn test_any_arch() {
        assert!(is_any_arch(""));
        assert!(is_any_arch("all"));
        assert!(!is_any_arch("x86_64"));
        assert_eq!("s390_64".parse::<Arch>().ok(), Some(Arch::S390_64));
    }

    #[test]
    fn test_detected_arch_round_trips() {
        if let Some(arch) = Arch::detect() {
            assert_eq!(arch.to_string().parse::<Arch>().ok(), Some(arch));
        }
        #[cfg(target_arch = "x86_64")]
        assert_eq!(Arch::detect(), Some(Arch::X86_64));
    }
}
