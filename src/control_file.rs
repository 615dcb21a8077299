//! Control File Schema
//!
//! A control file is the patch document an add-on product ships. Once the
//! tree loader has turned it into a generic value, it is decoded into
//! [`ControlFile`]. Every section is optional; unknown keys are ignored.
//!
//! # Format
//!
//! ```json
//! {
//!   "display_name": "High Availability",
//!   "textdomain": "sle-ha",
//!   "globals": { "enable_kdump": true },
//!   "clone_modules": ["cluster"],
//!   "system_roles": { "insert_system_roles": [ { "system_roles": [ { "id": "ha_node" } ] } ] },
//!   "update": {
//!     "workflows": [
//!       { "stage": "continue", "mode": "installation",
//!         "insert_modules": [ { "before": "suse_connect", "modules": ["ha_setup"] } ] }
//!     ],
//!     "inst_finish": { "before_chroot": ["ha_finish"] }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, WizflowError};
use crate::types::{
    Dimensional, ExtraFields, FinishSteps, ModuleRef, ProposalDef, WorkflowDef, WorkflowDefaults,
};

/// Product feature sections merged by plain key union.
pub const FEATURE_SECTIONS: &[&str] = &["globals", "software", "partitioning", "network"];

/// `replace_modules` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaceDirective {
    pub replace: String,

    #[serde(default)]
    pub modules: Vec<ModuleRef>,
}

/// `insert_modules` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertDirective {
    pub before: String,

    #[serde(default)]
    pub modules: Vec<ModuleRef>,
}

/// Directives targeting one workflow (`update.workflows[]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowUpdate {
    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub stage: String,

    #[serde(default, deserialize_with = "crate::types::null_as_empty")]
    pub mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archs: Option<String>,

    #[serde(default)]
    pub defaults: WorkflowDefaults,

    #[serde(default)]
    pub remove_modules: Vec<String>,

    #[serde(default)]
    pub replace_modules: Vec<ReplaceDirective>,

    #[serde(default)]
    pub insert_modules: Vec<InsertDirective>,

    #[serde(default)]
    pub append_modules: Vec<ModuleRef>,
}

impl Dimensional for WorkflowUpdate {
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

/// Directives targeting one proposal (`update.proposals[]`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalUpdate {
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
    pub enable_skip: Option<bool>,

    #[serde(default)]
    pub remove_modules: Vec<String>,

    #[serde(default)]
    pub replace_modules: Vec<ReplaceDirective>,

    #[serde(default)]
    pub append_modules: Vec<ModuleRef>,
}

impl Dimensional for ProposalUpdate {
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

/// The `update` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSection {
    #[serde(default)]
    pub proposals: Vec<ProposalUpdate>,

    #[serde(default)]
    pub workflows: Vec<WorkflowUpdate>,

    #[serde(default)]
    pub inst_finish: FinishSteps,
}

/// One `insert_system_roles` entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemRoleInsertion {
    /// Insert position; negative or missing appends
    #[serde(default)]
    pub position: Option<i64>,

    #[serde(default)]
    pub system_roles: Vec<Value>,
}

/// The `system_roles` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemRolesSection {
    #[serde(default)]
    pub insert_system_roles: Vec<SystemRoleInsertion>,
}

/// A decoded control file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlFile {
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub textdomain: String,

    #[serde(default)]
    pub clone_modules: Vec<String>,

    #[serde(default)]
    pub system_roles: SystemRolesSection,

    /// Replacement workflow definitions
    #[serde(default)]
    pub workflows: Vec<WorkflowDef>,

    /// Replacement proposal definitions
    #[serde(default)]
    pub proposals: Vec<ProposalDef>,

    #[serde(default)]
    pub update: UpdateSection,

    /// `globals`, `software`, `partitioning`, `network`
    #[serde(skip)]
    pub features: BTreeMap<String, ExtraFields>,
}

impl ControlFile {
    /// Decode a control file from a generic tree.
    ///
    /// Feature sections that are not flat maps are rejected as malformed.
    pub fn from_tree(path: &Path, tree: &Value) -> Result<Self> {
        if !tree.is_object() {
            return Err(WizflowError::malformed(path, "top level is not a map"));
        }

        let mut control: Self = serde_json::from_value(tree.clone())
            .map_err(|e| WizflowError::malformed(path, e.to_string()))?;

        for section in FEATURE_SECTIONS {
            match tree.get(*section) {
                None | Some(Value::Null) => {}
                Some(Value::Object(map)) => {
                    let flat: ExtraFields =
                        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    control.features.insert((*section).to_string(), flat);
                }
                Some(_) => {
                    return Err(WizflowError::malformed(
                        path,
                        format!("section '{}' must be a map", section),
                    ));
                }
            }
        }

        Ok(control)
    }
}

/// Content identity: `sha256(content) + "-" + byte_len`.
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("{}-{}", hex::encode(digest), content.len())
}

/// A registered control file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFileRecord {
    /// Absolute path the file was registered under
    pub path: PathBuf,

    /// Repository the file came from (`0` for ad-hoc files)
    pub source_id: u32,

    /// Raw file bytes
    pub content: Vec<u8>,
}

impl ControlFileRecord {
    pub fn new(path: impl Into<PathBuf>, source_id: u32, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            source_id,
            content: content.into(),
        }
    }

    /// Read a control file from disk. A missing file maps to `NotFound`.
    pub fn from_path(path: impl AsRef<Path>, source_id: u32) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WizflowError::not_found(path.display().to_string()),
            _ => WizflowError::Io(e),
        })?;
        Ok(Self::new(path, source_id, content))
    }

    /// Content fingerprint used for de-duplication
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::module_names;
    use serde_json::json;

    fn decode(value: Value) -> Result<ControlFile> {
        ControlFile::from_tree(Path::new("/tmp/control.xml"), &value)
    }

    #[test]
    fn test_fingerprint_is_hash_and_size() {
        let fp = fingerprint(b"abc");
        assert_eq!(
            fp,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad-3"
        );
    }

    #[test]
    fn test_identical_content_same_fingerprint() {
        let a = ControlFileRecord::new("/a.xml", 1, "same");
        let b = ControlFileRecord::new("/b.xml", 2, "same");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_decode_full_control_file() {
        let control = decode(json!({
            "display_name": "HA",
            "textdomain": "sle-ha",
            "globals": { "enable_kdump": true },
            "software": { "default_patterns": "ha_sles" },
            "clone_modules": ["cluster"],
            "system_roles": { "insert_system_roles": [
                { "position": 1, "system_roles": [ { "id": "ha_node" } ] }
            ] },
            "update": {
                "workflows": [ {
                    "stage": "continue",
                    "mode": "installation,update",
                    "remove_modules": ["old"],
                    "insert_modules": [ { "before": "finish", "modules": ["ha_setup"] } ],
                    "replace_modules": [ { "replace": "x", "modules": ["y"] } ],
                    "append_modules": [ { "name": "ha_summary" } ]
                } ],
                "inst_finish": { "after_chroot": ["ha_finish"] }
            }
        }))
        .expect("Should decode");

        assert_eq!(control.display_name, "HA");
        assert_eq!(control.clone_modules, vec!["cluster"]);
        assert_eq!(control.features["globals"]["enable_kdump"], json!(true));
        assert_eq!(control.features["software"]["default_patterns"], json!("ha_sles"));
        assert_eq!(control.system_roles.insert_system_roles[0].position, Some(1));

        let wf = &control.update.workflows[0];
        assert_eq!(wf.mode(), "installation,update");
        assert_eq!(wf.remove_modules, vec!["old"]);
        assert_eq!(module_names(&wf.insert_modules[0].modules), ["ha_setup"]);
        assert_eq!(module_names(&wf.append_modules), ["ha_summary"]);
        assert_eq!(control.update.inst_finish.after_chroot, vec!["ha_finish"]);
    }

    #[test]
    fn test_decode_rejects_non_map_root() {
        let err = decode(json!(["not", "a", "map"])).unwrap_err();
        assert!(matches!(err, WizflowError::MalformedInput { .. }));
    }

    #[test]
    fn test_decode_rejects_non_map_feature_section() {
        let err = decode(json!({ "globals": ["x"] })).unwrap_err();
        assert!(err.to_string().contains("globals"));
    }

    #[test]
    fn test_decode_rejects_wrong_field_type() {
        let err = decode(json!({ "update": { "workflows": "nope" } })).unwrap_err();
        assert!(matches!(err, WizflowError::MalformedInput { .. }));
    }

    #[test]
    fn test_from_path_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ControlFileRecord::from_path(dir.path().join("missing.xml"), 0).unwrap_err();
        assert!(matches!(err, WizflowError::NotFound(_)));
    }
}
