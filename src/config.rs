//! Engine configuration.
//!
//! Settings come from a TOML key/value file read through a [`ConfigParser`]:
//!
//! ```toml
//! WIZFLOW_CACHE_DIR = "/var/lib/wizflow/control"
//! WIZFLOW_ARCH = "x86_64"
//! WIZFLOW_POST_INSTALL = "no"
//! ```
//!
//! A missing file means "use the defaults".

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::collaborators::{ConfigParser, KeyedText};
use crate::error::WizflowError;
use crate::store::WorkflowStore;
use crate::types::Arch;

pub const KEY_CACHE_DIR: &str = "WIZFLOW_CACHE_DIR";
pub const KEY_ARCH: &str = "WIZFLOW_ARCH";
pub const KEY_POST_INSTALL: &str = "WIZFLOW_POST_INSTALL";

/// Runtime settings for the merge engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Where cached control files live
    pub cache_dir: PathBuf,

    /// Architecture used for workflow lookups
    pub arch: String,

    /// Running on an installed system rather than inside the installer
    pub post_install: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("wizflow-control"),
            arch: Arch::detect().map(|a| a.to_string()).unwrap_or_default(),
            post_install: false,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" | "" => Some(false),
        _ => None,
    }
}

impl EngineConfig {
    /// Load settings from `path`, falling back to defaults if it is absent.
    pub fn load(parser: &dyn ConfigParser, path: &Path) -> Result<Self> {
        match parser.load(path) {
            Ok(values) => Self::from_keyed_text(&values)
                .with_context(|| format!("Invalid engine configuration in {:?}", path)),
            Err(WizflowError::NotFound(_)) => {
                debug!("No engine configuration at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read engine configuration {:?}", path)),
        }
    }

    /// Build settings from parsed key/value text.
    pub fn from_keyed_text(values: &KeyedText) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = values.get(KEY_CACHE_DIR).filter(|d| !d.is_empty()) {
            config.cache_dir = PathBuf::from(dir);
        }

        if let Some(arch) = values.get(KEY_ARCH).filter(|a| !a.is_empty()) {
            arch.parse::<Arch>()
                .map_err(|_| anyhow::anyhow!("Unknown architecture '{}'", arch))?;
            config.arch = arch.clone();
        }

        if let Some(flag) = values.get(KEY_POST_INSTALL) {
            config.post_install = parse_bool(flag)
                .ok_or_else(|| anyhow::anyhow!("{} must be yes or no, got '{}'", KEY_POST_INSTALL, flag))?;
        }

        Ok(config)
    }

    /// Key/value form, suitable for [`ConfigParser::save`].
    pub fn to_keyed_text(&self) -> KeyedText {
        let mut values = KeyedText::new();
        values.insert(KEY_CACHE_DIR.to_string(), self.cache_dir.display().to_string());
        values.insert(KEY_ARCH.to_string(), self.arch.clone());
        values.insert(
            KEY_POST_INSTALL.to_string(),
            if self.post_install { "yes" } else { "no" }.to_string(),
        );
        values
    }

    /// An empty store configured from these settings
    pub fn workflow_store(&self) -> WorkflowStore {
        WorkflowStore::new(&self.cache_dir).with_post_install(self.post_install)
    }
}
