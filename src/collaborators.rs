//! External collaborator contracts.
//!
//! The merge engine consumes these as opaque operations. Each trait has a
//! small bundled implementation so the binary works out of the box; tests and
//! embedders substitute their own.
//!
//! | Trait            | Bundled implementation  |
//! |------------------|-------------------------|
//! | `ConfigParser`   | `TomlFileParser`        |
//! | `CommandRunner`  | `SystemCommandRunner`   |
//! | `TreeLoader`     | `JsonTreeLoader`        |
//! | `PackageFetcher` | none (installer-provided) |
//! | `WizardUi`       | `HeadlessWizard`        |

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::error::{Result, WizflowError};

/// Flat key/value configuration text
pub type KeyedText = BTreeMap<String, String>;

/// Reads and writes key/value configuration files.
pub trait ConfigParser {
    /// Load a file. Absent paths return `WizflowError::NotFound`.
    fn load(&self, path: &Path) -> Result<KeyedText>;

    fn save(&self, path: &Path, values: &KeyedText) -> Result<()>;
}

/// `KEY = "value"` files in TOML syntax, `#` comments.
#[derive(Debug, Clone, Copy, Default)]
pub struct TomlFileParser;

impl ConfigParser for TomlFileParser {
    fn load(&self, path: &Path) -> Result<KeyedText> {
        let content = fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WizflowError::not_found(path.display().to_string()),
            _ => WizflowError::Io(e),
        })?;

        toml::from_str(&content).map_err(|e| WizflowError::malformed(path, e.to_string()))
    }

    fn save(&self, path: &Path, values: &KeyedText) -> Result<()> {
        let body = toml::to_string(values).map_err(|e| WizflowError::config(e.to_string()))?;
        fs::write(path, body)?;
        Ok(())
    }
}

/// Captured result of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs command lines and captures their output.
pub trait CommandRunner {
    fn execute(&self, command_line: &str) -> Result<CommandOutput>;
}

/// Executes through `sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn execute(&self, command_line: &str) -> Result<CommandOutput> {
        debug!("Executing: {}", command_line);
        let output = Command::new("sh").args(["-c", command_line]).output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            // Killed by a signal: no exit code
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Turns raw control-file bytes into a generic tree.
pub trait TreeLoader {
    /// `None` signals an unreadable or malformed file.
    fn parse(&self, content: &[u8]) -> Option<Value>;

    /// Read and parse a file.
    fn load(&self, path: &Path) -> Option<Value> {
        let content = fs::read(path).ok()?;
        self.parse(&content)
    }
}

/// Trees stored as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTreeLoader;

impl TreeLoader for JsonTreeLoader {
    fn parse(&self, content: &[u8]) -> Option<Value> {
        match serde_json::from_slice(content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Control file is not a valid tree: {}", e);
                None
            }
        }
    }
}

/// Downloads and unpacks add-on packages.
pub trait PackageFetcher {
    /// Errors with `WizflowError::FetchFailure`.
    fn download(&self, source_id: u32, package: &str, dest: &Path) -> Result<()>;

    /// Errors with `WizflowError::ExtractionFailure`.
    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()>;
}

/// Wizard redraw hooks. Fire-and-forget.
pub trait WizardUi {
    fn retranslate_steps(&self);
    fn set_focus(&self);
}

/// No UI attached (command line, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessWizard;

impl WizardUi for HeadlessWizard {
    fn retranslate_steps(&self) {
        debug!("No wizard attached, skipping step redraw");
    }

    fn set_focus(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wizflow.conf");

        let mut values = KeyedText::new();
        values.insert("WIZFLOW_ARCH".into(), "x86_64".into());
        values.insert("WIZFLOW_CACHE_DIR".into(), "\"quoted\" dir".into());

        TomlFileParser.save(&path, &values).expect("save");
        assert_eq!(TomlFileParser.load(&path).expect("load"), values);
    }

    #[test]
    fn test_toml_skips_comments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wizflow.conf");
        fs::write(&path, "# comment\n\nKEY = \"value\"\n").expect("write");

        let values = TomlFileParser.load(&path).expect("load");
        assert_eq!(values.len(), 1);
        assert_eq!(values["KEY"], "value");
    }

    #[test]
    fn test_toml_rejects_broken_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wizflow.conf");
        fs::write(&path, "KEY = \"value\"\nbroken line\n").expect("write");

        let err = TomlFileParser.load(&path).unwrap_err();
        assert!(matches!(err, WizflowError::MalformedInput { .. }));
    }

    #[test]
    fn test_toml_missing_is_not_found() {
        let err = TomlFileParser
            .load(Path::new("/nonexistent/wizflow.conf"))
            .unwrap_err();
        assert!(matches!(err, WizflowError::NotFound(_)));
    }

    #[test]
    fn test_json_tree_loader() {
        assert_eq!(JsonTreeLoader.parse(br#"{"a": 1}"#), Some(json!({ "a": 1 })));
        assert_eq!(JsonTreeLoader.parse(b"<xml/>"), None);
        assert_eq!(JsonTreeLoader.load(Path::new("/nonexistent.json")), None);
    }

    #[test]
    fn test_system_command_runner() {
        let out = SystemCommandRunner.execute("echo hello; exit 3").expect("run");
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }
}
