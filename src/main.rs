//! wizflow - command line entry point
//!
//! Merges control files over a base workflow set and prints the derived state
//! as JSON.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use wizflow::cli::{Cli, Commands};
use wizflow::collaborators::TomlFileParser;
use wizflow::config::EngineConfig;
use wizflow::control_file::{fingerprint, ControlFileRecord};
use wizflow::engine::specialize::specialize;
use wizflow::session::{BaseSnapshot, DerivedState, MergeEngine, MergeReport};
use wizflow::types::WorkflowDef;
use wizflow::WizflowError;

/// `merge` command output
#[derive(Serialize)]
struct MergeOutput<'a> {
    derived: &'a DerivedState,
    report: &'a MergeReport,
}

/// Initialize logging. `RUST_LOG` overrides the default `info` level.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn run_merge(
    config: &EngineConfig,
    base: &Path,
    controls: &[std::path::PathBuf],
    source_id: u32,
    lookup: Option<(String, String, Option<String>)>,
) -> Result<()> {
    let base: BaseSnapshot = read_json(base)?;
    let mut engine = MergeEngine::new(base, config.workflow_store());

    for path in controls {
        let absolute = std::path::absolute(path)
            .with_context(|| format!("Failed to resolve {:?}", path))?;
        match ControlFileRecord::from_path(&absolute, source_id) {
            Ok(record) => engine.register(record),
            // An absent control file is no patch at all
            Err(WizflowError::NotFound(what)) => warn!("Control file {} not found, skipping", what),
            Err(e) => return Err(e).context("Failed to register control file"),
        }
    }

    let report = engine.merge();
    for entry in report.failed() {
        warn!("{}: {:?}", entry.path.display(), entry.status);
    }

    let output = match lookup {
        Some((stage, mode, arch)) => {
            let arch = arch.unwrap_or_else(|| config.arch.clone());
            let workflow = engine.derived().workflow(&stage, &mode, &arch).with_context(|| {
                format!("No workflow for stage '{}', mode '{}', arch '{}'", stage, mode, arch)
            })?;
            serde_json::to_value(workflow)?
        }
        None => serde_json::to_value(MergeOutput {
            derived: engine.derived(),
            report: &report,
        })?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn main() -> Result<()> {
    init_logger();
    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let config = EngineConfig::load(&TomlFileParser, &cli.config)?;
    debug!("Engine configuration: {:?}", config);

    match cli.command {
        Commands::Merge {
            base,
            controls,
            source_id,
            stage,
            mode,
            arch,
        } => {
            info!("Merging {} control files over {:?}", controls.len(), base);
            let lookup = stage.zip(mode).map(|(stage, mode)| (stage, mode, arch));
            run_merge(&config, &base, &controls, source_id, lookup)?;
        }
        Commands::Specialize { workflows } => {
            let defs: Vec<WorkflowDef> = read_json(&workflows)?;
            let expanded = specialize(&defs);
            info!("Expanded {} definitions into {}", defs.len(), expanded.len());
            println!("{}", serde_json::to_string_pretty(&expanded)?);
        }
        Commands::Fingerprint { files } => {
            for file in files {
                let content = fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
                println!("{}  {}", fingerprint(&content), file.display());
            }
        }
    }

    Ok(())
}
