use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// wizflow - merge installer workflows with add-on control files
#[derive(Parser)]
#[command(name = "wizflow")]
#[command(about = "Deterministically merge installer workflows and add-on control files")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file (TOML, `KEY = "value"` lines)
    #[arg(long, global = true, default_value = "/etc/wizflow.conf")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Merge control files over a base workflow set and print the result
    Merge {
        /// Base workflow set (JSON)
        #[arg(short, long)]
        base: PathBuf,

        /// Control files, applied in the given order
        #[arg(short, long = "control")]
        controls: Vec<PathBuf>,

        /// Source id recorded for every control file
        #[arg(long, default_value_t = 0)]
        source_id: u32,

        /// Only print the workflow for this stage/mode (with --mode)
        #[arg(long, requires = "mode")]
        stage: Option<String>,

        /// Installer mode used with --stage
        #[arg(long, requires = "stage")]
        mode: Option<String>,

        /// Architecture for --stage lookups (defaults to the configured one)
        #[arg(long, requires = "stage")]
        arch: Option<String>,
    },
    /// Expand multi-valued workflow definitions
    Specialize {
        /// JSON file holding a list of workflow definitions
        workflows: PathBuf,
    },
    /// Print content fingerprints of control files
    Fingerprint {
        /// Files to fingerprint
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
