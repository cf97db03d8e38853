//! CLI argument definitions using clap derive

use crate::ui::ProgressMode;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Kiln - content-addressed build graph solver
///
/// Evaluates a graph of source and exec vertices, reusing earlier results
/// by definition and by input content.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Solve a vertex of a build definition
    Solve(SolveArgs),

    /// Print the cache keys of every vertex in a definition
    Keys(KeysArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the solve command
#[derive(Parser, Debug)]
pub struct SolveArgs {
    /// Build definition file
    #[arg(default_value = "kiln.toml")]
    pub file: PathBuf,

    /// Vertex to solve (default: the definition's target)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Progress display (default: progress.mode from config)
    #[arg(long, value_enum)]
    pub progress: Option<ProgressMode>,

    /// Write the target's outputs into this directory
    #[arg(short, long)]
    pub export: Option<PathBuf>,
}

/// Arguments for the keys command
#[derive(Parser, Debug)]
pub struct KeysArgs {
    /// Build definition file
    #[arg(default_value = "kiln.toml")]
    pub file: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., solver.max_parallelism)
        key: String,

        /// Value to set
        value: String,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

/// Output format for listings
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table
    #[default]
    Table,
    /// JSON array
    Json,
    /// One tab-separated record per line
    Plain,
}
