//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// multipush - build and publish multi-architecture container images
///
/// Provisions the build host, builds one image per platform and pushes
/// each under the floating and release tags.
#[derive(Parser, Debug)]
#[command(name = "multipush")]
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
    #[arg(short, long, global = true, env = "MULTIPUSH_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision, build and push every platform
    Publish(PublishArgs),

    /// Show the builds a trigger would produce
    Plan(PlanArgs),

    /// Inspect or reset the build cache
    Cache(CacheArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the publish command
#[derive(Parser, Debug)]
pub struct PublishArgs {
    /// Reference to publish (defaults to GITHUB_REF_NAME / GITHUB_REF)
    #[arg(long = "ref", value_name = "NAME")]
    pub reference: Option<String>,

    /// Treat the run as a manual trigger (skips the tag pattern check)
    #[arg(long)]
    pub manual: bool,

    /// Write the run report as JSON
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Reference to plan for (defaults to GITHUB_REF_NAME / GITHUB_REF)
    #[arg(long = "ref", value_name = "NAME")]
    pub reference: Option<String>,

    /// Treat the run as a manual trigger
    #[arg(long)]
    pub manual: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List committed cache indexes
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove every cached blob and index
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file in use
    Path,

    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
