//! Clap derive structures for the `zwlink` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// zwlink -- mirror Z-Wave networks into an entity tree
#[derive(Debug, Parser)]
#[command(
    name = "zwlink",
    version,
    about = "Mirror Z-Wave controller networks into an entity tree",
    long_about = "Host for the zwlink synchronization engine.\n\n\
        Scans for controller ports, replays driver notification scripts\n\
        against a simulated network, and manages the configuration file.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "ZWLINK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ZWLINK_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List serial ports that look like controller sticks
    Ports(PortsArgs),

    /// Replay a notification script against a simulated network
    Replay(ReplayArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Ports ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PortsArgs {
    /// Directory to scan
    #[arg(long, default_value = zwlink_api::ports::DEVICE_DIR)]
    pub dir: PathBuf,

    /// Name pattern (regex); repeat to add more. Overrides the config file.
    #[arg(long = "pattern", short = 'P')]
    pub patterns: Vec<String>,
}

// ── Replay ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Script file (YAML, or JSON when the extension is .json)
    pub script: PathBuf,

    /// Tree snapshot to restore from (overrides `tree.snapshot`)
    #[arg(long)]
    pub tree: Option<PathBuf>,

    /// Write the resulting tree snapshot here
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// What to print once the script has run
    #[arg(long, short = 's', default_value = "tree")]
    pub show: ReplayView,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ReplayView {
    /// Every entity with its value and flags
    Tree,
    /// One row per controller session
    Sessions,
    /// Mutating calls made against the simulated driver
    Calls,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,

    /// Print the config file path
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
