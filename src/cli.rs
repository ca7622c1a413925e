use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rowcloud")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Manage cloud infrastructure as rows in a database", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/rowcloud/config.toml)
    #[arg(long, global = true, env = "ROWCLOUD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List available or installed modules
    Modules(ModulesArgs),

    /// Install modules and import existing cloud state into their tables
    Install(InstallArgs),

    /// Remove modules and drop their tables
    Uninstall {
        /// Modules to remove (name or name@version)
        #[arg(required = true)]
        modules: Vec<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Make the cloud match the database
    Apply(PassArgs),

    /// Make the database match the cloud
    Sync(PassArgs),

    /// Run one SQL statement against the database
    Sql {
        /// Statement to run
        statement: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recorded row changes
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only changes to this table
        #[arg(short, long)]
        table: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ModulesArgs {
    /// Only installed modules
    #[arg(short, long)]
    pub installed: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct InstallArgs {
    /// Modules to install (name or name@version)
    #[arg(required_unless_present = "all")]
    pub modules: Vec<String>,

    /// Install every available module
    #[arg(short, long, conflicts_with = "modules")]
    pub all: bool,
}

#[derive(Args, Clone)]
pub struct PassArgs {
    /// Show the plan without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print the plan report as JSON
    #[arg(long)]
    pub json: bool,

    /// Concurrent operations (overrides config)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}
