//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cellarguard-migrate")]
#[command(about = "Migration, commit guard and compatibility tooling for the Arctan Wines CRM")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Database connection URL (`postgresql://...` or `sqlite://path`)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Migrations directory path (overrides the configuration file)
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true, default_value = cellarguard::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// TOML snapshot of parameter-store values used to resolve the database
    #[arg(long, global = true)]
    pub parameters: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new revision file
    #[command(alias = "generate")]
    Revision {
        /// Revision message
        #[arg(short, long)]
        message: String,

        /// Render the upgrade from the difference between the model and the migrated schema
        #[arg(long)]
        autogenerate: bool,
    },

    /// Apply revisions up to a target (default: head)
    Upgrade {
        /// `head`, `heads`, `+N`, a revision id, prefix or branch label
        #[arg(default_value = "head")]
        target: String,

        /// Show what would be applied without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert revisions down to a target
    Downgrade {
        /// `base`, `-N` or a revision id
        target: String,
    },

    /// Show the revision(s) recorded in the database
    Current,

    /// Show applied and pending revisions
    Status,

    /// List revisions, newest first
    History {
        /// Show parents, branch labels, dates and file paths
        #[arg(long)]
        verbose: bool,
    },

    /// Show the heads of the revision chain
    Heads,

    /// Show one revision
    Show {
        /// Revision id, prefix or branch label
        revision: String,
    },

    /// Fail when the model differs from the migrated schema
    Check,

    /// Pre-commit guard over the staged changes
    Guard {
        /// Repository whose index is inspected
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// Scan dependency manifests for packages the serverless runtime cannot load
    Compat {
        /// Manifests to scan (default: the configured list)
        manifests: Vec<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay every revision into a scratch SQLite database with fixtures
    Test {
        /// Print every table with its columns and row count
        #[arg(long)]
        inspect: bool,

        /// Keep the scratch database even when the run passes
        #[arg(long)]
        keep: bool,
    },

    /// Run one invocation action and print its JSON response
    Invoke {
        /// health, upgrade, current or history
        action: String,
    },

    /// Serve invocation actions over HTTP
    Serve {
        /// Listen address (overrides the configuration file)
        #[arg(long)]
        bind: Option<String>,
    },
}
