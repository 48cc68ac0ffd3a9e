//! CLI parse: clap types for Jaunt. No behavior; definitions only.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Jaunt CLI - spec-driven code generation with incremental builds
#[derive(Parser, Debug)]
#[command(name = "jaunt", version)]
#[command(about = "Generate Python implementations and tests from annotated spec stubs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root (defaults to searching upward from the working directory for jaunt.toml)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Path to jaunt.toml (defaults to <root>/jaunt.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit structured JSON output to stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored error output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log file path (switches log output to the file)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Flags shared by `build`, `test` and `status`.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArgs {
    /// Concurrency override
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Force regeneration
    #[arg(long)]
    pub force: bool,

    /// Restrict to MODULE[:QUALNAME] (repeatable)
    #[arg(long = "target", value_name = "MODULE[:QUALNAME]")]
    pub targets: Vec<String>,

    /// Disable best-effort dependency inference (explicit deps only)
    #[arg(long)]
    pub no_infer_deps: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate implementations for stale modules
    Build(BuildArgs),
    /// Generate tests and run pytest
    Test {
        #[command(flatten)]
        build: BuildArgs,

        /// Skip the implementation build
        #[arg(long)]
        no_build: bool,

        /// Skip running pytest
        #[arg(long)]
        no_run: bool,

        /// Extra argument appended to pytest (repeatable)
        #[arg(long = "pytest-args", allow_hyphen_values = true)]
        pytest_args: Vec<String>,
    },
    /// Show which modules are stale
    Status(BuildArgs),
    /// Remove generated directories
    Clean {
        /// Show what would be removed without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Create jaunt.toml and the default directories
    Init {
        /// Overwrite an existing jaunt.toml
        #[arg(long)]
        force: bool,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Build(_) => "build",
            Commands::Test { .. } => "test",
            Commands::Status(_) => "status",
            Commands::Clean { .. } => "clean",
            Commands::Init { .. } => "init",
        }
    }
}
