//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level command-line arguments.
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Wave-based tool orchestration engine", long_about = None)]
pub struct Cli {
    /// Raise log verbosity and print tool metrics after a run.
    #[arg(short, long, global = true, help = "Verbose logging and metrics output")]
    pub verbose: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Execute a plan file against the registered tools.
    #[command(about = "Execute a JSON plan file")]
    Run {
        /// Path to the plan file.
        #[arg(help = "Path to a JSON plan file")]
        plan: PathBuf,

        /// Extra manifests loaded on top of the configured ones.
        #[arg(short, long, help = "Tool manifest file or directory (repeatable)")]
        manifest: Vec<PathBuf>,

        /// Keep running steps whose dependencies all succeeded.
        #[arg(long, help = "Keep independent steps running after a failure")]
        continue_on_failure: bool,

        /// Override the configured concurrency cap.
        #[arg(long, help = "Cap on concurrently executing steps within a wave")]
        max_concurrent: Option<usize>,
    },

    /// List every registered tool with its transport.
    #[command(about = "List registered tools")]
    Tools {
        /// Extra manifests loaded on top of the configured ones.
        #[arg(short, long, help = "Tool manifest file or directory (repeatable)")]
        manifest: Vec<PathBuf>,
    },

    /// Show the effective configuration.
    #[command(about = "Show configuration")]
    Config {
        /// Print the full TOML instead of a summary.
        #[arg(long, help = "Show full configuration including defaults")]
        full: bool,
    },

    /// Run the built-in demonstration plan against fixture tools.
    #[command(about = "Run the built-in demo plan, no configuration needed")]
    Demo,
}
