//! Command-line interface for the kestrel orchestration engine.

use anyhow::Result;
use clap::Parser as _;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use cli::{Cli, Commands};

mod cli;
mod demo;
mod handlers;
mod render;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "kestrel=debug,kestrel_engine=debug,kestrel_adapters=debug,kestrel_core=debug"
    } else {
        "kestrel=info,kestrel_engine=info,kestrel_adapters=info,kestrel_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run {
            plan,
            manifest,
            continue_on_failure,
            max_concurrent,
        } => {
            handlers::handle_run(plan, manifest, continue_on_failure, max_concurrent, cli.verbose)
                .await
        }
        Commands::Tools { manifest } => handlers::handle_tools(manifest),
        Commands::Config { full } => handlers::handle_config(full),
        Commands::Demo => handlers::handle_demo(cli.verbose).await,
    }
}
