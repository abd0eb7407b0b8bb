//! pack - Build container images from application source
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use pack::cli::{Cli, Commands};
use pack::config::ConfigManager;
use pack::error::PackResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> PackResult<()> {
    let cli = Cli::parse();

    // Phase output is logged at info, so that is the floor
    let filter = match cli.verbose {
        0 => EnvFilter::new("pack=info"),
        _ => EnvFilter::new("pack=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    match cli.command {
        Commands::Build(args) => pack::cli::commands::build(args, &config, cli.verbose > 0).await,
        Commands::Config(args) => pack::cli::commands::config(args, &config, &config_manager).await,
    }
}
