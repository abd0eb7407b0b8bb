//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// pack - Build container images from application source
///
/// Runs the lifecycle of a builder image against your source and exports
/// the result to the local daemon or a registry.
#[derive(Parser, Debug)]
#[command(name = "pack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (debug logs, and lifecycle debug output)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PACK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an image from application source
    Build(BuildArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Name of the image to build
    pub image: String,

    /// Builder image (defaults to [build] builder from config)
    #[arg(short = 'B', long)]
    pub builder: Option<String>,

    /// Application directory (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Run image (defaults to the builder's stack run image)
    #[arg(long)]
    pub run_image: Option<String>,

    /// Push the image straight to its registry
    #[arg(long)]
    pub publish: bool,

    /// Clear the build cache before building
    #[arg(long)]
    pub clear_cache: bool,

    /// Network mode for the detect and build phases
    #[arg(long)]
    pub network: Option<String>,

    /// HTTP proxy forwarded to every phase
    #[arg(long)]
    pub http_proxy: Option<String>,

    /// HTTPS proxy forwarded to every phase
    #[arg(long)]
    pub https_proxy: Option<String>,

    /// Hosts that bypass the proxy
    #[arg(long)]
    pub no_proxy: Option<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
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

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}
