//! Typed phase arguments
//!
//! Each phase's arguments are assembled as a structured value and only
//! rendered to the flag strings the phase binaries expect when the phase
//! container is specified.

use crate::lifecycle::phase::PhaseName;
use crate::lifecycle::version::{CacheFlag, VersionCapabilities};

/// Fixed paths inside every phase container
pub const LAYERS_DIR: &str = "/layers";
pub const APP_DIR: &str = "/workspace";
pub const CACHE_DIR: &str = "/cache";
pub const LAUNCH_CACHE_DIR: &str = "/launch-cache";
pub const PLATFORM_DIR: &str = "/platform";

/// Where the exporter writes the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// Push straight to the registry
    Registry,
    /// Write to the local daemon, optionally through the build cache
    Daemon { build_cache: Option<CacheFlag> },
}

/// Arguments of one phase invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseArgs {
    Detect,
    Restore {
        cache_flag: CacheFlag,
    },
    Analyze {
        image: String,
        daemon: bool,
        skip_layers: bool,
    },
    Build,
    Export {
        image: String,
        run_image: String,
        target: ExportTarget,
    },
    Cache {
        cache_flag: CacheFlag,
    },
}

impl PhaseArgs {
    /// Phase binary these arguments are for
    pub fn phase(&self) -> PhaseName {
        match self {
            Self::Detect => PhaseName::Detector,
            Self::Restore { .. } => PhaseName::Restorer,
            Self::Analyze { .. } => PhaseName::Analyzer,
            Self::Build => PhaseName::Builder,
            Self::Export { .. } => PhaseName::Exporter,
            Self::Cache { .. } => PhaseName::Cacher,
        }
    }

    /// Render to the phase binary's flag strings
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<&str> = Vec::new();

        match self {
            Self::Detect => {
                args.extend(["-app", APP_DIR, "-platform", PLATFORM_DIR]);
            }
            Self::Restore { cache_flag } | Self::Cache { cache_flag } => {
                args.extend([cache_flag.as_str(), CACHE_DIR, "-layers", LAYERS_DIR]);
            }
            Self::Analyze {
                image,
                daemon,
                skip_layers,
            } => {
                if *daemon {
                    args.push("-daemon");
                }
                if *skip_layers {
                    args.push("-skip-layers");
                }
                args.extend(["-layers", LAYERS_DIR, image.as_str()]);
            }
            Self::Build => {
                args.extend(["-layers", LAYERS_DIR, "-app", APP_DIR, "-platform", PLATFORM_DIR]);
            }
            Self::Export {
                image,
                run_image,
                target,
            } => match target {
                ExportTarget::Registry => {
                    args.extend([
                        "-image",
                        run_image.as_str(),
                        "-layers",
                        LAYERS_DIR,
                        "-app",
                        APP_DIR,
                        image.as_str(),
                    ]);
                }
                ExportTarget::Daemon { build_cache } => {
                    if let Some(flag) = build_cache {
                        args.extend([flag.as_str(), CACHE_DIR]);
                    }
                    args.extend([
                        "-image",
                        run_image.as_str(),
                        "-layers",
                        LAYERS_DIR,
                        "-app",
                        APP_DIR,
                        "-daemon",
                        "-launch-cache",
                        LAUNCH_CACHE_DIR,
                        image.as_str(),
                    ]);
                }
            },
        }

        args.into_iter().map(String::from).collect()
    }

    /// Render with the version's log-level prefix applied.
    ///
    /// Neither the builder nor the registry analyzer takes `-log-level`.
    pub fn render(&self, capabilities: &VersionCapabilities, verbose: bool) -> Vec<String> {
        let args = self.to_args();
        if !self.takes_log_level() {
            return args;
        }
        capabilities.with_log_level(verbose, args)
    }

    fn takes_log_level(&self) -> bool {
        !matches!(self, Self::Build | Self::Analyze { daemon: false, .. })
    }
}
