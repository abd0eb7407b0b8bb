//! Lifecycle version compatibility
//!
//! The phase binaries changed their argument protocol across releases. The
//! differences are resolved once per session from the builder's lifecycle
//! version and then consulted as plain data.

use crate::error::{PackError, PackResult};
use semver::Version;
use std::fmt;

/// Newest lifecycle this orchestrator drives natively
pub const DEFAULT_LIFECYCLE_VERSION: Version = Version::new(0, 5, 0);

/// First lifecycle spelling the cache directory flag `-cache-dir`
const CACHE_DIR_FLAG_SINCE: Version = Version::new(0, 5, 0);

/// `-log-level` is accepted by lifecycles strictly newer than this
const LOG_LEVEL_AFTER: Version = Version::new(0, 4, 0);

/// Spelling of the flag naming the cache directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFlag {
    /// `-path`, used before 0.5.0
    Path,
    /// `-cache-dir`
    CacheDir,
}

impl CacheFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Path => "-path",
            Self::CacheDir => "-cache-dir",
        }
    }
}

impl fmt::Display for CacheFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol differences derived from a lifecycle version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCapabilities {
    version: Version,
    cache_flag: CacheFlag,
    log_level: bool,
    cache_phase: bool,
}

impl VersionCapabilities {
    /// Parse `version` and derive its capabilities
    pub fn resolve(version: &str) -> PackResult<Self> {
        let version = parse_version(version)?;
        let core = (version.major, version.minor, version.patch);
        let at_least = |v: &Version| core >= (v.major, v.minor, v.patch);

        Ok(Self {
            cache_flag: if at_least(&CACHE_DIR_FLAG_SINCE) {
                CacheFlag::CacheDir
            } else {
                CacheFlag::Path
            },
            log_level: core > (LOG_LEVEL_AFTER.major, LOG_LEVEL_AFTER.minor, LOG_LEVEL_AFTER.patch),
            cache_phase: !at_least(&DEFAULT_LIFECYCLE_VERSION),
            version,
        })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn cache_flag(&self) -> CacheFlag {
        self.cache_flag
    }

    /// Whether phases accept `-log-level debug`
    pub fn supports_log_level(&self) -> bool {
        self.log_level
    }

    /// Whether caching needs its own phase after export
    ///
    /// Lifecycles at or past the default version cache during export.
    pub fn requires_cache_phase(&self) -> bool {
        self.cache_phase
    }

    /// Prepend `-log-level debug` when verbose and supported.
    ///
    /// Always prepended: the phase binaries parse trailing positional
    /// arguments.
    pub fn with_log_level(&self, verbose: bool, args: Vec<String>) -> Vec<String> {
        if !(verbose && self.log_level) {
            return args;
        }

        let mut prefixed = Vec::with_capacity(args.len() + 2);
        prefixed.push("-log-level".to_string());
        prefixed.push("debug".to_string());
        prefixed.extend(args);
        prefixed
    }
}

/// Parse a lifecycle version, accepting a leading `v` and `major.minor`
fn parse_version(raw: &str) -> PackResult<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    let padded = match trimmed.split('.').count() {
        1 => format!("{}.0.0", trimmed),
        2 => format!("{}.0", trimmed),
        _ => trimmed.to_string(),
    };

    Version::parse(&padded)
        .map_err(|e| PackError::Setup(format!("invalid lifecycle version '{}': {}", raw, e)))
}
