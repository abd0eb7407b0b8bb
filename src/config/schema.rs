//! Configuration schema for pack
//!
//! Configuration is stored at `~/.config/pack/config.toml`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Build defaults
    pub build: BuildConfig,

    /// Proxy settings forwarded to every phase container
    pub proxy: ProxyConfig,

    /// Container runtime settings
    pub runtime: RuntimeConfig,
}

/// Build defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Builder image used when `--builder` is not given
    pub builder: String,

    /// Run image override (defaults to the builder's stack run image)
    pub run_image: Option<String>,

    /// Network mode for the detect and build phases
    pub network: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            builder: "docker.io/cloudfoundry/cnb:bionic".to_string(),
            run_image: None,
            network: None,
        }
    }
}

/// Proxy settings
///
/// Unset values fall back to `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Fill unset values from the process environment
    pub fn with_env_fallback(mut self) -> Self {
        fn from_env(name: &str) -> Option<String> {
            std::env::var(name)
                .or_else(|_| std::env::var(name.to_lowercase()))
                .ok()
                .filter(|v| !v.is_empty())
        }

        self.http = self.http.or_else(|| from_env("HTTP_PROXY"));
        self.https = self.https.or_else(|| from_env("HTTPS_PROXY"));
        self.no_proxy = self.no_proxy.or_else(|| from_env("NO_PROXY"));
        self
    }
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime CLI to drive ("podman" or "docker")
    pub binary: String,

    /// Host socket bound into phases that need daemon access
    pub daemon_socket: String,

    /// Grace period before a cancelled phase container is killed
    pub stop_timeout_secs: u64,
}

impl RuntimeConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "podman".to_string(),
            daemon_socket: "/var/run/docker.sock".to_string(),
            stop_timeout_secs: 10,
        }
    }
}
