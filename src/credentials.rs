//! Registry credentials for phases with registry access
//!
//! Phases that talk to a registry directly receive their credentials through
//! the `CNB_REGISTRY_AUTH` environment variable: a JSON object mapping each
//! registry host to an `Authorization` header value.

use crate::error::{PackError, PackResult};
use crate::image::{ImageRef, DEFAULT_REGISTRY};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::debug;

/// Environment variable read by the phase binaries
pub const REGISTRY_AUTH_ENV: &str = "CNB_REGISTRY_AUTH";

/// Source of registry credentials
pub trait Keychain: Send + Sync {
    /// `Authorization` header value for a registry host, if any
    fn resolve(&self, registry: &str) -> PackResult<Option<String>>;
}

/// Keychain that never has credentials (anonymous access)
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Keychain for Anonymous {
    fn resolve(&self, _registry: &str) -> PackResult<Option<String>> {
        Ok(None)
    }
}

/// Keychain backed by a docker/podman `config.json`-style auth file
#[derive(Debug, Clone)]
pub struct DockerConfigKeychain {
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct AuthFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

impl DockerConfigKeychain {
    /// Use an explicit auth file
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Locate the auth file the way podman and docker do:
    /// `REGISTRY_AUTH_FILE`, then `$DOCKER_CONFIG/config.json`,
    /// then `~/.docker/config.json`
    pub fn from_env() -> Self {
        let path = std::env::var_os("REGISTRY_AUTH_FILE")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("DOCKER_CONFIG").map(|dir| PathBuf::from(dir).join("config.json"))
            })
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".docker")
                    .join("config.json")
            });
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn load(&self) -> PackResult<AuthFile> {
        if !self.path.exists() {
            debug!("No registry auth file at {}", self.path.display());
            return Ok(AuthFile::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| PackError::io(format!("reading {}", self.path.display()), e))?;
        serde_json::from_str(&content).map_err(|e| {
            PackError::Credentials(format!("parsing {}: {}", self.path.display(), e))
        })
    }
}

impl Keychain for DockerConfigKeychain {
    fn resolve(&self, registry: &str) -> PackResult<Option<String>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);

        Ok(file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .and_then(|(_, entry)| entry.auth.clone())
            .filter(|auth| !auth.is_empty())
            .map(|auth| format!("Basic {}", auth)))
    }
}

/// Reduce an auth-file key or registry host to a comparable host name
fn normalize_registry(key: &str) -> String {
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();

    match host {
        "docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
            DEFAULT_REGISTRY.to_string()
        }
        other => other.to_string(),
    }
}

/// Build the `CNB_REGISTRY_AUTH` value for a set of images.
///
/// Returns `None` when no image has credentials.
pub fn registry_auth_env(keychain: &dyn Keychain, images: &[ImageRef]) -> PackResult<Option<String>> {
    let mut auths = BTreeMap::new();
    for image in images {
        if auths.contains_key(image.registry()) {
            continue;
        }
        if let Some(header) = keychain.resolve(image.registry())? {
            auths.insert(image.registry().to_string(), header);
        }
    }

    if auths.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&auths)?))
}
