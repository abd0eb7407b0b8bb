//! Phase execution
//!
//! A `Phase` is one containerized lifecycle binary. It is specified with a
//! `PhaseBuilder`, created and run once, then removed.

use crate::config::schema::ProxyConfig;
use crate::credentials::{registry_auth_env, Keychain, REGISTRY_AUTH_ENV};
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::lifecycle::args::APP_DIR;
use crate::orchestration::{ContainerConfig, ContainerRuntime, Ownership};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the daemon socket is mounted inside phase containers
pub const DAEMON_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Label marking containers created for a phase
pub const PHASE_LABEL: &str = "io.buildpacks.phase";

/// Lifecycle phase binaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseName {
    Detector,
    Restorer,
    Analyzer,
    Builder,
    Exporter,
    Cacher,
}

impl PhaseName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detector => "detector",
            Self::Restorer => "restorer",
            Self::Analyzer => "analyzer",
            Self::Builder => "builder",
            Self::Exporter => "exporter",
            Self::Cacher => "cacher",
        }
    }

    /// Entry command inside the builder image
    pub fn command(&self) -> String {
        format!("/lifecycle/{}", self.as_str())
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a phase needs from the host side
#[derive(Clone)]
pub struct PhaseContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub keychain: Arc<dyn Keychain>,
    /// Builder image carrying the phase binaries
    pub image: String,
    /// Host daemon socket bound for daemon access
    pub daemon_socket: String,
    /// Grace period when stopping a cancelled phase
    pub stop_timeout: Duration,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    None,
    Daemon,
    Registry(Vec<String>),
}

/// Builds an immutable phase specification
pub struct PhaseBuilder {
    ctx: PhaseContext,
    name: PhaseName,
    args: Vec<String>,
    binds: Vec<String>,
    network: Option<String>,
    access: Access,
    conflict: bool,
}

impl PhaseBuilder {
    pub fn new(name: PhaseName, ctx: PhaseContext) -> Self {
        Self {
            ctx,
            name,
            args: Vec::new(),
            binds: Vec::new(),
            network: None,
            access: Access::None,
            conflict: false,
        }
    }

    /// Append arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a `<volume>:<container-path>` bind mount
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    /// Bind a named volume at `container_path`
    pub fn volume(self, name: &str, container_path: &str) -> Self {
        self.bind(format!("{}:{}", name, container_path))
    }

    /// Run the phase in this network mode
    pub fn network(mut self, mode: Option<&str>) -> Self {
        self.network = mode.filter(|m| !m.is_empty()).map(String::from);
        self
    }

    /// Bind the daemon socket and run as root
    pub fn daemon_access(mut self) -> Self {
        self.set_access(Access::Daemon);
        self
    }

    /// Provide registry credentials for `images` instead of the daemon
    pub fn registry_access<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let images = images.into_iter().map(Into::into).collect();
        self.set_access(Access::Registry(images));
        self
    }

    fn set_access(&mut self, access: Access) {
        let switching = match (&self.access, &access) {
            (Access::None, _) => false,
            (Access::Daemon, Access::Daemon) => false,
            (Access::Registry(_), Access::Registry(_)) => false,
            _ => true,
        };
        self.conflict |= switching;
        self.access = access;
    }

    /// Validate and produce the phase
    pub fn build(self) -> PackResult<Phase> {
        let name = self.name;

        if self.conflict {
            return Err(PackError::phase_create(
                name,
                "daemon access and registry access are mutually exclusive",
            ));
        }
        if self.ctx.image.trim().is_empty() {
            return Err(PackError::phase_create(name, "no builder image"));
        }
        if let Some(bad) = self.binds.iter().find(|b| !is_valid_bind(b)) {
            return Err(PackError::phase_create(
                name,
                format!("invalid bind mount '{}', expected <volume>:<path>", bad),
            ));
        }

        let mut env = proxy_env(&self.ctx.proxy);
        let mut binds = self.binds;
        let mut user = None;

        match self.access {
            Access::None => {}
            Access::Daemon => {
                binds.push(format!("{}:{}", self.ctx.daemon_socket, DAEMON_SOCKET_PATH));
                user = Some("root".to_string());
            }
            Access::Registry(images) => {
                let refs = images
                    .iter()
                    .map(|i| ImageRef::parse(i))
                    .collect::<PackResult<Vec<_>>>()
                    .map_err(|e| PackError::phase_create(name, e.to_string()))?;
                let auth = registry_auth_env(self.ctx.keychain.as_ref(), &refs)
                    .map_err(|e| PackError::phase_create(name, e.to_string()))?;
                if let Some(auth) = auth {
                    env.insert(REGISTRY_AUTH_ENV.to_string(), auth);
                }
            }
        }

        let mut command = vec![name.command()];
        command.extend(self.args);

        let mut labels = BTreeMap::new();
        labels.insert(PHASE_LABEL.to_string(), name.to_string());

        Ok(Phase {
            name,
            config: ContainerConfig {
                image: self.ctx.image,
                command,
                binds,
                env,
                network: self.network,
                user,
                labels,
            },
            runtime: self.ctx.runtime,
            stop_timeout: self.ctx.stop_timeout,
            container_id: None,
        })
    }
}

fn is_valid_bind(bind: &str) -> bool {
    matches!(bind.split_once(':'), Some((volume, path)) if !volume.is_empty() && path.starts_with('/'))
}

/// Proxy variables in both spellings the phase tooling may read
fn proxy_env(proxy: &ProxyConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let pairs = [
        ("HTTP_PROXY", &proxy.http),
        ("HTTPS_PROXY", &proxy.https),
        ("NO_PROXY", &proxy.no_proxy),
    ];
    for (key, value) in pairs {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            env.insert(key.to_string(), value.to_string());
            env.insert(key.to_lowercase(), value.to_string());
        }
    }
    env
}

/// One lifecycle phase container
pub struct Phase {
    name: PhaseName,
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    stop_timeout: Duration,
    container_id: Option<String>,
}

impl Phase {
    pub fn name(&self) -> PhaseName {
        self.name
    }

    /// Container specification of this phase
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Arguments passed to the phase binary
    pub fn args(&self) -> &[String] {
        &self.config.command[1..]
    }

    /// Whether something is bound at `container_path`
    pub fn mounts(&self, container_path: &str) -> bool {
        self.config.binds_path(container_path)
    }

    /// Whether the phase talks to the local daemon
    pub fn has_daemon_access(&self) -> bool {
        self.config.binds_path(DAEMON_SOCKET_PATH)
    }

    /// Whether registry credentials were provided to the phase
    pub fn has_registry_auth(&self) -> bool {
        self.config.env.contains_key(REGISTRY_AUTH_ENV)
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Create the phase container (idempotent)
    pub async fn create(&mut self) -> PackResult<()> {
        if self.container_id.is_none() {
            let id = self.runtime.create(&self.config).await?;
            debug!("Created {} container {}", self.name, id);
            self.container_id = Some(id);
        }
        Ok(())
    }

    /// Copy the application source into the app directory of the created
    /// container, owned by `owner` when given. The app volume mounted there
    /// keeps it for later phases.
    pub async fn upload(&self, app_path: &Path, owner: Option<Ownership>) -> PackResult<()> {
        let id = self.created_id()?;
        self.runtime.copy_into(id, app_path, APP_DIR, owner).await
    }

    /// Start the created container and wait for it, streaming its output.
    ///
    /// Cancellation stops the container within the grace period.
    pub async fn start(&self, cancel: &CancellationToken) -> PackResult<()> {
        let id = self.created_id()?;
        let name = self.name;

        if cancel.is_cancelled() {
            return Err(PackError::Cancelled {
                phase: name.to_string(),
            });
        }

        let on_output = move |line: String| info!("[{}] {}", name, line);

        let code = tokio::select! {
            result = self.runtime.start_attached(id, &on_output) => result?,
            _ = cancel.cancelled() => {
                warn!("Stopping {} phase", name);
                if let Err(e) = self.runtime.stop(id, self.stop_timeout).await {
                    warn!("Failed to stop {} container {}: {}", name, id, e);
                }
                return Err(PackError::Cancelled { phase: name.to_string() });
            }
        };

        if code != 0 {
            return Err(PackError::PhaseFailed {
                phase: name.to_string(),
                code,
            });
        }
        Ok(())
    }

    /// Create, start and wait
    pub async fn run(&mut self, cancel: &CancellationToken) -> PackResult<()> {
        self.create().await?;
        self.start(cancel).await
    }

    /// Remove the phase container, if one was created
    pub async fn cleanup(&mut self) -> PackResult<()> {
        match self.container_id.take() {
            Some(id) => self.runtime.remove(&id).await,
            None => Ok(()),
        }
    }

    fn created_id(&self) -> PackResult<&str> {
        self.container_id.as_deref().ok_or_else(|| {
            PackError::Internal(format!("{} container has not been created", self.name))
        })
    }
}
