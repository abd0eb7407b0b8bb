//! Lifecycle build orchestration
//!
//! Drives the lifecycle phase binaries of a builder image, one container per
//! phase, in a fixed order:
//!
//! | Step | Phase | Access | Runs when |
//! |------|-------|--------|-----------|
//! | 1 | detector | none | always |
//! | 2 | restorer | daemon | cache is not being cleared |
//! | 3 | analyzer | daemon, or registry when publishing | always |
//! | 4 | builder | none | always |
//! | 5 | exporter | daemon, or registry when publishing | always |
//! | 6 | cacher | daemon | lifecycle older than the default version |
//!
//! Phases share state through two volumes owned by the session. Both are
//! removed when the build ends, whatever the outcome.

pub mod args;
pub mod phase;
pub mod version;
pub mod volumes;

pub use args::{ExportTarget, PhaseArgs};
pub use phase::{Phase, PhaseBuilder, PhaseContext, PhaseName};
pub use version::{CacheFlag, VersionCapabilities, DEFAULT_LIFECYCLE_VERSION};
pub use volumes::SessionVolumes;

use crate::builder::Builder;
use crate::cache::{Cache, CachePurpose, VolumeCache};
use crate::config::schema::{ProxyConfig, RuntimeConfig};
use crate::credentials::{Anonymous, DockerConfigKeychain, Keychain};
use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::orchestration::{ContainerRuntime, Ownership};
use args::{APP_DIR, CACHE_DIR, LAUNCH_CACHE_DIR, LAYERS_DIR};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to build
#[derive(Clone)]
pub struct LifecycleOptions {
    /// Application source directory
    pub app_path: PathBuf,
    /// Image to produce
    pub image: ImageRef,
    pub builder: Arc<dyn Builder>,
    /// Run image override; the builder's stack run image otherwise
    pub run_image: Option<String>,
    pub clear_cache: bool,
    /// Push straight to the registry instead of the local daemon
    pub publish: bool,
    /// Network mode for the detect and build phases
    pub network: Option<String>,
    pub proxy: ProxyConfig,
}

/// State of one build
#[derive(Debug, Clone)]
pub struct BuildSession {
    pub app_path: PathBuf,
    pub image: ImageRef,
    pub builder_image: String,
    pub run_image: ImageRef,
    pub clear_cache: bool,
    pub publish: bool,
    pub network: Option<String>,
    pub proxy: ProxyConfig,
    pub volumes: SessionVolumes,
    pub capabilities: VersionCapabilities,
    /// Owner of the uploaded source, the builder's phase user
    pub app_owner: Option<Ownership>,
    app_uploaded: bool,
}

impl BuildSession {
    /// Whether the application source is already in the app volume
    pub fn app_uploaded(&self) -> bool {
        self.app_uploaded
    }
}

/// Host-side settings applied to every phase container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub daemon_socket: String,
    pub stop_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for LifecycleSettings {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            daemon_socket: config.daemon_socket.clone(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Build orchestrator
///
/// Not meant for overlapping builds: run one `execute` at a time per
/// instance. Independent instances can build concurrently.
pub struct Lifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    keychain: Arc<dyn Keychain>,
    settings: LifecycleSettings,
    verbose: bool,
    rng: Box<dyn RngCore + Send>,
}

impl Lifecycle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        let docker_config = DockerConfigKeychain::from_env();
        let keychain: Arc<dyn Keychain> = if docker_config.path().exists() {
            Arc::new(docker_config)
        } else {
            Arc::new(Anonymous)
        };

        Self {
            runtime,
            keychain,
            settings: LifecycleSettings::default(),
            verbose: false,
            rng: Box::new(StdRng::from_entropy()),
        }
    }

    pub fn with_keychain(mut self, keychain: Arc<dyn Keychain>) -> Self {
        self.keychain = keychain;
        self
    }

    pub fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Source of randomness for volume names
    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = rng;
        self
    }

    /// Ask eligible lifecycles for debug output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Validate options and derive the state of a new build
    pub fn setup(&mut self, opts: LifecycleOptions) -> PackResult<BuildSession> {
        if !opts.app_path.is_dir() {
            return Err(PackError::Setup(format!(
                "application path {} is not a directory",
                opts.app_path.display()
            )));
        }

        let builder_image = opts.builder.image().trim().to_string();
        if builder_image.is_empty() {
            return Err(PackError::Setup("no builder image".to_string()));
        }

        let run_image = opts
            .run_image
            .as_deref()
            .or_else(|| opts.builder.run_image())
            .ok_or_else(|| {
                PackError::Setup(format!(
                    "no run image given and builder {} does not define one",
                    builder_image
                ))
            })?;
        let run_image = ImageRef::parse(run_image)
            .map_err(|e| PackError::Setup(format!("run image: {}", e)))?;

        let capabilities = VersionCapabilities::resolve(&opts.builder.lifecycle_descriptor().version)?;
        let volumes = SessionVolumes::generate(self.rng.as_mut());

        debug!(
            "Lifecycle {} (cache flag {}, cache phase {})",
            capabilities.version(),
            capabilities.cache_flag(),
            capabilities.requires_cache_phase()
        );
        debug!("Session volumes: {} {}", volumes.layers, volumes.app);

        Ok(BuildSession {
            app_path: opts.app_path,
            image: opts.image,
            builder_image,
            run_image,
            clear_cache: opts.clear_cache,
            publish: opts.publish,
            network: opts.network.filter(|n| !n.is_empty()),
            proxy: opts.proxy,
            volumes,
            capabilities,
            app_owner: opts.builder.ownership(),
            app_uploaded: false,
        })
    }

    /// Run a complete build.
    ///
    /// Session volumes are removed before returning. A pipeline error takes
    /// precedence over a cleanup error, which is then only logged.
    pub async fn execute(&mut self, cancel: &CancellationToken, opts: LifecycleOptions) -> PackResult<()> {
        let mut session = self.setup(opts)?;

        let result = self.run_pipeline(&mut session, cancel).await;
        let cleanup = self.cleanup(&session).await;

        match (result, cleanup) {
            (Err(e), Err(cleanup_err)) => {
                warn!("{}", cleanup_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), cleanup) => cleanup,
        }
    }

    async fn run_pipeline(&self, session: &mut BuildSession, cancel: &CancellationToken) -> PackResult<()> {
        let build_cache = VolumeCache::new(&session.image, CachePurpose::Build, Arc::clone(&self.runtime));
        let launch_cache = VolumeCache::new(&session.image, CachePurpose::Launch, Arc::clone(&self.runtime));
        debug!("Cache volumes: {} {}", build_cache.name(), launch_cache.name());

        if session.clear_cache {
            build_cache.clear(cancel).await.map_err(|e| PackError::CacheClear {
                name: build_cache.name().to_string(),
                source: Box::new(e),
            })?;
            debug!("Build cache {} cleared", build_cache.name());
        }

        self.detect(session, cancel).await?;

        if !session.clear_cache {
            self.restore(session, cancel, build_cache.name()).await?;
        }

        self.analyze(session, cancel).await?;
        self.build(session, cancel).await?;

        let export_cache = (!session.clear_cache).then(|| build_cache.name());
        self.export(session, cancel, export_cache, launch_cache.name()).await?;

        if session.capabilities.requires_cache_phase() {
            self.cache(session, cancel, build_cache.name()).await?;
        }

        Ok(())
    }

    /// Remove both session volumes, reporting every failure
    pub async fn cleanup(&self, session: &BuildSession) -> PackResult<()> {
        let mut errors = Vec::new();

        for (kind, name) in [("layers", &session.volumes.layers), ("app", &session.volumes.app)] {
            debug!("Removing {} volume {}", kind, name);
            if let Err(e) = self.runtime.volume_remove(name).await {
                errors.push(PackError::VolumeCleanup {
                    kind,
                    name: name.clone(),
                    source: Box::new(e),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PackError::Cleanup { errors })
        }
    }

    pub async fn detect(&self, session: &mut BuildSession, cancel: &CancellationToken) -> PackResult<()> {
        info!("===> DETECTING");
        let phase = self.new_detect(session)?;
        self.run_phase(session, phase, cancel).await
    }

    pub async fn restore(
        &self,
        session: &mut BuildSession,
        cancel: &CancellationToken,
        cache: &str,
    ) -> PackResult<()> {
        info!("===> RESTORING");
        let phase = self.new_restore(session, cache)?;
        self.run_phase(session, phase, cancel).await
    }

    pub async fn analyze(&self, session: &mut BuildSession, cancel: &CancellationToken) -> PackResult<()> {
        info!("===> ANALYZING");
        let phase = self.new_analyze(session)?;
        self.run_phase(session, phase, cancel).await
    }

    pub async fn build(&self, session: &mut BuildSession, cancel: &CancellationToken) -> PackResult<()> {
        info!("===> BUILDING");
        let phase = self.new_build(session)?;
        self.run_phase(session, phase, cancel).await
    }

    pub async fn export(
        &self,
        session: &mut BuildSession,
        cancel: &CancellationToken,
        build_cache: Option<&str>,
        launch_cache: &str,
    ) -> PackResult<()> {
        info!("===> EXPORTING");
        let phase = self.new_export(session, build_cache, launch_cache)?;
        self.run_phase(session, phase, cancel).await
    }

    pub async fn cache(&self, session: &mut BuildSession, cancel: &CancellationToken, cache: &str) -> PackResult<()> {
        info!("===> CACHING");
        let phase = self.new_cache(session, cache)?;
        self.run_phase(session, phase, cancel).await
    }

    pub fn new_detect(&self, session: &BuildSession) -> PackResult<Phase> {
        self.phase(session, PhaseArgs::Detect)
            .volume(&session.volumes.layers, LAYERS_DIR)
            .volume(&session.volumes.app, APP_DIR)
            .network(session.network.as_deref())
            .build()
    }

    pub fn new_restore(&self, session: &BuildSession, cache: &str) -> PackResult<Phase> {
        let args = PhaseArgs::Restore {
            cache_flag: session.capabilities.cache_flag(),
        };
        self.phase(session, args)
            .volume(&session.volumes.layers, LAYERS_DIR)
            .volume(cache, CACHE_DIR)
            .daemon_access()
            .build()
    }

    pub fn new_analyze(&self, session: &BuildSession) -> PackResult<Phase> {
        let image = session.image.name();
        let args = PhaseArgs::Analyze {
            image: image.clone(),
            daemon: !session.publish,
            skip_layers: session.clear_cache,
        };
        let phase = self
            .phase(session, args)
            .volume(&session.volumes.layers, LAYERS_DIR);

        if session.publish {
            phase.registry_access([image]).build()
        } else {
            phase.daemon_access().build()
        }
    }

    pub fn new_build(&self, session: &BuildSession) -> PackResult<Phase> {
        self.phase(session, PhaseArgs::Build)
            .volume(&session.volumes.layers, LAYERS_DIR)
            .volume(&session.volumes.app, APP_DIR)
            .network(session.network.as_deref())
            .build()
    }

    /// Exporter spec. `build_cache` is bound, and named to the exporter, only
    /// when exporting to the daemon.
    pub fn new_export(
        &self,
        session: &BuildSession,
        build_cache: Option<&str>,
        launch_cache: &str,
    ) -> PackResult<Phase> {
        let image = session.image.name();
        let run_image = session.run_image.name();

        let target = if session.publish {
            ExportTarget::Registry
        } else {
            ExportTarget::Daemon {
                build_cache: build_cache.map(|_| session.capabilities.cache_flag()),
            }
        };
        let args = PhaseArgs::Export {
            image: image.clone(),
            run_image: run_image.clone(),
            target,
        };

        let phase = self
            .phase(session, args)
            .volume(&session.volumes.layers, LAYERS_DIR)
            .volume(&session.volumes.app, APP_DIR);

        if session.publish {
            return phase.registry_access([image, run_image]).build();
        }

        let mut phase = phase.volume(launch_cache, LAUNCH_CACHE_DIR);
        if let Some(cache) = build_cache {
            phase = phase.volume(cache, CACHE_DIR);
        }
        phase.daemon_access().build()
    }

    pub fn new_cache(&self, session: &BuildSession, cache: &str) -> PackResult<Phase> {
        let args = PhaseArgs::Cache {
            cache_flag: session.capabilities.cache_flag(),
        };
        self.phase(session, args)
            .volume(&session.volumes.layers, LAYERS_DIR)
            .volume(cache, CACHE_DIR)
            .daemon_access()
            .build()
    }

    fn phase(&self, session: &BuildSession, args: PhaseArgs) -> PhaseBuilder {
        let ctx = PhaseContext {
            runtime: Arc::clone(&self.runtime),
            keychain: Arc::clone(&self.keychain),
            image: session.builder_image.clone(),
            daemon_socket: self.settings.daemon_socket.clone(),
            stop_timeout: self.settings.stop_timeout,
            proxy: session.proxy.clone(),
        };
        PhaseBuilder::new(args.phase(), ctx).args(args.render(&session.capabilities, self.verbose))
    }

    /// Run one phase and always remove its container afterwards
    async fn run_phase(
        &self,
        session: &mut BuildSession,
        mut phase: Phase,
        cancel: &CancellationToken,
    ) -> PackResult<()> {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled {
                phase: phase.name().to_string(),
            });
        }

        let result = drive(session, &mut phase, cancel).await;

        if let Err(e) = phase.cleanup().await {
            warn!("Failed to remove {} container: {}", phase.name(), e);
        }
        result
    }
}

async fn drive(session: &mut BuildSession, phase: &mut Phase, cancel: &CancellationToken) -> PackResult<()> {
    phase.create().await?;

    if phase.mounts(APP_DIR) && !session.app_uploaded {
        debug!("Uploading {} to {}", session.app_path.display(), session.volumes.app);
        phase.upload(&session.app_path, session.app_owner).await?;
        session.app_uploaded = true;
    }

    phase.start(cancel).await
}
