//! Cache volumes
//!
//! Names a persistent cache volume deterministically from the image it
//! caches, and clears it by removing the volume (the next phase that binds
//! it gets a fresh, empty one).

use crate::error::{PackError, PackResult};
use crate::image::ImageRef;
use crate::orchestration::ContainerRuntime;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A persistent cache consulted by a build
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stable identifier, identical across builds of the same image
    fn name(&self) -> &str;

    /// Discard the cache contents
    async fn clear(&self, cancel: &CancellationToken) -> PackResult<()>;
}

/// What a cache volume holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePurpose {
    /// Layers reused by restore/export between builds
    Build,
    /// Launch layers reused by export against the local daemon
    Launch,
}

impl CachePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Launch => "launch",
        }
    }
}

impl fmt::Display for CachePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cache stored in a named volume of the container runtime
pub struct VolumeCache {
    name: String,
    purpose: CachePurpose,
    runtime: Arc<dyn ContainerRuntime>,
}

impl VolumeCache {
    /// Create the cache for an image and purpose
    pub fn new(image: &ImageRef, purpose: CachePurpose, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: volume_name(image, purpose),
            purpose,
            runtime,
        }
    }

    pub fn purpose(&self) -> CachePurpose {
        self.purpose
    }
}

#[async_trait]
impl Cache for VolumeCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn clear(&self, cancel: &CancellationToken) -> PackResult<()> {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled {
                phase: format!("clearing {} cache", self.purpose),
            });
        }

        debug!("Clearing {} cache volume {}", self.purpose, self.name);
        self.runtime.volume_remove(&self.name).await
    }
}

/// Derive the cache volume name for an image
///
/// Uses the first 12 hex chars (6 bytes) of the SHA256 of the canonical
/// image name, so `app` and `index.docker.io/library/app:latest` share a cache.
pub fn volume_name(image: &ImageRef, purpose: CachePurpose) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.name().as_bytes());
    let result = hasher.finalize();

    format!("pack-cache-{}.{}", hex::encode(&result[..6]), purpose)
}
