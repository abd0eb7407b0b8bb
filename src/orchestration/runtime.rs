//! Container runtime abstraction
//!
//! Provides a trait for the container operations a build needs, so the
//! lifecycle can run against podman, docker, or an in-memory fake.

use crate::error::PackResult;
use crate::orchestration::podman::{ContainerConfig, Ownership};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Abstract container runtime interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ensure the runtime CLI is installed and answering
    async fn ensure_ready(&self) -> PackResult<()>;

    /// Create (but do not start) a container and return its ID
    async fn create(&self, config: &ContainerConfig) -> PackResult<String>;

    /// Copy the contents of a host directory into a created container,
    /// handing the copied tree to `owner` when given
    async fn copy_into(
        &self,
        container_id: &str,
        src: &Path,
        dest: &str,
        owner: Option<Ownership>,
    ) -> PackResult<()>;

    /// Start a container attached, calling `on_output` for each output line
    /// while it runs. Returns the container's exit code.
    async fn start_attached(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> PackResult<i32>;

    /// Stop a container, killing it after `grace`
    async fn stop(&self, container_id: &str, grace: Duration) -> PackResult<()>;

    /// Remove a container; a missing container is not an error
    async fn remove(&self, container_id: &str) -> PackResult<()>;

    /// Remove a volume; a missing volume is not an error
    async fn volume_remove(&self, name: &str) -> PackResult<()>;

    /// Read the labels of a local image
    async fn image_labels(&self, image: &str) -> PackResult<HashMap<String, String>>;

    /// Read the configured environment of a local image
    async fn image_env(&self, image: &str) -> PackResult<HashMap<String, String>>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
