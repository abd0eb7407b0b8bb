//! Builder image descriptor
//!
//! The builder image bundles the lifecycle phase binaries. Its metadata
//! label carries the lifecycle version, which gates the argument protocol,
//! and the default run image of its stack.

use crate::error::{PackError, PackResult};
use crate::orchestration::{ContainerRuntime, Ownership};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

/// Label holding the builder metadata JSON
pub const METADATA_LABEL: &str = "io.buildpacks.builder.metadata";

/// Lifecycle version assumed for builders that do not declare one
pub const ASSUMED_LIFECYCLE_VERSION: &str = "0.3.0";

/// Builder env var naming the uid the phases run as
pub const USER_ID_ENV: &str = "CNB_USER_ID";

/// Builder env var naming the gid the phases run as
pub const GROUP_ID_ENV: &str = "CNB_GROUP_ID";

/// Lifecycle information bundled with a builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleDescriptor {
    /// Semantic version of the phase binaries
    pub version: String,
}

/// A builder whose lifecycle drives the build
pub trait Builder: Send + Sync {
    /// Image the phase containers run from
    fn image(&self) -> &str;

    /// Lifecycle bundled in the image
    fn lifecycle_descriptor(&self) -> &LifecycleDescriptor;

    /// Default run image of the builder's stack, if declared
    fn run_image(&self) -> Option<&str> {
        None
    }

    /// Owner the uploaded application source is handed to
    fn ownership(&self) -> Option<Ownership> {
        None
    }
}

/// Builder read from a local image
#[derive(Debug, Clone)]
pub struct BuilderImage {
    image: String,
    lifecycle: LifecycleDescriptor,
    run_image: Option<String>,
    ownership: Option<Ownership>,
}

#[derive(Debug, Default, Deserialize)]
struct BuilderMetadata {
    #[serde(default)]
    lifecycle: LifecycleMetadata,
    #[serde(default)]
    stack: StackMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct LifecycleMetadata {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StackMetadata {
    #[serde(default, rename = "runImage")]
    run_image: RunImageMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct RunImageMetadata {
    #[serde(default)]
    image: Option<String>,
}

impl BuilderImage {
    /// Create a builder from already known parts
    pub fn new(image: impl Into<String>, lifecycle_version: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            lifecycle: LifecycleDescriptor {
                version: lifecycle_version.into(),
            },
            run_image: None,
            ownership: None,
        }
    }

    /// Set the stack run image
    pub fn with_run_image(mut self, run_image: impl Into<String>) -> Self {
        self.run_image = Some(run_image.into());
        self
    }

    /// Set the user and group the phases run as
    pub fn with_ownership(mut self, uid: u32, gid: u32) -> Self {
        self.ownership = Some(Ownership { uid, gid });
        self
    }

    /// Read the builder metadata label from a local image
    pub async fn inspect(runtime: &dyn ContainerRuntime, image: &str) -> PackResult<Self> {
        let labels = runtime.image_labels(image).await?;
        let raw = labels.get(METADATA_LABEL).ok_or_else(|| PackError::ImageInspect {
            image: image.to_string(),
            reason: format!("not a builder image: missing label {}", METADATA_LABEL),
        })?;
        let builder = Self::from_metadata(image, raw)?;

        let env = runtime.image_env(image).await?;
        let ownership = ownership_from_env(image, &env)?;
        Ok(Self {
            ownership: Some(ownership),
            ..builder
        })
    }

    /// Build from the raw metadata label value
    pub fn from_metadata(image: &str, raw: &str) -> PackResult<Self> {
        let metadata: BuilderMetadata =
            serde_json::from_str(raw).map_err(|e| PackError::ImageInspect {
                image: image.to_string(),
                reason: format!("invalid builder metadata: {}", e),
            })?;

        let version = match metadata.lifecycle.version.filter(|v| !v.is_empty()) {
            Some(version) => version,
            None => {
                warn!(
                    "Builder {} does not declare a lifecycle version, assuming {}",
                    image, ASSUMED_LIFECYCLE_VERSION
                );
                ASSUMED_LIFECYCLE_VERSION.to_string()
            }
        };

        Ok(Self {
            image: image.to_string(),
            lifecycle: LifecycleDescriptor { version },
            run_image: metadata.stack.run_image.image.filter(|i| !i.is_empty()),
            ownership: None,
        })
    }
}

impl Builder for BuilderImage {
    fn image(&self) -> &str {
        &self.image
    }

    fn lifecycle_descriptor(&self) -> &LifecycleDescriptor {
        &self.lifecycle
    }

    fn run_image(&self) -> Option<&str> {
        self.run_image.as_deref()
    }

    fn ownership(&self) -> Option<Ownership> {
        self.ownership
    }
}

/// Read the phase user and group from the builder's environment
fn ownership_from_env(image: &str, env: &HashMap<String, String>) -> PackResult<Ownership> {
    let id = |key: &str| -> PackResult<u32> {
        env.get(key)
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| PackError::ImageInspect {
                image: image.to_string(),
                reason: format!("builder env var {} must be set to a numeric id", key),
            })
    };

    Ok(Ownership {
        uid: id(USER_ID_ENV)?,
        gid: id(GROUP_ID_ENV)?,
    })
}
