//! Error types for pack
//!
//! All modules use `PackResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pack operations
pub type PackResult<T> = Result<T, PackError>;

/// All errors that can occur in pack
#[derive(Error, Debug)]
pub enum PackError {
    // Session setup errors
    #[error("Invalid build options: {0}")]
    Setup(String),

    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    // Cache errors
    #[error("clearing build cache {name}: {source}")]
    CacheClear {
        name: String,
        #[source]
        source: Box<PackError>,
    },

    // Phase errors
    #[error("failed to create {phase} phase: {reason}")]
    PhaseCreate { phase: String, reason: String },

    #[error("{phase} phase failed with exit code {code}")]
    PhaseFailed { phase: String, code: i32 },

    #[error("build cancelled during {phase}")]
    Cancelled { phase: String },

    // Cleanup errors
    #[error("failed to clean up {kind} volume {name}: {source}")]
    VolumeCleanup {
        kind: &'static str,
        name: String,
        #[source]
        source: Box<PackError>,
    },

    #[error("{}", join_errors(.errors))]
    Cleanup { errors: Vec<PackError> },

    // Container runtime errors
    #[error("Container runtime not found: {0}")]
    RuntimeNotFound(String),

    #[error("Container create failed: {0}")]
    ContainerCreate(String),

    #[error("Failed to inspect image {image}: {reason}")]
    ImageInspect { image: String, reason: String },

    // Credential errors
    #[error("Registry credential error: {0}")]
    Credentials(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_errors(errors: &[PackError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a phase creation error
    pub fn phase_create(phase: impl ToString, reason: impl Into<String>) -> Self {
        Self::PhaseCreate {
            phase: phase.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error came from a cancelled build
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeNotFound(_) => Some("Install podman, or set [runtime] binary = \"docker\""),
            Self::Credentials(_) => Some("Run: podman login <registry>"),
            Self::CacheClear { .. } => Some("Check that no other build is using the cache volume"),
            Self::Cleanup { .. } | Self::VolumeCleanup { .. } => {
                Some("Leftover volumes can be removed with: podman volume prune")
            }
            _ => None,
        }
    }
}
