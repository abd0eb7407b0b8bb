//! Container spec types
//!
//! Contains the data structures handed to a container runtime.
//! The actual execution logic is in the runtime implementations.

use std::collections::BTreeMap;
use std::fmt;

/// Numeric owner given to files copied into a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

/// Container configuration for creating a new container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Container image to use
    pub image: String,
    /// Entry command and its arguments
    pub command: Vec<String>,
    /// Volume mounts (volume:container format)
    pub binds: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Network mode (runtime default when unset)
    pub network: Option<String>,
    /// User to run as (image default when unset)
    pub user: Option<String>,
    /// Container labels
    pub labels: BTreeMap<String, String>,
}

impl ContainerConfig {
    /// Render the runtime CLI arguments for `create`
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        if let Some(user) = &self.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }

        for v in &self.binds {
            args.push("-v".to_string());
            args.push(v.clone());
        }

        for (k, v) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        for (k, v) in &self.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }

    /// Whether a volume (or host path) is bound at `container_path`
    pub fn binds_path(&self, container_path: &str) -> bool {
        self.binds
            .iter()
            .any(|b| b.split(':').nth(1) == Some(container_path))
    }
}
