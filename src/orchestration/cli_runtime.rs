//! CLI-driven container runtime
//!
//! Implements the ContainerRuntime trait by executing a podman- or
//! docker-compatible binary directly.

use crate::error::{PackError, PackResult};
use crate::orchestration::podman::{ContainerConfig, Ownership};
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Container runtime backed by the podman (or docker) CLI
pub struct CliRuntime {
    binary: String,
}

impl CliRuntime {
    /// Create a runtime that drives `binary`
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runtime binary this instance executes
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Execute a runtime command and return the output
    async fn exec(&self, args: &[&str]) -> PackResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.binary, args);

        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::command_failed(format!("{} {:?}", self.binary, args), e))
    }

    /// Execute a runtime command, turning a non-zero exit into an error
    /// unless stderr matches `tolerated`
    async fn exec_checked(
        &self,
        args: &[&str],
        tolerated: Option<&str>,
    ) -> PackResult<std::process::Output> {
        let output = self.exec(args).await?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if tolerated.is_some_and(|t| stderr.to_lowercase().contains(t)) {
            debug!("Ignoring {} {}: {}", self.binary, args[0], stderr.trim());
            return Ok(output);
        }

        let command = format!("{} {}", self.binary, args.iter().take(2).copied().collect::<Vec<_>>().join(" "));
        Err(PackError::command_exec(command, stderr.trim()))
    }
}

impl CliRuntime {
    /// Render one field of a local image's config
    async fn inspect_image(&self, image: &str, format: &str) -> PackResult<String> {
        let output = self
            .exec(&["image", "inspect", "--format", format, image])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackError::ImageInspect {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for CliRuntime {
    fn default() -> Self {
        Self::new("podman")
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn ensure_ready(&self) -> PackResult<()> {
        let installed = Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if installed {
            Ok(())
        } else {
            Err(PackError::RuntimeNotFound(self.binary.clone()))
        }
    }

    async fn create(&self, config: &ContainerConfig) -> PackResult<String> {
        let args = config.create_args();
        debug!("Creating container: {} {:?}", self.binary, args);

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!(
                "Container created: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::ContainerCreate(stderr.trim().to_string()))
        }
    }

    async fn copy_into(
        &self,
        container_id: &str,
        src: &Path,
        dest: &str,
        owner: Option<Ownership>,
    ) -> PackResult<()> {
        if !src.is_dir() {
            return Err(PackError::PathNotFound(src.to_path_buf()));
        }

        // Trailing "/." copies the directory contents rather than the directory itself
        let source = format!("{}/.", src.display());
        let target = format!("{}:{}", container_id, dest);
        self.exec_checked(&["cp", &source, &target], None).await?;

        let Some(owner) = owner else {
            return Ok(());
        };

        // `cp` leaves the files owned by root. Fix ownership from a throwaway
        // root container sharing the target's volumes.
        let output = self
            .exec_checked(
                &["container", "inspect", "--format", "{{.Image}}", container_id],
                None,
            )
            .await?;
        let image = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let chown_args = chown_args(container_id, &image, owner, dest);
        let args: Vec<&str> = chown_args.iter().map(String::as_str).collect();

        debug!("Setting owner {} on {} of {}", owner, dest, container_id);
        self.exec_checked(&args, None).await?;
        Ok(())
    }

    async fn start_attached(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> PackResult<i32> {
        debug!("Starting container attached: {}", container_id);

        let mut child = Command::new(&self.binary)
            .args(["start", "--attach", container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PackError::command_failed(format!("{} start", self.binary), e))?;

        super::stream_child_output(&mut child, on_output).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| PackError::command_failed(format!("{} start", self.binary), e))?;

        // `start --attach` exits with the container's own exit code
        Ok(status.code().unwrap_or(-1))
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> PackResult<()> {
        debug!("Stopping container: {}", container_id);
        let timeout = grace.as_secs().to_string();
        self.exec_checked(&["stop", "-t", &timeout, container_id], Some("no such container"))
            .await?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> PackResult<()> {
        debug!("Removing container: {}", container_id);
        self.exec_checked(&["rm", "-f", container_id], Some("no such container"))
            .await?;
        Ok(())
    }

    async fn volume_remove(&self, name: &str) -> PackResult<()> {
        debug!("Removing volume: {}", name);
        self.exec_checked(&["volume", "rm", "-f", name], Some("no such volume"))
            .await?;
        Ok(())
    }

    async fn image_labels(&self, image: &str) -> PackResult<HashMap<String, String>> {
        let stdout = self.inspect_image(image, "{{json .Config.Labels}}").await?;
        parse_labels(&stdout)
    }

    async fn image_env(&self, image: &str) -> PackResult<HashMap<String, String>> {
        let stdout = self.inspect_image(image, "{{json .Config.Env}}").await?;
        parse_env(&stdout)
    }

    fn runtime_name(&self) -> &'static str {
        if self.binary.ends_with("docker") {
            "Docker"
        } else {
            "Podman"
        }
    }
}

/// Parse the `{{json .Config.Labels}}` output of `image inspect`
fn parse_labels(stdout: &str) -> PackResult<HashMap<String, String>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(HashMap::new());
    }

    let labels: HashMap<String, String> = serde_json::from_str(trimmed)?;
    Ok(labels)
}

/// Parse the `{{json .Config.Env}}` output (`["KEY=value", ...]`)
fn parse_env(stdout: &str) -> PackResult<HashMap<String, String>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(HashMap::new());
    }

    let entries: Vec<String> = serde_json::from_str(trimmed)?;
    Ok(entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

/// Arguments for a one-shot root container that chowns `dest` through the
/// volumes of `container_id`
fn chown_args(container_id: &str, image: &str, owner: Ownership, dest: &str) -> Vec<String> {
    [
        "run",
        "--rm",
        "--user",
        "root",
        "--volumes-from",
        container_id,
        "--entrypoint",
        "chown",
        image,
        "-R",
        &owner.to_string(),
        dest,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
