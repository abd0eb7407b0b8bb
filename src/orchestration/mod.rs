//! Orchestration module for container runtimes
//!
//! Phase containers are driven through the `ContainerRuntime` trait. The
//! shipped implementation shells out to a podman- or docker-compatible CLI.

mod cli_runtime;
mod factory;
pub mod podman;
mod runtime;

pub use cli_runtime::CliRuntime;
pub use factory::create_runtime;
pub use podman::{ContainerConfig, Ownership};
pub use runtime::ContainerRuntime;

use crate::error::{PackError, PackResult};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Stream stdout+stderr from a child process, calling `on_output` for each line
/// as soon as it is produced.
///
/// Lines are decoded lossily, so output that is not valid UTF-8 is still
/// delivered and the pipes keep draining. A pipe is finished at EOF or on a
/// read error.
///
/// This is a standalone async function (not behind `async_trait`) to avoid
/// lifetime issues with the `dyn Fn` callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> PackResult<()> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| PackError::Internal("child stderr not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PackError::Internal("child stdout not piped".to_string()))?;

    let mut stderr_reader = BufReader::new(stderr);
    let mut stdout_reader = BufReader::new(stdout);

    // Partial reads stay in these buffers when the other branch wins the select
    let mut stderr_buf = Vec::new();
    let mut stdout_buf = Vec::new();

    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            read = stderr_reader.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                stderr_done = !matches!(read, Ok(n) if n > 0);
                emit_line(&mut stderr_buf, on_output);
            }
            read = stdout_reader.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                stdout_done = !matches!(read, Ok(n) if n > 0);
                emit_line(&mut stdout_buf, on_output);
            }
        }
    }

    Ok(())
}

/// Hand a buffered line (without its line ending) to `on_output` and reset the buffer
fn emit_line(buf: &mut Vec<u8>, on_output: &(dyn Fn(String) + Send + Sync)) {
    if buf.is_empty() {
        return;
    }

    let mut line = &buf[..];
    if let Some(stripped) = line.strip_suffix(b"\n") {
        line = stripped;
    }
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    on_output(String::from_utf8_lossy(line).into_owned());
    buf.clear();
}
