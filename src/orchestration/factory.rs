//! Runtime factory for creating the configured container runtime

use crate::config::schema::RuntimeConfig;
use crate::error::{PackError, PackResult};
use crate::orchestration::cli_runtime::CliRuntime;
use crate::orchestration::runtime::ContainerRuntime;
use std::sync::Arc;

/// Create the container runtime named by the configuration
///
/// # Returns
/// * `Ok(Arc<dyn ContainerRuntime>)` - A shared runtime implementation
/// * `Err` - If no runtime binary is configured
pub fn create_runtime(config: &RuntimeConfig) -> PackResult<Arc<dyn ContainerRuntime>> {
    let binary = config.binary.trim();
    if binary.is_empty() {
        return Err(PackError::RuntimeNotFound(
            "no runtime binary configured".to_string(),
        ));
    }
    Ok(Arc::new(CliRuntime::new(binary)))
}
