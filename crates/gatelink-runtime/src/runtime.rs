//! Container runtime capability

use crate::error::RuntimeError;
use crate::settings::ImageSource;
use crate::spec::{ContainerSpec, PublishedPort};
use async_trait::async_trait;

/// Operations gatelink needs from a container runtime.
///
/// Implementations must treat "already exists" on network and image
/// creation as success, and "not found" on removal as success.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Get-or-create a bridge network
    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Make sure an image is present, building or pulling it if needed
    async fn ensure_image(&self, image: &ImageSource) -> Result<(), RuntimeError>;

    /// Create and start a detached container
    async fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Run a container to completion, return its combined output and
    /// remove it whatever the outcome
    async fn run_disposable(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Host ports currently published for a container
    async fn published_ports(&self, container: &str) -> Result<Vec<PublishedPort>, RuntimeError>;

    /// Execute a command inside a running container and return its output
    async fn exec(&self, container: &str, command: &[String]) -> Result<String, RuntimeError>;

    async fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    /// Force-remove a container
    async fn remove(&self, container: &str) -> Result<(), RuntimeError>;

    /// Names of running containers carrying `key=value`
    async fn find_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, RuntimeError>;
}
