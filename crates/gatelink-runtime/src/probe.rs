//! Pre-flight check that a host port is free

use crate::error::LaunchError;
use crate::runtime::ContainerRuntime;
use crate::settings::ImageSource;
use crate::spec::{ContainerSpec, PortMapping, Protocol};
use std::sync::Arc;
use tracing::{debug, info};

/// Test-binds host ports with a throwaway container.
///
/// Only answers "is it free right now"; the real bind can still race.
pub struct PortProbe {
    runtime: Arc<dyn ContainerRuntime>,
    image: ImageSource,
}

impl PortProbe {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: ImageSource) -> Self {
        Self { runtime, image }
    }

    /// Ok if `port` could be bound on the host over TCP
    pub async fn check(&self, port: u16) -> Result<(), LaunchError> {
        debug!(port = port, "Probing port");

        let mut spec = ContainerSpec::new(self.image.tag.clone())
            .port(PortMapping::fixed(port, Protocol::Tcp, port));
        spec.cmd = Some(vec!["true".to_string()]);

        match self.runtime.run_disposable(&spec).await {
            Ok(_) => Ok(()),
            Err(e) => match e.conflicting_port() {
                Some(port) => Err(LaunchError::PortAlreadyAllocated(port)),
                None => Err(LaunchError::Runtime(e)),
            },
        }
    }

    /// Check every port, stopping at the first one in use
    pub async fn check_all(&self, ports: &[u16]) -> Result<(), LaunchError> {
        self.runtime.ensure_image(&self.image).await?;

        for &port in ports {
            self.check(port).await?;
        }

        info!(ports = ?ports, "Ports are free");
        Ok(())
    }
}
