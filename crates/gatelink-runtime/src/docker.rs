//! Docker implementation of [`ContainerRuntime`] backed by bollard

use crate::error::{ResourceKind, RuntimeError};
use crate::runtime::ContainerRuntime;
use crate::settings::ImageSource;
use crate::spec::{ContainerSpec, PublishedPort, RestartPolicy};
use async_trait::async_trait;
use bollard::{
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    models::{
        ContainerCreateBody, HostConfig, NetworkCreateRequest, PortBinding,
        RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum,
    },
    query_parameters::{
        CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
        InspectNetworkOptions, ListContainersOptionsBuilder, LogsOptionsBuilder,
        RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
        WaitContainerOptions,
    },
    Docker,
};
use futures_util::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Seconds a container gets to stop gracefully before it is killed
const STOP_TIMEOUT_SECS: i32 = 5;

/// Docker engine reached through the local socket
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn create_and_start(&self, name: &str, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let config = container_body(spec);

        self.docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(name).build()),
                config,
            )
            .await
            .map_err(|e| map_error("create_container", ResourceKind::Image, name, e))?;

        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await
            .map_err(|e| map_error("start_container", ResourceKind::Container, name, e))?;

        debug!(container = %name, image = %spec.image, "Started container");
        Ok(())
    }

    async fn collect_logs(&self, name: &str) -> Result<String, RuntimeError> {
        let chunks: Vec<_> = self
            .docker
            .logs(
                name,
                Some(LogsOptionsBuilder::new().stdout(true).stderr(true).build()),
            )
            .try_collect()
            .await
            .map_err(|e| map_error("logs", ResourceKind::Container, name, e))?;

        Ok(chunks
            .into_iter()
            .map(|chunk| String::from_utf8_lossy(&chunk.into_bytes()).into_owned())
            .collect())
    }

    async fn run_to_completion(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.create_and_start(name, spec).await?;

        let waited: Result<Vec<_>, _> = self
            .docker
            .wait_container(name, None::<WaitContainerOptions>)
            .try_collect()
            .await;

        let output = self.collect_logs(name).await?;

        match waited {
            Ok(_) => Ok(output),
            Err(BollardError::DockerContainerWaitError { code, .. }) => Err(RuntimeError::Api {
                operation: "wait_container",
                message: format!("exited with status {}: {}", code, output.trim()),
            }),
            Err(e) => Err(map_error("wait_container", ResourceKind::Container, name, e)),
        }
    }

    async fn build_image(&self, image: &ImageSource, context_dir: &std::path::Path) -> Result<(), RuntimeError> {
        info!(image = %image.tag, context = %context_dir.display(), "Building image");

        // The engine API wants a tarred build context; the docker CLI builds it for us.
        let output = tokio::process::Command::new("docker")
            .arg("build")
            .arg("-t")
            .arg(&image.tag)
            .arg(context_dir)
            .output()
            .await
            .map_err(|e| RuntimeError::Io(format!("failed to run docker build: {}", e)))?;

        if !output.status.success() {
            return Err(RuntimeError::Api {
                operation: "build_image",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn pull_image(&self, image: &ImageSource) -> Result<(), RuntimeError> {
        info!(image = %image.tag, "Pulling image");

        let (from_image, tag) = match image.tag.rsplit_once(':') {
            Some((img, tag)) => (img, tag),
            None => (image.tag.as_str(), "latest"),
        };

        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| map_error("pull_image", ResourceKind::Image, &image.tag, e))?;

        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions>)
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(map_error("inspect_network", ResourceKind::Network, name, e)),
        }

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            ..Default::default()
        };

        match self.docker.create_network(request).await {
            Ok(_) => {
                info!(network = %name, "Created network");
                Ok(())
            }
            // Lost a create race with another launcher; the network exists either way.
            Err(e) if is_status(&e, 409) => {
                debug!(network = %name, "Network created concurrently");
                Ok(())
            }
            Err(e) => Err(map_error("create_network", ResourceKind::Network, name, e)),
        }
    }

    async fn ensure_image(&self, image: &ImageSource) -> Result<(), RuntimeError> {
        if self.docker.inspect_image(&image.tag).await.is_ok() {
            debug!(image = %image.tag, "Image present");
            return Ok(());
        }

        match &image.context_dir {
            Some(dir) => self.build_image(image, dir).await,
            None => self.pull_image(image).await,
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("gatelink-{}", Uuid::new_v4().simple()));
        self.create_and_start(&name, spec).await
    }

    async fn run_disposable(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("gatelink-tmp-{}", Uuid::new_v4().simple()));

        let result = self.run_to_completion(&name, spec).await;

        if let Err(e) = self.remove(&name).await {
            warn!(container = %name, error = %e, "Failed to remove disposable container");
        }

        result
    }

    async fn published_ports(&self, container: &str) -> Result<Vec<PublishedPort>, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error("inspect_container", ResourceKind::Container, container, e))?;

        let ports = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let mut published = Vec::new();
        for (key, bindings) in ports {
            let host_port = bindings
                .unwrap_or_default()
                .into_iter()
                .filter_map(|binding| binding.host_port)
                .find_map(|port| port.parse::<u16>().ok());

            if let Some(host_port) = host_port {
                if let Some(port) = PublishedPort::parse_key(&key, host_port) {
                    published.push(port);
                }
            }
        }

        Ok(published)
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<String, RuntimeError> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_error("create_exec", ResourceKind::Container, container, e))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_error("start_exec", ResourceKind::Container, container, e))?;

        let mut collected = String::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                let chunk =
                    chunk.map_err(|e| map_error("exec_output", ResourceKind::Container, container, e))?;
                collected.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
            }
        }

        Ok(collected)
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(
                container,
                Some(StopContainerOptionsBuilder::new().t(STOP_TIMEOUT_SECS).build()),
            )
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if is_status(&e, 304) || is_status(&e, 404) => Ok(()),
            Err(e) => Err(map_error("stop_container", ResourceKind::Container, container, e)),
        }
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_container(
                container,
                Some(
                    RemoveContainerOptionsBuilder::new()
                        .force(true)
                        .v(true)
                        .build(),
                ),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(map_error("remove_container", ResourceKind::Container, container, e)),
        }
    }

    async fn find_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("label", vec![format!("{}={}", key, value)]);

        let containers = self
            .docker
            .list_containers(Some(
                ListContainersOptionsBuilder::new()
                    .all(false)
                    .filters(&filters)
                    .build(),
            ))
            .await
            .map_err(|e| map_error("list_containers", ResourceKind::Container, key, e))?;

        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .or(summary.id)
            })
            .collect())
    }
}

fn container_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for mapping in &spec.ports {
        exposed_ports.insert(mapping.key(), HashMap::new());
        port_bindings.insert(
            mapping.key(),
            Some(vec![PortBinding {
                host_ip: None,
                // Empty host port asks the engine for an ephemeral one.
                host_port: Some(mapping.host_port.map(|p| p.to_string()).unwrap_or_default()),
            }]),
        );
    }

    let restart_policy = match spec.restart {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
    };

    let env = spec.env_list();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        entrypoint: spec.entrypoint.clone(),
        cmd: spec.cmd.clone(),
        env: if env.is_empty() { None } else { Some(env) },
        labels: Some(spec.labels.clone().into_iter().collect()),
        tty: Some(spec.tty),
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        host_config: Some(HostConfig {
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            network_mode: spec.network.clone(),
            cap_add: if spec.cap_add.is_empty() {
                None
            } else {
                Some(spec.cap_add.clone())
            },
            restart_policy: Some(DockerRestartPolicy {
                name: Some(restart_policy),
                maximum_retry_count: None,
            }),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

fn is_status(error: &BollardError, status: u16) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == status
    )
}

/// Map a bollard error onto [`RuntimeError`].
///
/// `default_kind` names what a bare 404 refers to; create calls can also
/// 404 on a missing network, which the engine spells out in the message.
fn map_error(
    operation: &'static str,
    default_kind: ResourceKind,
    target: &str,
    error: BollardError,
) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => {
            let kind = if message.contains("network") {
                ResourceKind::Network
            } else if message.contains("image") {
                ResourceKind::Image
            } else {
                default_kind
            };
            RuntimeError::NotFound {
                kind,
                name: target.to_string(),
            }
        }
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => {
            debug!(target = %target, message = %message, "Runtime reported conflict");
            let kind = if operation.contains("network") {
                ResourceKind::Network
            } else {
                ResourceKind::Container
            };
            RuntimeError::Conflict {
                kind,
                name: target.to_string(),
            }
        }
        other => RuntimeError::Api {
            operation,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{PortMapping, Protocol};

    #[test]
    fn test_container_body_ports() {
        let spec = ContainerSpec::new("gatelink/gateway-link:latest")
            .named("link-example-com")
            .port(PortMapping::ephemeral(18521, Protocol::Udp))
            .port(PortMapping::fixed(5555, Protocol::Tcp, 40123));

        let body = container_body(&spec);
        let host_config = body.host_config.unwrap();
        let bindings = host_config.port_bindings.unwrap();

        let udp = bindings["18521/udp"].as_ref().unwrap();
        assert_eq!(udp[0].host_port.as_deref(), Some(""));

        let tcp = bindings["5555/tcp"].as_ref().unwrap();
        assert_eq!(tcp[0].host_port.as_deref(), Some("40123"));

        assert!(body.exposed_ports.unwrap().contains_key("18521/udp"));
    }

    #[test]
    fn test_map_not_found_network() {
        let err = map_error(
            "create_container",
            ResourceKind::Image,
            "link-example-com",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "network gatelink-gateway-network not found".to_string(),
            },
        );
        assert!(matches!(
            err,
            RuntimeError::NotFound {
                kind: ResourceKind::Network,
                ..
            }
        ));
    }

    #[test]
    fn test_map_port_conflict_keeps_message() {
        let err = map_error(
            "start_container",
            ResourceKind::Container,
            "gw",
            BollardError::DockerResponseServerError {
                status_code: 500,
                message: "Bind for 0.0.0.0:443 failed: port is already allocated".to_string(),
            },
        );
        assert_eq!(err.conflicting_port(), Some(443));
    }
}
