//! Gateway and link tunnel process lifecycle
//!
//! A link tunnel process has to advertise its own host port to the client,
//! but that port is only known once the runtime has bound it. Links are
//! therefore launched in two phases:
//!
//! 1. Probe: run with ephemeral host ports, read back what the runtime
//!    assigned, then stop and remove the probe container.
//! 2. Bound: relaunch with each host port pinned to its learned value.
//!
//! The UDP tunnel listener and the optional TCP forwarding listener each get
//! their own host port. A caller that already knows the ports (persisted from
//! an earlier activation) skips straight to phase 2.

use crate::error::LaunchError;
use crate::keys::validate_key;
use crate::runtime::ContainerRuntime;
use crate::settings::{PollSettings, RuntimeSettings};
use crate::spec::{ContainerSpec, PortMapping, Protocol, RestartPolicy};
use crate::{GATEWAY_LABEL, LINK_LABEL};
use gatelink_proto::{CENTER_PORT, HTTPS_GATEWAY_PORT, HTTP_GATEWAY_PORT, TUNNEL_LISTEN_PORT};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the tunnel process writes its self-generated private key
const TUNNEL_KEY_COMMAND: &str = "cat /etc/wireguard/link0.key | wg pubkey";

/// Container name for the link serving `fqdn`
pub fn link_container_name(fqdn: &str) -> String {
    format!("link-{}", fqdn.replace('.', "-"))
}

/// Request to bring a link tunnel process up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLaunch {
    pub fqdn: String,
    /// Client half of the tunnel, injected into the process config
    pub client_public_key: String,
    pub tcp_forwarding: bool,
    /// Previously assigned host port; skips the probe phase when set
    pub forward_port: Option<u16>,
    /// Previously assigned host port of the TCP forwarding listener
    pub center_port: Option<u16>,
}

impl LinkLaunch {
    pub fn new(fqdn: impl Into<String>, client_public_key: impl Into<String>) -> Self {
        Self {
            fqdn: fqdn.into(),
            client_public_key: client_public_key.into(),
            tcp_forwarding: false,
            forward_port: None,
            center_port: None,
        }
    }

    pub fn with_tcp_forwarding(mut self, enabled: bool) -> Self {
        self.tcp_forwarding = enabled;
        self
    }

    pub fn with_forward_port(mut self, port: Option<u16>) -> Self {
        self.forward_port = port;
        self
    }

    pub fn with_center_port(mut self, port: Option<u16>) -> Self {
        self.center_port = port;
        self
    }
}

/// A bound link tunnel process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEndpoint {
    pub tunnel_public_key: String,
    /// `{fqdn}:{forward_port}`
    pub address: String,
    pub forward_port: u16,
    /// Host port of the TCP forwarding listener, when forwarding is enabled
    pub center_port: Option<u16>,
}

/// Host ports a link tunnel process publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinkPorts {
    tunnel: u16,
    forwarding: Option<u16>,
}

/// Launches gateway and link processes on one host
pub struct TunnelManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: RuntimeSettings,
}

impl TunnelManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: RuntimeSettings) -> Self {
        Self { runtime, settings }
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        self.runtime.clone()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Get-or-create the shared network and every required image
    pub async fn ensure_prerequisites(&self) -> Result<(), LaunchError> {
        self.runtime
            .ensure_network(&self.settings.network_name)
            .await?;

        for image in self.settings.required_images() {
            self.runtime.ensure_image(image).await?;
        }

        debug!(network = %self.settings.network_name, "Runtime prerequisites ready");
        Ok(())
    }

    /// (Re)launch the public reverse proxy for a gateway
    pub async fn launch_gateway(
        &self,
        gateway_id: &str,
        container_name: &str,
    ) -> Result<(), LaunchError> {
        self.ensure_prerequisites().await?;
        self.runtime.remove(container_name).await?;

        let spec = ContainerSpec::new(self.settings.gateway_image.tag.clone())
            .named(container_name)
            .port(PortMapping::fixed(
                HTTP_GATEWAY_PORT,
                Protocol::Tcp,
                HTTP_GATEWAY_PORT,
            ))
            .port(PortMapping::fixed(
                HTTPS_GATEWAY_PORT,
                Protocol::Tcp,
                HTTPS_GATEWAY_PORT,
            ))
            .label(GATEWAY_LABEL, gateway_id)
            .env("NGINX_ENVSUBST_OUTPUT_DIR", "/etc/nginx");
        let spec = ContainerSpec {
            network: Some(self.settings.network_name.clone()),
            restart: RestartPolicy::Always,
            tty: true,
            ..spec
        };

        if let Err(e) = self.runtime.run(&spec).await {
            self.discard(container_name).await;
            return Err(e.into());
        }

        info!(gateway_id = %gateway_id, container = %container_name, "Gateway process launched");
        Ok(())
    }

    /// Running gateway process labelled with `gateway_id`, if any
    pub async fn find_gateway_container(
        &self,
        gateway_id: &str,
    ) -> Result<Option<String>, LaunchError> {
        let found = self
            .runtime
            .find_by_label(GATEWAY_LABEL, gateway_id)
            .await?;
        Ok(found.into_iter().next())
    }

    pub async fn require_gateway_container(&self, gateway_id: &str) -> Result<String, LaunchError> {
        self.find_gateway_container(gateway_id)
            .await?
            .ok_or_else(|| LaunchError::ContainerNotFound(gateway_id.to_string()))
    }

    /// Bring a link tunnel process up, probing for a port unless one is given
    pub async fn launch_link(&self, launch: &LinkLaunch) -> Result<LinkEndpoint, LaunchError> {
        let name = link_container_name(&launch.fqdn);

        self.ensure_prerequisites().await?;
        self.runtime.remove(&name).await?;

        let known = match launch.forward_port {
            Some(port) => {
                debug!(fqdn = %launch.fqdn, port = port, "Reusing recorded forward port");
                LinkPorts {
                    tunnel: port,
                    forwarding: launch.center_port.filter(|_| launch.tcp_forwarding),
                }
            }
            None => self.discover_ports(&name, launch).await?,
        };

        let (tunnel_public_key, ports) = match self.bind_link(&name, launch, known).await {
            Ok(bound) => bound,
            Err(e) => {
                self.discard(&name).await;
                return Err(e);
            }
        };

        info!(
            fqdn = %launch.fqdn,
            port = ports.tunnel,
            center_port = ?ports.forwarding,
            "Link tunnel bound"
        );

        Ok(LinkEndpoint {
            tunnel_public_key,
            address: format!("{}:{}", launch.fqdn, ports.tunnel),
            forward_port: ports.tunnel,
            center_port: ports.forwarding,
        })
    }

    /// Stop and remove the tunnel process of `fqdn`, if any
    pub async fn stop_link(&self, fqdn: &str) -> Result<(), LaunchError> {
        let name = link_container_name(fqdn);
        self.runtime.stop(&name).await?;
        self.runtime.remove(&name).await?;
        info!(fqdn = %fqdn, container = %name, "Link tunnel stopped");
        Ok(())
    }

    /// Phase 1: learn the host ports the runtime assigns to the listeners
    async fn discover_ports(
        &self,
        name: &str,
        launch: &LinkLaunch,
    ) -> Result<LinkPorts, LaunchError> {
        let spec = self.link_spec(name, launch, None, None);

        info!(fqdn = %launch.fqdn, "Launching probe to discover forward port");

        let result = match self.runtime.run(&spec).await {
            Ok(()) => self.wait_for_link_ports(name, launch).await,
            Err(e) => Err(e.into()),
        };

        // The probe never outlives this phase
        let ports = match result {
            Ok(ports) => ports,
            Err(e) => {
                self.discard(name).await;
                return Err(e);
            }
        };
        if let Err(e) = self.runtime.stop(name).await {
            warn!(container = %name, error = %e, "Failed to stop probe");
        }
        self.runtime.remove(name).await?;

        info!(
            fqdn = %launch.fqdn,
            port = ports.tunnel,
            center_port = ?ports.forwarding,
            "Runtime assigned forward port"
        );
        Ok(ports)
    }

    /// Phase 2: launch pinned to `known` and read back the tunnel public key
    ///
    /// A forwarding listener without a recorded port is published ephemerally
    /// and read back here.
    async fn bind_link(
        &self,
        name: &str,
        launch: &LinkLaunch,
        known: LinkPorts,
    ) -> Result<(String, LinkPorts), LaunchError> {
        let spec = self.link_spec(name, launch, Some(known.tunnel), known.forwarding);
        self.runtime.run(&spec).await?;

        let ports = if launch.tcp_forwarding && known.forwarding.is_none() {
            self.wait_for_link_ports(name, launch).await?
        } else {
            known
        };

        let key = self.wait_for_tunnel_key(name).await?;
        Ok((key, ports))
    }

    fn link_spec(
        &self,
        name: &str,
        launch: &LinkLaunch,
        tunnel_port: Option<u16>,
        forwarding_port: Option<u16>,
    ) -> ContainerSpec {
        let mut spec = ContainerSpec::new(self.settings.link_image.tag.clone())
            .named(name)
            .port(mapping(TUNNEL_LISTEN_PORT, Protocol::Udp, tunnel_port))
            .label(LINK_LABEL, "true")
            .env("LINK_CLIENT_WG_PUBKEY", launch.client_public_key.clone());

        if launch.tcp_forwarding {
            spec = spec
                .port(mapping(CENTER_PORT, Protocol::Tcp, forwarding_port))
                .env("CENTER_PORT", CENTER_PORT.to_string())
                .env("FORWARD_PORT", "true");
        }

        ContainerSpec {
            network: Some(self.settings.network_name.clone()),
            restart: RestartPolicy::UnlessStopped,
            cap_add: vec!["NET_ADMIN".to_string()],
            ..spec
        }
    }

    /// Poll until every listener of the link has a host port
    async fn wait_for_link_ports(
        &self,
        name: &str,
        launch: &LinkLaunch,
    ) -> Result<LinkPorts, LaunchError> {
        let poll = self.settings.port_poll;

        for attempt in 0..poll.max_attempts {
            let published = self.runtime.published_ports(name).await?;
            let host_port = |container_port: u16, protocol: Protocol| {
                published
                    .iter()
                    .find(|p| p.container_port == container_port && p.protocol == protocol)
                    .map(|p| p.host_port)
            };

            let forwarding = host_port(CENTER_PORT, Protocol::Tcp);
            if let Some(tunnel) = host_port(TUNNEL_LISTEN_PORT, Protocol::Udp) {
                if forwarding.is_some() || !launch.tcp_forwarding {
                    return Ok(LinkPorts { tunnel, forwarding });
                }
            }

            debug!(container = %name, attempt = attempt, "Host port not assigned yet");
            sleep_before_retry(&poll, attempt).await;
        }

        Err(LaunchError::PortsNotAssigned {
            container: name.to_string(),
        })
    }

    async fn wait_for_tunnel_key(&self, name: &str) -> Result<String, LaunchError> {
        let poll = self.settings.key_poll;
        let command = vec![
            "bash".to_string(),
            "-c".to_string(),
            TUNNEL_KEY_COMMAND.to_string(),
        ];

        for attempt in 0..poll.max_attempts {
            let output = self.runtime.exec(name, &command).await?;
            let key = output.trim();

            // Before the key file exists `wg pubkey` prints an error instead
            if validate_key(key).is_ok() {
                return Ok(key.to_string());
            }

            debug!(container = %name, attempt = attempt, "Tunnel key not written yet");
            sleep_before_retry(&poll, attempt).await;
        }

        Err(LaunchError::TunnelKeyUnavailable {
            container: name.to_string(),
        })
    }

    /// Force-remove a partially launched container, logging failures
    async fn discard(&self, name: &str) {
        if let Err(e) = self.runtime.remove(name).await {
            warn!(container = %name, error = %e, "Failed to remove container after launch failure");
        }
    }
}

fn mapping(container_port: u16, protocol: Protocol, host_port: Option<u16>) -> PortMapping {
    match host_port {
        Some(port) => PortMapping::fixed(container_port, protocol, port),
        None => PortMapping::ephemeral(container_port, protocol),
    }
}

async fn sleep_before_retry(poll: &PollSettings, attempt: u32) {
    if attempt + 1 < poll.max_attempts {
        tokio::time::sleep(poll.delay_for(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::testing::{FakeRuntime, RuntimeCall, EPHEMERAL_PORT_START, FAKE_TUNNEL_PUBLIC_KEY};
    use std::time::Duration;

    const CLIENT_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";

    fn fast_settings() -> RuntimeSettings {
        let poll = PollSettings {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 5,
        };
        RuntimeSettings {
            port_poll: poll,
            key_poll: poll,
            ..RuntimeSettings::default()
        }
    }

    fn manager(runtime: &Arc<FakeRuntime>) -> TunnelManager {
        TunnelManager::new(runtime.clone(), fast_settings())
    }

    #[test]
    fn test_link_container_name() {
        assert_eq!(link_container_name("api.example.com"), "link-api-example-com");
        assert_eq!(link_container_name("example.com"), "link-example-com");
    }

    #[tokio::test]
    async fn test_two_phase_launch() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.delay_port_assignment(2);

        let endpoint = manager(&runtime)
            .launch_link(&LinkLaunch::new("example.com", CLIENT_KEY))
            .await
            .unwrap();

        assert_eq!(endpoint.forward_port, EPHEMERAL_PORT_START);
        assert_eq!(endpoint.address, format!("example.com:{}", EPHEMERAL_PORT_START));
        assert_eq!(endpoint.tunnel_public_key, FAKE_TUNNEL_PUBLIC_KEY);
        assert_eq!(endpoint.center_port, None);

        let runs = runtime.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].ports, vec![PortMapping::ephemeral(18521, Protocol::Udp)]);
        assert_eq!(
            runs[1].ports,
            vec![PortMapping::fixed(18521, Protocol::Udp, EPHEMERAL_PORT_START)]
        );
        assert_eq!(runs[1].env["LINK_CLIENT_WG_PUBKEY"], CLIENT_KEY);
        assert_eq!(runs[1].labels[LINK_LABEL], "true");

        let calls = runtime.calls();
        let probe_removed = calls
            .iter()
            .rposition(|c| *c == RuntimeCall::Remove("link-example-com".to_string()))
            .unwrap();
        let bound_run = calls
            .iter()
            .rposition(|c| matches!(c, RuntimeCall::Run(_)))
            .unwrap();
        assert!(probe_removed < bound_run);
        assert!(calls.contains(&RuntimeCall::Stop("link-example-com".to_string())));

        assert_eq!(runtime.running(), vec!["link-example-com".to_string()]);
    }

    #[tokio::test]
    async fn test_known_port_skips_probe() {
        let runtime = Arc::new(FakeRuntime::new());

        let launch = LinkLaunch::new("api.example.com", CLIENT_KEY).with_forward_port(Some(41000));
        let endpoint = manager(&runtime).launch_link(&launch).await.unwrap();

        assert_eq!(endpoint.address, "api.example.com:41000");
        let runs = runtime.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].ports[0].host_port, Some(41000));
        assert!(!runtime
            .calls()
            .iter()
            .any(|c| matches!(c, RuntimeCall::PublishedPorts(_) | RuntimeCall::Stop(_))));
    }

    #[tokio::test]
    async fn test_tcp_forwarding_learns_its_own_port() {
        let runtime = Arc::new(FakeRuntime::new());

        let launch = LinkLaunch::new("db.example.com", CLIENT_KEY).with_tcp_forwarding(true);
        let endpoint = manager(&runtime).launch_link(&launch).await.unwrap();

        assert_eq!(endpoint.forward_port, EPHEMERAL_PORT_START);
        assert_eq!(endpoint.center_port, Some(EPHEMERAL_PORT_START + 1));
        assert_eq!(endpoint.address, format!("db.example.com:{}", EPHEMERAL_PORT_START));

        let runs = runtime.runs();
        assert_eq!(
            runs[0].ports,
            vec![
                PortMapping::ephemeral(18521, Protocol::Udp),
                PortMapping::ephemeral(5555, Protocol::Tcp),
            ]
        );
        let bound = runs.last().unwrap();
        assert_eq!(
            bound.ports,
            vec![
                PortMapping::fixed(18521, Protocol::Udp, EPHEMERAL_PORT_START),
                PortMapping::fixed(5555, Protocol::Tcp, EPHEMERAL_PORT_START + 1),
            ]
        );
        assert_eq!(bound.env["CENTER_PORT"], "5555");
        assert_eq!(bound.env["FORWARD_PORT"], "true");
        assert_eq!(bound.cap_add, vec!["NET_ADMIN".to_string()]);
    }

    #[tokio::test]
    async fn test_tcp_forwarding_ignores_tcp_holder_of_tunnel_port() {
        let runtime = Arc::new(FakeRuntime::new());
        // Another service already holds the tunnel's host port number over TCP
        runtime
            .run(
                &ContainerSpec::new("postgres:16")
                    .named("postgres")
                    .port(PortMapping::fixed(5432, Protocol::Tcp, EPHEMERAL_PORT_START)),
            )
            .await
            .unwrap();

        let launch = LinkLaunch::new("db.example.com", CLIENT_KEY).with_tcp_forwarding(true);
        let endpoint = manager(&runtime).launch_link(&launch).await.unwrap();

        assert_eq!(endpoint.forward_port, EPHEMERAL_PORT_START);
        assert_ne!(endpoint.center_port, Some(EPHEMERAL_PORT_START));
        assert!(runtime.running().contains(&"link-db-example-com".to_string()));
        assert!(runtime.running().contains(&"postgres".to_string()));
    }

    #[tokio::test]
    async fn test_known_ports_skip_discovery_with_forwarding() {
        let runtime = Arc::new(FakeRuntime::new());

        let launch = LinkLaunch::new("db.example.com", CLIENT_KEY)
            .with_tcp_forwarding(true)
            .with_forward_port(Some(41000))
            .with_center_port(Some(41001));
        let endpoint = manager(&runtime).launch_link(&launch).await.unwrap();

        assert_eq!(endpoint.forward_port, 41000);
        assert_eq!(endpoint.center_port, Some(41001));
        let runs = runtime.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0].ports,
            vec![
                PortMapping::fixed(18521, Protocol::Udp, 41000),
                PortMapping::fixed(5555, Protocol::Tcp, 41001),
            ]
        );
    }

    #[tokio::test]
    async fn test_forwarding_enabled_after_tunnel_port_recorded() {
        let runtime = Arc::new(FakeRuntime::new());

        let launch = LinkLaunch::new("db.example.com", CLIENT_KEY)
            .with_tcp_forwarding(true)
            .with_forward_port(Some(41000));
        let endpoint = manager(&runtime).launch_link(&launch).await.unwrap();

        assert_eq!(endpoint.forward_port, 41000);
        assert_eq!(endpoint.center_port, Some(EPHEMERAL_PORT_START));
        let runs = runtime.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0].ports,
            vec![
                PortMapping::fixed(18521, Protocol::Udp, 41000),
                PortMapping::ephemeral(5555, Protocol::Tcp),
            ]
        );
    }

    #[tokio::test]
    async fn test_port_conflict_removes_container() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.occupy_port(42000);

        let launch = LinkLaunch::new("example.com", CLIENT_KEY).with_forward_port(Some(42000));
        let err = manager(&runtime).launch_link(&launch).await.unwrap_err();

        assert!(matches!(err, LaunchError::PortAlreadyAllocated(42000)));
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_ports_never_assigned() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.delay_port_assignment(100);

        let err = manager(&runtime)
            .launch_link(&LinkLaunch::new("example.com", CLIENT_KEY))
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::PortsNotAssigned { .. }));
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_failed_discovery_cleanup_keeps_original_error() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.delay_port_assignment(100);
        runtime.fail_next_remove(RuntimeError::Api {
            operation: "remove_container",
            message: "removal of container link-example-com is already in progress".to_string(),
        });

        let err = manager(&runtime)
            .launch_link(&LinkLaunch::new("example.com", CLIENT_KEY))
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::PortsNotAssigned { .. }));
        assert_eq!(runtime.containers(), vec!["link-example-com".to_string()]);
    }

    #[tokio::test]
    async fn test_waits_for_tunnel_key() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.delay_tunnel_key(3);

        let endpoint = manager(&runtime)
            .launch_link(&LinkLaunch::new("example.com", CLIENT_KEY).with_forward_port(Some(41000)))
            .await
            .unwrap();
        assert_eq!(endpoint.tunnel_public_key, FAKE_TUNNEL_PUBLIC_KEY);

        let execs = runtime
            .calls()
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Exec { .. }))
            .count();
        assert_eq!(execs, 4);
    }

    #[tokio::test]
    async fn test_missing_tunnel_key_removes_container() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.set_exec_output("wg: Key is not the correct length or format");

        let err = manager(&runtime)
            .launch_link(&LinkLaunch::new("example.com", CLIENT_KEY).with_forward_port(Some(41000)))
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::TunnelKeyUnavailable { .. }));
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_gateway_launch_and_detection() {
        let runtime = Arc::new(FakeRuntime::new());
        let manager = manager(&runtime);

        assert_eq!(manager.find_gateway_container("gw-1").await.unwrap(), None);

        manager.launch_gateway("gw-1", "gatelink-gateway-edge").await.unwrap();

        let spec = runtime.container("gatelink-gateway-edge").unwrap();
        assert_eq!(spec.labels[GATEWAY_LABEL], "gw-1");
        assert_eq!(spec.restart, RestartPolicy::Always);
        assert_eq!(runtime.bound_ports(), vec![80, 443]);
        assert_eq!(runtime.networks(), vec!["gatelink-gateway-network".to_string()]);

        assert_eq!(
            manager.require_gateway_container("gw-1").await.unwrap(),
            "gatelink-gateway-edge"
        );
        assert!(matches!(
            manager.require_gateway_container("gw-2").await,
            Err(LaunchError::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_port_conflict() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.occupy_port(443);

        let err = manager(&runtime)
            .launch_gateway("gw-1", "gatelink-gateway-edge")
            .await
            .unwrap_err();

        assert!(matches!(err, LaunchError::PortAlreadyAllocated(443)));
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_failure_propagates() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_next_run(RuntimeError::Api {
            operation: "create_container",
            message: "image has no entrypoint".to_string(),
        });

        let err = manager(&runtime)
            .launch_link(&LinkLaunch::new("example.com", CLIENT_KEY))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Runtime(RuntimeError::Api { .. })));
        assert!(runtime.containers().is_empty());
    }

    #[tokio::test]
    async fn test_stop_link_removes_tunnel_process() {
        let runtime = Arc::new(FakeRuntime::new());
        let manager = manager(&runtime);

        manager
            .launch_link(&LinkLaunch::new("api.example.com", CLIENT_KEY))
            .await
            .unwrap();
        assert!(runtime.container("link-api-example-com").is_some());

        manager.stop_link("api.example.com").await.unwrap();
        assert!(runtime.container("link-api-example-com").is_none());
        assert!(runtime.bound_ports().is_empty());

        // Nothing left to stop
        manager.stop_link("api.example.com").await.unwrap();
    }
}
