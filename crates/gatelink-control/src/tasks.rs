//! Device-side link provisioning
//!
//! This is what ultimately runs on the host that carries a gateway process,
//! whichever way the activation reached it: in-process, through the
//! `link up` remote-shell entrypoint, or as a task delivered over a channel.

use gatelink_proto::{DeviceTask, LinkUpResult};
use gatelink_runtime::{KeyProvisioner, LaunchError, LinkLaunch, TunnelManager};
use std::sync::Arc;
use tracing::info;

/// Brings links up on this host
pub struct LinkProvisioner {
    manager: Arc<TunnelManager>,
    keys: KeyProvisioner,
}

impl LinkProvisioner {
    pub fn new(manager: Arc<TunnelManager>) -> Self {
        let keys = KeyProvisioner::new(
            manager.runtime(),
            manager.settings().link_image.clone(),
        );
        Self { manager, keys }
    }

    pub fn manager(&self) -> &Arc<TunnelManager> {
        &self.manager
    }

    /// Launch the tunnel for `fqdn` next to the running gateway process.
    ///
    /// The client keypair is generated here and its private half handed
    /// back to the caller; nothing is kept on this host.
    pub async fn provision(
        &self,
        gateway_id: &str,
        fqdn: &str,
        tcp_forwarding: bool,
        forward_port: Option<u16>,
        center_port: Option<u16>,
    ) -> Result<LinkUpResult, LaunchError> {
        self.manager.require_gateway_container(gateway_id).await?;

        let client = self.keys.generate_keypair().await?;

        let launch = LinkLaunch::new(fqdn, client.public_key.clone())
            .with_tcp_forwarding(tcp_forwarding)
            .with_forward_port(forward_port)
            .with_center_port(center_port);
        let endpoint = self.manager.launch_link(&launch).await?;

        info!(gateway_id = %gateway_id, fqdn = %fqdn, port = endpoint.forward_port, "Link provisioned");

        Ok(LinkUpResult {
            tunnel_pubkey: endpoint.tunnel_public_key,
            tunnel_address: endpoint.address,
            client_privkey: client.private_key,
            forward_port: endpoint.forward_port,
            center_port: endpoint.center_port,
        })
    }
}

/// Executes tasks addressed to this device on behalf of one gateway
pub struct TaskWorker {
    gateway_id: String,
    provisioner: Arc<LinkProvisioner>,
}

impl TaskWorker {
    pub fn new(gateway_id: impl Into<String>, provisioner: Arc<LinkProvisioner>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            provisioner,
        }
    }

    pub async fn handle(&self, task: DeviceTask) -> Result<LinkUpResult, LaunchError> {
        match task {
            DeviceTask::LinkUp {
                fqdn,
                tcp_forwarding,
                forward_port,
                center_port,
            } => {
                self.provisioner
                    .provision(
                        &self.gateway_id,
                        &fqdn,
                        tcp_forwarding,
                        forward_port,
                        center_port,
                    )
                    .await
            }
        }
    }
}
