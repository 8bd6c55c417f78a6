//! Link activation: choose a transport and bring a link online
//!
//! For a (link, gateway) pair the first applicable path wins:
//!
//! 1. Remote shell to a member device that serves the link's domain and
//!    has an ssh descriptor.
//! 2. Local, when this host runs the gateway process (label `gateway=<id>`).
//! 3. Remote shell to the gateway's own ssh descriptor.
//! 4. A `link_up` task over one of the gateway's channels, addressed to a
//!    member device serving the domain.
//!
//! A chosen path never falls back to another one; every failure ends the
//! attempt. On success the returned host ports are persisted on the link
//! so the next activation binds them directly.

use crate::channel::ChannelRegistry;
use crate::error::ActivationError;
use crate::locks::ActivationLocks;
use crate::remote::{RemoteError, RemoteExecutor};
use crate::store;
use crate::tasks::LinkProvisioner;
use gatelink_db::entities::{domain, gateway, prelude::Gateway};
use gatelink_proto::{DeviceTask, LinkUpCommand, LinkUpResult, RemoteAccess};
use sea_orm::{DatabaseConnection, EntityTrait};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default bound on a remote `link_up` task
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on a remote-shell `link up`
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationSettings {
    pub shell_timeout: Duration,
    pub task_timeout: Duration,
}

impl Default for ActivationSettings {
    fn default() -> Self {
        Self {
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
            task_timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationOptions {
    pub tcp_forwarding: bool,
    /// Overrides the port recorded on the link
    pub forward_port: Option<u16>,
    /// Overrides the TCP forwarding port recorded on the link
    pub center_port: Option<u16>,
}

/// Transport picked for one activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationPath {
    RemoteShell {
        target: RemoteAccess,
        /// Device name, or the gateway name when using its own descriptor
        via: String,
    },
    Local {
        container: String,
    },
    RemoteTask {
        channel: String,
        queue: String,
    },
}

impl std::fmt::Display for ActivationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationPath::RemoteShell { target, via } => {
                write!(f, "remote shell to {} ({})", target, via)
            }
            ActivationPath::Local { container } => write!(f, "local ({})", container),
            ActivationPath::RemoteTask { channel, queue } => {
                write!(f, "task on channel {} for {}", channel, queue)
            }
        }
    }
}

pub struct LinkActivator {
    db: DatabaseConnection,
    provisioner: Arc<LinkProvisioner>,
    remote: Arc<dyn RemoteExecutor>,
    channels: ChannelRegistry,
    locks: ActivationLocks,
    settings: ActivationSettings,
}

impl LinkActivator {
    /// `channels` holds the live task channels; only those whose name
    /// matches a channel row of the gateway are used. The replication
    /// transport behind them is owned by the embedding process, so an
    /// empty registry limits activation to the local and remote-shell paths.
    pub fn new(
        db: DatabaseConnection,
        provisioner: Arc<LinkProvisioner>,
        remote: Arc<dyn RemoteExecutor>,
        channels: ChannelRegistry,
        settings: ActivationSettings,
    ) -> Self {
        Self {
            db,
            provisioner,
            remote,
            channels,
            locks: ActivationLocks::new(),
            settings,
        }
    }

    /// Activate the link named by `fqdn` on the gateway named by id or name
    pub async fn activate_fqdn(
        &self,
        fqdn: &str,
        gateway: &str,
        options: ActivationOptions,
    ) -> Result<LinkUpResult, ActivationError> {
        let (link, _) = store::resolve_link(&self.db, fqdn)
            .await?
            .ok_or_else(|| ActivationError::LinkNotFound(fqdn.to_string()))?;
        let gateway = store::find_gateway(&self.db, gateway)
            .await?
            .ok_or_else(|| ActivationError::GatewayNotFound(gateway.to_string()))?;

        self.activate(link.id, gateway.id, options).await
    }

    /// Bring a link online through `gateway_id`.
    ///
    /// Returns `(tunnel_pubkey, tunnel_address, client_privkey, forward_port)`
    /// and records the assigned host ports on the link.
    pub async fn activate(
        &self,
        link_id: Uuid,
        gateway_id: Uuid,
        options: ActivationOptions,
    ) -> Result<LinkUpResult, ActivationError> {
        // Ports recorded by a previous holder must be visible to this one
        let _guard = self.locks.acquire(gateway_id, link_id).await;

        let (link, domain) = store::find_link(&self.db, link_id)
            .await?
            .ok_or_else(|| ActivationError::LinkNotFound(link_id.to_string()))?;
        let gateway = Gateway::find_by_id(gateway_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ActivationError::GatewayNotFound(gateway_id.to_string()))?;

        let fqdn = link.fqdn(&domain);
        let forward_port = options.forward_port.or(link.forward_port());
        let center_port = options
            .center_port
            .or(link.center_port())
            .filter(|_| options.tcp_forwarding);
        let command = LinkUpCommand::new(gateway.id.to_string(), fqdn.clone())
            .with_tcp_forwarding(options.tcp_forwarding)
            .with_forward_port(forward_port)
            .with_center_port(center_port);

        let path = self.select_path(&gateway, &domain).await?;
        info!(
            gateway_id = %gateway.id,
            fqdn = %fqdn,
            forward_port = ?forward_port,
            path = %path,
            "Activating link"
        );

        let result = match path {
            ActivationPath::RemoteShell { target, .. } => {
                self.activate_remote_shell(&target, &command).await?
            }
            ActivationPath::Local { .. } => self.activate_local(&command).await?,
            ActivationPath::RemoteTask { channel, queue } => {
                self.activate_remote_task(&gateway, &channel, &queue, &command)
                    .await?
            }
        };

        store::record_ports(&self.db, link, result.forward_port, result.center_port).await?;

        info!(
            gateway_id = %gateway.id,
            fqdn = %fqdn,
            address = %result.tunnel_address,
            "Link activated"
        );
        Ok(result)
    }

    /// Decide how to reach the gateway for a link under `domain`
    pub async fn select_path(
        &self,
        gateway: &gateway::Model,
        domain: &domain::Model,
    ) -> Result<ActivationPath, ActivationError> {
        let reachable = store::remote_shell_devices(&self.db, gateway.id, domain.id).await?;
        if let Some((device, target)) = reachable.into_iter().next() {
            return Ok(ActivationPath::RemoteShell {
                target,
                via: device.name,
            });
        }

        match self
            .provisioner
            .manager()
            .find_gateway_container(&gateway.id.to_string())
            .await
        {
            Ok(Some(container)) => return Ok(ActivationPath::Local { container }),
            Ok(None) => debug!(gateway_id = %gateway.id, "No local gateway process"),
            // No usable runtime on this host is the same as no local gateway
            Err(e) => warn!(gateway_id = %gateway.id, error = %e, "Local gateway detection failed"),
        }

        if let Some(target) = gateway.remote_access() {
            return Ok(ActivationPath::RemoteShell {
                target,
                via: gateway.name.clone(),
            });
        }

        let serving = store::serving_devices(&self.db, gateway.id, domain.id).await?;
        let Some(device) = serving.into_iter().next() else {
            return Err(ActivationError::DomainNotServed {
                gateway: gateway.name.clone(),
                domain: domain.uri.clone(),
            });
        };

        let configured = store::gateway_channels(&self.db, gateway.id).await?;
        let channel = configured
            .iter()
            .find(|row| self.channels.get(&row.name).is_some())
            .map(|row| row.name.clone());

        match channel {
            Some(channel) => Ok(ActivationPath::RemoteTask {
                channel,
                queue: device.name,
            }),
            None => Err(ActivationError::ChannelUnavailable {
                gateway: gateway.name.clone(),
                reason: if configured.is_empty() {
                    "no channel configured".to_string()
                } else {
                    "no configured channel is connected".to_string()
                },
            }),
        }
    }

    async fn activate_remote_shell(
        &self,
        target: &RemoteAccess,
        command: &LinkUpCommand,
    ) -> Result<LinkUpResult, ActivationError> {
        let output = self
            .remote
            .execute(target, &command.to_args(), self.settings.shell_timeout)
            .await
            .map_err(|e| match e {
                RemoteError::Timeout(after) => ActivationError::Timeout { after },
                other => ActivationError::RemoteTransport {
                    target: target.to_string(),
                    output: other.output(),
                },
            })?;

        output
            .parse::<LinkUpResult>()
            .map_err(|e| ActivationError::RemoteTransport {
                target: target.to_string(),
                output: format!("{} (output: {:?})", e, output.trim()),
            })
    }

    async fn activate_local(&self, command: &LinkUpCommand) -> Result<LinkUpResult, ActivationError> {
        let provisioner = self.provisioner.clone();
        let command = command.clone();

        // Spawned so probe teardown and cleanup finish even if the caller gives up
        let handle = tokio::spawn(async move {
            provisioner
                .provision(
                    &command.gateway_id,
                    &command.fqdn,
                    command.tcp_forwarding,
                    command.forward_port,
                    command.center_port,
                )
                .await
        });

        let result = handle
            .await
            .map_err(|e| ActivationError::Interrupted(e.to_string()))??;
        Ok(result)
    }

    async fn activate_remote_task(
        &self,
        gateway: &gateway::Model,
        channel_name: &str,
        queue: &str,
        command: &LinkUpCommand,
    ) -> Result<LinkUpResult, ActivationError> {
        let channel = self.channels.get(channel_name).ok_or_else(|| {
            ActivationError::ChannelUnavailable {
                gateway: gateway.name.clone(),
                reason: format!("channel {} disconnected", channel_name),
            }
        })?;

        let task = DeviceTask::LinkUp {
            fqdn: command.fqdn.clone(),
            tcp_forwarding: command.tcp_forwarding,
            forward_port: command.forward_port,
            center_port: command.center_port,
        };

        let timeout = self.settings.task_timeout;
        let outcome = tokio::time::timeout(timeout, channel.dispatch(task, queue))
            .await
            .map_err(|_| ActivationError::Timeout { after: timeout })?
            .map_err(|e| ActivationError::ChannelUnavailable {
                gateway: gateway.name.clone(),
                reason: e.to_string(),
            })?;

        debug!(queue = %queue, execution_time = ?outcome.execution_time, "Remote task finished");

        outcome.result.map_err(|message| ActivationError::RemoteTask {
            message,
            execution_time: outcome.execution_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelError, MockChannel, TaskOutcome};
    use crate::remote::MockRemoteExecutor;
    use chrono::Utc;
    use gatelink_db::entities::{channel, device, link};
    use gatelink_db::{connect, migrate};
    use gatelink_runtime::testing::{FakeRuntime, RuntimeCall};
    use gatelink_runtime::{RuntimeSettings, TunnelManager};
    use sea_orm::{ActiveModelTrait, Set};

    struct Fixture {
        db: DatabaseConnection,
        runtime: Arc<FakeRuntime>,
        gateway: gateway::Model,
        link: link::Model,
        domain: domain::Model,
    }

    async fn fixture(gateway_ssh: Option<&str>) -> Fixture {
        let db = connect("sqlite::memory:").await.unwrap();
        migrate(&db).await.unwrap();

        let gateway = gateway::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("edge-1a2b3c4d".to_string()),
            ssh_host: Set(gateway_ssh.map(str::to_string)),
            ssh_port: Set(gateway_ssh.map(|_| 22)),
            is_replicated_store: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(&db)
        .await
        .unwrap();

        let (link, domain) = store::create_link(&db, "example.com", "", None).await.unwrap();

        Fixture {
            db,
            runtime: Arc::new(FakeRuntime::new()),
            gateway,
            link,
            domain,
        }
    }

    async fn serving_device(f: &Fixture, name: &str, ssh_host: Option<&str>) -> device::Model {
        let device = device::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            ssh_host: Set(ssh_host.map(str::to_string)),
            ssh_port: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(&f.db)
        .await
        .unwrap();

        store::add_membership(&f.db, f.gateway.id, device.id).await.unwrap();
        store::authorize_device(&f.db, f.domain.id, device.id).await.unwrap();
        device
    }

    fn activator(
        f: &Fixture,
        remote: MockRemoteExecutor,
        channels: ChannelRegistry,
    ) -> LinkActivator {
        let manager = TunnelManager::new(f.runtime.clone(), RuntimeSettings::default());
        LinkActivator::new(
            f.db.clone(),
            Arc::new(LinkProvisioner::new(Arc::new(manager))),
            Arc::new(remote),
            channels,
            ActivationSettings {
                shell_timeout: Duration::from_secs(5),
                task_timeout: Duration::from_millis(50),
            },
        )
    }

    /// Gateway process on this host, with a client keypair ready to hand out
    fn local_gateway(f: &Fixture) {
        f.runtime.with_running_gateway(&f.gateway.id.to_string());
        f.runtime.set_disposable_output(
            "YAnz8yGQ2X8hb9wJpDT0Tg0mmjO4cVSPrPrNGSOOA2A=\n\
             xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=\n",
        );
    }

    /// Channel whose task never reports back
    struct StalledChannel;

    #[async_trait::async_trait]
    impl Channel for StalledChannel {
        async fn dispatch(
            &self,
            _task: DeviceTask,
            _queue: &str,
        ) -> Result<TaskOutcome, ChannelError> {
            std::future::pending().await
        }
    }

    fn wire(port: u16) -> String {
        format!("srvpub,example.com:{},clipriv,{}\n", port, port)
    }

    #[tokio::test]
    async fn test_remote_shell_device_beats_local_process() {
        let f = fixture(None).await;
        serving_device(&f, "builder", Some("10.0.0.7")).await;
        f.runtime.with_running_gateway(&f.gateway.id.to_string());

        let gateway_id = f.gateway.id.to_string();
        let mut remote = MockRemoteExecutor::new();
        remote
            .expect_execute()
            .withf(move |target, args, _| {
                target == &RemoteAccess::new("10.0.0.7", 22)
                    && args.iter().map(String::as_str).eq([
                        "link",
                        "up",
                        gateway_id.as_str(),
                        "example.com",
                    ])
            })
            .times(1)
            .returning(|_, _, _| Ok(wire(40001)));

        let activator = activator(&f, remote, ChannelRegistry::new());
        let result = activator
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap();

        assert_eq!(result.forward_port, 40001);
        assert!(f.runtime.runs().is_empty());
    }

    #[tokio::test]
    async fn test_remote_shell_failure_carries_output() {
        let f = fixture(Some("1.2.3.4")).await;

        let mut remote = MockRemoteExecutor::new();
        remote.expect_execute().returning(|_, _, _| {
            Err(RemoteError::Failed {
                status: "exit status: 1".to_string(),
                output: "Error: Port 18521 is already allocated".to_string(),
            })
        });

        let err = activator(&f, remote, ChannelRegistry::new())
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();

        match err {
            ActivationError::RemoteTransport { target, output } => {
                assert_eq!(target, "1.2.3.4:22");
                assert!(output.contains("already allocated"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let (link, _) = store::find_link(&f.db, f.link.id).await.unwrap().unwrap();
        assert_eq!(link.forward_port, None);
    }

    #[tokio::test]
    async fn test_garbled_remote_response() {
        let f = fixture(Some("1.2.3.4")).await;

        let mut remote = MockRemoteExecutor::new();
        remote
            .expect_execute()
            .returning(|_, _, _| Ok("bash: gatelink: command not found\n".to_string()));

        let err = activator(&f, remote, ChannelRegistry::new())
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActivationError::RemoteTransport { .. }));
    }

    #[tokio::test]
    async fn test_remote_shell_timeout() {
        let f = fixture(Some("1.2.3.4")).await;

        let mut remote = MockRemoteExecutor::new();
        remote
            .expect_execute()
            .returning(|_, _, timeout| Err(RemoteError::Timeout(timeout)));

        let err = activator(&f, remote, ChannelRegistry::new())
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActivationError::Timeout { after } if after == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_without_serving_device() {
        let f = fixture(None).await;

        let err = activator(&f, MockRemoteExecutor::new(), ChannelRegistry::new())
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActivationError::DomainNotServed { .. }));
    }

    #[tokio::test]
    async fn test_no_channel_configured() {
        let f = fixture(None).await;
        serving_device(&f, "builder", None).await;

        let err = activator(&f, MockRemoteExecutor::new(), ChannelRegistry::new())
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActivationError::ChannelUnavailable { .. }));
    }

    async fn add_channel(f: &Fixture, name: &str) {
        channel::ActiveModel {
            id: Set(Uuid::new_v4()),
            gateway_id: Set(f.gateway.id),
            name: Set(name.to_string()),
            endpoint: Set("replica://edge".to_string()),
            priority: Set(0),
        }
        .insert(&f.db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_remote_task_path() {
        let f = fixture(None).await;
        serving_device(&f, "builder", None).await;
        add_channel(&f, "replica").await;

        let mut channel = MockChannel::new();
        channel
            .expect_dispatch()
            .withf(|task, queue| {
                queue == "builder"
                    && *task
                        == DeviceTask::LinkUp {
                            fqdn: "example.com".to_string(),
                            tcp_forwarding: true,
                            forward_port: None,
                            center_port: None,
                        }
            })
            .times(1)
            .returning(|_, _| {
                Ok(TaskOutcome {
                    result: Ok(wire(40002).parse().unwrap()),
                    execution_time: Duration::from_millis(800),
                })
            });

        let channels = ChannelRegistry::new();
        channels.register("replica", Arc::new(channel));

        let options = ActivationOptions {
            tcp_forwarding: true,
            ..ActivationOptions::default()
        };
        let result = activator(&f, MockRemoteExecutor::new(), channels)
            .activate(f.link.id, f.gateway.id, options)
            .await
            .unwrap();
        assert_eq!(result.forward_port, 40002);

        let (link, _) = store::find_link(&f.db, f.link.id).await.unwrap().unwrap();
        assert_eq!(link.forward_port(), Some(40002));
    }

    #[tokio::test]
    async fn test_remote_task_error_reports_execution_time() {
        let f = fixture(None).await;
        serving_device(&f, "builder", None).await;
        add_channel(&f, "replica").await;

        let mut channel = MockChannel::new();
        channel.expect_dispatch().returning(|_, _| {
            Ok(TaskOutcome {
                result: Err("Gateway container not found".to_string()),
                execution_time: Duration::from_secs(3),
            })
        });
        let channels = ChannelRegistry::new();
        channels.register("replica", Arc::new(channel));

        let err = activator(&f, MockRemoteExecutor::new(), channels)
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActivationError::RemoteTask { execution_time, .. } if execution_time == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_remote_task_timeout() {
        let f = fixture(None).await;
        serving_device(&f, "builder", None).await;
        add_channel(&f, "replica").await;

        let channels = ChannelRegistry::new();
        channels.register("replica", Arc::new(StalledChannel));

        let err = activator(&f, MockRemoteExecutor::new(), channels)
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ActivationError::Timeout { after } if after == Duration::from_millis(50)
        ));

        let (link, _) = store::find_link(&f.db, f.link.id).await.unwrap().unwrap();
        assert_eq!(link.forward_port, None);
    }

    #[tokio::test]
    async fn test_concurrent_activations_discover_port_once() {
        let f = fixture(None).await;
        local_gateway(&f);

        let activator = activator(&f, MockRemoteExecutor::new(), ChannelRegistry::new());
        let (first, second) = tokio::join!(
            activator.activate(f.link.id, f.gateway.id, ActivationOptions::default()),
            activator.activate(f.link.id, f.gateway.id, ActivationOptions::default()),
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_eq!(second.forward_port, first.forward_port);

        // Only a discovery run leaves every host port to the runtime
        let discovery_runs = f
            .runtime
            .runs()
            .iter()
            .filter(|spec| spec.ports.iter().all(|p| p.host_port.is_none()))
            .count();
        assert_eq!(discovery_runs, 1);
        assert_eq!(f.runtime.runs().len(), 3);
    }

    #[tokio::test]
    async fn test_local_path_records_forwarding_port() {
        let f = fixture(None).await;
        local_gateway(&f);

        let options = ActivationOptions {
            tcp_forwarding: true,
            ..ActivationOptions::default()
        };
        let activator = activator(&f, MockRemoteExecutor::new(), ChannelRegistry::new());
        let first = activator.activate(f.link.id, f.gateway.id, options).await.unwrap();
        let center_port = first.center_port.unwrap();
        assert_ne!(center_port, first.forward_port);

        let (link, _) = store::find_link(&f.db, f.link.id).await.unwrap().unwrap();
        assert_eq!(link.forward_port(), Some(first.forward_port));
        assert_eq!(link.center_port(), Some(center_port));

        let second = activator.activate(f.link.id, f.gateway.id, options).await.unwrap();
        assert_eq!(second.center_port, Some(center_port));

        // The second activation binds both recorded ports without discovery
        let runs = f.runtime.runs();
        assert_eq!(runs.len(), 3);
        assert!(runs[2].ports.iter().all(|p| p.host_port.is_some()));
    }

    #[tokio::test]
    async fn test_local_path_records_forward_port() {
        let f = fixture(None).await;
        local_gateway(&f);

        let activator = activator(&f, MockRemoteExecutor::new(), ChannelRegistry::new());
        let first = activator
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap();
        assert_eq!(first.tunnel_address, format!("example.com:{}", first.forward_port));

        // probe + bound
        let runs_after_first = f.runtime.runs().len();
        assert_eq!(runs_after_first, 2);

        let second = activator
            .activate(f.link.id, f.gateway.id, ActivationOptions::default())
            .await
            .unwrap();
        assert_eq!(second.forward_port, first.forward_port);
        assert_eq!(f.runtime.runs().len(), runs_after_first + 1);
        assert!(f
            .runtime
            .calls()
            .iter()
            .any(|c| matches!(c, RuntimeCall::FindByLabel { .. })));
    }
}
