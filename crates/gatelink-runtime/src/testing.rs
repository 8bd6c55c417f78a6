//! Recording in-memory [`ContainerRuntime`] for tests

use crate::error::{ResourceKind, RuntimeError};
use crate::runtime::ContainerRuntime;
use crate::settings::ImageSource;
use crate::spec::{ContainerSpec, Protocol, PublishedPort};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// First host port handed out for ephemeral bindings
pub const EPHEMERAL_PORT_START: u16 = 40000;

/// Public key the fake tunnel process reports by default
pub const FAKE_TUNNEL_PUBLIC_KEY: &str = "VImAwiRg+IRjpkwdDzOqd9lxXdFiXMVGATai9PnZ2RM=";

/// One call made against the fake runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    EnsureNetwork(String),
    EnsureImage(String),
    Run(ContainerSpec),
    RunDisposable(ContainerSpec),
    PublishedPorts(String),
    Exec { container: String, command: Vec<String> },
    Stop(String),
    Remove(String),
    FindByLabel { key: String, value: String },
}

#[derive(Debug, Clone)]
struct FakeContainer {
    spec: ContainerSpec,
    ports: Vec<PublishedPort>,
    running: bool,
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<RuntimeCall>,
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeSet<String>,
    occupied: BTreeSet<u16>,
    next_ephemeral: u16,
    disposable_output: String,
    disposable_failure: Option<RuntimeError>,
    run_failure: Option<RuntimeError>,
    remove_failure: Option<RuntimeError>,
    exec_output: String,
    /// Inspections that see no published ports before they appear
    unsettled_inspections: u32,
    /// Exec calls that return nothing before the key shows up
    empty_execs: u32,
    inspections: HashMap<String, u32>,
    execs: HashMap<String, u32>,
}

/// Container runtime double that tracks containers and host ports in memory.
///
/// Port bindings conflict the way Docker's do: a fixed host port held by a
/// running container (same protocol) or marked with [`occupy_port`] fails
/// with a `Bind for 0.0.0.0:<port> failed` API error, leaving the created
/// container behind for the caller to remove.
///
/// [`occupy_port`]: FakeRuntime::occupy_port
#[derive(Debug)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                containers: BTreeMap::new(),
                networks: BTreeSet::new(),
                occupied: BTreeSet::new(),
                next_ephemeral: EPHEMERAL_PORT_START,
                disposable_output: String::new(),
                disposable_failure: None,
                run_failure: None,
                remove_failure: None,
                exec_output: FAKE_TUNNEL_PUBLIC_KEY.to_string(),
                unsettled_inspections: 0,
                empty_execs: 0,
                inspections: HashMap::new(),
                execs: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a host port as held by something outside the runtime
    pub fn occupy_port(&self, port: u16) {
        self.state().occupied.insert(port);
    }

    pub fn set_disposable_output(&self, output: impl Into<String>) {
        self.state().disposable_output = output.into();
    }

    /// Make every disposable run fail with `error`
    pub fn fail_disposable(&self, error: RuntimeError) {
        self.state().disposable_failure = Some(error);
    }

    /// Make the next detached run fail with `error` after creating the container
    pub fn fail_next_run(&self, error: RuntimeError) {
        self.state().run_failure = Some(error);
    }

    /// Make the next removal of an existing container fail with `error`,
    /// leaving the container in place
    pub fn fail_next_remove(&self, error: RuntimeError) {
        self.state().remove_failure = Some(error);
    }

    pub fn set_exec_output(&self, output: impl Into<String>) {
        self.state().exec_output = output.into();
    }

    /// Delay port publication by `count` inspections per container
    pub fn delay_port_assignment(&self, count: u32) {
        self.state().unsettled_inspections = count;
    }

    /// Delay the tunnel key by `count` exec calls per container
    pub fn delay_tunnel_key(&self, count: u32) {
        self.state().empty_execs = count;
    }

    /// Register a running gateway process without recording a call
    pub fn with_running_gateway(&self, gateway_id: &str) {
        let name = format!("gatelink-gateway-{}", gateway_id);
        let spec = ContainerSpec::new("gatelink/gateway:latest")
            .named(name.clone())
            .label(crate::GATEWAY_LABEL, gateway_id);
        self.state().containers.insert(
            name,
            FakeContainer {
                spec,
                ports: Vec::new(),
                running: true,
            },
        );
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    /// Specs of every detached run, in order
    pub fn runs(&self) -> Vec<ContainerSpec> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Run(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn networks(&self) -> Vec<String> {
        self.state().networks.iter().cloned().collect()
    }

    /// Names of containers that exist, running or not
    pub fn containers(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn running(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .filter(|(_, c)| c.running)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<ContainerSpec> {
        self.state().containers.get(name).map(|c| c.spec.clone())
    }

    /// Host ports held by running containers
    pub fn bound_ports(&self) -> Vec<u16> {
        let state = self.state();
        let ports: BTreeSet<u16> = state
            .containers
            .values()
            .filter(|c| c.running)
            .flat_map(|c| c.ports.iter().map(|p| p.host_port))
            .collect();
        ports.into_iter().collect()
    }
}

impl FakeState {
    fn port_taken(&self, host_port: u16, protocol: Protocol) -> bool {
        self.occupied.contains(&host_port)
            || self.containers.values().any(|c| {
                c.running
                    && c.ports
                        .iter()
                        .any(|p| p.host_port == host_port && p.protocol == protocol)
            })
    }

    fn allocate_ephemeral(&mut self, protocol: Protocol) -> u16 {
        loop {
            let port = self.next_ephemeral;
            self.next_ephemeral = self.next_ephemeral.wrapping_add(1).max(EPHEMERAL_PORT_START);
            if !self.port_taken(port, protocol) {
                return port;
            }
        }
    }

    /// Resolve the spec's bindings, failing like Docker on a taken port
    fn bind(&mut self, spec: &ContainerSpec) -> Result<Vec<PublishedPort>, RuntimeError> {
        let mut published = Vec::new();
        for mapping in &spec.ports {
            let host_port = match mapping.host_port {
                Some(port) if self.port_taken(port, mapping.protocol) => {
                    return Err(RuntimeError::Api {
                        operation: "start_container",
                        message: format!(
                            "driver failed programming external connectivity: \
                             Bind for 0.0.0.0:{} failed: port is already allocated",
                            port
                        ),
                    });
                }
                Some(port) => port,
                None => self.allocate_ephemeral(mapping.protocol),
            };
            published.push(PublishedPort {
                container_port: mapping.container_port,
                protocol: mapping.protocol,
                host_port,
            });
        }
        Ok(published)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::EnsureNetwork(name.to_string()));
        state.networks.insert(name.to_string());
        Ok(())
    }

    async fn ensure_image(&self, image: &ImageSource) -> Result<(), RuntimeError> {
        self.state()
            .calls
            .push(RuntimeCall::EnsureImage(image.tag.clone()));
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Run(spec.clone()));

        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("fake-{}", state.calls.len()));

        if state.containers.contains_key(&name) {
            return Err(RuntimeError::Conflict {
                kind: ResourceKind::Container,
                name,
            });
        }
        if let Some(network) = &spec.network {
            if !state.networks.contains(network) {
                return Err(RuntimeError::NotFound {
                    kind: ResourceKind::Network,
                    name: network.clone(),
                });
            }
        }

        let bound = match state.run_failure.take() {
            Some(error) => Err(error),
            None => state.bind(spec),
        };

        // Docker creates the container before start fails
        let (ports, running, result) = match bound {
            Ok(ports) => (ports, true, Ok(())),
            Err(error) => (Vec::new(), false, Err(error)),
        };
        state.containers.insert(
            name,
            FakeContainer {
                spec: spec.clone(),
                ports,
                running,
            },
        );
        result
    }

    async fn run_disposable(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::RunDisposable(spec.clone()));

        if let Some(error) = state.disposable_failure.clone() {
            return Err(error);
        }
        state.bind(spec)?;

        Ok(state.disposable_output.clone())
    }

    async fn published_ports(&self, container: &str) -> Result<Vec<PublishedPort>, RuntimeError> {
        let mut state = self.state();
        state
            .calls
            .push(RuntimeCall::PublishedPorts(container.to_string()));

        let ports = match state.containers.get(container) {
            Some(c) => c.ports.clone(),
            None => {
                return Err(RuntimeError::NotFound {
                    kind: ResourceKind::Container,
                    name: container.to_string(),
                })
            }
        };

        let unsettled = state.unsettled_inspections;
        let seen = state.inspections.entry(container.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= unsettled {
            return Ok(Vec::new());
        }

        Ok(ports)
    }

    async fn exec(&self, container: &str, command: &[String]) -> Result<String, RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Exec {
            container: container.to_string(),
            command: command.to_vec(),
        });

        if !state.containers.get(container).is_some_and(|c| c.running) {
            return Err(RuntimeError::Api {
                operation: "create_exec",
                message: format!("container {} is not running", container),
            });
        }

        let empty = state.empty_execs;
        let seen = state.execs.entry(container.to_string()).or_insert(0);
        *seen += 1;
        if *seen <= empty {
            return Ok(String::new());
        }

        Ok(format!("{}\n", state.exec_output))
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Stop(container.to_string()));
        if let Some(c) = state.containers.get_mut(container) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove(&self, container: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Remove(container.to_string()));
        if state.containers.contains_key(container) {
            if let Some(error) = state.remove_failure.take() {
                return Err(error);
            }
        }
        state.containers.remove(container);
        state.inspections.remove(container);
        state.execs.remove(container);
        Ok(())
    }

    async fn find_by_label(&self, key: &str, value: &str) -> Result<Vec<String>, RuntimeError> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::FindByLabel {
            key: key.to_string(),
            value: value.to_string(),
        });

        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| c.running && c.spec.labels.get(key).map(String::as_str) == Some(value))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
