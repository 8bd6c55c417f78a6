//! Container runtime plumbing for gateways and links
//!
//! Everything that touches the container runtime goes through the
//! [`ContainerRuntime`] capability so it can be swapped for a recording
//! double in tests. On top of it sit:
//!
//! - [`PortProbe`]: pre-flight check that public ports are free
//! - [`KeyProvisioner`]: disposable tunnel keypair generation
//! - [`TunnelManager`]: shared network/images, the gateway process and the
//!   two-phase port binding of link tunnel processes

pub mod docker;
pub mod error;
pub mod keys;
pub mod probe;
pub mod runtime;
pub mod settings;
pub mod spec;
pub mod tunnel;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use docker::DockerRuntime;
pub use error::{port_from_conflict, LaunchError, ResourceKind, RuntimeError};
pub use keys::{KeyProvisioner, Keypair};
pub use probe::PortProbe;
pub use runtime::ContainerRuntime;
pub use settings::{ImageSource, PollSettings, RuntimeSettings};
pub use spec::{ContainerSpec, PortMapping, Protocol, PublishedPort, RestartPolicy};
pub use tunnel::{link_container_name, LinkEndpoint, LinkLaunch, TunnelManager};

/// Label carried by the gateway process, value is the gateway id
pub const GATEWAY_LABEL: &str = "gateway";

/// Label carried by every link tunnel process
pub const LINK_LABEL: &str = "tunnel-link";
