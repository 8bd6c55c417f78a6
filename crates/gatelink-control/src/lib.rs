//! Control plane for gateways and links
//!
//! - [`LinkActivator`]: picks local, remote-shell or remote-task activation
//!   for a link and persists the forward port it comes back with
//! - [`LinkProvisioner`] / [`TaskWorker`]: the device-side `link_up`
//! - [`fixture`]: export and idempotent import of entity snapshots
//! - [`GatewayService`]: gateway registration, initialization and launch
pub mod activator;
pub mod channel;
pub mod error;
pub mod fixture;
pub mod gateway;
pub mod locks;
pub mod remote;
pub mod store;
pub mod tasks;

pub use activator::{
    ActivationOptions, ActivationPath, ActivationSettings, LinkActivator, DEFAULT_SHELL_TIMEOUT,
    DEFAULT_TASK_TIMEOUT,
};
pub use channel::{Channel, ChannelError, ChannelRegistry, LocalTaskChannel, TaskOutcome};
pub use error::{ActivationError, FixtureError, GatewayError};
pub use fixture::{ExportRoot, ImportReport};
pub use gateway::{gateway_container_name, GatewayService};
pub use locks::{ActivationGuard, ActivationLocks};
pub use remote::{RemoteError, RemoteExecutor, SshExecutor, SshSettings};
pub use tasks::{LinkProvisioner, TaskWorker};
