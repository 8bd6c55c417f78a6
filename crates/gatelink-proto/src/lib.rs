//! Gatelink protocol definitions
//!
//! Wire formats shared by the activation path, the remote-shell entrypoint,
//! the device task channel and fixture exchange. Nothing in this crate
//! performs I/O.

pub mod client_config;
pub mod command;
pub mod error;
pub mod fixture;
pub mod fqdn;
pub mod messages;

pub use client_config::ClientLinkConfig;
pub use command::{LinkUpCommand, RemoteAccess};
pub use error::ProtoError;
pub use fixture::{EntityType, FixtureEnvelope, FixtureRecord};
pub use fqdn::link_fqdn;
pub use messages::{DeviceTask, LinkUpResult};

/// Container port the tunnel listener binds inside the link container (UDP)
pub const TUNNEL_LISTEN_PORT: u16 = 18521;

/// Container port the optional TCP forwarding listener binds inside the link container
pub const CENTER_PORT: u16 = 5555;

/// Well-known public ports fronted by the gateway process
pub const HTTP_GATEWAY_PORT: u16 = 80;
pub const HTTPS_GATEWAY_PORT: u16 = 443;
