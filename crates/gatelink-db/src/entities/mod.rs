//! Database entities

pub mod channel;
pub mod credential;
pub mod device;
pub mod domain;
pub mod domain_device;
pub mod fixture_transaction;
pub mod gateway;
pub mod link;
pub mod membership;

pub use channel::Entity as Channel;
pub use credential::Entity as Credential;
pub use device::Entity as Device;
pub use domain::Entity as Domain;
pub use domain_device::Entity as DomainDevice;
pub use fixture_transaction::Entity as FixtureTransaction;
pub use gateway::Entity as Gateway;
pub use link::Entity as Link;
pub use membership::Entity as Membership;

pub mod prelude {
    pub use super::channel::Entity as Channel;
    pub use super::credential::Entity as Credential;
    pub use super::device::Entity as Device;
    pub use super::domain::Entity as Domain;
    pub use super::domain_device::Entity as DomainDevice;
    pub use super::fixture_transaction::Entity as FixtureTransaction;
    pub use super::gateway::Entity as Gateway;
    pub use super::link::Entity as Link;
    pub use super::membership::Entity as Membership;
}

use gatelink_proto::RemoteAccess;

/// Build a remote-access descriptor from nullable host/port columns
pub(crate) fn remote_access(host: &Option<String>, port: Option<i32>) -> Option<RemoteAccess> {
    let host = host.as_deref().filter(|h| !h.is_empty())?;
    let port = u16::try_from(port.unwrap_or(22)).ok()?;
    Some(RemoteAccess::new(host, port))
}
