//! Device entity: a host that can serve domains and join gateways

use gatelink_proto::RemoteAccess;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique device name
    #[sea_orm(unique)]
    pub name: String,

    /// Host accepting remote-shell connections, if the device is reachable
    pub ssh_host: Option<String>,

    /// Remote-shell port (defaults to 22 when only a host is set)
    pub ssh_port: Option<i32>,

    pub created_at: ChronoDateTimeUtc,
}

impl Model {
    /// Remote-access descriptor, if this device can be reached over ssh
    pub fn remote_access(&self) -> Option<RemoteAccess> {
        super::remote_access(&self.ssh_host, self.ssh_port)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::membership::Entity")]
    Membership,

    #[sea_orm(has_many = "super::domain_device::Entity")]
    DomainDevice,

    #[sea_orm(has_many = "super::credential::Entity")]
    Credential,
}

impl Related<super::membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Membership.def()
    }
}

impl Related<super::domain_device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DomainDevice.def()
    }
}

impl Related<super::credential::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Credential.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
