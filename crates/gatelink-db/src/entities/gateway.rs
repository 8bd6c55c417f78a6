//! Gateway entity: fronts links behind the public reverse proxy

use gatelink_proto::RemoteAccess;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "gateways")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub name: String,

    /// Host running the gateway process, when it is not on this device
    pub ssh_host: Option<String>,

    pub ssh_port: Option<i32>,

    /// Whether the gateway also acts as a replicated store for its members
    #[sea_orm(default_value = false)]
    pub is_replicated_store: bool,

    pub created_at: ChronoDateTimeUtc,
}

impl Model {
    pub fn remote_access(&self) -> Option<RemoteAccess> {
        super::remote_access(&self.ssh_host, self.ssh_port)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::membership::Entity")]
    Membership,

    #[sea_orm(has_many = "super::channel::Entity")]
    Channel,
}

impl Related<super::membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Membership.def()
    }
}

impl Related<super::channel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Channel.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
