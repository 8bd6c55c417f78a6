//! Membership entity: a device joined to a gateway

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memberships")]
pub struct Model {
    /// Gateway UUID (composite primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub gateway_id: Uuid,

    /// Device UUID (composite primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub device_id: Uuid,

    /// When the device joined the gateway
    pub joined_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::gateway::Entity",
        from = "Column::GatewayId",
        to = "super::gateway::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Gateway,

    #[sea_orm(
        belongs_to = "super::device::Entity",
        from = "Column::DeviceId",
        to = "super::device::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Device,
}

impl Related<super::gateway::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Gateway.def()
    }
}

impl Related<super::device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Device.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
