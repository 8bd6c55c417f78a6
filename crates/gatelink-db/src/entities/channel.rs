//! Channel configuration: where a gateway's remote-task channel lives

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub gateway_id: Uuid,

    pub name: String,

    /// Endpoint of the task transport (e.g. homeserver url)
    pub endpoint: String,

    /// Lower is preferred
    pub priority: i32,
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
}

impl Related<super::gateway::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Gateway.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
