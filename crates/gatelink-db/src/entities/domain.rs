//! Domain entity: a registrable suffix links are minted under

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "domains")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Globally unique uri (e.g. `example.com`), immutable after creation
    #[sea_orm(unique)]
    pub uri: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::domain_device::Entity")]
    DomainDevice,

    #[sea_orm(has_many = "super::link::Entity")]
    Link,
}

impl Related<super::domain_device::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DomainDevice.def()
    }
}

impl Related<super::link::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Link.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
