//! Link entity: one tunnel endpoint bound to an fqdn

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "links")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub domain_id: Uuid,

    /// Empty when the link sits directly on the domain
    pub subdomain: String,

    /// Service the link exposes (e.g. `app:8080`)
    pub service: Option<String>,

    /// Host port assigned on first successful activation, reused afterwards
    pub forward_port: Option<i32>,

    /// Host port of the TCP forwarding listener, when the link has one
    pub center_port: Option<i32>,

    pub created_at: ChronoDateTimeUtc,
}

impl Model {
    /// Fully-qualified name of this link under `domain`
    pub fn fqdn(&self, domain: &super::domain::Model) -> String {
        gatelink_proto::link_fqdn(&self.subdomain, &domain.uri)
    }

    /// Persisted forward port, if any
    pub fn forward_port(&self) -> Option<u16> {
        self.forward_port.and_then(|p| u16::try_from(p).ok())
    }

    pub fn center_port(&self) -> Option<u16> {
        self.center_port.and_then(|p| u16::try_from(p).ok())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::domain::Entity",
        from = "Column::DomainId",
        to = "super::domain::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Domain,
}

impl Related<super::domain::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Domain.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
