//! Fixture envelope wire format
//!
//! ```json
//! { "transaction_id": "<uuid>",
//!   "records": [ { "entity_type": "device", "primary_key": "...", "name": "...", ... } ] }
//! ```
//!
//! Records are ordered so that every record only references entities that
//! appear earlier in the list or already exist in the receiving store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kinds of entity a fixture can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Device,
    Domain,
    DomainDevice,
    Gateway,
    Membership,
    Credential,
    Channel,
    Link,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityType::Device => "device",
            EntityType::Domain => "domain",
            EntityType::DomainDevice => "domain_device",
            EntityType::Gateway => "gateway",
            EntityType::Membership => "membership",
            EntityType::Credential => "credential",
            EntityType::Channel => "channel",
            EntityType::Link => "link",
        };
        write!(f, "{}", name)
    }
}

/// A single typed entity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    pub entity_type: EntityType,
    /// Identity of the entity; composite keys are joined with `:`
    pub primary_key: String,
    /// Remaining entity fields, flattened into the record object
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FixtureRecord {
    /// Build a record from any serializable entity snapshot.
    ///
    /// Non-object snapshots produce a record with no fields.
    pub fn from_entity<T: Serialize>(
        entity_type: EntityType,
        primary_key: impl Into<String>,
        entity: &T,
    ) -> Result<Self, serde_json::Error> {
        let fields = match serde_json::to_value(entity)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Self {
            entity_type,
            primary_key: primary_key.into(),
            fields,
        })
    }

    /// Decode the record fields back into an entity snapshot
    pub fn to_entity<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Portable snapshot of an entity and its dependents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEnvelope {
    /// Fresh per export; replaying the same id is a no-op on import
    pub transaction_id: Uuid,
    pub records: Vec<FixtureRecord>,
}

impl FixtureEnvelope {
    pub fn new(records: Vec<FixtureRecord>) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            records,
        }
    }
}
