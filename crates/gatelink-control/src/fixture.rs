//! Fixture exchange between device stores
//!
//! An export captures an entity and the rows that depend on it as an
//! ordered list of records, dependencies first. An import applies such an
//! envelope in one transaction:
//!
//! - a transaction id that was already applied is a no-op
//! - a row that already exists by primary key is left as it is
//! - a record whose dependency is neither in the store nor earlier in the
//!   envelope rejects the whole envelope

use crate::error::FixtureError;
use chrono::Utc;
use gatelink_db::entities::{
    channel, credential, device, domain, domain_device, fixture_transaction, gateway, link,
    membership, prelude::*,
};
use gatelink_proto::{EntityType, FixtureEnvelope, FixtureRecord};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityName, EntityTrait,
    IntoActiveModel, PrimaryKeyTrait, QueryFilter, Set, TransactionTrait,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// What to export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportRoot {
    /// Gateway, member devices, their domains and credentials, memberships, channels
    Gateway(Uuid),
    /// Device, its credentials and the domains it serves
    Device(Uuid),
}

/// Outcome of applying an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub transaction_id: Uuid,
    pub applied: usize,
    pub skipped: usize,
    /// The transaction had been applied before; nothing was touched
    pub replayed: bool,
}

pub async fn export<C: ConnectionTrait>(
    db: &C,
    root: ExportRoot,
) -> Result<FixtureEnvelope, FixtureError> {
    let records = match root {
        ExportRoot::Gateway(id) => export_gateway(db, id).await?,
        ExportRoot::Device(id) => export_device(db, id).await?,
    };

    let envelope = FixtureEnvelope::new(records);
    info!(
        transaction_id = %envelope.transaction_id,
        records = envelope.records.len(),
        "Exported fixture"
    );
    Ok(envelope)
}

async fn export_gateway<C: ConnectionTrait>(
    db: &C,
    gateway_id: Uuid,
) -> Result<Vec<FixtureRecord>, FixtureError> {
    let gateway = Gateway::find_by_id(gateway_id)
        .one(db)
        .await?
        .ok_or_else(|| FixtureError::NotFound(format!("gateway {}", gateway_id)))?;

    let memberships = Membership::find()
        .filter(membership::Column::GatewayId.eq(gateway.id))
        .all(db)
        .await?;
    let device_ids: Vec<Uuid> = memberships.iter().map(|m| m.device_id).collect();

    let mut records = Vec::new();
    records.extend(device_records(db, &device_ids).await?);
    records.push(FixtureRecord::from_entity(
        EntityType::Gateway,
        gateway.id.to_string(),
        &gateway,
    )?);
    for row in &memberships {
        records.push(FixtureRecord::from_entity(
            EntityType::Membership,
            composite_key(row.gateway_id, row.device_id),
            row,
        )?);
    }

    let channels = Channel::find()
        .filter(channel::Column::GatewayId.eq(gateway.id))
        .all(db)
        .await?;
    for row in &channels {
        records.push(FixtureRecord::from_entity(
            EntityType::Channel,
            row.id.to_string(),
            row,
        )?);
    }

    Ok(records)
}

async fn export_device<C: ConnectionTrait>(
    db: &C,
    device_id: Uuid,
) -> Result<Vec<FixtureRecord>, FixtureError> {
    if Device::find_by_id(device_id).one(db).await?.is_none() {
        return Err(FixtureError::NotFound(format!("device {}", device_id)));
    }

    device_records(db, &[device_id]).await
}

/// Devices plus their credentials, served domains and authorizations
async fn device_records<C: ConnectionTrait>(
    db: &C,
    device_ids: &[Uuid],
) -> Result<Vec<FixtureRecord>, FixtureError> {
    if device_ids.is_empty() {
        return Ok(Vec::new());
    }

    let devices = Device::find()
        .filter(device::Column::Id.is_in(device_ids.to_vec()))
        .all(db)
        .await?;
    let authorizations = DomainDevice::find()
        .filter(domain_device::Column::DeviceId.is_in(device_ids.to_vec()))
        .all(db)
        .await?;
    let domain_ids: BTreeSet<Uuid> = authorizations.iter().map(|a| a.domain_id).collect();
    let domains = Domain::find()
        .filter(domain::Column::Id.is_in(domain_ids))
        .all(db)
        .await?;
    let credentials = Credential::find()
        .filter(credential::Column::DeviceId.is_in(device_ids.to_vec()))
        .all(db)
        .await?;

    let mut records = Vec::new();
    for row in &devices {
        records.push(FixtureRecord::from_entity(EntityType::Device, row.id.to_string(), row)?);
    }
    for row in &domains {
        records.push(FixtureRecord::from_entity(EntityType::Domain, row.id.to_string(), row)?);
    }
    for row in &authorizations {
        records.push(FixtureRecord::from_entity(
            EntityType::DomainDevice,
            composite_key(row.domain_id, row.device_id),
            row,
        )?);
    }
    for row in &credentials {
        records.push(FixtureRecord::from_entity(
            EntityType::Credential,
            row.id.to_string(),
            row,
        )?);
    }

    Ok(records)
}

/// Apply an envelope to the store, all or nothing
pub async fn import(
    db: &DatabaseConnection,
    envelope: &FixtureEnvelope,
) -> Result<ImportReport, FixtureError> {
    let txn = db.begin().await?;

    if FixtureTransaction::find_by_id(envelope.transaction_id)
        .one(&txn)
        .await?
        .is_some()
    {
        txn.commit().await?;
        info!(transaction_id = %envelope.transaction_id, "Fixture already applied");
        return Ok(ImportReport {
            transaction_id: envelope.transaction_id,
            applied: 0,
            skipped: envelope.records.len(),
            replayed: true,
        });
    }

    let mut applied = 0;
    for record in &envelope.records {
        if apply_record(&txn, record).await? {
            applied += 1;
        }
    }

    fixture_transaction::ActiveModel {
        transaction_id: Set(envelope.transaction_id),
        applied_records: Set(i32::try_from(applied).unwrap_or(i32::MAX)),
        applied_at: Set(Utc::now()),
    }
    .insert(&txn)
    .await?;

    // Dropping the transaction on any earlier `?` rolls everything back
    txn.commit().await?;

    let report = ImportReport {
        transaction_id: envelope.transaction_id,
        applied,
        skipped: envelope.records.len() - applied,
        replayed: false,
    };
    info!(
        transaction_id = %report.transaction_id,
        applied = report.applied,
        skipped = report.skipped,
        "Imported fixture"
    );
    Ok(report)
}

/// Insert one record unless its row exists. Returns whether it was inserted.
async fn apply_record<C: ConnectionTrait>(
    db: &C,
    record: &FixtureRecord,
) -> Result<bool, FixtureError> {
    match record.entity_type {
        EntityType::Device => {
            let row: device::Model = decode(record)?;
            check_key(record, row.id.to_string())?;
            insert_missing(db, row.id, device::ActiveModel::from(row)).await
        }
        EntityType::Domain => {
            let row: domain::Model = decode(record)?;
            check_key(record, row.id.to_string())?;
            insert_missing(db, row.id, domain::ActiveModel::from(row)).await
        }
        EntityType::Gateway => {
            let row: gateway::Model = decode(record)?;
            check_key(record, row.id.to_string())?;
            insert_missing(db, row.id, gateway::ActiveModel::from(row)).await
        }
        EntityType::DomainDevice => {
            let row: domain_device::Model = decode(record)?;
            check_key(record, composite_key(row.domain_id, row.device_id))?;
            require::<Domain, _>(db, record, row.domain_id).await?;
            require::<Device, _>(db, record, row.device_id).await?;
            insert_missing(
                db,
                (row.domain_id, row.device_id),
                domain_device::ActiveModel::from(row),
            )
            .await
        }
        EntityType::Membership => {
            let row: membership::Model = decode(record)?;
            check_key(record, composite_key(row.gateway_id, row.device_id))?;
            require::<Gateway, _>(db, record, row.gateway_id).await?;
            require::<Device, _>(db, record, row.device_id).await?;
            insert_missing(
                db,
                (row.gateway_id, row.device_id),
                membership::ActiveModel::from(row),
            )
            .await
        }
        EntityType::Credential => {
            let row: credential::Model = decode(record)?;
            check_key(record, row.id.to_string())?;
            require::<Device, _>(db, record, row.device_id).await?;
            insert_missing(db, row.id, credential::ActiveModel::from(row)).await
        }
        EntityType::Channel => {
            let row: channel::Model = decode(record)?;
            check_key(record, row.id.to_string())?;
            require::<Gateway, _>(db, record, row.gateway_id).await?;
            insert_missing(db, row.id, channel::ActiveModel::from(row)).await
        }
        EntityType::Link => {
            let row: link::Model = decode(record)?;
            check_key(record, row.id.to_string())?;
            require::<Domain, _>(db, record, row.domain_id).await?;
            insert_missing(db, row.id, link::ActiveModel::from(row)).await
        }
    }
}

fn composite_key(a: Uuid, b: Uuid) -> String {
    format!("{}:{}", a, b)
}

fn decode<T: DeserializeOwned>(record: &FixtureRecord) -> Result<T, FixtureError> {
    record.to_entity().map_err(|e| FixtureError::Malformed {
        entity_type: record.entity_type,
        primary_key: record.primary_key.clone(),
        reason: e.to_string(),
    })
}

fn check_key(record: &FixtureRecord, actual: String) -> Result<(), FixtureError> {
    if record.primary_key != actual {
        return Err(FixtureError::Malformed {
            entity_type: record.entity_type,
            primary_key: record.primary_key.clone(),
            reason: format!("fields describe {}", actual),
        });
    }
    Ok(())
}

/// Fail unless the referenced row exists (possibly inserted earlier in this import)
async fn require<E, C>(db: &C, record: &FixtureRecord, id: Uuid) -> Result<(), FixtureError>
where
    E: EntityTrait,
    <E::PrimaryKey as PrimaryKeyTrait>::ValueType: From<Uuid>,
    C: ConnectionTrait,
{
    if E::find_by_id(id).one(db).await?.is_some() {
        return Ok(());
    }

    Err(FixtureError::UnresolvedDependency {
        entity_type: record.entity_type,
        primary_key: record.primary_key.clone(),
        missing: format!("{} {}", E::default().table_name(), id),
    })
}

/// First writer wins: insert only when no row has this primary key
async fn insert_missing<A, K, C>(db: &C, key: K, active: A) -> Result<bool, FixtureError>
where
    A: ActiveModelTrait + Send,
    K: Into<<<A::Entity as EntityTrait>::PrimaryKey as PrimaryKeyTrait>::ValueType>,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait,
{
    if <A::Entity as EntityTrait>::find_by_id(key).one(db).await?.is_some() {
        let entity = <A::Entity as Default>::default();
        let table = entity.table_name();
        debug!(table = table, "Row exists, keeping local copy");
        return Ok(false);
    }

    <A::Entity as EntityTrait>::insert(active.reset_all())
        .exec_without_returning(db)
        .await?;
    Ok(true)
}
