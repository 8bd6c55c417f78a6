//! Store queries used by onboarding and activation
//!
//! Functions are generic over [`ConnectionTrait`] so they run the same on a
//! plain connection and inside a transaction.

use chrono::Utc;
use gatelink_db::entities::{
    channel, device, domain, domain_device, gateway, link, membership, prelude::*,
};
use gatelink_proto::fqdn::split_fqdn;
use gatelink_proto::RemoteAccess;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Find a domain by uri, creating it if missing
pub async fn get_or_create_domain<C: ConnectionTrait>(
    db: &C,
    uri: &str,
) -> Result<domain::Model, DbErr> {
    if let Some(existing) = Domain::find()
        .filter(domain::Column::Uri.eq(uri))
        .one(db)
        .await?
    {
        return Ok(existing);
    }

    let created = domain::ActiveModel {
        id: Set(Uuid::new_v4()),
        uri: Set(uri.to_string()),
    }
    .insert(db)
    .await?;

    info!(domain = %uri, "Created domain");
    Ok(created)
}

/// Find a device by name, creating it if missing
pub async fn get_or_create_device<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<device::Model, DbErr> {
    if let Some(existing) = current_device(db, name).await? {
        return Ok(existing);
    }

    let created = device::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        ssh_host: Set(None),
        ssh_port: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;

    info!(device = %name, "Created device");
    Ok(created)
}

/// The device this process runs as, identified by its configured name
pub async fn current_device<C: ConnectionTrait>(
    db: &C,
    name: &str,
) -> Result<Option<device::Model>, DbErr> {
    Device::find()
        .filter(device::Column::Name.eq(name))
        .one(db)
        .await
}

/// Look a gateway up by id or exact name
pub async fn find_gateway<C: ConnectionTrait>(
    db: &C,
    reference: &str,
) -> Result<Option<gateway::Model>, DbErr> {
    if let Ok(id) = Uuid::parse_str(reference) {
        if let Some(found) = Gateway::find_by_id(id).one(db).await? {
            return Ok(Some(found));
        }
    }

    Gateway::find()
        .filter(gateway::Column::Name.eq(reference))
        .one(db)
        .await
}

/// Link by id together with its domain
pub async fn find_link<C: ConnectionTrait>(
    db: &C,
    link_id: Uuid,
) -> Result<Option<(link::Model, domain::Model)>, DbErr> {
    let found = Link::find_by_id(link_id)
        .find_also_related(Domain)
        .one(db)
        .await?;

    Ok(found.and_then(|(link, domain)| domain.map(|d| (link, d))))
}

/// Resolve an fqdn to its link.
///
/// The domain is the longest registered uri the fqdn equals or ends with
/// (on a label boundary); the rest is the subdomain.
pub async fn resolve_link<C: ConnectionTrait>(
    db: &C,
    fqdn: &str,
) -> Result<Option<(link::Model, domain::Model)>, DbErr> {
    let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();

    let mut candidates = vec![fqdn.clone()];
    let mut rest = fqdn.as_str();
    while let Some((_, suffix)) = rest.split_once('.') {
        candidates.push(suffix.to_string());
        rest = suffix;
    }

    let mut domains = Domain::find()
        .filter(domain::Column::Uri.is_in(candidates))
        .all(db)
        .await?;
    domains.sort_by_key(|d| std::cmp::Reverse(d.uri.len()));

    for domain in domains {
        let Some(subdomain) = split_fqdn(&fqdn, &domain.uri) else {
            continue;
        };

        let link = Link::find()
            .filter(link::Column::DomainId.eq(domain.id))
            .filter(link::Column::Subdomain.eq(subdomain))
            .one(db)
            .await?;

        if let Some(link) = link {
            return Ok(Some((link, domain)));
        }
    }

    Ok(None)
}

/// Create a link under `domain_uri`, creating the domain if needed
pub async fn create_link<C: ConnectionTrait>(
    db: &C,
    domain_uri: &str,
    subdomain: &str,
    service: Option<String>,
) -> Result<(link::Model, domain::Model), DbErr> {
    let domain = get_or_create_domain(db, domain_uri).await?;

    let link = link::ActiveModel {
        id: Set(Uuid::new_v4()),
        domain_id: Set(domain.id),
        subdomain: Set(subdomain.to_string()),
        service: Set(service),
        forward_port: Set(None),
        center_port: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;

    info!(fqdn = %link.fqdn(&domain), "Created link");
    Ok((link, domain))
}

/// Persist the host ports assigned on activation
///
/// A known forwarding port is kept when the activation did not report one.
pub async fn record_ports<C: ConnectionTrait>(
    db: &C,
    link: link::Model,
    forward_port: u16,
    center_port: Option<u16>,
) -> Result<link::Model, DbErr> {
    let center_port = center_port.or(link.center_port());
    if link.forward_port() == Some(forward_port) && link.center_port() == center_port {
        return Ok(link);
    }

    let mut active: link::ActiveModel = link.into();
    active.forward_port = Set(Some(i32::from(forward_port)));
    active.center_port = Set(center_port.map(i32::from));
    let updated = active.update(db).await?;

    debug!(
        link_id = %updated.id,
        forward_port = forward_port,
        center_port = ?center_port,
        "Recorded link ports"
    );
    Ok(updated)
}

/// Set or clear the remote-shell descriptor of a device
pub async fn set_device_remote_access<C: ConnectionTrait>(
    db: &C,
    device: device::Model,
    access: Option<RemoteAccess>,
) -> Result<device::Model, DbErr> {
    let mut active: device::ActiveModel = device.into();
    active.ssh_host = Set(access.as_ref().map(|a| a.host.clone()));
    active.ssh_port = Set(access.as_ref().map(|a| i32::from(a.port)));
    active.update(db).await
}

/// Record a gateway whose process runs on a host reached over ssh
pub async fn create_remote_gateway<C: ConnectionTrait>(
    db: &C,
    name: &str,
    access: RemoteAccess,
) -> Result<gateway::Model, DbErr> {
    let created = gateway::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        ssh_host: Set(Some(access.host.clone())),
        ssh_port: Set(Some(i32::from(access.port))),
        is_replicated_store: Set(false),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await?;

    info!(gateway = %name, target = %access, "Recorded remote gateway");
    Ok(created)
}

/// Add `device_id` to a gateway; no-op if already a member. Returns whether
/// a membership was created.
pub async fn add_membership<C: ConnectionTrait>(
    db: &C,
    gateway_id: Uuid,
    device_id: Uuid,
) -> Result<bool, DbErr> {
    if Membership::find_by_id((gateway_id, device_id))
        .one(db)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    Membership::insert(membership::ActiveModel {
        gateway_id: Set(gateway_id),
        device_id: Set(device_id),
        joined_at: Set(Utc::now()),
    })
    .exec_without_returning(db)
    .await?;

    debug!(gateway_id = %gateway_id, device_id = %device_id, "Added membership");
    Ok(true)
}

/// Authorize `device_id` to serve a domain; no-op if already authorized
pub async fn authorize_device<C: ConnectionTrait>(
    db: &C,
    domain_id: Uuid,
    device_id: Uuid,
) -> Result<bool, DbErr> {
    if DomainDevice::find_by_id((domain_id, device_id))
        .one(db)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    DomainDevice::insert(domain_device::ActiveModel {
        domain_id: Set(domain_id),
        device_id: Set(device_id),
    })
    .exec_without_returning(db)
    .await?;

    debug!(domain_id = %domain_id, device_id = %device_id, "Authorized device for domain");
    Ok(true)
}

/// Every device authorized to serve a domain
pub async fn domain_devices<C: ConnectionTrait>(
    db: &C,
    domain_id: Uuid,
) -> Result<Vec<Uuid>, DbErr> {
    Ok(DomainDevice::find()
        .filter(domain_device::Column::DomainId.eq(domain_id))
        .all(db)
        .await?
        .into_iter()
        .map(|row| row.device_id)
        .collect())
}

/// Members of a gateway that are authorized to serve a domain, by name
pub async fn serving_devices<C: ConnectionTrait>(
    db: &C,
    gateway_id: Uuid,
    domain_id: Uuid,
) -> Result<Vec<device::Model>, DbErr> {
    let authorized: HashSet<Uuid> = domain_devices(db, domain_id).await?.into_iter().collect();

    let member_ids: Vec<Uuid> = Membership::find()
        .filter(membership::Column::GatewayId.eq(gateway_id))
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.device_id)
        .filter(|id| authorized.contains(id))
        .collect();

    if member_ids.is_empty() {
        return Ok(Vec::new());
    }

    Device::find()
        .filter(device::Column::Id.is_in(member_ids))
        .order_by_asc(device::Column::Name)
        .all(db)
        .await
}

/// Serving members that can be reached over a remote shell
pub async fn remote_shell_devices<C: ConnectionTrait>(
    db: &C,
    gateway_id: Uuid,
    domain_id: Uuid,
) -> Result<Vec<(device::Model, RemoteAccess)>, DbErr> {
    Ok(serving_devices(db, gateway_id, domain_id)
        .await?
        .into_iter()
        .filter_map(|device| {
            let access = device.remote_access()?;
            Some((device, access))
        })
        .collect())
}

/// Task channels configured for a gateway, best priority first
pub async fn gateway_channels<C: ConnectionTrait>(
    db: &C,
    gateway_id: Uuid,
) -> Result<Vec<channel::Model>, DbErr> {
    Channel::find()
        .filter(channel::Column::GatewayId.eq(gateway_id))
        .order_by_asc(channel::Column::Priority)
        .all(db)
        .await
}
