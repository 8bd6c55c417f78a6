//! Gateway onboarding: registration, initialization and (re)launch

use crate::error::GatewayError;
use crate::store;
use chrono::Utc;
use gatelink_db::entities::{gateway, prelude::Gateway};
use gatelink_proto::{ProtoError, HTTPS_GATEWAY_PORT, HTTP_GATEWAY_PORT};
use gatelink_runtime::{PortProbe, TunnelManager};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Container name of a gateway's public process
pub fn gateway_container_name(gateway: &gateway::Model) -> String {
    format!("gatelink-gateway-{}", gateway.name)
}

/// Gateway lifecycle on the current device
pub struct GatewayService {
    db: DatabaseConnection,
    manager: Arc<TunnelManager>,
    probe: PortProbe,
    /// Name of the device this process runs as
    device_name: String,
}

impl GatewayService {
    pub fn new(
        db: DatabaseConnection,
        manager: Arc<TunnelManager>,
        device_name: impl Into<String>,
    ) -> Self {
        let probe = PortProbe::new(manager.runtime(), manager.settings().probe_image.clone());
        Self {
            db,
            manager,
            probe,
            device_name: device_name.into(),
        }
    }

    /// Find or create a gateway for `name` and attach `fqdn` to it.
    ///
    /// A new gateway is named `{name}-{8 hex}` and gets the current device as
    /// member. The domain is authorized for the current device, and every
    /// device already serving it joins the gateway. Running this twice
    /// changes nothing the second time.
    pub async fn register_gateway(
        &self,
        name: &str,
        fqdn: &str,
    ) -> Result<gateway::Model, GatewayError> {
        let fqdn = normalize_fqdn(fqdn)?;
        let txn = self.db.begin().await?;

        let device = store::current_device(&txn, &self.device_name)
            .await?
            .ok_or_else(|| GatewayError::NoCurrentDevice(self.device_name.clone()))?;

        let gateway = match find_by_name_fragment(&txn, name).await? {
            Some(existing) => existing,
            None => {
                let created = gateway::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    name: Set(format!("{}-{}", name, short_suffix())),
                    ssh_host: Set(None),
                    ssh_port: Set(None),
                    is_replicated_store: Set(false),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;

                info!(gateway = %created.name, device = %device.name, "Created gateway");
                created
            }
        };

        store::add_membership(&txn, gateway.id, device.id).await?;

        let domain = store::get_or_create_domain(&txn, &fqdn).await?;
        store::authorize_device(&txn, domain.id, device.id).await?;

        for device_id in store::domain_devices(&txn, domain.id).await? {
            if store::add_membership(&txn, gateway.id, device_id).await? {
                info!(gateway = %gateway.name, device_id = %device_id, "Added serving device to gateway");
            }
        }

        txn.commit().await?;
        Ok(gateway)
    }

    /// Set up a brand new gateway on this host: check the public ports,
    /// register it and start its public process.
    pub async fn init_gateway(&self, name: &str, fqdn: &str) -> Result<gateway::Model, GatewayError> {
        normalize_fqdn(fqdn)?;

        if store::current_device(&self.db, &self.device_name)
            .await?
            .is_none()
        {
            return Err(GatewayError::NoCurrentDevice(self.device_name.clone()));
        }

        if let Some(existing) = find_by_name_fragment(&self.db, name).await? {
            return Err(GatewayError::AlreadyExists(existing.name));
        }

        // Racy against the bind below, acceptable for a one-off operator action
        self.probe
            .check_all(&[HTTP_GATEWAY_PORT, HTTPS_GATEWAY_PORT])
            .await?;

        let gateway = self.register_gateway(name, fqdn).await?;
        self.start(&gateway).await?;

        info!(gateway = %gateway.name, fqdn = %fqdn, "Gateway initialized");
        Ok(gateway)
    }

    /// Relaunch the public process of an existing gateway
    pub async fn launch_gateway(&self, reference: &str) -> Result<gateway::Model, GatewayError> {
        let gateway = store::find_gateway(&self.db, reference)
            .await?
            .ok_or_else(|| GatewayError::NotFound(reference.to_string()))?;

        self.start(&gateway).await?;
        Ok(gateway)
    }

    async fn start(&self, gateway: &gateway::Model) -> Result<(), GatewayError> {
        self.manager
            .launch_gateway(&gateway.id.to_string(), &gateway_container_name(gateway))
            .await?;
        Ok(())
    }
}

/// Oldest gateway whose name contains `fragment`
async fn find_by_name_fragment<C: ConnectionTrait>(
    db: &C,
    fragment: &str,
) -> Result<Option<gateway::Model>, GatewayError> {
    Ok(Gateway::find()
        .filter(gateway::Column::Name.contains(fragment))
        .order_by_asc(gateway::Column::CreatedAt)
        .one(db)
        .await?)
}

fn normalize_fqdn(fqdn: &str) -> Result<String, ProtoError> {
    let fqdn = fqdn.trim().trim_end_matches('.').to_ascii_lowercase();
    let valid = !fqdn.is_empty()
        && fqdn.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        });

    if valid {
        Ok(fqdn)
    } else {
        Err(ProtoError::InvalidFqdn(fqdn))
    }
}

fn short_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_fqdn() {
        assert_eq!(normalize_fqdn("Example.COM.").unwrap(), "example.com");
        assert_eq!(normalize_fqdn("localhost").unwrap(), "localhost");
        assert!(normalize_fqdn("").is_err());
        assert!(normalize_fqdn("bad..example.com").is_err());
        assert!(normalize_fqdn("-bad.example.com").is_err());
        assert!(normalize_fqdn("under_score.example.com").is_err());
    }

    #[test]
    fn test_short_suffix_is_hex() {
        let suffix = short_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
