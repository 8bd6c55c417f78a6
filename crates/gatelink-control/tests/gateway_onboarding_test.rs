//! Integration tests for gateway registration and initialization

use gatelink_control::{gateway_container_name, store, GatewayError, GatewayService};
use gatelink_db::entities::{membership, prelude::*};
use gatelink_db::{connect, migrate};
use gatelink_runtime::testing::FakeRuntime;
use gatelink_runtime::{RuntimeSettings, TunnelManager, GATEWAY_LABEL};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use std::sync::Arc;

async fn setup() -> (DatabaseConnection, Arc<FakeRuntime>, GatewayService) {
    let db = connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");
    migrate(&db).await.expect("Failed to run migrations");

    let runtime = Arc::new(FakeRuntime::new());
    let manager = Arc::new(TunnelManager::new(runtime.clone(), RuntimeSettings::default()));
    let service = GatewayService::new(db.clone(), manager, "laptop");

    (db, runtime, service)
}

#[tokio::test]
async fn test_register_requires_current_device() {
    let (_db, _runtime, service) = setup().await;

    let err = service
        .register_gateway("edge", "example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NoCurrentDevice(name) if name == "laptop"));
}

#[tokio::test]
async fn test_register_is_idempotent_and_fans_out() {
    let (db, _runtime, service) = setup().await;
    let laptop = store::get_or_create_device(&db, "laptop").await.unwrap();

    // Another device already serves the domain before the gateway exists
    let builder = store::get_or_create_device(&db, "builder").await.unwrap();
    let domain = store::get_or_create_domain(&db, "example.com").await.unwrap();
    store::authorize_device(&db, domain.id, builder.id)
        .await
        .unwrap();

    let gateway = service
        .register_gateway("edge", "example.com")
        .await
        .unwrap();
    assert!(gateway.name.starts_with("edge-"));
    assert_eq!(gateway.name.len(), "edge-".len() + 8);

    let again = service
        .register_gateway("edge", "example.com")
        .await
        .unwrap();
    assert_eq!(again.id, gateway.id);

    let members: Vec<_> = Membership::find()
        .filter(membership::Column::GatewayId.eq(gateway.id))
        .all(&db)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.device_id)
        .collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&laptop.id));
    assert!(members.contains(&builder.id));

    let serving = store::serving_devices(&db, gateway.id, domain.id)
        .await
        .unwrap();
    assert_eq!(serving.len(), 2);
    assert_eq!(Gateway::find().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_init_launches_labelled_gateway() {
    let (db, runtime, service) = setup().await;
    store::get_or_create_device(&db, "laptop").await.unwrap();

    let gateway = service.init_gateway("edge", "example.com").await.unwrap();

    let spec = runtime
        .container(&gateway_container_name(&gateway))
        .expect("gateway container should exist");
    assert_eq!(spec.labels[GATEWAY_LABEL], gateway.id.to_string());
    assert_eq!(runtime.bound_ports(), vec![80, 443]);

    let err = service
        .init_gateway("edge", "example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_init_refuses_busy_port() {
    let (db, runtime, service) = setup().await;
    store::get_or_create_device(&db, "laptop").await.unwrap();
    runtime.occupy_port(80);

    let err = service
        .init_gateway("edge", "example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::PortAlreadyAllocated(80)));

    // Nothing registered when the pre-flight check fails
    assert_eq!(Gateway::find().count(&db).await.unwrap(), 0);
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn test_launch_existing_gateway() {
    let (db, runtime, service) = setup().await;
    store::get_or_create_device(&db, "laptop").await.unwrap();
    let gateway = service
        .register_gateway("edge", "example.com")
        .await
        .unwrap();

    service.launch_gateway(&gateway.name).await.unwrap();
    assert_eq!(runtime.running(), vec![gateway_container_name(&gateway)]);

    // Relaunch replaces the running process
    service.launch_gateway(&gateway.id.to_string()).await.unwrap();
    assert_eq!(runtime.running().len(), 1);

    let err = service.launch_gateway("missing").await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}
