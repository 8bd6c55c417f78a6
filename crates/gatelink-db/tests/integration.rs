//! Integration tests for gatelink-db
//!
//! Tests database operations with real SQLite in-memory database

use chrono::Utc;
use gatelink_db::entities::{device, domain, gateway, link, membership};
use gatelink_db::{connect, migrate};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, Set};
use uuid::Uuid;

/// Helper to create a test database
async fn setup_test_db() -> sea_orm::DatabaseConnection {
    let db = connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");

    migrate(&db).await.expect("Failed to run migrations");

    db
}

async fn insert_domain(db: &sea_orm::DatabaseConnection, uri: &str) -> domain::Model {
    domain::ActiveModel {
        id: Set(Uuid::new_v4()),
        uri: Set(uri.to_string()),
    }
    .insert(db)
    .await
    .expect("Failed to insert domain")
}

async fn insert_link(
    db: &sea_orm::DatabaseConnection,
    domain_id: Uuid,
    subdomain: &str,
) -> Result<link::Model, sea_orm::DbErr> {
    link::ActiveModel {
        id: Set(Uuid::new_v4()),
        domain_id: Set(domain_id),
        subdomain: Set(subdomain.to_string()),
        service: Set(Some("app:8080".to_string())),
        forward_port: Set(None),
        center_port: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
}

#[tokio::test]
async fn test_migrations_run_successfully() {
    let db = connect("sqlite::memory:").await.expect("Failed to connect");

    let result = migrate(&db).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_link_fqdn_follows_domain() {
    let db = setup_test_db().await;
    let example = insert_domain(&db, "example.com").await;

    let apex = insert_link(&db, example.id, "").await.unwrap();
    let api = insert_link(&db, example.id, "api").await.unwrap();

    assert_eq!(apex.fqdn(&example), "example.com");
    assert_eq!(api.fqdn(&example), "api.example.com");
}

#[tokio::test]
async fn test_domain_subdomain_pair_is_unique() {
    let db = setup_test_db().await;
    let example = insert_domain(&db, "example.com").await;

    insert_link(&db, example.id, "api").await.unwrap();
    let duplicate = insert_link(&db, example.id, "api").await;

    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_domain_uri_is_unique() {
    let db = setup_test_db().await;
    insert_domain(&db, "example.com").await;

    let duplicate = domain::ActiveModel {
        id: Set(Uuid::new_v4()),
        uri: Set("example.com".to_string()),
    }
    .insert(&db)
    .await;

    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_forward_port_persisted_once() {
    let db = setup_test_db().await;
    let example = insert_domain(&db, "example.com").await;
    let created = insert_link(&db, example.id, "").await.unwrap();
    assert_eq!(created.forward_port(), None);

    let mut active: link::ActiveModel = created.into();
    active.forward_port = Set(Some(40123));
    let updated = active.update(&db).await.unwrap();

    assert_eq!(updated.forward_port(), Some(40123));
    assert_eq!(updated.center_port(), None);

    let mut active: link::ActiveModel = updated.into();
    active.center_port = Set(Some(40124));
    let updated = active.update(&db).await.unwrap();

    assert_eq!(updated.forward_port(), Some(40123));
    assert_eq!(updated.center_port(), Some(40124));
}

#[tokio::test]
async fn test_membership_links_gateway_and_device() {
    let db = setup_test_db().await;

    let device = device::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("edge-1".to_string()),
        ssh_host: Set(Some("1.2.3.4".to_string())),
        ssh_port: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(&db)
    .await
    .unwrap();

    let gateway = gateway::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("gateway-1".to_string()),
        ssh_host: Set(None),
        ssh_port: Set(None),
        is_replicated_store: Set(false),
        created_at: Set(Utc::now()),
    }
    .insert(&db)
    .await
    .unwrap();

    membership::ActiveModel {
        gateway_id: Set(gateway.id),
        device_id: Set(device.id),
        joined_at: Set(Utc::now()),
    }
    .insert(&db)
    .await
    .unwrap();

    let members = gateway
        .find_related(membership::Entity)
        .all(&db)
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].device_id, device.id);

    // Host without port defaults to 22
    let access = device.remote_access().expect("device should be reachable");
    assert_eq!(access.host, "1.2.3.4");
    assert_eq!(access.port, 22);
    assert!(gateway.remote_access().is_none());

    let found = device::Entity::find()
        .filter(device::Column::Name.eq("edge-1"))
        .one(&db)
        .await
        .unwrap();
    assert!(found.is_some());
}
