//! Persistence layer for gateways, devices, domains and links
//!
//! Supports multiple backends:
//! - **SQLite3** (default, one file per device: `sqlite://~/.gatelink/gatelink.db?mode=rwc`)
//! - **SQLite3 in-memory** (tests: `"sqlite::memory:"`)
//! - **PostgreSQL** (shared deployments)
//!
//! Each device owns its own store. Stores are brought in sync through
//! fixture exchange, not through this crate.

pub mod entities;
pub mod migrator;

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr};
use tracing::info;

/// Initialize database connection
///
/// # Examples
/// - Device store: `"sqlite://./gatelink.db?mode=rwc"`
/// - Tests: `"sqlite::memory:"`
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    let backend = db.get_database_backend();
    info!("Connected to database backend: {:?}", backend);

    Ok(db)
}

/// Run migrations
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm_migration::MigratorTrait;

    info!("Running database migrations...");
    migrator::Migrator::up(db, None).await?;
    info!("Database migrations completed");

    Ok(())
}
