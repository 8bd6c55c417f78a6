//! Initial schema: devices, domains, gateways, links and their join tables

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ============================================================
        // 1. devices
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Devices::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Devices::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Devices::SshHost).string_len(255).null())
                    .col(ColumnDef::new(Devices::SshPort).integer().null())
                    .col(
                        ColumnDef::new(Devices::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 2. domains
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Domains::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Domains::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Domains::Uri)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 3. domain_devices (which devices may serve a domain)
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(DomainDevices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DomainDevices::DomainId).uuid().not_null())
                    .col(ColumnDef::new(DomainDevices::DeviceId).uuid().not_null())
                    .primary_key(
                        Index::create()
                            .col(DomainDevices::DomainId)
                            .col(DomainDevices::DeviceId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_domain_devices_domain_id")
                            .from(DomainDevices::Table, DomainDevices::DomainId)
                            .to(Domains::Table, Domains::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_domain_devices_device_id")
                            .from(DomainDevices::Table, DomainDevices::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 4. gateways
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Gateways::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Gateways::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Gateways::Name)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Gateways::SshHost).string_len(255).null())
                    .col(ColumnDef::new(Gateways::SshPort).integer().null())
                    .col(
                        ColumnDef::new(Gateways::IsReplicatedStore)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Gateways::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 5. memberships (device joined to gateway)
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Memberships::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Memberships::GatewayId).uuid().not_null())
                    .col(ColumnDef::new(Memberships::DeviceId).uuid().not_null())
                    .col(
                        ColumnDef::new(Memberships::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(Memberships::GatewayId)
                            .col(Memberships::DeviceId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_memberships_gateway_id")
                            .from(Memberships::Table, Memberships::GatewayId)
                            .to(Gateways::Table, Gateways::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_memberships_device_id")
                            .from(Memberships::Table, Memberships::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 6. links
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Links::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Links::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Links::DomainId).uuid().not_null())
                    .col(
                        ColumnDef::new(Links::Subdomain)
                            .string_len(255)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Links::Service).string_len(255).null())
                    .col(ColumnDef::new(Links::ForwardPort).integer().null())
                    .col(
                        ColumnDef::new(Links::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_links_domain_id")
                            .from(Links::Table, Links::DomainId)
                            .to(Domains::Table, Domains::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_links_domain_subdomain")
                    .table(Links::Table)
                    .col(Links::DomainId)
                    .col(Links::Subdomain)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 7. credentials
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Credentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credentials::DeviceId).uuid().not_null())
                    .col(
                        ColumnDef::new(Credentials::Username)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Credentials::Secret).text().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_credentials_device_id")
                            .from(Credentials::Table, Credentials::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 8. channels
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Channels::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Channels::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Channels::GatewayId).uuid().not_null())
                    .col(ColumnDef::new(Channels::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Channels::Endpoint).string_len(512).not_null())
                    .col(
                        ColumnDef::new(Channels::Priority)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_channels_gateway_id")
                            .from(Channels::Table, Channels::GatewayId)
                            .to(Gateways::Table, Gateways::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Channels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Credentials::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Links::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Memberships::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Gateways::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DomainDevices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Domains::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
    Name,
    SshHost,
    SshPort,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Domains {
    Table,
    Id,
    Uri,
}

#[derive(DeriveIden)]
enum DomainDevices {
    Table,
    DomainId,
    DeviceId,
}

#[derive(DeriveIden)]
enum Gateways {
    Table,
    Id,
    Name,
    SshHost,
    SshPort,
    IsReplicatedStore,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Memberships {
    Table,
    GatewayId,
    DeviceId,
    JoinedAt,
}

#[derive(DeriveIden)]
enum Links {
    Table,
    Id,
    DomainId,
    Subdomain,
    Service,
    ForwardPort,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Credentials {
    Table,
    Id,
    DeviceId,
    Username,
    Secret,
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
    GatewayId,
    Name,
    Endpoint,
    Priority,
}
