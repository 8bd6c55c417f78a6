//! Migration to track applied fixture envelopes so replays are no-ops

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FixtureTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FixtureTransactions::TransactionId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FixtureTransactions::AppliedRecords)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(FixtureTransactions::AppliedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FixtureTransactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum FixtureTransactions {
    Table,
    TransactionId,
    AppliedRecords,
    AppliedAt,
}
