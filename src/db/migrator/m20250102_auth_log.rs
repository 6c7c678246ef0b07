use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuthLog::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuthLog::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuthLog::IdentityId).integer().null())
                    .col(ColumnDef::new(AuthLog::DeviceId).integer().null())
                    .col(ColumnDef::new(AuthLog::Username).string().not_null())
                    .col(ColumnDef::new(AuthLog::DeviceAddress).string().null())
                    .col(ColumnDef::new(AuthLog::Outcome).string().not_null())
                    .col(ColumnDef::new(AuthLog::Factor).string().null())
                    .col(ColumnDef::new(AuthLog::Detail).text().null())
                    .col(ColumnDef::new(AuthLog::CreatedAt).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_auth_log_identity_id")
                            .from(AuthLog::Table, AuthLog::IdentityId)
                            .to(Identities::Table, Identities::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_auth_log_device_id")
                            .from(AuthLog::Table, AuthLog::DeviceId)
                            .to(Devices::Table, Devices::Id)
                            .on_delete(ForeignKeyAction::SetNull)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_auth_log_identity")
                    .table(AuthLog::Table)
                    .col(AuthLog::IdentityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_auth_log_created_at")
                    .table(AuthLog::Table)
                    .col(AuthLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuthLog::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuthLog {
    Table,
    Id,
    IdentityId,
    DeviceId,
    Username,
    DeviceAddress,
    Outcome,
    Factor,
    Detail,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Identities {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    Id,
}
