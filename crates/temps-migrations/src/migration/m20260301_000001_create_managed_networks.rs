use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========================================
        // MANAGED_NETWORKS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(ManagedNetworks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ManagedNetworks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ManagedNetworks::Uuid).uuid().not_null())
                    .col(
                        ColumnDef::new(ManagedNetworks::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::DockerNetworkName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ManagedNetworks::ServerId).integer().not_null())
                    .col(ColumnDef::new(ManagedNetworks::TeamId).integer().not_null())
                    .col(
                        ColumnDef::new(ManagedNetworks::Driver)
                            .string_len(20)
                            .not_null()
                            .default("bridge"),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::Scope)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ManagedNetworks::ProjectId).integer().null())
                    .col(ColumnDef::new(ManagedNetworks::EnvironmentId).integer().null())
                    .col(ColumnDef::new(ManagedNetworks::Subnet).string_len(64).null())
                    .col(ColumnDef::new(ManagedNetworks::Gateway).string_len(64).null())
                    .col(
                        ColumnDef::new(ManagedNetworks::IsInternal)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::IsAttachable)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::IsProxyNetwork)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::IsEncryptedOverlay)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(ManagedNetworks::Options).json().not_null())
                    .col(ColumnDef::new(ManagedNetworks::Labels).json().not_null())
                    .col(ColumnDef::new(ManagedNetworks::DockerId).string_len(128).null())
                    .col(
                        ColumnDef::new(ManagedNetworks::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ManagedNetworks::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(ManagedNetworks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ManagedNetworks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Concurrent find-or-create relies on this constraint
        manager
            .create_index(
                Index::create()
                    .name("idx_managed_networks_name_server")
                    .table(ManagedNetworks::Table)
                    .col(ManagedNetworks::DockerNetworkName)
                    .col(ManagedNetworks::ServerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_managed_networks_uuid")
                    .table(ManagedNetworks::Table)
                    .col(ManagedNetworks::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_managed_networks_server_status")
                    .table(ManagedNetworks::Table)
                    .col(ManagedNetworks::ServerId)
                    .col(ManagedNetworks::Status)
                    .to_owned(),
            )
            .await?;

        // ========================================
        // RESOURCE_NETWORKS TABLE
        // ========================================
        manager
            .create_table(
                Table::create()
                    .table(ResourceNetworks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ResourceNetworks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::ResourceType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::ResourceId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::ManagedNetworkId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ResourceNetworks::Aliases).json().not_null())
                    .col(
                        ColumnDef::new(ResourceNetworks::Ipv4Address)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::IsAutoAttached)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::IsConnected)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::ConnectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ResourceNetworks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resource_networks_managed_network")
                            .from(ResourceNetworks::Table, ResourceNetworks::ManagedNetworkId)
                            .to(ManagedNetworks::Table, ManagedNetworks::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_resource_networks_unique_attachment")
                    .table(ResourceNetworks::Table)
                    .col(ResourceNetworks::ResourceType)
                    .col(ResourceNetworks::ResourceId)
                    .col(ResourceNetworks::ManagedNetworkId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_resource_networks_network")
                    .table(ResourceNetworks::Table)
                    .col(ResourceNetworks::ManagedNetworkId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ResourceNetworks::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(ManagedNetworks::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum ManagedNetworks {
    Table,
    Id,
    Uuid,
    Name,
    DockerNetworkName,
    ServerId,
    TeamId,
    Driver,
    Scope,
    ProjectId,
    EnvironmentId,
    Subnet,
    Gateway,
    IsInternal,
    IsAttachable,
    IsProxyNetwork,
    IsEncryptedOverlay,
    Options,
    Labels,
    DockerId,
    Status,
    LastSyncedAt,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ResourceNetworks {
    Table,
    Id,
    ResourceType,
    ResourceId,
    ManagedNetworkId,
    Aliases,
    Ipv4Address,
    IsAutoAttached,
    IsConnected,
    ConnectedAt,
    CreatedAt,
    UpdatedAt,
}
