use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use sea_orm_migration::MigratorTrait;

use temps_migrations::Migrator;

async fn memory_db() -> anyhow::Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    Ok(Database::connect(opt).await?)
}

async fn table_exists(db: &DatabaseConnection, table: &str) -> anyhow::Result<bool> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            format!(
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = '{}'",
                table
            ),
        ))
        .await?;
    let count: i64 = row
        .map(|r| r.try_get::<i64>("", "count"))
        .transpose()?
        .unwrap_or(0);
    Ok(count == 1)
}

/// Test that migrations can be applied successfully
#[tokio::test]
async fn test_migration_up() -> anyhow::Result<()> {
    let db = memory_db().await?;

    Migrator::up(&db, None).await?;

    assert!(table_exists(&db, "managed_networks").await?);
    assert!(table_exists(&db, "resource_networks").await?);
    Ok(())
}

/// Test that migrations can be rolled back and reapplied
#[tokio::test]
async fn test_migration_down_and_up() -> anyhow::Result<()> {
    let db = memory_db().await?;

    Migrator::up(&db, None).await?;
    Migrator::down(&db, None).await?;
    assert!(!table_exists(&db, "managed_networks").await?);

    Migrator::up(&db, None).await?;
    assert!(table_exists(&db, "managed_networks").await?);
    Ok(())
}

/// The (docker_network_name, server_id) pair must be unique
#[tokio::test]
async fn test_unique_network_name_per_server() -> anyhow::Result<()> {
    let db = memory_db().await?;
    Migrator::up(&db, None).await?;

    let insert = |uuid: &str, server_id: i32| {
        format!(
            "INSERT INTO managed_networks (uuid, name, docker_network_name, server_id, team_id, scope, options, labels) \
             VALUES ('{}', 'n', 'temps-shared-abc', {}, 1, 'shared', '{{}}', '{{}}')",
            uuid, server_id
        )
    };

    db.execute(Statement::from_string(
        db.get_database_backend(),
        insert("00000000-0000-0000-0000-000000000001", 1),
    ))
    .await?;
    // Same name on a different server is fine
    db.execute(Statement::from_string(
        db.get_database_backend(),
        insert("00000000-0000-0000-0000-000000000002", 2),
    ))
    .await?;

    let duplicate = db
        .execute(Statement::from_string(
            db.get_database_backend(),
            insert("00000000-0000-0000-0000-000000000003", 1),
        ))
        .await;
    assert!(duplicate.is_err());
    Ok(())
}
