//! Database connection management

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use temps_core::{ServiceError, ServiceResult};
use temps_migrations::{Migrator, MigratorTrait};
use tracing::debug;

pub type DbConnection = DatabaseConnection;

/// Connect to the registry database and run pending migrations.
///
/// In-memory SQLite urls get a single pinned connection, since every
/// pooled connection would otherwise open its own empty database.
pub async fn establish_connection(database_url: &str) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(database_url);
    if database_url.contains(":memory:") {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(100).min_connections(5);
    }
    opt.sqlx_logging(false);

    establish_connection_with(opt).await
}

/// Connect with explicit options and run pending migrations.
pub async fn establish_connection_with(opt: ConnectOptions) -> ServiceResult<Arc<DbConnection>> {
    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    // Run migrations
    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;
    debug!("Registry migrations applied");

    Ok(Arc::new(db))
}
