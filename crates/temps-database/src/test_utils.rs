//! Test utilities for database integration tests
//!
//! `TestDatabase::new()` gives every test its own migrated in-memory SQLite
//! database, so tests can run in parallel without any shared state.
//! `TestDatabase::postgres()` starts a dedicated PostgreSQL container for
//! tests that must exercise the production backend.

use crate::DbConnection;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use temps_migrations::Migrator;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};

/// Test database setup
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
    pub database_url: String,
    /// Container backing a Postgres test database, kept alive with it
    #[allow(dead_code)]
    container: Option<ContainerAsync<GenericImage>>,
}

impl TestDatabase {
    /// Create a fresh, migrated in-memory SQLite database
    pub async fn new() -> anyhow::Result<Self> {
        let database_url = "sqlite::memory:".to_string();

        let mut opt = ConnectOptions::new(database_url.clone());
        opt.max_connections(1)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(3600))
            .max_lifetime(Duration::from_secs(3600))
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Migrator::up(&db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(Self {
            db: Arc::new(db),
            database_url,
            container: None,
        })
    }

    /// Create a migrated PostgreSQL database in a dedicated container
    pub async fn postgres() -> anyhow::Result<Self> {
        let db_name = "test_db";
        let username = "test_user";
        let password = "test_password";

        let postgres_container = GenericImage::new("postgres", "17-alpine")
            .with_env_var("POSTGRES_DB", db_name)
            .with_env_var("POSTGRES_USER", username)
            .with_env_var("POSTGRES_PASSWORD", password)
            .with_env_var("POSTGRES_HOST_AUTH_METHOD", "trust")
            .start()
            .await?;

        let port = postgres_container.get_host_port_ipv4(5432).await?;
        let database_url = format!(
            "postgresql://{}:{}@localhost:{}/{}",
            username, password, port, db_name
        );

        let db = Self::connect_with_retry(&database_url, 10).await?;
        Migrator::up(&db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(Self {
            db: Arc::new(db),
            database_url,
            container: Some(postgres_container),
        })
    }

    /// Connect to database with retry logic
    async fn connect_with_retry(
        database_url: &str,
        max_retries: u32,
    ) -> anyhow::Result<DbConnection> {
        let mut retries = max_retries;

        let mut opt = ConnectOptions::new(database_url.to_owned());
        opt.max_connections(5)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        loop {
            match Database::connect(opt.clone()).await {
                Ok(db) => {
                    let test = Statement::from_string(db.get_database_backend(), "SELECT 1".to_owned());
                    match db.execute(test).await {
                        Ok(_) => return Ok(db),
                        Err(e) if retries == 0 => {
                            return Err(anyhow::anyhow!("Database connected but not responsive: {}", e));
                        }
                        Err(_) => {}
                    }
                }
                Err(e) if retries == 0 => {
                    return Err(anyhow::anyhow!(
                        "Failed to connect to database after {} retries: {}",
                        max_retries,
                        e
                    ));
                }
                Err(_) => {}
            }

            retries -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Get a clone of the shared connection handle
    pub fn connection(&self) -> Arc<DbConnection> {
        Arc::clone(&self.db)
    }

    /// Execute raw SQL query for testing
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<ExecResult> {
        let statement = Statement::from_string(self.db.get_database_backend(), sql.to_owned());
        let result = self.db.execute(statement).await.map_err(anyhow::Error::from)?;
        Ok(result)
    }

    /// Query raw SQL and return results
    pub async fn query_sql(&self, sql: &str) -> anyhow::Result<Vec<QueryResult>> {
        let statement = Statement::from_string(self.db.get_database_backend(), sql.to_owned());
        let result = self.db.query_all(statement).await.map_err(anyhow::Error::from)?;
        Ok(result)
    }
}
