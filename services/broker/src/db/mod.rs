//! Registry layer for the broker.
//!
//! This module provides:
//! - Connection pool management
//! - The abstract [`Registry`] interface the lifecycle core talks to
//! - A Postgres implementation ([`postgres::PgRegistry`])
//! - An in-memory implementation ([`memory::MemoryRegistry`]) for tests and
//!   local runs
//!
//! The database layer uses SQLx with Postgres.

mod error;
pub mod memory;
pub mod postgres;

pub use error::DbError;

use async_trait::async_trait;
use chrono::Utc;
use mdsb_id::ResourceId;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::model::{ClaimFilter, ClaimRecord, ClaimStatus, ResourceRecord, ResourceStatus};

/// Durable store of physical resources and the logical instances that
/// reference them.
///
/// Implementations persist the secret resource fields encrypted; records
/// cross this interface with plaintext secrets in memory only.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn insert_resource(&self, resource: &ResourceRecord) -> Result<(), DbError>;
    async fn update_resource(&self, resource: &ResourceRecord) -> Result<(), DbError>;
    async fn get_resource(&self, id: ResourceId) -> Result<Option<ResourceRecord>, DbError>;

    /// Inserts a claim and returns its registry-assigned row id.
    async fn insert_claim(&self, claim: &ClaimRecord) -> Result<i64, DbError>;
    async fn update_claim(&self, claim: &ClaimRecord) -> Result<(), DbError>;
    async fn find_claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, DbError>;
    /// Removes the claim with the given caller-supplied instance id.
    /// Removing an absent claim is not an error.
    async fn delete_claim(&self, instance_id: &str) -> Result<(), DbError>;

    /// Number of claims currently referencing the resource.
    async fn count_references(&self, resource_id: ResourceId) -> Result<i64, DbError>;

    /// Flips the status of every claim referencing the resource, across all
    /// foundations. Used at terminal create transitions.
    async fn set_claim_status_for_resource(
        &self,
        resource_id: ResourceId,
        status: ClaimStatus,
    ) -> Result<(), DbError>;

    /// Convenience lookup by caller-supplied instance id.
    async fn get_claim(&self, instance_id: &str) -> Result<Option<ClaimRecord>, DbError> {
        let claims = self
            .find_claims(&ClaimFilter::by_instance_id(instance_id))
            .await?;
        Ok(claims.into_iter().next())
    }

    /// Advances a resource's status, message, and status timestamp.
    async fn update_resource_status(
        &self,
        id: ResourceId,
        status: ResourceStatus,
        message: &str,
    ) -> Result<(), DbError> {
        if let Some(mut resource) = self.get_resource(id).await? {
            resource.status = status;
            resource.last_status_update = Utc::now();
            resource.last_message = message.to_string();
            self.update_resource(&resource).await?;
        }
        Ok(())
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/mdsb".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/mdsb".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Run pending migrations.
    ///
    /// Note: In production, migrations should be run via a separate migration
    /// tool or as part of deployment. This method uses runtime migration
    /// loading.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/broker/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }
}
