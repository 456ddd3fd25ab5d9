//! Database layer for CardForge
//!
//! Provides:
//! - SeaORM entity models
//! - The narrow `Store` interface the services depend on
//! - Postgres repository and in-memory implementations
//! - Connection pool management

pub mod models;
mod memory;
mod repository;
mod store;

pub use memory::{InMemoryStore, StoreOp};
pub use repository::Repository;
pub use store::{
    FlashcardChanges, FlashcardPage, NewFlashcard, NewGeneration, NewGenerationErrorLog, Store,
};

use crate::config::{AppConfig, DatabaseConfig};
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::database_connection("Failed to connect to primary", &e))?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");

            let replica_conn = Database::connect(connect_options(read_url, config))
                .await
                .map_err(|e| AppError::database_connection("Failed to connect to replica", &e))?;

            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::database_connection("Primary ping failed", &e))?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::database_connection("Replica ping failed", &e))?;
        }

        Ok(())
    }
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(true);
    opts
}

/// Build the store selected by configuration
pub async fn create_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    if config.uses_memory_store() {
        tracing::warn!("Using in-memory store; data is lost on restart");
        return Ok(Arc::new(InMemoryStore::new()));
    }

    let pool = DbPool::new(&config.database).await?;
    Ok(Arc::new(Repository::new(pool)))
}
