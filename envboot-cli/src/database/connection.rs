//! Database connection management with SQLx
//!
//! Opens the SQLite pool backing the document store and applies the catalog
//! migrations.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::StoreError;

/// Database configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
    pub bcrypt_cost: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./envboot.db".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 30,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a throwaway in-memory database
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults.database_url.clone());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.max_connections);

        let connection_timeout_seconds = std::env::var("DATABASE_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.connection_timeout_seconds);

        let bcrypt_cost = std::env::var("ENVBOOT_BCRYPT_COST")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.bcrypt_cost);

        Self {
            database_url,
            max_connections,
            connection_timeout_seconds,
            bcrypt_cost,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

/// Open the connection pool and run the catalog migrations
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, StoreError> {
    if !config.database_url.starts_with("sqlite:") {
        return Err(StoreError::UnsupportedUrl(config.database_url.clone()));
    }

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(StoreError::Connect)?
        .create_if_missing(true);

    // every connection to :memory: opens a separate database
    let max_connections = if config.is_in_memory() {
        1
    } else {
        config.max_connections.max(1)
    };

    info!(
        "Creating SQLite connection pool with {} max connections",
        max_connections
    );

    let mut pool_options = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
    if config.is_in_memory() {
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .map_err(StoreError::Connect)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(StoreError::Migrate)?;

    info!("SQLite connection pool created successfully");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_config() {
        let config = DatabaseConfig::in_memory();
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
        assert!(!DatabaseConfig::default().is_in_memory());
    }

    #[tokio::test]
    async fn test_rejects_non_sqlite_url() {
        let config = DatabaseConfig {
            database_url: "mongodb://localhost:27017".to_string(),
            ..DatabaseConfig::default()
        };
        let result = connect(&config).await;
        assert!(matches!(result, Err(StoreError::UnsupportedUrl(_))));
    }

    #[tokio::test]
    async fn test_connect_runs_migrations() {
        let pool = connect(&DatabaseConfig::in_memory()).await.unwrap();
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'envboot_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 4);
    }
}
