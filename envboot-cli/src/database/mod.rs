//! Bundled SQLite document store
//!
//! Hosts principals, collections with validators, indexes and JSON documents
//! in one SQLite file, namespaced per logical database, so profiles can be
//! applied without an external server.

pub mod connection;
pub mod store;

use thiserror::Error;

pub use connection::{connect, DatabaseConfig};
pub use store::{SqliteConnector, SqliteDocumentStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unsupported database URL '{0}', expected sqlite:")]
    UnsupportedUrl(String),

    #[error("Failed to open SQLite pool: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),
}
