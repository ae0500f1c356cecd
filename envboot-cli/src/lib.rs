//! envboot CLI support
//!
//! Configuration loading and the bundled SQLite document store used by the
//! `envboot` binary.

pub mod config;
pub mod database;

pub use config::{CliConfig, ConfigError};
pub use database::{DatabaseConfig, SqliteConnector, SqliteDocumentStore, StoreError};
