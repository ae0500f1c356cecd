//! Error types for the bootstrap library

use serde::Serialize;
use thiserror::Error;

use crate::client::ClientError;
use crate::secrets::SecretError;

/// Fatal failure of a bootstrap run
///
/// Every variant stops the run at the step that produced it. Steps applied
/// before the failure stay applied and a re-run picks up from there.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BootstrapError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Principal conflict for {username}: expected {expected}, found {found}")]
    PrincipalConflict {
        username: String,
        expected: String,
        found: String,
    },

    #[error("Schema conflict on collection {collection}: {reason}")]
    SchemaConflict { collection: String, reason: String },

    #[error("Index conflict on {collection}.{index}: {reason}")]
    IndexConflict {
        collection: String,
        index: String,
        reason: String,
    },

    #[error("Unique constraint violation on {collection}.{field}: duplicate value {value}")]
    UniqueConstraintViolation {
        collection: String,
        field: String,
        value: String,
    },

    #[error("Audit log error: {0}")]
    AuditLog(ClientError),

    #[error("Client error during {step}: {source}")]
    Client {
        step: &'static str,
        source: ClientError,
    },
}

impl BootstrapError {
    pub(crate) fn client(step: &'static str, source: ClientError) -> Self {
        match source {
            ClientError::Connection(message) => BootstrapError::Connection(message),
            source => BootstrapError::Client { step, source },
        }
    }
}

/// Per-record seed failure; recorded in the summary, never fatal
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SeedInsertError {
    #[error("Malformed seed record: {0}")]
    Malformed(String),

    #[error("Seed write failed: {0}")]
    Write(ClientError),
}

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, BootstrapError>;
