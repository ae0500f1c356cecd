//! envboot - idempotent environment bootstrap for document databases
//!
//! This library brings a document database to the baseline an environment
//! expects: an application principal, collections with their validators and
//! indexes, seed records keyed by a natural key, and an audit record of the
//! run. The desired state is data ([`profile::EnvironmentProfile`]); the
//! procedure ([`bootstrap::bootstrap`]) is the same for every environment.

pub mod error;
pub mod secrets;
pub mod profile;
pub mod client;
pub mod bootstrap;

// Re-export commonly used types for convenience
pub use bootstrap::{
    bootstrap, bootstrap_with, plan, BootstrapPlan, BootstrapRun, BootstrapStage,
    BootstrapSummary, PlannedAction, SeedFailure,
};
pub use client::{ClientError, Connector, Document, DocumentClient, InMemoryClient};
pub use error::{BootstrapError, Result, SeedInsertError};
pub use profile::{builtin_profile, validate_isolation, EnvironmentName, EnvironmentProfile};
pub use secrets::{Secret, SecretRef, SecretSource, StaticSecretSource, SystemSecretSource};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
