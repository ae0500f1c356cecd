//! Environment bootstrap procedure
//!
//! Applies one [`EnvironmentProfile`] to a database through a
//! [`DocumentClient`]: principal, collections and validators, indexes, seed
//! records, then an audit record. Every step has ensure-exists semantics so a
//! run can be repeated after any failure.

mod audit;
pub mod plan;

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::client::{ClientError, Connector, Document, DocumentClient};
use crate::error::{BootstrapError, Result, SeedInsertError};
use crate::profile::{CollectionSpec, EnvironmentName, EnvironmentProfile};
use crate::secrets::SecretSource;

pub use audit::AUDIT_ACTION;
pub use plan::{plan, BootstrapPlan, PlannedAction};

/// Progress of a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BootstrapStage {
    NotStarted,
    PrincipalReady,
    SchemaReady,
    IndexesReady,
    SeedReady,
    AuditLogged,
    Done,
    Failed(String),
}

impl BootstrapStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapStage::Done | BootstrapStage::Failed(_))
    }
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapStage::Failed(reason) => write!(f, "Failed({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A seed record that could not be written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedFailure {
    pub collection: String,
    pub position: usize,
    pub natural_key: Option<Value>,
    pub error: SeedInsertError,
}

/// What a run changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapSummary {
    pub run_id: Uuid,
    pub environment: EnvironmentName,
    pub database_name: String,
    pub principal_created: bool,
    pub collections_created: Vec<String>,
    pub validators_applied: Vec<String>,
    pub indexes_created: Vec<String>,
    pub records_inserted: usize,
    pub records_skipped: usize,
    pub seed_failures: Vec<SeedFailure>,
    pub audit_logged: bool,
    pub elapsed_ms: u64,
}

impl BootstrapSummary {
    fn new(profile: &EnvironmentProfile) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            environment: profile.name,
            database_name: profile.database_name.clone(),
            principal_created: false,
            collections_created: Vec::new(),
            validators_applied: Vec::new(),
            indexes_created: Vec::new(),
            records_inserted: 0,
            records_skipped: 0,
            seed_failures: Vec::new(),
            audit_logged: false,
            elapsed_ms: 0,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.seed_failures.len()
    }

    /// True when the run created or altered schema objects
    pub fn changed_schema(&self) -> bool {
        self.principal_created
            || !self.collections_created.is_empty()
            || !self.validators_applied.is_empty()
            || !self.indexes_created.is_empty()
    }
}

/// One bootstrap run over a profile
///
/// The run keeps its stage and partial summary so callers can inspect how
/// far it got after a failure.
pub struct BootstrapRun<'a, C: DocumentClient + ?Sized, S: SecretSource + ?Sized> {
    profile: &'a EnvironmentProfile,
    client: &'a C,
    secrets: &'a S,
    stage: BootstrapStage,
    summary: BootstrapSummary,
}

impl<'a, C, S> BootstrapRun<'a, C, S>
where
    C: DocumentClient + ?Sized,
    S: SecretSource + ?Sized,
{
    pub fn new(profile: &'a EnvironmentProfile, client: &'a C, secrets: &'a S) -> Self {
        Self {
            profile,
            client,
            secrets,
            stage: BootstrapStage::NotStarted,
            summary: BootstrapSummary::new(profile),
        }
    }

    pub fn stage(&self) -> &BootstrapStage {
        &self.stage
    }

    pub fn progress(&self) -> &BootstrapSummary {
        &self.summary
    }

    /// Run every step in order. Calling it again starts a fresh run.
    pub async fn execute(&mut self) -> Result<BootstrapSummary> {
        let started = Instant::now();
        self.stage = BootstrapStage::NotStarted;
        self.summary = BootstrapSummary::new(self.profile);

        info!(
            "Bootstrapping {} environment into database {}",
            self.profile.name, self.profile.database_name
        );

        let outcome = self.apply().await;
        self.summary.elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                self.stage = BootstrapStage::Done;
                info!(
                    "Bootstrap of {} completed in {}ms: {} collections, {} indexes, {} records inserted, {} seed failures",
                    self.profile.database_name,
                    self.summary.elapsed_ms,
                    self.summary.collections_created.len(),
                    self.summary.indexes_created.len(),
                    self.summary.records_inserted,
                    self.summary.failed_count()
                );
                Ok(self.summary.clone())
            }
            Err(e) => {
                error!(
                    "Bootstrap of {} failed after {}: {}",
                    self.profile.database_name, self.stage, e
                );
                self.stage = BootstrapStage::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn apply(&mut self) -> Result<()> {
        self.profile.validate()?;
        self.client.ping().await.map_err(|e| match e {
            ClientError::Connection(message) => BootstrapError::Connection(message),
            other => BootstrapError::Connection(other.to_string()),
        })?;

        self.ensure_principal().await?;
        self.stage = BootstrapStage::PrincipalReady;

        self.ensure_collections().await?;
        self.stage = BootstrapStage::SchemaReady;

        self.ensure_indexes().await?;
        self.stage = BootstrapStage::IndexesReady;

        self.seed().await?;
        self.stage = BootstrapStage::SeedReady;

        self.append_audit_record().await?;
        self.stage = BootstrapStage::AuditLogged;
        Ok(())
    }

    async fn ensure_principal(&mut self) -> Result<()> {
        let profile = self.profile;
        let database = &profile.database_name;
        let principal = &profile.principal;
        let desired = principal.grant();

        let existing = self
            .client
            .find_principal(database, &principal.username)
            .await
            .map_err(|e| BootstrapError::client("principal", e))?;

        match existing {
            Some(found) if found == desired => {
                info!("Principal {} already exists with {}", principal.username, found);
            }
            Some(found) => {
                return Err(BootstrapError::PrincipalConflict {
                    username: principal.username.clone(),
                    expected: desired.to_string(),
                    found: found.to_string(),
                });
            }
            None => {
                let password = self.secrets.resolve(&principal.password)?;
                self.client
                    .create_principal(database, &desired, &password)
                    .await
                    .map_err(|e| BootstrapError::client("principal", e))?;
                self.summary.principal_created = true;
                info!("Created principal {} with {}", principal.username, desired);
            }
        }
        Ok(())
    }

    async fn ensure_collections(&mut self) -> Result<()> {
        let profile = self.profile;
        for spec in &profile.collections {
            self.ensure_collection(spec).await?;
        }
        info!(
            "Schema ready: {} collections created, {} validators applied",
            self.summary.collections_created.len(),
            self.summary.validators_applied.len()
        );
        Ok(())
    }

    async fn ensure_collection(&mut self, spec: &CollectionSpec) -> Result<()> {
        let profile = self.profile;
        let database = &profile.database_name;
        let existing = self
            .client
            .collection_info(database, &spec.name)
            .await
            .map_err(|e| BootstrapError::client("schema", e))?;

        let Some(info) = existing else {
            self.client
                .create_collection(database, &spec.name, spec.validator.as_ref())
                .await
                .map_err(|e| BootstrapError::client("schema", e))?;
            self.summary.collections_created.push(spec.name.clone());
            info!("Created collection {}", spec.name);
            return Ok(());
        };

        match (&spec.validator, &info.validator) {
            (None, _) => debug!("Collection {} already exists", spec.name),
            (Some(desired), Some(current)) if desired == current => {
                debug!("Collection {} already has the desired validator", spec.name)
            }
            (Some(_), Some(_)) => {
                return Err(BootstrapError::SchemaConflict {
                    collection: spec.name.clone(),
                    reason: "an incompatible validator is already attached".to_string(),
                });
            }
            (Some(desired), None) => {
                self.client
                    .set_validator(database, &spec.name, desired)
                    .await
                    .map_err(|e| BootstrapError::client("schema", e))?;
                self.summary.validators_applied.push(spec.name.clone());
                info!("Applied validator to existing collection {}", spec.name);
            }
        }
        Ok(())
    }

    async fn ensure_indexes(&mut self) -> Result<()> {
        let profile = self.profile;
        let database = &profile.database_name;

        for collection in &profile.collections {
            if collection.indexes.is_empty() {
                continue;
            }
            let existing = self
                .client
                .list_indexes(database, &collection.name)
                .await
                .map_err(|e| BootstrapError::client("indexes", e))?;

            for index in &collection.indexes {
                let name = index.name();
                if let Some(found) = existing.iter().find(|info| info.name == name) {
                    if &found.spec != index {
                        return Err(BootstrapError::IndexConflict {
                            collection: collection.name.clone(),
                            index: name,
                            reason: "an index with the same name but different options exists"
                                .to_string(),
                        });
                    }
                    debug!("Index {}.{} already exists", collection.name, name);
                    continue;
                }

                self.client
                    .create_index(database, &collection.name, index)
                    .await
                    .map_err(|e| match e {
                        ClientError::DuplicateKey { field, value, .. } => {
                            BootstrapError::UniqueConstraintViolation {
                                collection: collection.name.clone(),
                                field,
                                value,
                            }
                        }
                        ClientError::IndexOptionsConflict(reason) => BootstrapError::IndexConflict {
                            collection: collection.name.clone(),
                            index: name.clone(),
                            reason,
                        },
                        other => BootstrapError::client("indexes", other),
                    })?;
                self.summary
                    .indexes_created
                    .push(format!("{}.{}", collection.name, name));
                info!("Created index {}.{}", collection.name, name);
            }
        }
        Ok(())
    }

    async fn seed(&mut self) -> Result<()> {
        if !self.profile.has_seed_records() {
            info!(
                "No seed records for {} environment, skipping seed step",
                self.profile.name
            );
            return Ok(());
        }

        let profile = self.profile;
        for (collection, records) in &profile.seed_records {
            // validate() guarantees seeded collections declare a natural key
            let Some(natural_key) = profile
                .collection(collection)
                .and_then(|spec| spec.natural_key.as_deref())
            else {
                continue;
            };
            self.seed_collection(collection, natural_key, records).await?;
        }

        info!(
            "Seed step finished: {} inserted, {} already present, {} failed",
            self.summary.records_inserted,
            self.summary.records_skipped,
            self.summary.failed_count()
        );
        Ok(())
    }

    async fn seed_collection(
        &mut self,
        collection: &str,
        natural_key: &str,
        records: &[Document],
    ) -> Result<()> {
        let profile = self.profile;
        let database = &profile.database_name;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        let mut documents = Vec::new();

        for (position, record) in records.iter().enumerate() {
            let key = match record.get(natural_key) {
                Some(value) if !value.is_null() => value.clone(),
                _ => {
                    self.record_failure(
                        collection,
                        position,
                        None,
                        SeedInsertError::Malformed(format!(
                            "missing natural key '{}'",
                            natural_key
                        )),
                    );
                    continue;
                }
            };

            if !seen.insert(key.to_string()) {
                debug!("Seed record {} of {} repeats key {}", position, collection, key);
                self.summary.records_skipped += 1;
                continue;
            }

            match self
                .client
                .find_one(database, collection, natural_key, &key)
                .await
            {
                Ok(Some(_)) => {
                    debug!("{} {} already present in {}", natural_key, key, collection);
                    self.summary.records_skipped += 1;
                }
                Ok(None) => {
                    pending.push((position, key));
                    documents.push(self.stamp(record.clone()));
                }
                Err(ClientError::Connection(message)) => {
                    return Err(BootstrapError::Connection(message));
                }
                Err(e) => {
                    self.record_failure(collection, position, Some(key), SeedInsertError::Write(e));
                }
            }
        }

        if documents.is_empty() {
            return Ok(());
        }

        let outcomes = self
            .client
            .insert_many(database, collection, documents)
            .await;
        let mut lost_connection = None;
        for ((position, key), outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => self.summary.records_inserted += 1,
                Err(e) => {
                    if let ClientError::Connection(message) = &e {
                        lost_connection = Some(message.clone());
                    }
                    self.record_failure(collection, position, Some(key), SeedInsertError::Write(e));
                }
            }
        }

        match lost_connection {
            Some(message) => Err(BootstrapError::Connection(message)),
            None => Ok(()),
        }
    }

    fn stamp(&self, mut record: Document) -> Document {
        if self.profile.stamp_timestamps {
            let now = Value::String(Utc::now().to_rfc3339());
            record
                .entry("created_at".to_string())
                .or_insert_with(|| now.clone());
            record.entry("updated_at".to_string()).or_insert(now);
        }
        record
    }

    fn record_failure(
        &mut self,
        collection: &str,
        position: usize,
        natural_key: Option<Value>,
        error: SeedInsertError,
    ) {
        warn!(
            "Seed record {} of {} failed: {}",
            position, collection, error
        );
        self.summary.seed_failures.push(SeedFailure {
            collection: collection.to_string(),
            position,
            natural_key,
            error,
        });
    }

    async fn append_audit_record(&mut self) -> Result<()> {
        let record = audit::audit_record(self.profile, &self.summary, Utc::now());
        self.client
            .append_log(
                &self.profile.database_name,
                &self.profile.audit_collection,
                record,
            )
            .await
            .map_err(BootstrapError::AuditLog)?;
        self.summary.audit_logged = true;
        info!(
            "Audit record appended to {}.{}",
            self.profile.database_name, self.profile.audit_collection
        );
        Ok(())
    }
}

/// Apply `profile` through an already open client
pub async fn bootstrap<C, S>(
    profile: &EnvironmentProfile,
    client: &C,
    secrets: &S,
) -> Result<BootstrapSummary>
where
    C: DocumentClient + ?Sized,
    S: SecretSource + ?Sized,
{
    BootstrapRun::new(profile, client, secrets).execute().await
}

/// Open a connection, apply `profile`, and close the connection on every
/// exit path
pub async fn bootstrap_with<K, S>(
    connector: &K,
    profile: &EnvironmentProfile,
    secrets: &S,
) -> Result<BootstrapSummary>
where
    K: Connector + ?Sized,
    S: SecretSource + ?Sized,
{
    let client = connector.connect().await.map_err(|e| match e {
        ClientError::Connection(message) => BootstrapError::Connection(message),
        other => BootstrapError::Connection(other.to_string()),
    })?;
    let result = bootstrap(profile, &client, secrets).await;
    client.close().await;
    result
}
