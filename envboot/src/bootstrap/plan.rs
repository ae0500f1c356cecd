//! Dry-run planning
//!
//! Computes what a bootstrap would change using read-only client calls.
//! Conflicts are collected rather than raised so a single plan shows every
//! problem at once.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::client::{ClientError, DocumentClient};
use crate::error::{BootstrapError, Result};
use crate::profile::{EnvironmentName, EnvironmentProfile, PrincipalRole};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    CreatePrincipal {
        username: String,
        role: PrincipalRole,
    },
    CreateCollection {
        collection: String,
        with_validator: bool,
    },
    ApplyValidator {
        collection: String,
    },
    CreateIndex {
        collection: String,
        index: String,
        unique: bool,
    },
    InsertSeed {
        collection: String,
        natural_key: Value,
    },
    AppendAuditRecord {
        collection: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapPlan {
    pub environment: EnvironmentName,
    pub database_name: String,
    pub actions: Vec<PlannedAction>,
    pub conflicts: Vec<String>,
}

impl BootstrapPlan {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// True when applying would only append the audit record
    pub fn is_converged(&self) -> bool {
        self.actions
            .iter()
            .all(|action| matches!(action, PlannedAction::AppendAuditRecord { .. }))
    }
}

fn read_error(e: ClientError) -> BootstrapError {
    BootstrapError::client("plan", e)
}

/// Compute the actions `bootstrap` would take, without mutating anything
pub async fn plan<C>(profile: &EnvironmentProfile, client: &C) -> Result<BootstrapPlan>
where
    C: DocumentClient + ?Sized,
{
    profile.validate()?;
    client.ping().await.map_err(|e| match e {
        ClientError::Connection(message) => BootstrapError::Connection(message),
        other => BootstrapError::Connection(other.to_string()),
    })?;

    let database = &profile.database_name;
    let mut actions = Vec::new();
    let mut conflicts = Vec::new();

    let desired = profile.principal.grant();
    match client
        .find_principal(database, &desired.username)
        .await
        .map_err(read_error)?
    {
        Some(found) if found == desired => {}
        Some(found) => conflicts.push(
            BootstrapError::PrincipalConflict {
                username: desired.username.clone(),
                expected: desired.to_string(),
                found: found.to_string(),
            }
            .to_string(),
        ),
        None => actions.push(PlannedAction::CreatePrincipal {
            username: desired.username.clone(),
            role: desired.role,
        }),
    }

    let mut absent = HashSet::new();
    for spec in &profile.collections {
        match client
            .collection_info(database, &spec.name)
            .await
            .map_err(read_error)?
        {
            None => {
                absent.insert(spec.name.as_str());
                actions.push(PlannedAction::CreateCollection {
                    collection: spec.name.clone(),
                    with_validator: spec.validator.is_some(),
                });
            }
            Some(info) => match (&spec.validator, &info.validator) {
                (Some(_), None) => actions.push(PlannedAction::ApplyValidator {
                    collection: spec.name.clone(),
                }),
                (Some(desired), Some(current)) if desired != current => conflicts.push(
                    BootstrapError::SchemaConflict {
                        collection: spec.name.clone(),
                        reason: "an incompatible validator is already attached".to_string(),
                    }
                    .to_string(),
                ),
                _ => {}
            },
        }
    }

    for spec in &profile.collections {
        let existing = if absent.contains(spec.name.as_str()) {
            Vec::new()
        } else {
            client
                .list_indexes(database, &spec.name)
                .await
                .map_err(read_error)?
        };

        for index in &spec.indexes {
            let name = index.name();
            match existing.iter().find(|info| info.name == name) {
                Some(found) if &found.spec == index => {}
                Some(_) => conflicts.push(
                    BootstrapError::IndexConflict {
                        collection: spec.name.clone(),
                        index: name,
                        reason: "an index with the same name but different options exists"
                            .to_string(),
                    }
                    .to_string(),
                ),
                None => actions.push(PlannedAction::CreateIndex {
                    collection: spec.name.clone(),
                    index: name,
                    unique: index.unique,
                }),
            }
        }
    }

    for (collection, records) in &profile.seed_records {
        let Some(natural_key) = profile
            .collection(collection)
            .and_then(|spec| spec.natural_key.as_deref())
        else {
            continue;
        };

        let mut seen = HashSet::new();
        for (position, record) in records.iter().enumerate() {
            let Some(key) = record.get(natural_key).filter(|value| !value.is_null()) else {
                conflicts.push(format!(
                    "seed record {} of {} is missing natural key '{}'",
                    position, collection, natural_key
                ));
                continue;
            };
            if !seen.insert(key.to_string()) {
                continue;
            }
            let present = !absent.contains(collection.as_str())
                && client
                    .find_one(database, collection, natural_key, key)
                    .await
                    .map_err(read_error)?
                    .is_some();
            if !present {
                actions.push(PlannedAction::InsertSeed {
                    collection: collection.clone(),
                    natural_key: key.clone(),
                });
            }
        }
    }

    actions.push(PlannedAction::AppendAuditRecord {
        collection: profile.audit_collection.clone(),
    });

    info!(
        "Planned {} actions with {} conflicts for {}",
        actions.len(),
        conflicts.len(),
        database
    );

    Ok(BootstrapPlan {
        environment: profile.name,
        database_name: database.clone(),
        actions,
        conflicts,
    })
}
