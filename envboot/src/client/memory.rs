//! In-memory document client
//!
//! Behaves like a document database for the operations the bootstrapper
//! uses: validators and unique indexes are enforced on writes, collections
//! are created implicitly on first insert. Cloning shares the same state.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{
    find_duplicate, render_key, same_value, unique_violation, ClientError, CollectionInfo,
    Connector, Document, DocumentClient, IndexInfo, PrincipalGrant,
};
use crate::profile::{IndexSpec, Validator};
use crate::secrets::Secret;

/// bcrypt cost used for locally stored credentials
const MEMORY_BCRYPT_COST: u32 = 4;

#[derive(Debug, Default)]
struct CollectionState {
    validator: Option<Validator>,
    indexes: Vec<IndexSpec>,
    documents: Vec<Document>,
}

#[derive(Debug, Default)]
struct DatabaseState {
    // username -> (grant, password hash)
    principals: HashMap<String, (PrincipalGrant, String)>,
    collections: BTreeMap<String, CollectionState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    databases: HashMap<String, DatabaseState>,
    connections_opened: usize,
    connections_closed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryClient {
    state: Arc<RwLock<MemoryState>>,
    unreachable: bool,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose server never answers
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.read()
            .ok()
            .and_then(|state| {
                state
                    .databases
                    .get(database)
                    .and_then(|db| db.collections.get(collection))
                    .map(|c| c.documents.clone())
            })
            .unwrap_or_default()
    }

    pub fn collection_names(&self, database: &str) -> Vec<String> {
        self.read()
            .ok()
            .and_then(|state| {
                state
                    .databases
                    .get(database)
                    .map(|db| db.collections.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    pub fn password_hash(&self, database: &str, username: &str) -> Option<String> {
        let state = self.read().ok()?;
        let db = state.databases.get(database)?;
        db.principals.get(username).map(|(_, hash)| hash.clone())
    }

    pub fn connections_opened(&self) -> usize {
        self.read().map(|s| s.connections_opened).unwrap_or_default()
    }

    pub fn connections_closed(&self) -> usize {
        self.read().map(|s| s.connections_closed).unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, ClientError> {
        self.state
            .read()
            .map_err(|_| ClientError::Backend("Failed to acquire read lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, ClientError> {
        self.state
            .write()
            .map_err(|_| ClientError::Backend("Failed to acquire write lock".to_string()))
    }

    fn check_reachable(&self) -> Result<(), ClientError> {
        if self.unreachable {
            return Err(ClientError::Connection("server selection timed out".to_string()));
        }
        Ok(())
    }
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{}.{}", database, collection)
}

#[async_trait]
impl DocumentClient for InMemoryClient {
    async fn ping(&self) -> Result<(), ClientError> {
        self.check_reachable()
    }

    async fn find_principal(
        &self,
        database: &str,
        username: &str,
    ) -> Result<Option<PrincipalGrant>, ClientError> {
        self.check_reachable()?;
        let state = self.read()?;
        Ok(state
            .databases
            .get(database)
            .and_then(|db| db.principals.get(username))
            .map(|(grant, _)| grant.clone()))
    }

    async fn create_principal(
        &self,
        database: &str,
        grant: &PrincipalGrant,
        password: &Secret,
    ) -> Result<(), ClientError> {
        self.check_reachable()?;
        let hash = password
            .bcrypt_hash(MEMORY_BCRYPT_COST)
            .map_err(|e| ClientError::Backend(e.to_string()))?;

        let mut state = self.write()?;
        let db = state.databases.entry(database.to_string()).or_default();
        if db.principals.contains_key(&grant.username) {
            return Err(ClientError::AlreadyExists(format!(
                "principal {}@{}",
                grant.username, database
            )));
        }
        db.principals
            .insert(grant.username.clone(), (grant.clone(), hash));
        Ok(())
    }

    async fn collection_info(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, ClientError> {
        self.check_reachable()?;
        let state = self.read()?;
        Ok(state
            .databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .map(|c| CollectionInfo {
                name: collection.to_string(),
                validator: c.validator.clone(),
            }))
    }

    async fn create_collection(
        &self,
        database: &str,
        collection: &str,
        validator: Option<&Validator>,
    ) -> Result<(), ClientError> {
        self.check_reachable()?;
        let mut state = self.write()?;
        let db = state.databases.entry(database.to_string()).or_default();
        if db.collections.contains_key(collection) {
            return Err(ClientError::AlreadyExists(namespace(database, collection)));
        }
        db.collections.insert(
            collection.to_string(),
            CollectionState {
                validator: validator.cloned(),
                ..CollectionState::default()
            },
        );
        Ok(())
    }

    async fn set_validator(
        &self,
        database: &str,
        collection: &str,
        validator: &Validator,
    ) -> Result<(), ClientError> {
        self.check_reachable()?;
        let mut state = self.write()?;
        let target = state
            .databases
            .get_mut(database)
            .and_then(|db| db.collections.get_mut(collection))
            .ok_or_else(|| ClientError::NamespaceNotFound(namespace(database, collection)))?;
        target.validator = Some(validator.clone());
        Ok(())
    }

    async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, ClientError> {
        self.check_reachable()?;
        let state = self.read()?;
        Ok(state
            .databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .map(|c| {
                c.indexes
                    .iter()
                    .map(|spec| IndexInfo {
                        name: spec.name(),
                        spec: spec.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), ClientError> {
        self.check_reachable()?;
        let mut state = self.write()?;
        let target = state
            .databases
            .entry(database.to_string())
            .or_default()
            .collections
            .entry(collection.to_string())
            .or_default();

        let name = index.name();
        if let Some(existing) = target.indexes.iter().find(|spec| spec.name() == name) {
            if existing == index {
                return Ok(());
            }
            return Err(ClientError::IndexOptionsConflict(format!(
                "{}.{}",
                namespace(database, collection),
                name
            )));
        }

        if index.unique {
            if let Some(key) = find_duplicate(&target.documents, index) {
                return Err(ClientError::DuplicateKey {
                    collection: collection.to_string(),
                    field: index.fields().join(","),
                    value: render_key(&key),
                });
            }
        }
        target.indexes.push(index.clone());
        Ok(())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, ClientError> {
        self.check_reachable()?;
        let state = self.read()?;
        Ok(state
            .databases
            .get(database)
            .and_then(|db| db.collections.get(collection))
            .and_then(|c| {
                c.documents
                    .iter()
                    .find(|d| d.get(field).is_some_and(|found| same_value(found, value)))
            })
            .cloned())
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        mut document: Document,
    ) -> Result<(), ClientError> {
        self.check_reachable()?;
        let mut state = self.write()?;
        let target = state
            .databases
            .entry(database.to_string())
            .or_default()
            .collections
            .entry(collection.to_string())
            .or_default();

        if let Some(validator) = &target.validator {
            validator.check(&document).map_err(|e| ClientError::Validation {
                collection: collection.to_string(),
                reason: e.to_string(),
            })?;
        }
        if let Some(violation) =
            unique_violation(collection, &target.documents, &target.indexes, &document)
        {
            return Err(violation);
        }

        if let Some(id) = document.get("_id") {
            if target.documents.iter().any(|d| d.get("_id") == Some(id)) {
                return Err(ClientError::DuplicateKey {
                    collection: collection.to_string(),
                    field: "_id".to_string(),
                    value: id.to_string(),
                });
            }
        }

        document
            .entry("_id".to_string())
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        target.documents.push(document);
        Ok(())
    }

    async fn close(&self) {
        if let Ok(mut state) = self.write() {
            state.connections_closed += 1;
        }
    }
}

#[async_trait]
impl Connector for InMemoryClient {
    type Client = InMemoryClient;

    async fn connect(&self) -> Result<Self::Client, ClientError> {
        self.check_reachable()?;
        self.write()?.connections_opened += 1;
        Ok(self.clone())
    }
}
