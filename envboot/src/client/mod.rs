//! Database client interface
//!
//! The bootstrapper depends only on the capability set below, never on a
//! specific database product. Every call takes the target database name
//! explicitly; clients keep no "current database" state.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::profile::{IndexSpec, PrincipalRole, Validator};
use crate::secrets::Secret;

pub use memory::InMemoryClient;

/// A schemaless record
pub type Document = serde_json::Map<String, Value>;

/// Role and scope held by a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalGrant {
    pub username: String,
    pub role: PrincipalRole,
    pub scope_database: String,
}

impl std::fmt::Display for PrincipalGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.role, self.scope_database)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub validator: Option<Validator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub spec: IndexSpec,
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Duplicate key on {collection}.{field}: {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    #[error("Document failed validation for {collection}: {reason}")]
    Validation { collection: String, reason: String },

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Index options conflict for {0}")]
    IndexOptionsConflict(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// CRUD/DDL operations used by the bootstrapper
#[async_trait]
pub trait DocumentClient: Send + Sync {
    /// Verify the server is reachable and the session is authenticated
    async fn ping(&self) -> Result<(), ClientError>;

    async fn find_principal(
        &self,
        database: &str,
        username: &str,
    ) -> Result<Option<PrincipalGrant>, ClientError>;

    async fn create_principal(
        &self,
        database: &str,
        grant: &PrincipalGrant,
        password: &Secret,
    ) -> Result<(), ClientError>;

    async fn collection_info(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, ClientError>;

    async fn create_collection(
        &self,
        database: &str,
        collection: &str,
        validator: Option<&Validator>,
    ) -> Result<(), ClientError>;

    /// Attach or replace the validator of an existing collection
    async fn set_validator(
        &self,
        database: &str,
        collection: &str,
        validator: &Validator,
    ) -> Result<(), ClientError>;

    async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, ClientError>;

    /// Create an index. A unique index over duplicate data must fail with
    /// [`ClientError::DuplicateKey`] and leave no index behind.
    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), ClientError>;

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, ClientError>;

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), ClientError>;

    /// Unordered bulk insert with one outcome per document
    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Vec<Result<(), ClientError>> {
        let mut outcomes = Vec::with_capacity(documents.len());
        for document in documents {
            outcomes.push(self.insert_one(database, collection, document).await);
        }
        outcomes
    }

    /// Append an immutable log record
    async fn append_log(
        &self,
        database: &str,
        collection: &str,
        record: Document,
    ) -> Result<(), ClientError> {
        self.insert_one(database, collection, record).await
    }

    /// Release the connection; further calls are not expected
    async fn close(&self) {}
}

/// Opens client connections
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: DocumentClient;

    async fn connect(&self) -> Result<Self::Client, ClientError>;
}

/// Values of the index fields in a document; missing fields read as null
pub fn index_key(document: &Document, index: &IndexSpec) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|key| document.get(&key.field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// First index key shared by two documents, if any
pub fn find_duplicate<'a, I>(documents: I, index: &IndexSpec) -> Option<Vec<Value>>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut seen = std::collections::HashSet::new();
    for document in documents {
        let key = index_key(document, index);
        if !seen.insert(Value::Array(key.clone()).to_string()) {
            return Some(key);
        }
    }
    None
}

/// Error reported when `candidate` collides with `existing` on a unique index
pub fn unique_violation<'a, I>(
    collection: &str,
    existing: I,
    indexes: &[IndexSpec],
    candidate: &Document,
) -> Option<ClientError>
where
    I: IntoIterator<Item = &'a Document> + Clone,
{
    for index in indexes.iter().filter(|index| index.unique) {
        let key = index_key(candidate, index);
        if existing
            .clone()
            .into_iter()
            .any(|document| index_key(document, index) == key)
        {
            return Some(ClientError::DuplicateKey {
                collection: collection.to_string(),
                field: index.fields().join(","),
                value: render_key(&key),
            });
        }
    }
    None
}

/// Equality used for natural-key lookups; numbers compare by value, so `25`
/// matches `25.0` the way document stores match them
pub fn same_value(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a == b || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
        }
        _ => left == right,
    }
}

/// Printable form of an index key
pub fn render_key(key: &[Value]) -> String {
    match key {
        [single] => single.to_string(),
        many => Value::Array(many.to_vec()).to_string(),
    }
}
