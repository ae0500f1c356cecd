//! SQLite-hosted document store
//!
//! Documents are stored as JSON text. Unique and ordered indexes become
//! partial expression indexes over `json_extract`, so SQLite enforces them
//! alongside the checks done here; text indexes exist in the catalog only.

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use envboot::client::{
    find_duplicate, render_key, unique_violation, CollectionInfo, IndexInfo, PrincipalGrant,
};
use envboot::profile::{IndexDirection, IndexSpec, PrincipalRole, Validator};
use envboot::{ClientError, Connector, Document, DocumentClient, Secret};

use super::connection::{connect, DatabaseConfig};
use super::StoreError;

/// [`DocumentClient`] backed by a SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    bcrypt_cost: u32,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool, bcrypt_cost: u32) -> Self {
        Self { pool, bcrypt_cost }
    }

    /// Open a pool for `config` and run migrations
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = connect(config).await?;
        Ok(Self::new(pool, config.bcrypt_cost))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All documents of a collection in insertion order
    pub async fn documents(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<Document>, ClientError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM envboot_documents \
             WHERE database_name = ? AND collection = ? ORDER BY rowid",
        )
        .bind(database)
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(|(body,)| decode(body, "document")).collect()
    }

    pub async fn collection_names(&self, database: &str) -> Result<Vec<String>, ClientError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM envboot_collections WHERE database_name = ? ORDER BY rowid",
        )
        .bind(database)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn password_hash(
        &self,
        database: &str,
        username: &str,
    ) -> Result<Option<String>, ClientError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT password_hash FROM envboot_principals \
             WHERE database_name = ? AND username = ?",
        )
        .bind(database)
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(|(hash,)| hash))
    }

    /// Collections spring into existence on first write
    async fn ensure_collection_row(&self, database: &str, collection: &str) -> Result<(), ClientError> {
        sqlx::query(
            "INSERT OR IGNORE INTO envboot_collections (database_name, name, validator, created_at) \
             VALUES (?, ?, NULL, ?)",
        )
        .bind(database)
        .bind(collection)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn validator_of(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<Validator>, ClientError> {
        Ok(self
            .collection_info(database, collection)
            .await?
            .and_then(|info| info.validator))
    }

    async fn index_specs(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<IndexSpec>, ClientError> {
        Ok(self
            .list_indexes(database, collection)
            .await?
            .into_iter()
            .map(|info| info.spec)
            .collect())
    }
}

#[async_trait]
impl DocumentClient for SqliteDocumentStore {
    async fn ping(&self) -> Result<(), ClientError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ClientError::Connection(format!("SQLite health check failed: {}", e)))?;
        Ok(())
    }

    async fn find_principal(
        &self,
        database: &str,
        username: &str,
    ) -> Result<Option<PrincipalGrant>, ClientError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT role, scope_database FROM envboot_principals \
             WHERE database_name = ? AND username = ?",
        )
        .bind(database)
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some((role, scope_database)) = row else {
            return Ok(None);
        };
        let role: PrincipalRole = serde_json::from_value(Value::String(role.clone()))
            .map_err(|_| ClientError::Backend(format!("unknown role '{}' in catalog", role)))?;

        Ok(Some(PrincipalGrant {
            username: username.to_string(),
            role,
            scope_database,
        }))
    }

    async fn create_principal(
        &self,
        database: &str,
        grant: &PrincipalGrant,
        password: &Secret,
    ) -> Result<(), ClientError> {
        let hash = password
            .bcrypt_hash(self.bcrypt_cost)
            .map_err(|e| ClientError::Backend(e.to_string()))?;

        sqlx::query(
            "INSERT INTO envboot_principals \
             (database_name, username, role, scope_database, password_hash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(database)
        .bind(&grant.username)
        .bind(grant.role.as_str())
        .bind(&grant.scope_database)
        .bind(hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ClientError::AlreadyExists(format!("principal {}@{}", grant.username, database))
            }
            other => backend(other),
        })?;

        info!("Stored principal {} for {}", grant.username, database);
        Ok(())
    }

    async fn collection_info(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Option<CollectionInfo>, ClientError> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT validator FROM envboot_collections WHERE database_name = ? AND name = ?",
        )
        .bind(database)
        .bind(collection)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some((validator,)) = row else {
            return Ok(None);
        };
        let validator = match validator {
            Some(raw) => Some(decode::<Validator>(&raw, "validator")?),
            None => None,
        };
        Ok(Some(CollectionInfo {
            name: collection.to_string(),
            validator,
        }))
    }

    async fn create_collection(
        &self,
        database: &str,
        collection: &str,
        validator: Option<&Validator>,
    ) -> Result<(), ClientError> {
        let validator = validator.map(encode).transpose()?;

        sqlx::query(
            "INSERT INTO envboot_collections (database_name, name, validator, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(database)
        .bind(collection)
        .bind(validator)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ClientError::AlreadyExists(format!("{}.{}", database, collection))
            }
            other => backend(other),
        })?;
        Ok(())
    }

    async fn set_validator(
        &self,
        database: &str,
        collection: &str,
        validator: &Validator,
    ) -> Result<(), ClientError> {
        let result = sqlx::query(
            "UPDATE envboot_collections SET validator = ? WHERE database_name = ? AND name = ?",
        )
        .bind(encode(validator)?)
        .bind(database)
        .bind(collection)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(ClientError::NamespaceNotFound(format!(
                "{}.{}",
                database, collection
            )));
        }
        Ok(())
    }

    async fn list_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, ClientError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT name, spec FROM envboot_indexes \
             WHERE database_name = ? AND collection = ? ORDER BY rowid",
        )
        .bind(database)
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|(name, spec)| {
                decode::<IndexSpec>(&spec, "index spec").map(|spec| IndexInfo { name, spec })
            })
            .collect()
    }

    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: &IndexSpec,
    ) -> Result<(), ClientError> {
        let name = index.name();
        let existing = self.index_specs(database, collection).await?;
        if let Some(found) = existing.iter().find(|spec| spec.name() == name) {
            if found == index {
                return Ok(());
            }
            return Err(ClientError::IndexOptionsConflict(format!(
                "{}.{}.{}",
                database, collection, name
            )));
        }

        if index.unique {
            let documents = self.documents(database, collection).await?;
            if let Some(key) = find_duplicate(&documents, index) {
                return Err(ClientError::DuplicateKey {
                    collection: collection.to_string(),
                    field: index.fields().join(","),
                    value: render_key(&key),
                });
            }
        }

        self.ensure_collection_row(database, collection).await?;

        let mut tx = self.pool.begin().await.map_err(backend)?;
        if !index.text_search {
            let ddl = index_ddl(database, collection, index)?;
            debug!("Creating SQLite index: {}", ddl);
            sqlx::query(&ddl)
                .execute(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => {
                        ClientError::DuplicateKey {
                            collection: collection.to_string(),
                            field: index.fields().join(","),
                            value: db.message().to_string(),
                        }
                    }
                    other => backend(other),
                })?;
        }
        sqlx::query(
            "INSERT INTO envboot_indexes (database_name, collection, name, spec, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(database)
        .bind(collection)
        .bind(&name)
        .bind(encode(index)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        Ok(())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, ClientError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT body FROM envboot_documents \
             WHERE database_name = ? AND collection = ? \
             AND json_extract(body, ?) = json_extract(?, '$') \
             ORDER BY rowid LIMIT 1",
        )
        .bind(database)
        .bind(collection)
        .bind(json_path(field))
        .bind(value.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|(body,)| decode(&body, "document")).transpose()
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        mut document: Document,
    ) -> Result<(), ClientError> {
        self.ensure_collection_row(database, collection).await?;

        if let Some(validator) = self.validator_of(database, collection).await? {
            validator.check(&document).map_err(|e| ClientError::Validation {
                collection: collection.to_string(),
                reason: e.to_string(),
            })?;
        }

        let indexes = self.index_specs(database, collection).await?;
        if indexes.iter().any(|index| index.unique) {
            let existing = self.documents(database, collection).await?;
            if let Some(violation) = unique_violation(collection, &existing, &indexes, &document)
            {
                return Err(violation);
            }
        }

        // the caller's `_id` is kept as is; its JSON text keys the row
        let id = match document.get("_id") {
            Some(existing) => existing.to_string(),
            None => {
                let generated = Value::String(Uuid::new_v4().to_string());
                let id = generated.to_string();
                document.insert("_id".to_string(), generated);
                id
            }
        };

        sqlx::query(
            "INSERT INTO envboot_documents (database_name, collection, id, body, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(database)
        .bind(collection)
        .bind(&id)
        .bind(encode(&document)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                if db.message().contains("envboot_documents.id") {
                    ClientError::DuplicateKey {
                        collection: collection.to_string(),
                        field: "_id".to_string(),
                        value: id.clone(),
                    }
                } else {
                    ClientError::DuplicateKey {
                        collection: collection.to_string(),
                        field: "index".to_string(),
                        value: db.message().to_string(),
                    }
                }
            }
            other => backend(other),
        })?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("SQLite connection pool closed");
    }
}

/// Opens a [`SqliteDocumentStore`] per bootstrap run
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    config: DatabaseConfig,
}

impl SqliteConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Client = SqliteDocumentStore;

    async fn connect(&self) -> Result<Self::Client, ClientError> {
        SqliteDocumentStore::open(&self.config)
            .await
            .map_err(|e| ClientError::Connection(e.to_string()))
    }
}

fn backend(e: sqlx::Error) -> ClientError {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ClientError::Connection(e.to_string()),
        other => ClientError::Backend(other.to_string()),
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, ClientError> {
    serde_json::to_string(value).map_err(|e| ClientError::Backend(e.to_string()))
}

fn decode<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T, ClientError> {
    serde_json::from_str(raw)
        .map_err(|e| ClientError::Backend(format!("corrupt {} in catalog: {}", what, e)))
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field)
}

/// Names end up inside DDL literals
fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn index_ddl(database: &str, collection: &str, index: &IndexSpec) -> Result<String, ClientError> {
    let names = [database, collection]
        .into_iter()
        .chain(index.fields());
    for name in names {
        if !is_plain_identifier(name) {
            return Err(ClientError::Backend(format!(
                "'{}' cannot be used in an index definition",
                name
            )));
        }
    }

    let columns = index
        .keys
        .iter()
        .map(|key| {
            let order = match key.direction {
                IndexDirection::Ascending => "ASC",
                IndexDirection::Descending => "DESC",
            };
            format!("json_extract(body, '{}') {}", json_path(&key.field), order)
        })
        .collect::<Vec<_>>()
        .join(", ");

    Ok(format!(
        "CREATE {}INDEX IF NOT EXISTS \"envboot_ix__{}__{}__{}\" ON envboot_documents ({}) \
         WHERE database_name = '{}' AND collection = '{}'",
        if index.unique { "UNIQUE " } else { "" },
        database,
        collection,
        index.name(),
        columns,
        database,
        collection
    ))
}
