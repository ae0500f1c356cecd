//! Bootstrap runs against the SQLite document store

use serde_json::{json, Value};

use envboot::profile::IndexSpec;
use envboot::{
    bootstrap, bootstrap_with, builtin_profile, plan, BootstrapError, ClientError, Document,
    DocumentClient, EnvironmentName, SecretRef, StaticSecretSource,
};
use envboot_cli::{DatabaseConfig, SqliteConnector, SqliteDocumentStore};

fn secrets() -> StaticSecretSource {
    StaticSecretSource::new()
        .with(SecretRef::env("DEV_DB_PASSWORD"), "dev-secret")
        .with(SecretRef::env("HML_DB_PASSWORD"), "hml-secret")
        .with(SecretRef::env("PROD_DB_PASSWORD"), "prod-secret")
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

async fn memory_store() -> SqliteDocumentStore {
    let config = DatabaseConfig {
        bcrypt_cost: 4,
        ..DatabaseConfig::in_memory()
    };
    SqliteDocumentStore::open(&config).await.unwrap()
}

async fn sqlite_index_exists(store: &SqliteDocumentStore, name: &str) -> bool {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?")
            .bind(name)
            .fetch_optional(store.pool())
            .await
            .unwrap();
    row.is_some()
}

#[tokio::test]
async fn test_development_scenario() {
    let store = memory_store().await;
    let profile = builtin_profile(EnvironmentName::Development);

    let first = bootstrap(&profile, &store, &secrets()).await.unwrap();
    assert!(first.principal_created);
    assert_eq!(first.collections_created, vec!["users", "logs"]);
    assert_eq!(first.records_inserted, 3);

    let second = bootstrap(&profile, &store, &secrets()).await.unwrap();
    assert!(!second.changed_schema());
    assert_eq!(second.records_inserted, 0);

    assert_eq!(
        store.collection_names("app_development").await.unwrap(),
        vec!["users", "logs"]
    );
    assert_eq!(store.documents("app_development", "users").await.unwrap().len(), 3);
    assert_eq!(store.documents("app_development", "logs").await.unwrap().len(), 2);

    let hash = store
        .password_hash("app_development", "dev_user")
        .await
        .unwrap()
        .unwrap();
    assert!(bcrypt::verify("dev-secret", &hash).unwrap());
}

#[tokio::test]
async fn test_homologation_unique_index_is_enforced_by_sqlite() {
    let store = memory_store().await;
    let profile = builtin_profile(EnvironmentName::Staging);

    let summary = bootstrap(&profile, &store, &secrets()).await.unwrap();
    assert_eq!(summary.indexes_created, vec!["users.email_1", "users.created_at_-1"]);
    assert!(sqlite_index_exists(&store, "envboot_ix__app_homologation__users__email_1").await);

    let result = store
        .insert_one(
            "app_homologation",
            "users",
            doc(json!({"name": "Copy", "email": "user1.hml@example.com", "age": 50})),
        )
        .await;
    match result {
        Err(ClientError::DuplicateKey { field, .. }) => assert_eq!(field, "email"),
        other => panic!("unexpected result {:?}", other),
    }

    let found = store
        .find_one("app_homologation", "users", "email", &json!("user2.hml@example.com"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found["age"], json!(30));
    assert!(store
        .find_one("app_homologation", "users", "age", &json!(25))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_production_validator_and_text_index() {
    let store = memory_store().await;
    let profile = builtin_profile(EnvironmentName::Production);

    let summary = bootstrap(&profile, &store, &secrets()).await.unwrap();
    assert_eq!(summary.records_inserted, 0);

    let result = store
        .insert_one(
            "app_production",
            "users",
            doc(json!({"name": "Old", "email": "old@example.com", "age": 200})),
        )
        .await;
    assert!(matches!(result, Err(ClientError::Validation { .. })));

    // text indexes live in the catalog only
    let names: Vec<String> = store
        .list_indexes("app_production", "users")
        .await
        .unwrap()
        .into_iter()
        .map(|info| info.name)
        .collect();
    assert!(names.contains(&"name_text_email_text".to_string()));
    assert!(!sqlite_index_exists(&store, "envboot_ix__app_production__users__name_text_email_text").await);
    assert!(sqlite_index_exists(&store, "envboot_ix__app_production__audit__action_1_timestamp_-1").await);

    let logs = store.documents("app_production", "logs").await.unwrap();
    assert_eq!(logs[0]["security_level"], json!("high"));
}

#[tokio::test]
async fn test_unique_index_over_duplicates_leaves_no_index() {
    let store = memory_store().await;
    for _ in 0..2 {
        store
            .insert_one(
                "app_homologation",
                "users",
                doc(json!({"name": "Dup", "email": "dup@example.com", "age": 20})),
            )
            .await
            .unwrap();
    }

    let profile = builtin_profile(EnvironmentName::Staging);
    let error = bootstrap(&profile, &store, &secrets()).await.unwrap_err();
    assert!(matches!(
        error,
        BootstrapError::UniqueConstraintViolation { ref field, .. } if field == "email"
    ));
    assert!(store
        .list_indexes("app_homologation", "users")
        .await
        .unwrap()
        .is_empty());
    assert!(!sqlite_index_exists(&store, "envboot_ix__app_homologation__users__email_1").await);
}

#[tokio::test]
async fn test_catalog_conflicts() {
    let store = memory_store().await;
    store
        .create_collection("app_production", "metrics", None)
        .await
        .unwrap();
    assert!(matches!(
        store.create_collection("app_production", "metrics", None).await,
        Err(ClientError::AlreadyExists(_))
    ));
    assert!(matches!(
        store
            .set_validator("app_production", "missing", &Default::default())
            .await,
        Err(ClientError::NamespaceNotFound(_))
    ));

    store
        .create_index("app_production", "metrics", &IndexSpec::ascending("name"))
        .await
        .unwrap();
    // identical spec is a no-op
    store
        .create_index("app_production", "metrics", &IndexSpec::ascending("name"))
        .await
        .unwrap();
    assert!(matches!(
        store
            .create_index("app_production", "metrics", &IndexSpec::ascending("name").unique())
            .await,
        Err(ClientError::IndexOptionsConflict(_))
    ));
}

#[tokio::test]
async fn test_file_backed_runs_through_connector() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        database_url: format!("sqlite://{}", dir.path().join("envboot.db").display()),
        max_connections: 2,
        bcrypt_cost: 4,
        ..DatabaseConfig::default()
    };
    let connector = SqliteConnector::new(config.clone());
    let profile = builtin_profile(EnvironmentName::Staging);

    let first = bootstrap_with(&connector, &profile, &secrets()).await.unwrap();
    assert_eq!(first.records_inserted, 2);

    // state survives the closed pool
    let second = bootstrap_with(&connector, &profile, &secrets()).await.unwrap();
    assert!(!second.changed_schema());
    assert_eq!(second.records_inserted, 0);

    let store = SqliteDocumentStore::open(&config).await.unwrap();
    let planned = plan(&profile, &store).await.unwrap();
    assert!(planned.is_converged());
    assert_eq!(store.documents("app_homologation", "logs").await.unwrap().len(), 2);
    store.close().await;
}

#[tokio::test]
async fn test_unsupported_url_is_connection_error() {
    let connector = SqliteConnector::new(DatabaseConfig {
        database_url: "mongodb://localhost:27017".to_string(),
        ..DatabaseConfig::default()
    });
    let profile = builtin_profile(EnvironmentName::Development);
    let error = bootstrap_with(&connector, &profile, &secrets()).await.unwrap_err();
    assert!(matches!(error, BootstrapError::Connection(_)));
}

#[tokio::test]
async fn test_document_ids_are_scoped_to_their_collection() {
    let store = memory_store().await;
    for (database, collection) in [
        ("app_development", "users"),
        ("app_homologation", "users"),
        ("app_development", "logs"),
    ] {
        store
            .insert_one(database, collection, doc(json!({"_id": "u1", "name": "Same id"})))
            .await
            .unwrap();
    }

    match store
        .insert_one("app_development", "users", doc(json!({"_id": "u1"})))
        .await
    {
        Err(ClientError::DuplicateKey { field, value, .. }) => {
            assert_eq!(field, "_id");
            assert_eq!(value, "\"u1\"");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(store.documents("app_development", "users").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_caller_supplied_id_survives_round_trip() {
    let store = memory_store().await;
    store
        .insert_one("app_development", "users", doc(json!({"_id": 7, "name": "Numeric id"})))
        .await
        .unwrap();
    // string "7" is a different identity from number 7
    store
        .insert_one("app_development", "users", doc(json!({"_id": "7"})))
        .await
        .unwrap();
    store
        .insert_one("app_development", "users", doc(json!({"name": "Generated id"})))
        .await
        .unwrap();

    let documents = store.documents("app_development", "users").await.unwrap();
    assert_eq!(documents[0]["_id"], json!(7));
    assert_eq!(documents[1]["_id"], json!("7"));
    assert!(documents[2]["_id"].is_string());
}

#[tokio::test]
async fn test_natural_key_lookup_agrees_with_in_memory_client() {
    let store = memory_store().await;
    let memory = envboot::InMemoryClient::new();
    let record = doc(json!({"email": "a@example.com", "age": 25}));
    store.insert_one("db", "users", record.clone()).await.unwrap();
    memory.insert_one("db", "users", record).await.unwrap();

    for value in [json!(25), json!(25.0), json!("25"), json!(26)] {
        let in_sqlite = store.find_one("db", "users", "age", &value).await.unwrap();
        let in_memory = memory.find_one("db", "users", "age", &value).await.unwrap();
        assert_eq!(in_sqlite.is_some(), in_memory.is_some(), "lookup by {}", value);
    }
}
