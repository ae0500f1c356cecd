//! Built-in profiles for the three standard environments

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::{
    CollectionSpec, EnvironmentName, EnvironmentProfile, FieldKind, FieldRule, IndexDirection,
    IndexSpec, PrincipalRole, PrincipalSpec, Validator,
};
use crate::client::Document;
use crate::secrets::SecretRef;

/// Baseline profile for an environment
pub fn builtin_profile(name: EnvironmentName) -> EnvironmentProfile {
    match name {
        EnvironmentName::Development => development(),
        EnvironmentName::Staging => staging(),
        EnvironmentName::Production => production(),
    }
}

fn principal(username: &str, password_env: &str, database: &str) -> PrincipalSpec {
    PrincipalSpec {
        username: username.to_string(),
        password: SecretRef::env(password_env),
        role: PrincipalRole::ReadWrite,
        scope_database: database.to_string(),
    }
}

fn users(records: Vec<Value>) -> BTreeMap<String, Vec<Document>> {
    let records = records
        .into_iter()
        .filter_map(|value| value.as_object().cloned())
        .collect();
    BTreeMap::from([("users".to_string(), records)])
}

fn development() -> EnvironmentProfile {
    EnvironmentProfile {
        name: EnvironmentName::Development,
        database_name: "app_development".to_string(),
        principal: principal("dev_user", "DEV_DB_PASSWORD", "app_development"),
        collections: vec![
            CollectionSpec::new("users").keyed_by("email"),
            CollectionSpec::new("logs"),
        ],
        seed_records: users(vec![
            json!({"name": "João Desenvolvedor", "email": "joao.dev@example.com", "age": 25}),
            json!({"name": "Maria Testadora", "email": "maria.test@example.com", "age": 28}),
            json!({"name": "Pedro QA", "email": "pedro.qa@example.com", "age": 30}),
        ]),
        audit_collection: "logs".to_string(),
        audit_message: Some("Database initialized with development data".to_string()),
        security_level: None,
        stamp_timestamps: true,
    }
}

fn staging() -> EnvironmentProfile {
    EnvironmentProfile {
        name: EnvironmentName::Staging,
        database_name: "app_homologation".to_string(),
        principal: principal("hml_user", "HML_DB_PASSWORD", "app_homologation"),
        collections: vec![
            CollectionSpec::new("users")
                .keyed_by("email")
                .with_index(IndexSpec::ascending("email").unique())
                .with_index(IndexSpec::descending("created_at")),
            CollectionSpec::new("logs"),
            CollectionSpec::new("audit"),
        ],
        seed_records: users(vec![
            json!({"name": "Usuário HML 1", "email": "user1.hml@example.com", "age": 25}),
            json!({"name": "Usuário HML 2", "email": "user2.hml@example.com", "age": 30}),
        ]),
        audit_collection: "logs".to_string(),
        audit_message: Some("Database initialized for the homologation environment".to_string()),
        security_level: None,
        stamp_timestamps: true,
    }
}

/// Validator applied to production users
pub fn production_user_validator() -> Validator {
    Validator::new()
        .require("name")
        .require("email")
        .require("age")
        .property(
            "name",
            FieldRule::of(FieldKind::String).describe("name is required and must be a string"),
        )
        .property(
            "email",
            FieldRule::of(FieldKind::String)
                .pattern("^.+@.+$")
                .describe("email must be a valid address"),
        )
        .property(
            "age",
            FieldRule::of(FieldKind::Int)
                .range(0.0, 150.0)
                .describe("age must be an integer between 0 and 150"),
        )
}

fn production() -> EnvironmentProfile {
    EnvironmentProfile {
        name: EnvironmentName::Production,
        database_name: "app_production".to_string(),
        principal: principal("prod_user", "PROD_DB_PASSWORD", "app_production"),
        collections: vec![
            CollectionSpec::new("users")
                .with_validator(production_user_validator())
                .with_index(IndexSpec::ascending("email").unique())
                .with_index(IndexSpec::descending("created_at"))
                .with_index(IndexSpec::text(["name", "email"])),
            CollectionSpec::new("logs").with_index(IndexSpec::descending("timestamp")),
            CollectionSpec::new("audit").with_index(
                IndexSpec::ascending("action").then("timestamp", IndexDirection::Descending),
            ),
            CollectionSpec::new("metrics"),
        ],
        seed_records: BTreeMap::new(),
        audit_collection: "logs".to_string(),
        audit_message: Some("Database initialized for the production environment".to_string()),
        security_level: Some("high".to_string()),
        stamp_timestamps: true,
    }
}
