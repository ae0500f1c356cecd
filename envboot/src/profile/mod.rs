//! Environment profiles
//!
//! An [`EnvironmentProfile`] is the static description of one target
//! environment: its database, principal, collections with validators and
//! indexes, and the seed records it should carry. Profiles hold secret
//! references only, never literal passwords.

pub mod builtin;
pub mod validator;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::client::{find_duplicate, Document, PrincipalGrant};
use crate::error::{BootstrapError, Result};
use crate::secrets::SecretRef;

pub use builtin::builtin_profile;
pub use validator::{FieldKind, FieldRule, ValidationError, Validator};

/// Target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentName {
    #[serde(alias = "dev")]
    Development,
    #[serde(alias = "homologation", alias = "hml")]
    Staging,
    #[serde(alias = "prod")]
    Production,
}

impl EnvironmentName {
    pub const ALL: [EnvironmentName; 3] = [
        EnvironmentName::Development,
        EnvironmentName::Staging,
        EnvironmentName::Production,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentName::Development => "development",
            EnvironmentName::Staging => "staging",
            EnvironmentName::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, EnvironmentName::Production)
    }
}

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentName {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(EnvironmentName::Development),
            "staging" | "homologation" | "hml" => Ok(EnvironmentName::Staging),
            "production" | "prod" => Ok(EnvironmentName::Production),
            other => Err(BootstrapError::InvalidProfile(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

/// Role granted to a principal on its database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrincipalRole {
    Read,
    ReadWrite,
    DbAdmin,
    DbOwner,
}

impl PrincipalRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalRole::Read => "read",
            PrincipalRole::ReadWrite => "readWrite",
            PrincipalRole::DbAdmin => "dbAdmin",
            PrincipalRole::DbOwner => "dbOwner",
        }
    }
}

impl fmt::Display for PrincipalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database user the environment's application connects as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalSpec {
    pub username: String,
    pub password: SecretRef,
    pub role: PrincipalRole,
    pub scope_database: String,
}

impl PrincipalSpec {
    pub fn grant(&self) -> PrincipalGrant {
        PrincipalGrant {
            username: self.username.clone(),
            role: self.role,
            scope_database: self.scope_database.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKey {
    pub field: String,
    #[serde(default)]
    pub direction: IndexDirection,
}

/// Index on a collection; keys are ordered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub text_search: bool,
}

impl IndexSpec {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            keys: vec![IndexKey {
                field: field.into(),
                direction: IndexDirection::Ascending,
            }],
            unique: false,
            text_search: false,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            keys: vec![IndexKey {
                field: field.into(),
                direction: IndexDirection::Descending,
            }],
            unique: false,
            text_search: false,
        }
    }

    /// Text-search index over the given fields
    pub fn text<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: fields
                .into_iter()
                .map(|field| IndexKey {
                    field: field.into(),
                    direction: IndexDirection::Ascending,
                })
                .collect(),
            unique: false,
            text_search: true,
        }
    }

    pub fn then(mut self, field: impl Into<String>, direction: IndexDirection) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Conventional index name, e.g. `email_1` or `action_1_timestamp_-1`
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|key| {
                let suffix = if self.text_search {
                    "text"
                } else {
                    match key.direction {
                        IndexDirection::Ascending => "1",
                        IndexDirection::Descending => "-1",
                    }
                };
                format!("{}_{}", key.field, suffix)
            })
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn fields(&self) -> Vec<&str> {
        self.keys.iter().map(|key| key.field.as_str()).collect()
    }
}

/// Desired state of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Validator>,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            validator: None,
            indexes: Vec::new(),
            natural_key: None,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn keyed_by(mut self, field: impl Into<String>) -> Self {
        self.natural_key = Some(field.into());
        self
    }
}

fn default_audit_collection() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

/// Static configuration describing one target environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    pub name: EnvironmentName,
    pub database_name: String,
    pub principal: PrincipalSpec,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
    #[serde(default)]
    pub seed_records: BTreeMap<String, Vec<Document>>,
    #[serde(default = "default_audit_collection")]
    pub audit_collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<String>,
    #[serde(default = "default_true")]
    pub stamp_timestamps: bool,
}

impl EnvironmentProfile {
    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn has_seed_records(&self) -> bool {
        self.seed_records.values().any(|records| !records.is_empty())
    }

    /// Marker written to the audit record; production defaults to `high`
    pub fn effective_security_level(&self) -> Option<String> {
        self.security_level
            .clone()
            .or_else(|| self.name.is_production().then(|| "high".to_string()))
    }

    /// SHA-256 over the serialized profile. Only secret references are
    /// serialized, so the digest is safe to log.
    pub fn digest(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }

    /// Check every invariant a profile must satisfy before it is applied
    pub fn validate(&self) -> Result<()> {
        if !is_namespace(&self.database_name) {
            return Err(invalid(format!(
                "database name '{}' must be 1-64 characters of [A-Za-z0-9_-]",
                self.database_name
            )));
        }

        let principal = &self.principal;
        if principal.username.trim().is_empty() {
            return Err(invalid("principal username is empty"));
        }
        if principal.scope_database != self.database_name {
            return Err(invalid(format!(
                "principal '{}' is scoped to '{}' but the profile targets '{}'",
                principal.username, principal.scope_database, self.database_name
            )));
        }

        let mut names = HashSet::new();
        for collection in &self.collections {
            self.validate_collection(collection)?;
            if !names.insert(collection.name.as_str()) {
                return Err(invalid(format!("collection '{}' declared twice", collection.name)));
            }
        }

        if self.collection(&self.audit_collection).is_none() {
            return Err(invalid(format!(
                "audit collection '{}' is not declared",
                self.audit_collection
            )));
        }

        if self.name.is_production() && self.has_seed_records() {
            return Err(invalid("production profiles must not carry seed records"));
        }

        for (collection_name, records) in &self.seed_records {
            let Some(collection) = self.collection(collection_name) else {
                return Err(invalid(format!(
                    "seed records target undeclared collection '{}'",
                    collection_name
                )));
            };
            if records.is_empty() {
                continue;
            }
            let Some(natural_key) = &collection.natural_key else {
                return Err(invalid(format!(
                    "collection '{}' has seed records but no natural key",
                    collection_name
                )));
            };

            let effective = dedup_by_natural_key(records, natural_key);
            for index in collection.indexes.iter().filter(|index| index.unique) {
                if let Some(key) = find_duplicate(effective.iter().copied(), index) {
                    return Err(invalid(format!(
                        "seed records for '{}' repeat {:?} on unique index {}",
                        collection_name,
                        key,
                        index.name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_collection(&self, collection: &CollectionSpec) -> Result<()> {
        if !is_namespace(&collection.name) {
            return Err(invalid(format!(
                "collection name '{}' must be 1-64 characters of [A-Za-z0-9_-]",
                collection.name
            )));
        }

        if let Some(validator) = &collection.validator {
            validator
                .compile_patterns()
                .map_err(|e| invalid(format!("collection '{}': {}", collection.name, e)))?;
        }

        if let Some(key) = &collection.natural_key {
            if !is_field_name(key) {
                return Err(invalid(format!(
                    "collection '{}' natural key '{}' is not a valid field name",
                    collection.name, key
                )));
            }
        }

        let mut index_names = HashSet::new();
        for index in &collection.indexes {
            if index.keys.is_empty() {
                return Err(invalid(format!(
                    "collection '{}' declares an index without keys",
                    collection.name
                )));
            }
            let mut fields = HashSet::new();
            for field in index.fields() {
                if !is_field_name(field) || !fields.insert(field) {
                    return Err(invalid(format!(
                        "index {} on '{}' has an invalid or repeated field '{}'",
                        index.name(),
                        collection.name,
                        field
                    )));
                }
            }
            if index.unique && index.text_search {
                return Err(invalid(format!(
                    "text index {} on '{}' cannot be unique",
                    index.name(),
                    collection.name
                )));
            }
            if !index_names.insert(index.name()) {
                return Err(invalid(format!(
                    "index {} declared twice on '{}'",
                    index.name(),
                    collection.name
                )));
            }
        }
        Ok(())
    }
}

/// Profiles applied side by side must not share an environment or database
pub fn validate_isolation(profiles: &[EnvironmentProfile]) -> Result<()> {
    let mut environments = HashSet::new();
    let mut databases = HashSet::new();
    for profile in profiles {
        if !environments.insert(profile.name) {
            return Err(invalid(format!("environment '{}' defined twice", profile.name)));
        }
        if !databases.insert(profile.database_name.as_str()) {
            return Err(invalid(format!(
                "database '{}' is shared by more than one environment",
                profile.database_name
            )));
        }
    }
    Ok(())
}

/// Seed records with later repeats of a natural key removed; records missing
/// the key are dropped here and reported by the seed step.
pub(crate) fn dedup_by_natural_key<'a>(records: &'a [Document], natural_key: &str) -> Vec<&'a Document> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|record| match record.get(natural_key) {
            Some(value) if !value.is_null() => seen.insert(value.to_string()),
            _ => false,
        })
        .collect()
}

fn invalid(message: impl Into<String>) -> BootstrapError {
    BootstrapError::InvalidProfile(message.into())
}

fn is_namespace(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_environment_aliases() {
        assert_eq!("hml".parse::<EnvironmentName>().unwrap(), EnvironmentName::Staging);
        assert_eq!("Homologation".parse::<EnvironmentName>().unwrap(), EnvironmentName::Staging);
        assert_eq!("prod".parse::<EnvironmentName>().unwrap(), EnvironmentName::Production);
        assert!("qa".parse::<EnvironmentName>().is_err());
    }

    #[test]
    fn test_index_names() {
        assert_eq!(IndexSpec::ascending("email").unique().name(), "email_1");
        assert_eq!(IndexSpec::descending("created_at").name(), "created_at_-1");
        assert_eq!(IndexSpec::text(["name", "email"]).name(), "name_text_email_text");
        assert_eq!(
            IndexSpec::ascending("action")
                .then("timestamp", IndexDirection::Descending)
                .name(),
            "action_1_timestamp_-1"
        );
    }

    #[test]
    fn test_builtin_profiles_are_valid_and_isolated() {
        let profiles: Vec<_> = EnvironmentName::ALL.iter().map(|name| builtin_profile(*name)).collect();
        for profile in &profiles {
            profile.validate().unwrap();
        }
        validate_isolation(&profiles).unwrap();
    }

    #[test]
    fn test_production_rejects_seed_records() {
        let mut profile = builtin_profile(EnvironmentName::Production);
        assert!(!profile.has_seed_records());

        profile.collections[0].natural_key = Some("email".to_string());
        profile.seed_records.insert(
            "users".to_string(),
            vec![record(json!({"name": "x", "email": "x@example.com", "age": 1}))],
        );
        assert!(matches!(profile.validate(), Err(BootstrapError::InvalidProfile(_))));
    }

    #[test]
    fn test_principal_scope_must_match_database() {
        let mut profile = builtin_profile(EnvironmentName::Development);
        profile.principal.scope_database = "admin".to_string();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_seed_requires_natural_key_and_declared_collection() {
        let mut profile = builtin_profile(EnvironmentName::Development);
        profile.collections[0].natural_key = None;
        assert!(profile.validate().is_err());

        let mut profile = builtin_profile(EnvironmentName::Development);
        profile
            .seed_records
            .insert("ghosts".to_string(), vec![record(json!({"email": "a@b.c"}))]);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_unique_index_checked_after_natural_key_dedup() {
        let mut profile = builtin_profile(EnvironmentName::Staging);
        let users = profile.seed_records.get_mut("users").unwrap();

        // repeating the natural key collapses to one record
        users.push(record(json!({"name": "Repeat", "email": "user1.hml@example.com", "age": 40})));
        profile.validate().unwrap();

        // a unique index on a different field must hold across distinct records
        profile.collections[0].indexes.push(IndexSpec::ascending("name").unique());
        let users = profile.seed_records.get_mut("users").unwrap();
        users.push(record(json!({"name": "Usuário HML 1", "email": "other@example.com", "age": 40})));
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_isolation_detects_shared_database() {
        let dev = builtin_profile(EnvironmentName::Development);
        let mut staging = builtin_profile(EnvironmentName::Staging);
        staging.database_name = dev.database_name.clone();
        assert!(validate_isolation(&[dev, staging]).is_err());
    }

    #[test]
    fn test_security_level_and_digest() {
        let production = builtin_profile(EnvironmentName::Production);
        let development = builtin_profile(EnvironmentName::Development);
        assert_eq!(production.effective_security_level().as_deref(), Some("high"));
        assert_eq!(development.effective_security_level(), None);

        assert_eq!(production.digest(), production.clone().digest());
        assert_ne!(production.digest(), development.digest());
        assert_eq!(production.digest().len(), 64);
    }
}
