//! Secret references and their run-time resolution
//!
//! Profiles only ever carry a [`SecretRef`]. The literal password is looked up
//! when a principal has to be created and is handed straight to the client.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a secret value lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretRef {
    /// Load from an environment variable
    Env(String),
    /// Load from a file, e.g. a Docker or Kubernetes secret mount
    File(PathBuf),
}

impl SecretRef {
    pub fn env(name: impl Into<String>) -> Self {
        SecretRef::Env(name.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        SecretRef::File(path.into())
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Env(name) => write!(f, "env:{}", name),
            SecretRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// A resolved secret value
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// bcrypt hash of the secret, for stores that keep credentials locally
    pub fn bcrypt_hash(&self, cost: u32) -> Result<String, SecretError> {
        bcrypt::hash(&self.0, cost).map_err(|e| SecretError::Hash(e.to_string()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret is empty: {0}")]
    Empty(String),

    #[error("Failed to read secret {reference}: {reason}")]
    Io { reference: String, reason: String },

    #[error("Failed to hash secret: {0}")]
    Hash(String),
}

/// Resolves secret references to values
pub trait SecretSource: Send + Sync {
    fn resolve(&self, reference: &SecretRef) -> Result<Secret, SecretError>;
}

/// Resolves references against the process environment and filesystem
#[derive(Debug, Default, Clone)]
pub struct SystemSecretSource;

impl SecretSource for SystemSecretSource {
    fn resolve(&self, reference: &SecretRef) -> Result<Secret, SecretError> {
        let value = match reference {
            SecretRef::Env(name) => {
                std::env::var(name).map_err(|_| SecretError::NotFound(reference.to_string()))?
            }
            SecretRef::File(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => SecretError::NotFound(reference.to_string()),
                    _ => SecretError::Io {
                        reference: reference.to_string(),
                        reason: e.to_string(),
                    },
                })?;
                // secret mounts usually end with a newline
                raw.trim_end_matches(['\r', '\n']).to_string()
            }
        };

        if value.is_empty() {
            return Err(SecretError::Empty(reference.to_string()));
        }
        Ok(Secret(value))
    }
}

/// Fixed reference → value table
#[derive(Debug, Default, Clone)]
pub struct StaticSecretSource {
    values: HashMap<SecretRef, Secret>,
}

impl StaticSecretSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: SecretRef, value: impl Into<String>) -> Self {
        self.values.insert(reference, Secret::new(value));
        self
    }
}

impl SecretSource for StaticSecretSource {
    fn resolve(&self, reference: &SecretRef) -> Result<Secret, SecretError> {
        match self.values.get(reference) {
            Some(secret) if secret.expose().is_empty() => {
                Err(SecretError::Empty(reference.to_string()))
            }
            Some(secret) => Ok(secret.clone()),
            None => Err(SecretError::NotFound(reference.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_file_secret_strips_trailing_newline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "s3cr3t-value").unwrap();

        let reference = SecretRef::file(file.path());
        let secret = SystemSecretSource.resolve(&reference).unwrap();
        assert_eq!(secret.expose(), "s3cr3t-value");
    }

    #[test]
    fn test_missing_sources() {
        let missing_env = SecretRef::env("ENVBOOT_TEST_SECRET_THAT_DOES_NOT_EXIST");
        assert!(matches!(
            SystemSecretSource.resolve(&missing_env),
            Err(SecretError::NotFound(_))
        ));

        let missing_file = SecretRef::file("/nonexistent/envboot/secret");
        assert!(matches!(
            SystemSecretSource.resolve(&missing_file),
            Err(SecretError::NotFound(_))
        ));
    }

    #[test]
    fn test_static_source() {
        let reference = SecretRef::env("DEV_DB_PASSWORD");
        let source = StaticSecretSource::new()
            .with(reference.clone(), "dev-secret")
            .with(SecretRef::env("BLANK"), "");

        assert_eq!(source.resolve(&reference).unwrap().expose(), "dev-secret");
        assert!(matches!(
            source.resolve(&SecretRef::env("BLANK")),
            Err(SecretError::Empty(_))
        ));
        assert!(matches!(
            source.resolve(&SecretRef::env("OTHER")),
            Err(SecretError::NotFound(_))
        ));
    }

    #[test]
    fn test_secret_ref_toml_shape() {
        #[derive(Deserialize)]
        struct Holder {
            password: SecretRef,
        }

        let holder: Holder = toml::from_str(r#"password = { env = "PROD_DB_PASSWORD" }"#).unwrap();
        assert_eq!(holder.password, SecretRef::env("PROD_DB_PASSWORD"));
        assert_eq!(holder.password.to_string(), "env:PROD_DB_PASSWORD");
    }
}
