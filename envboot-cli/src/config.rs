//! CLI configuration
//!
//! Connection settings come from the process environment; the desired state
//! comes from a TOML profile file or from the built-in profile of the
//! selected environment.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use envboot::{builtin_profile, EnvironmentName, EnvironmentProfile};

use crate::database::DatabaseConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Failed to read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse profile {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Profile {path} describes {found} but the selected environment is {expected}")]
    EnvironmentMismatch {
        path: PathBuf,
        expected: EnvironmentName,
        found: EnvironmentName,
    },
}

/// Resolved CLI settings
#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    /// Explicitly selected environment; `development` when unset
    pub environment: Option<EnvironmentName>,
    pub profile_path: Option<PathBuf>,
    pub database: DatabaseConfig,
}

impl CliConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = match std::env::var("ENV") {
            Ok(value) if !value.trim().is_empty() => Some(parse_environment(&value)?),
            _ => None,
        };

        let profile_path = std::env::var("ENVBOOT_PROFILE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            profile_path,
            database: DatabaseConfig::from_env(),
        })
    }

    pub fn environment(&self) -> EnvironmentName {
        self.environment.unwrap_or(EnvironmentName::Development)
    }

    /// The profile to apply: the configured TOML file, else the built-in one
    pub fn load_profile(&self) -> Result<EnvironmentProfile, ConfigError> {
        let Some(path) = &self.profile_path else {
            info!("Using built-in profile for {}", self.environment());
            return Ok(builtin_profile(self.environment()));
        };

        let profile = load_profile_file(path)?;
        if let Some(expected) = self.environment {
            if expected != profile.name {
                return Err(ConfigError::EnvironmentMismatch {
                    path: path.clone(),
                    expected,
                    found: profile.name,
                });
            }
        }
        info!("Loaded {} profile from {}", profile.name, path.display());
        Ok(profile)
    }
}

pub fn parse_environment(value: &str) -> Result<EnvironmentName, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvironment(value.to_string()))
}

pub fn load_profile_file(path: &Path) -> Result<EnvironmentProfile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    profile_from_toml(&raw).map_err(|reason| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse a profile from TOML text
pub fn profile_from_toml(raw: &str) -> Result<EnvironmentProfile, String> {
    toml::from_str(raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
name = "hml"
database_name = "app_homologation"

[principal]
username = "hml_user"
password = { env = "HML_DB_PASSWORD" }
role = "readWrite"
scope_database = "app_homologation"

[[collections]]
name = "users"
natural_key = "email"

[[collections.indexes]]
keys = [{ field = "email" }]
unique = true

[[collections]]
name = "logs"

[[seed_records.users]]
name = "Usuário HML 1"
email = "user1.hml@example.com"
age = 25
"#;

    fn config_with(path: Option<PathBuf>, environment: Option<EnvironmentName>) -> CliConfig {
        CliConfig {
            environment,
            profile_path: path,
            database: DatabaseConfig::in_memory(),
        }
    }

    #[test]
    fn test_profile_from_toml_applies_defaults() {
        let profile = profile_from_toml(MINIMAL).unwrap();
        assert_eq!(profile.name, EnvironmentName::Staging);
        assert_eq!(profile.audit_collection, "logs");
        assert!(profile.stamp_timestamps);
        assert_eq!(profile.collections[0].indexes[0].name(), "email_1");
        assert_eq!(profile.seed_records["users"].len(), 1);
        profile.validate().unwrap();
    }

    #[test]
    fn test_profile_from_toml_rejects_literal_password() {
        let raw = MINIMAL.replace(r#"{ env = "HML_DB_PASSWORD" }"#, r#""hml123""#);
        assert!(profile_from_toml(&raw).is_err());
    }

    #[test]
    fn test_builtin_profile_when_no_file() {
        let config = config_with(None, Some(EnvironmentName::Production));
        let profile = config.load_profile().unwrap();
        assert_eq!(profile.database_name, "app_production");

        let config = config_with(None, None);
        assert_eq!(config.load_profile().unwrap().name, EnvironmentName::Development);
    }

    #[test]
    fn test_profile_file_must_match_selected_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = config_with(Some(file.path().to_path_buf()), None);
        assert_eq!(config.load_profile().unwrap().name, EnvironmentName::Staging);

        let config = config_with(
            Some(file.path().to_path_buf()),
            Some(EnvironmentName::Production),
        );
        assert!(matches!(
            config.load_profile(),
            Err(ConfigError::EnvironmentMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_profile_file() {
        let config = config_with(Some(PathBuf::from("/nonexistent/profile.toml")), None);
        assert!(matches!(config.load_profile(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_parse_environment_aliases() {
        assert_eq!(parse_environment("hml").unwrap(), EnvironmentName::Staging);
        assert_eq!(parse_environment("PROD").unwrap(), EnvironmentName::Production);
        assert!(parse_environment("qa").is_err());
    }
}
