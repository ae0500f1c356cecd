//! Shipped profile files

use std::path::PathBuf;

use envboot::{builtin_profile, validate_isolation, EnvironmentName};
use envboot_cli::config::load_profile_file;

fn config_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("config")
        .join(name)
}

#[test]
fn test_shipped_files_match_builtin_profiles() {
    for (file, name) in [
        ("development.toml", EnvironmentName::Development),
        ("staging.toml", EnvironmentName::Staging),
        ("production.toml", EnvironmentName::Production),
    ] {
        let profile = load_profile_file(&config_file(file)).unwrap();
        profile.validate().unwrap();
        assert_eq!(profile, builtin_profile(name), "{} drifted from the built-in", file);
        assert_eq!(profile.digest(), builtin_profile(name).digest());
    }
}

#[test]
fn test_shipped_files_are_isolated() {
    let profiles: Vec<_> = ["development.toml", "staging.toml", "production.toml"]
        .iter()
        .map(|file| load_profile_file(&config_file(file)).unwrap())
        .collect();
    validate_isolation(&profiles).unwrap();
}
