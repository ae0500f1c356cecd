//! envboot command-line interface
//!
//! Applies, plans and inspects environment profiles against the bundled
//! SQLite document store.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use envboot::{
    bootstrap_with, builtin_profile, plan, validate_isolation, DocumentClient, EnvironmentName,
    SystemSecretSource,
};
use envboot_cli::config::{load_profile_file, parse_environment};
use envboot_cli::{CliConfig, SqliteConnector, SqliteDocumentStore};

#[derive(Parser)]
#[command(name = "envboot")]
#[command(about = "Idempotent environment bootstrap for document databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Target environment (development, staging/homologation, production)
    #[arg(short, long, global = true)]
    env: Option<String>,

    /// Profile file overriding the built-in profile
    #[arg(short, long, global = true)]
    profile: Option<PathBuf>,

    /// Database URL override
    #[arg(short, long, global = true)]
    database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the environment and print the run summary
    Apply,
    /// Show what apply would change without changing anything
    Plan,
    /// Check that the database is reachable
    Health,
    /// Print the resolved profile
    Show,
    /// Validate every built-in profile and their isolation
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| format!("envboot={},envboot_cli={}", log_level, log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("envboot v{}", envboot::VERSION);

    let config = resolve_config(&cli)?;
    match cli.command {
        Commands::Apply => handle_apply(&config).await,
        Commands::Plan => handle_plan(&config).await,
        Commands::Health => handle_health(&config).await,
        Commands::Show => handle_show(&config),
        Commands::Check => handle_check(&config),
    }
}

/// Environment variables first, then command-line overrides
fn resolve_config(cli: &Cli) -> Result<CliConfig> {
    let mut config = CliConfig::from_env().context("invalid environment configuration")?;
    if let Some(env) = &cli.env {
        config.environment = Some(parse_environment(env)?);
    }
    if let Some(path) = &cli.profile {
        config.profile_path = Some(path.clone());
    }
    if let Some(url) = &cli.database_url {
        config.database.database_url = url.clone();
    }
    Ok(config)
}

async fn handle_apply(config: &CliConfig) -> Result<()> {
    let profile = config.load_profile()?;
    let connector = SqliteConnector::new(config.database.clone());

    let summary = match bootstrap_with(&connector, &profile, &SystemSecretSource).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Bootstrap failed: {}", e);
            return Err(e).with_context(|| {
                format!(
                    "failed to bootstrap {} ({})",
                    profile.name, profile.database_name
                )
            });
        }
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn handle_plan(config: &CliConfig) -> Result<()> {
    let profile = config.load_profile()?;
    let store = SqliteDocumentStore::open(&config.database).await?;
    let result = plan(&profile, &store).await;
    store.close().await;

    let planned = result.with_context(|| format!("failed to plan {}", profile.name))?;
    println!("{}", serde_json::to_string_pretty(&planned)?);
    if planned.has_conflicts() {
        bail!(
            "{} conflicts must be resolved before applying",
            planned.conflicts.len()
        );
    }
    Ok(())
}

async fn handle_health(config: &CliConfig) -> Result<()> {
    let store = SqliteDocumentStore::open(&config.database)
        .await
        .context("database is unreachable")?;
    let result = store.ping().await;
    store.close().await;
    result.context("database health check failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "status": "healthy",
            "database_url": config.database.database_url,
        }))?
    );
    Ok(())
}

fn handle_show(config: &CliConfig) -> Result<()> {
    let profile = config.load_profile()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "digest": profile.digest(),
            "profile": profile,
        }))?
    );
    Ok(())
}

fn handle_check(config: &CliConfig) -> Result<()> {
    let mut profiles: Vec<_> = EnvironmentName::ALL
        .iter()
        .map(|name| builtin_profile(*name))
        .collect();

    if let Some(path) = &config.profile_path {
        let custom = load_profile_file(path)?;
        profiles.retain(|profile| profile.name != custom.name);
        profiles.push(custom);
    }

    for profile in &profiles {
        profile
            .validate()
            .with_context(|| format!("{} profile is invalid", profile.name))?;
        info!("{} profile is valid ({})", profile.name, profile.database_name);
    }
    validate_isolation(&profiles).context("profiles are not isolated")?;

    let names: Vec<_> = profiles.iter().map(|profile| profile.name.as_str()).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "valid": names }))?
    );
    Ok(())
}
