//! TSM Migrate - Telemetry store migration service

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tsm_common::logging::{init_logging, LogConfig, LogLevel};
use tsm_common::MigrateError;
use tsm_migrate::config::Config;
use tsm_migrate::ingest::IlpHttpClient;
use tsm_migrate::orchestrator::{Migrator, RunMode, TargetCatalog};
use tsm_migrate::progress::RedisProgressStore;
use tsm_migrate::storage::{config::StorageConfig, S3LogStore};

#[derive(Parser, Debug)]
#[command(name = "tsm-migrate")]
#[command(author, version, about = "Telemetry store migration service")]
struct Cli {
    /// JSON file with currently-defined targets and packets
    #[arg(short, long, default_value = "./targets.json")]
    targets: String,

    /// Run a single pass and exit instead of running as a service
    #[arg(long)]
    once: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the verbose flag
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if std::env::var("TSM_LOG_LEVEL").is_err() {
        log_config.level = log_level;
    }
    log_config.log_file_prefix = "tsm-migrate".to_string();

    init_logging(&log_config)?;

    let config = match Config::load() {
        Ok(config) => config,
        Err(MigrateError::Disabled) => {
            info!("Migration is disabled (set TSM_MIGRATION_ENABLED=true to enable)");
            return Ok(());
        },
        Err(e) => return Err(e).context("loading configuration"),
    };

    let catalog_json = std::fs::read_to_string(&cli.targets)
        .with_context(|| format!("reading target catalog {}", cli.targets))?;
    let catalog = TargetCatalog::from_json(&catalog_json)?;
    if catalog.targets().is_empty() {
        warn!(file = %cli.targets, "Target catalog is empty; nothing will be migrated");
    }

    let storage_config = StorageConfig::from_env()?;
    let store = S3LogStore::new(storage_config, &config.scope).await?;

    let progress = RedisProgressStore::connect(&config.redis_url, &config.scope).await?;

    let sink = IlpHttpClient::new(
        &config.tsdb.host,
        config.tsdb.http_port,
        config.tsdb.username.clone(),
        config.tsdb.password.clone(),
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received; finishing in-flight work");
            signal_token.cancel();
        }
    });

    let mode = if cli.once {
        RunMode::OneShot
    } else {
        RunMode::Service
    };

    let migrator = Migrator::new(
        config,
        catalog,
        Arc::new(store),
        Arc::new(sink),
        Arc::new(progress),
        cancel,
        mode,
    );

    migrator.run().await?;

    info!("Migration service stopped");
    Ok(())
}
