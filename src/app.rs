use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::application::IngestOptions;
use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::ClearScope;
use crate::domain::staging::CollectionFilter;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::staging::StagingRepository;
use crate::infrastructure::db::warehouse::WarehouseRepository;
use crate::infrastructure::storage::ensure_dir;
use crate::interfaces::cli::{Cli, Commands};
use crate::interfaces::http::start_server;
use crate::interfaces::AppState;
use crate::shared::log_buffer::new_log_buffer;

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    // RUST_LOG wins over the configured filter.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::InitDb => init_db(&config).await,
        Commands::Ingest {
            path,
            date,
            stage_only,
            archive,
        } => {
            let state = build_state(config, !stage_only).await?;
            let path = path.unwrap_or_else(|| state.config.ingest.inbox_dir.clone());
            let options = IngestOptions {
                record_date: date,
                stage_only,
                archive,
            };
            let report = state.ingestion.ingest_path(&path, &options).await?;
            print_json(&report)?;
            if report.failed > 0 {
                return Err(AppError::Internal(format!(
                    "{} of {} file(s) failed",
                    report.failed, report.files
                )));
            }
            Ok(())
        }
        Commands::Process { collection } => {
            let filter = match collection.as_deref() {
                Some(raw) => CollectionFilter::parse(raw)?,
                None => CollectionFilter::All,
            };
            let state = build_state(config, true).await?;
            let summary = state.etl.run(&filter).await?;
            print_json(&summary)?;
            if summary.failed > 0 {
                return Err(AppError::Internal(format!(
                    "{} of {} collection(s) failed",
                    summary.failed, summary.collections
                )));
            }
            Ok(())
        }
        Commands::Stats => {
            let state = build_state(config, true).await?;
            let staging = state.staging.stats().await?;
            let warehouse = state.warehouse.stats().await?;
            print_json(&serde_json::json!({
                "staging": staging,
                "warehouse": warehouse,
            }))
        }
        Commands::Clear {
            staging,
            warehouse,
            source,
            date,
        } => {
            if !staging && !warehouse {
                return Err(AppError::ValidationError(
                    "Nothing to clear: pass --staging and/or --warehouse".to_string(),
                ));
            }
            let state = build_state(config, warehouse).await?;
            if staging {
                let dropped = state.staging.clear().await?;
                info!(dropped, "Staging cleared");
            }
            if warehouse {
                let scope = ClearScope {
                    source_system: source,
                    record_date: date,
                };
                let deleted = state.warehouse.clear(&scope).await?;
                info!(deleted, everything = scope.is_everything(), "Warehouse cleared");
            }
            Ok(())
        }
        Commands::Serve => {
            let warehouse = WarehouseRepository::connect(&config.warehouse).await?;
            warehouse.init_schema().await?;
            let state = Arc::new(assemble_state(config, warehouse).await?);
            let server = start_server(state)?;
            server.await?;
            Ok(())
        }
    }
}

async fn init_db(config: &AppConfig) -> Result<()> {
    for dir in [
        &config.ingest.inbox_dir,
        &config.ingest.processed_dir,
        &config.ingest.failed_dir,
    ] {
        ensure_dir(dir)?;
    }

    StagingRepository::connect(&config.staging.database_url, config.staging.max_connections)
        .await?;
    info!(url = %config.staging.database_url, "Staging schema ready");

    WarehouseRepository::connect(&config.warehouse).await?.init_schema().await
}

/// `eager_warehouse` false defers the Postgres connection until something uses it.
async fn build_state(config: AppConfig, eager_warehouse: bool) -> Result<AppState> {
    let warehouse = if eager_warehouse {
        WarehouseRepository::connect(&config.warehouse).await?
    } else {
        WarehouseRepository::connect_lazy(&config.warehouse)?
    };
    assemble_state(config, warehouse).await
}

async fn assemble_state(config: AppConfig, warehouse: WarehouseRepository) -> Result<AppState> {
    let staging = StagingRepository::connect(
        &config.staging.database_url,
        config.staging.max_connections,
    )
    .await?;

    Ok(AppState::new(
        config,
        Arc::new(staging),
        Arc::new(warehouse),
        new_log_buffer(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to render report: {}", e)))?;
    println!("{}", text);
    Ok(())
}
