use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use censusgen::config::{load_config, resolve_config_path};
use censusgen::db::{default_database_path, Database};
use censusgen::{logging, CensusWorker, Config, ConfigError, SqliteUploadStore, UploadStore};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = resolve_config_path(std::env::args().nth(1));
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("censusgen: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("censusgen: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Starting censusgen v{} with {}",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> censusgen::Result<()> {
    let db_path = config
        .database
        .path
        .clone()
        .or_else(default_database_path)
        .ok_or_else(|| ConfigError::Validation {
            message: "database.path is not set and no data directory is available".to_string(),
        })?;
    info!("Using database {}", db_path.display());

    let store: Arc<dyn UploadStore> = Arc::new(SqliteUploadStore::new(Database::open(&db_path)?));
    let worker = CensusWorker::from_config(&config, store)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown requested");
        flag.store(true, Ordering::Relaxed);
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    worker.run(shutdown).await;
    Ok(())
}
