//! Headless runner.
//!
//! Loads the configuration, opens the archive and resumes any video
//! generations that were still running when the previous session ended.
//!
//! Usage: `atelier [CONFIG]`. Without an argument the path is taken from
//! `ATELIER_CONFIG`; when neither is set the built-in defaults are used.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use secrecy::SecretString;

use atelier::config::load_config;
use atelier::{
    init_logging, AtelierError, ConfigError, Database, Gateway, GeminiClient, JobOutcome,
    Orchestrator, OrchestratorSettings, SqliteArchive, StaticCredentials, StudioConfig,
};

const CONFIG_ENV_VAR: &str = "ATELIER_CONFIG";

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}

fn load(path: Option<PathBuf>) -> Result<StudioConfig, AtelierError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(StudioConfig::default()),
    }
}

async fn run(config: StudioConfig) -> Result<(usize, usize), AtelierError> {
    let db_path = config
        .resolved_database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "No databasePath configured and no home directory to default to".to_string(),
        })?;
    let db = Database::open(&db_path)?;
    log::info!("Archive schema version {}", db.schema_version()?);
    let archive = Arc::new(SqliteArchive::new(db));

    let credentials = Arc::new(StaticCredentials::from_source(&config.api.key_source())?);
    let client = GeminiClient::new(
        &config.api.base_url,
        config
            .api
            .key_source()
            .resolve_optional()?
            .unwrap_or_else(|| SecretString::from(String::new())),
        config.api.request_timeout(),
    )
    .map_err(atelier::GatewayError::from)?;
    let gateway = Gateway::new(Arc::new(client), config.polling.settings());

    let orchestrator = Orchestrator::new(
        archive,
        gateway,
        credentials,
        OrchestratorSettings::from_config(&config),
    );

    if !orchestrator.ensure_credential().await {
        log::warn!("No API key available; resumed operations will fail to authenticate");
    }

    let submission = orchestrator.start().await?;
    if submission.is_empty() {
        log::info!("No pending operations to resume");
        return Ok((0, 0));
    }

    log::info!("Resuming {} pending operations", submission.len());
    let outcomes = submission.join().await;
    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    for outcome in &outcomes {
        match outcome {
            JobOutcome::Completed { job_id, item } => {
                log::info!("Recovered job {} as gallery item {}", job_id, item.id)
            }
            JobOutcome::Failed { job_id, reason, .. } => {
                log::warn!("Recovery of job {} failed: {}", job_id, reason)
            }
        }
    }
    Ok((completed, outcomes.len() - completed))
}

#[tokio::main]
async fn main() -> ExitCode {
    let path = config_path();
    let config = match load(path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(Default::default());
            log::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.logging.format);

    log::info!("Starting atelier v{}", env!("CARGO_PKG_VERSION"));

    match run(config).await {
        Ok((completed, failed)) => {
            log::info!("Recovery finished: {} completed, {} failed", completed, failed);
            if failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
