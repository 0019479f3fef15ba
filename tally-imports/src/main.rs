//! tally-imports - document ingestion service
//!
//! Parses uploaded ERP documents (CSV, spreadsheets, XML e-invoices, JSON,
//! scanned PDFs via OCR), classifies them, validates every record and
//! promotes validated records into the business tables.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tally_common::config::{load_toml_config, RootFolderInitializer, RootFolderResolver};
use tally_common::time::SystemClock;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tally_imports::classification::{build_provider, ClassificationEngine, ScoringWeights};
use tally_imports::config::{resolve_ai_api_key, ImportsConfig};
use tally_imports::feedback::RollbackManager;
use tally_imports::parsers::ocr::{DisabledOcr, HttpOcrService, OcrService};
use tally_imports::services::FsBlobStore;
use tally_imports::AppState;

const MODULE_NAME: &str = "tally-imports";

#[derive(Debug, Parser)]
#[command(name = "tally-imports", version, about = "Document ingestion service")]
struct Args {
    /// Configuration file (defaults to ~/.config/tally/tally-imports.toml)
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database and stored uploads
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen address, overrides `imports.listen`
    #[arg(long, env = "TALLY_IMPORTS_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = load_toml_config(MODULE_NAME, args.config.as_deref())?;

    // RUST_LOG wins over the [logging] level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tally-imports (document ingestion) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ImportsConfig::from_toml(&toml_config)?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    // Step 1: Resolve and initialize the root folder
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder)
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    // Step 2: Open database and create imports tables
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = tally_common::db::init_database(&db_path).await?;
    tally_imports::db::init_import_tables(&db).await?;

    // Step 3: Classification engine (pinned snapshot overrides built-in weights)
    let api_key = resolve_ai_api_key(&db, &toml_config).await?;
    let provider = build_provider(&config.ai, api_key, Arc::new(SystemClock)).context("AI provider setup failed")?;
    let engine = Arc::new(ClassificationEngine::new(
        ScoringWeights::defaults(),
        provider,
        config.ai.threshold,
        Duration::from_millis(config.ai.timeout_ms),
    ));
    match RollbackManager::activate_pinned(&db, &engine).await? {
        Some(version) => info!(version, "Pinned classifier snapshot activated"),
        None => info!("Using built-in classifier weights"),
    }

    // Step 4: OCR backend and blob store
    let ocr: Arc<dyn OcrService> = match &config.ocr.endpoint {
        Some(endpoint) => Arc::new(
            HttpOcrService::new(endpoint.clone(), Duration::from_millis(config.ocr.timeout_ms))
                .context("OCR client setup failed")?,
        ),
        None => {
            warn!("No OCR endpoint configured; scanned documents will be rejected");
            Arc::new(DisabledOcr)
        }
    };
    let blobs = Arc::new(FsBlobStore::new(initializer.blob_path()));

    let listen = config.listen.clone();
    let state = AppState::new(db, config, engine, blobs, ocr);
    let shutdown = state.shutdown.clone();
    let app = tally_imports::build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!("Listening on http://{}", listen);
    info!("Health check: http://{}/health", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
