use clap::Parser;
use r2d2::Pool;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use nl_analyst::config::{AppConfig, CliArgs};
use nl_analyst::corpus::Corpus;
use nl_analyst::db::db_pool::DuckDbConnectionManager;
use nl_analyst::llm::LlmManager;
use nl_analyst::util::logging::init_tracing;
use nl_analyst::web;
use nl_analyst::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Load the document corpus
    info!("Loading corpus from {}", config.corpus.docs_dir);
    let corpus = Corpus::load(Path::new(&config.corpus.docs_dir))?;
    if corpus.is_empty() {
        warn!(
            "Corpus at {} contains no document chunks; retrieval will return nothing",
            config.corpus.docs_dir
        );
    }
    info!("Loaded {} document chunk(s)", corpus.len());

    info!("Initializing DuckDB connection pool");
    let db_manager = DuckDbConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    // Create application state
    let app_state = Arc::new(AppState::new(config.clone(), pool, &corpus, llm_manager));

    // Start the web server
    info!(
        "Starting NL-Analyst server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(std::io::Error::other(e.to_string()).into());
        }
    }

    Ok(())
}
