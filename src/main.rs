use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use transtag::cache::InMemoryCache;
use transtag::config::Config;
use transtag::orchestrator::TaggingOrchestrator;
use transtag::record::SqliteContentStore;
use transtag::schema::{DeclaredRelationship, FieldPolicy, SchemaDiscovery};
use transtag::scheduler;
use transtag::store::TranslationStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("transtag=info".parse()?),
        )
        .init();

    info!("Starting transtag");

    // Load configuration from environment
    let config = Arc::new(Config::from_env()?);

    // Declared multi-hop relationships, if configured
    let declared: Vec<DeclaredRelationship> = match &config.relationships_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .context(format!("Failed to read relationships file {}", path))?;
            serde_json::from_str(&raw)
                .context(format!("Failed to parse relationships file {}", path))?
        }
        None => Vec::new(),
    };
    info!("Loaded {} declared relationships", declared.len());

    // Wire up the engine
    let cache = Arc::new(InMemoryCache::new());
    let host = Arc::new(SqliteContentStore::open(&config.content_db)?);
    let store = TranslationStore::new(&config.translations_db, cache)?;
    let discovery = Arc::new(SchemaDiscovery::new(
        host.clone(),
        FieldPolicy::default(),
        declared,
    ));
    let orchestrator = Arc::new(TaggingOrchestrator::new(
        host,
        store,
        discovery,
        config.scope_level,
    ));

    // Initial pass, then run on schedule
    scheduler::run_tagging_job(&config, &orchestrator).await?;
    let _scheduler = scheduler::start_scheduler(Arc::clone(&config), orchestrator).await?;

    info!("transtag running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
