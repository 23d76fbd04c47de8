use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resume_draft::config::Config;
use resume_draft::generation::TextGenerator;
use resume_draft::llm_client::{self, LlmClient};
use resume_draft::routes::build_router;
use resume_draft::state::AppState;
use resume_draft::store::build_repository;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "resume_draft={level},resume_draft_api={level},tower_http={level}",
                level = &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume draft API v{}", env!("CARGO_PKG_VERSION"));

    // Persistence backend: decided here, once
    let repo = build_repository(&config)?;
    info!("Persistence backend: {:?}", repo.kind());

    // AI drafting is optional
    let generator: Option<Arc<dyn TextGenerator>> = match &config.anthropic_api_key {
        Some(key) => {
            let llm = LlmClient::new(key.clone())?;
            info!("LLM client initialized (model: {})", llm_client::MODEL);
            Some(Arc::new(llm))
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set; AI drafting endpoints will return 503");
            None
        }
    };

    let state = AppState {
        repo,
        generator,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the form host is deployed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
