use tracing_subscriber::EnvFilter;

use query_engine::api;
use query_engine::config::Config;
use query_engine::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Model backends: {} ({})",
        config
            .llm
            .models
            .iter()
            .map(|m| m.id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        config.llm.base_url
    );
    match &config.knowledge.base_url {
        Some(url) => tracing::info!("Knowledge index: {url} ({})", config.knowledge.collection),
        None => tracing::warn!("KNOWLEDGE_BASE_URL not set, retrieval answers will have no context"),
    }

    let state = AppState::new(config.clone())?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
