use axum::routing::{delete, get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use repo_qa::api;
use repo_qa::config::Config;
use repo_qa::state::AppState;

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
        "LLM provider: {} ({}), answer models: {}",
        config.llm.provider,
        config.llm.base_url,
        config.llm.answer_models.join(", ")
    );

    let state = AppState::new(config.clone()).await?;

    let app = Router::new()
        .route("/api/repos", get(api::repos::list_repos))
        .route("/api/repos", post(api::repos::add_repo))
        .route("/api/repos/{id}", delete(api::repos::delete_repo))
        .route("/api/repos/{id}/reindex", post(api::repos::reindex_repo))
        .route("/api/search", post(api::search::search))
        .route("/api/ask", post(api::ask::ask))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
