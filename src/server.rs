use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{config::Config, handlers, handlers::AppState};

/// Start the gateway server.
///
/// The gateway is a stateless request processor: all backend selection comes
/// from per-request headers, so the server setup is just routing, limits,
/// and graceful shutdown.
pub async fn start_server(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    let state = AppState::new(Arc::new(config.clone()));

    let app = create_router(state, &config);

    info!("Starting Bedrock gateway on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped gracefully");
    Ok(())
}

/// Create the Axum router with all routes and middleware.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(handlers::chat_completions::handle))
        .route("/v1/completions", post(handlers::completions::handle))
        .route("/v1/embeddings", post(handlers::embeddings::handle))
        .route("/v1/images/generations", post(handlers::images::handle))
        .route("/v1/batches", post(handlers::batches::create).get(handlers::batches::list))
        .route("/v1/batches/:id", get(handlers::batches::retrieve))
        .route("/v1/batches/:id/cancel", post(handlers::batches::cancel))
        .route("/v1/batches/:id/output", get(handlers::batches::output))
        .route(
            "/v1/fine_tuning/jobs",
            post(handlers::fine_tuning::create).get(handlers::fine_tuning::list),
        )
        .route("/v1/fine_tuning/jobs/:id", get(handlers::fine_tuning::retrieve))
        .route(
            "/v1/fine_tuning/jobs/:id/cancel",
            post(handlers::fine_tuning::cancel),
        )
        .route("/v1/files", post(handlers::files::upload).get(handlers::files::list))
        .route(
            "/v1/files/:id",
            get(handlers::files::retrieve).delete(handlers::files::delete),
        )
        .route("/v1/files/:id/content", get(handlers::files::content))
        .with_state(state);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(api)
        .layer(DefaultBodyLimit::max(
            config.limits.max_body_mb * 1024 * 1024,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_create_router() {
        let config = Config::default();
        let state = AppState::new(Arc::new(config.clone()));
        let _app = create_router(state, &config);
        // Router created successfully - no panic
    }
}
